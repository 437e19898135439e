//! `Dialog`: one participant's live conversation.
//!
//! Stored state is authoritative. Every inbound event first reconciles the
//! cached state against storage, then hands the event to the active state's
//! handler. Handlers answer with a [`Directive`] that the dialog applies:
//!
//! 1. exit hook of the current state (silence-aware),
//! 2. install the next state, refresh the participant, persist,
//! 3. enter hook of the next state, which may yield another directive.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::channels::{InboundEvent, InboundKind, MessageEdit, Messenger, OutgoingMessage};
use crate::error::{DialogError, Error};
use crate::meetings::Matchmaker;
use crate::participants::{Direction, MessageLogEntry, Participant};
use crate::store::Database;

use super::handlers;
use super::replies;
use super::state::{DialogState, StateContext};

/// Shared components every dialog talks to.
pub struct DialogDeps {
    pub db: Arc<dyn Database>,
    pub messenger: Arc<dyn Messenger>,
    pub matchmaker: Arc<Matchmaker>,
    /// Community name shown in prompts.
    pub community: String,
}

/// What a state handler wants to happen next.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Keep the current state as is.
    Stay,
    /// Leave the current state (exit hook) and enter another one.
    Transition(DialogState),
    /// Same state, new stage: persist and re-enter without the exit hook.
    Restage(DialogState),
    /// Unrecognized input: say so and repeat the current prompt.
    FallBack,
}

/// Result of comparing the cached state with storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// Nothing stored for this participant yet.
    Uninitialized,
    /// No cached state; the stored one was adopted silently.
    Adopted,
    /// Cache disagreed with storage on the listed fields; storage won.
    Replaced(Vec<String>),
    /// Cache and storage are structurally identical.
    InSync,
}

pub struct Dialog {
    deps: Arc<DialogDeps>,
    participant: Participant,
    state: Option<DialogState>,
}

impl Dialog {
    pub fn new(deps: Arc<DialogDeps>, participant: Participant) -> Self {
        Self {
            deps,
            participant,
            state: None,
        }
    }

    pub fn participant_id(&self) -> &str {
        &self.participant.id
    }

    pub fn participant(&self) -> &Participant {
        &self.participant
    }

    pub(crate) fn participant_mut(&mut self) -> &mut Participant {
        &mut self.participant
    }

    /// Cached state, if any.
    pub fn state(&self) -> Option<&DialogState> {
        self.state.as_ref()
    }

    pub(crate) fn deps(&self) -> &DialogDeps {
        &self.deps
    }

    /// Bring the cached state in line with storage.
    pub async fn reconcile(&mut self) -> Result<Reconciliation, Error> {
        let pid = self.participant.id.clone();
        let Some(raw) = self.deps.db.get_conversation_state(&pid).await? else {
            debug!(participant = %pid, "No stored conversation state");
            return Ok(Reconciliation::Uninitialized);
        };

        let stored = match StateContext::parse(&pid, &raw) {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(participant = %pid, error = %e, "Unreadable stored state");
                DialogState::Error.to_context()
            }
        };

        match &self.state {
            None => {
                info!(participant = %pid, state = %stored.state_name, "Adopting stored state");
                self.transition_to(DialogState::from_context(&stored), true).await?;
                Ok(Reconciliation::Adopted)
            }
            Some(cached) => {
                let changed = cached.to_context().diff(&stored);
                if changed.is_empty() {
                    debug!(participant = %pid, state = %stored.state_name, "Cached state matches storage");
                    return Ok(Reconciliation::InSync);
                }
                info!(
                    participant = %pid,
                    cached = cached.name(),
                    stored = %stored.state_name,
                    fields = ?changed,
                    "Stored state differs from cache, switching to stored state"
                );
                self.transition_to(DialogState::from_context(&stored), true).await?;
                Ok(Reconciliation::Replaced(changed))
            }
        }
    }

    /// Move to `next`, running the exit and enter hooks.
    pub async fn transition_to(&mut self, next: DialogState, silent: bool) -> Result<(), Error> {
        self.apply(Directive::Transition(next), silent).await
    }

    /// Handle a non-command event from the participant.
    pub async fn deliver(&mut self, event: &InboundEvent) -> Result<(), Error> {
        self.log_inbound(event).await;
        self.reconcile().await?;

        let Some(state) = self.state.clone() else {
            warn!(participant = %self.participant.id, "Event for a dialog that was never started");
            return Ok(());
        };

        let directive = match &event.kind {
            InboundKind::Text { text, .. } => handlers::on_message(self, &state, text).await?,
            InboundKind::Contact { phone, .. } => handlers::on_message(self, &state, phone).await?,
            InboundKind::Callback { message_id, data } => {
                handlers::on_callback(self, &state, message_id, data).await?
            }
        };
        self.apply(directive, false).await
    }

    async fn apply(&mut self, directive: Directive, silent: bool) -> Result<(), Error> {
        let mut directive = directive;
        loop {
            directive = match directive {
                Directive::Stay => return Ok(()),
                Directive::FallBack => {
                    self.say(replies::FALL_BACK).await;
                    self.enter(false).await?
                }
                Directive::Transition(next) => {
                    if let Some(current) = self.state.clone() {
                        handlers::on_exit(self, &current, silent).await?;
                    }
                    info!(
                        participant = %self.participant.id,
                        from = self.state.as_ref().map(DialogState::name).unwrap_or("-"),
                        to = next.name(),
                        silent,
                        "Dialog transition"
                    );
                    self.install(next).await?;
                    self.enter(silent).await?
                }
                Directive::Restage(next) => {
                    debug!(
                        participant = %self.participant.id,
                        state = next.name(),
                        stage = ?next.stage(),
                        "Dialog stage change"
                    );
                    self.install(next).await?;
                    self.enter(silent).await?
                }
            };
        }
    }

    async fn enter(&mut self, silent: bool) -> Result<Directive, Error> {
        match self.state.clone() {
            Some(state) => handlers::on_enter(self, &state, silent).await,
            None => Ok(Directive::Stay),
        }
    }

    /// Make `next` the active state and persist it.
    async fn install(&mut self, next: DialogState) -> Result<(), Error> {
        self.refresh_participant().await?;
        let context = next.to_context();
        self.state = Some(next);
        self.deps
            .db
            .save_conversation_state(&self.participant.id, &context.to_json())
            .await?;
        Ok(())
    }

    pub(crate) async fn refresh_participant(&mut self) -> Result<(), Error> {
        let id = self.participant.id.clone();
        self.participant = self
            .deps
            .db
            .get_participant(&id)
            .await?
            .ok_or(DialogError::ParticipantMissing(id))?;
        Ok(())
    }

    pub(crate) async fn save_participant(&mut self) -> Result<(), Error> {
        self.participant.updated_at = chrono::Utc::now();
        self.deps.db.update_participant(&self.participant).await?;
        Ok(())
    }

    /// Send a message and log it. Returns the delivery id on success;
    /// delivery failures are logged and swallowed.
    pub async fn send(&self, message: OutgoingMessage) -> Option<String> {
        let text = message.text.clone();
        let delivery = match self.deps.messenger.send(&self.participant.id, message).await {
            Ok(receipt) => Some(receipt.message_id),
            Err(e) => {
                warn!(
                    participant = %self.participant.id,
                    channel = self.deps.messenger.name(),
                    error = %e,
                    "Message delivery failed"
                );
                None
            }
        };
        self.log(Direction::Out, &text, delivery.as_deref()).await;
        delivery
    }

    pub async fn say(&self, text: &str) -> Option<String> {
        self.send(OutgoingMessage::new(text)).await
    }

    pub(crate) async fn edit(&self, message_id: &str, edit: MessageEdit) {
        let text = format!("[edit] {}", edit.text);
        if let Err(e) = self.deps.messenger.edit(&self.participant.id, message_id, edit).await {
            warn!(participant = %self.participant.id, error = %e, "Message edit failed");
        }
        self.log(Direction::Out, &text, Some(message_id)).await;
    }

    pub(crate) async fn thank(&self) {
        self.say(replies::THANKS).await;
    }

    pub async fn log_inbound(&self, event: &InboundEvent) {
        self.log(Direction::In, &event.log_text(), Some(event.message_id())).await;
    }

    async fn log(&self, direction: Direction, text: &str, delivery_id: Option<&str>) {
        let entry = MessageLogEntry::new(&self.participant.id, direction, text, delivery_id);
        if let Err(e) = self.deps.db.log_message(&entry).await {
            warn!(participant = %self.participant.id, error = %e, "Failed to write message log");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::ReplyMarkup;
    use crate::dialog::state::InputStage;
    use crate::dialog::testing::{Fixture, RecordingMessenger};

    #[tokio::test]
    async fn transition_persists_and_prompts() {
        let fx = Fixture::new().await;
        let mut dialog = fx.dialog("1").await;

        dialog.transition_to(DialogState::WelcomeNewParticipant, false).await.unwrap();

        let stored = fx.db.get_conversation_state("1").await.unwrap().unwrap();
        assert!(stored.contains("WelcomeNewParticipant"));
        let sent = fx.messenger.sent_to("1");
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].markup.as_ref().unwrap().labels(), vec![replies::REGISTER]);
    }

    #[tokio::test]
    async fn silent_transition_sends_nothing() {
        let fx = Fixture::new().await;
        let mut dialog = fx.dialog("1").await;
        dialog.transition_to(DialogState::edit_gender(), true).await.unwrap();
        dialog.transition_to(DialogState::Null, true).await.unwrap();
        assert!(fx.messenger.sent_to("1").is_empty());
    }

    #[tokio::test]
    async fn reconcile_adopts_then_short_circuits() {
        let fx = Fixture::new().await;
        let mut dialog = fx.dialog("1").await;
        fx.db
            .save_conversation_state("1", &DialogState::ViewProfile.to_context().to_json())
            .await
            .unwrap();

        assert_eq!(dialog.reconcile().await.unwrap(), Reconciliation::Adopted);
        assert_eq!(dialog.state(), Some(&DialogState::ViewProfile));
        assert_eq!(dialog.reconcile().await.unwrap(), Reconciliation::InSync);
        assert_eq!(dialog.reconcile().await.unwrap(), Reconciliation::InSync);
        assert!(fx.messenger.sent_to("1").is_empty());
    }

    #[tokio::test]
    async fn reconcile_prefers_storage_over_stale_cache() {
        let fx = Fixture::new().await;
        let mut dialog = fx.dialog("1").await;
        dialog.transition_to(DialogState::Null, true).await.unwrap();

        let out_of_band = DialogState::EditFirstName {
            stage: InputStage::AwaitingInput,
            stop_after_finish: true,
        };
        fx.db
            .save_conversation_state("1", &out_of_band.to_context().to_json())
            .await
            .unwrap();

        match dialog.reconcile().await.unwrap() {
            Reconciliation::Replaced(fields) => assert!(fields.contains(&"state_name".to_string())),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(dialog.state(), Some(&out_of_band));
        assert!(fx.messenger.sent_to("1").is_empty());
    }

    #[tokio::test]
    async fn reconcile_without_stored_state_is_noop() {
        let fx = Fixture::new().await;
        let mut dialog = fx.dialog("1").await;
        assert_eq!(dialog.reconcile().await.unwrap(), Reconciliation::Uninitialized);
        assert!(dialog.state().is_none());
    }

    #[tokio::test]
    async fn corrupt_stored_state_becomes_error() {
        let fx = Fixture::new().await;
        let mut dialog = fx.dialog("1").await;
        fx.db.save_conversation_state("1", "not json").await.unwrap();
        dialog.reconcile().await.unwrap();
        assert_eq!(dialog.state(), Some(&DialogState::Error));

        let stored = fx.db.get_conversation_state("1").await.unwrap().unwrap();
        assert!(stored.contains("\"Error\""));
    }

    #[tokio::test]
    async fn delivery_failure_does_not_abort_transition() {
        let fx = Fixture::with_messenger(RecordingMessenger::failing()).await;
        let mut dialog = fx.dialog("1").await;
        dialog.transition_to(DialogState::AskFeedback, false).await.unwrap();

        let stored = fx.db.get_conversation_state("1").await.unwrap().unwrap();
        assert!(stored.contains("AskFeedback"));
        let log = fx.db.list_messages("1", 10).await.unwrap();
        assert_eq!(log.len(), 1);
        assert!(log[0].delivery_id.is_none());
    }

    #[tokio::test]
    async fn every_message_is_logged() {
        let fx = Fixture::new().await;
        let mut dialog = fx.dialog("1").await;
        dialog.transition_to(DialogState::Null, true).await.unwrap();

        dialog.deliver(&fx.text("1", "hello")).await.unwrap();

        let log = fx.db.list_messages("1", 10).await.unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].direction, Direction::In);
        assert_eq!(log[0].text, "hello");
        assert_eq!(log[1].direction, Direction::Out);
        assert_eq!(log[1].text, replies::UNKNOWN_INPUT);
        assert!(matches!(
            fx.messenger.sent_to("1")[0].markup,
            None | Some(ReplyMarkup::Remove)
        ));
    }

    #[tokio::test]
    async fn missing_participant_is_fatal() {
        let fx = Fixture::new().await;
        let ghost = Participant::new("ghost", "G", "", "");
        let mut dialog = Dialog::new(fx.deps.clone(), ghost);
        let err = dialog.transition_to(DialogState::Null, true).await.unwrap_err();
        assert!(matches!(err, Error::Dialog(DialogError::ParticipantMissing(_))));
    }
}
