//! Coordinator: routes inbound chat events into dialogs and runs the
//! weekly jobs (invitations, matching, broadcast, feedback collection).
//!
//! Jobs that move a participant's conversation go through the dialog
//! registry, so they are serialized with that participant's own messages
//! and always start from the stored state.

use std::sync::Arc;
use std::time::Duration;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::channels::{InboundEvent, OutgoingMessage, ReplyMarkup};
use crate::clock::{Clock, YearWeek};
use crate::dialog::replies;
use crate::dialog::{DialogDeps, DialogRegistry, DialogState};
use crate::error::{DatabaseError, DialogError, Error, MatchingError};
use crate::meetings::{Arrangement, Invitation, Meeting};
use crate::participants::{Direction, MessageLogEntry, Participant, ProfileStatistics};

pub struct Coordinator {
    registry: DialogRegistry,
    /// Pause between participants in bulk jobs, to stay under rate limits.
    delivery_pause: Duration,
}

impl Coordinator {
    pub fn new(deps: Arc<DialogDeps>, delivery_pause: Duration) -> Self {
        Self {
            registry: DialogRegistry::new(deps),
            delivery_pause,
        }
    }

    pub fn registry(&self) -> &DialogRegistry {
        &self.registry
    }

    fn deps(&self) -> &DialogDeps {
        self.registry.deps()
    }

    // ── Inbound ─────────────────────────────────────────────────────

    /// Route one inbound event. Events from participants who never sent
    /// `/start` are ignored, except `/start`, `/info` and `/status`.
    pub async fn handle_event(&self, event: InboundEvent) -> Result<(), Error> {
        let participant_id = event.participant_id().to_string();
        debug!(participant = %participant_id, kind = ?event.kind, "Inbound event");

        match event.command() {
            Some("start") => self.start(&event).await,
            Some("info") => self.info(&event).await,
            Some("feedback") => self.command_transition(&event, DialogState::AskFeedback).await,
            Some("status") => self.status(&event).await,
            _ => {
                let Some(dialog) = self.registry.get(&participant_id).await? else {
                    debug!(participant = %participant_id, "Ignoring event from unknown participant");
                    return Ok(());
                };
                let mut dialog = dialog.lock().await;
                dialog.deliver(&event).await
            }
        }
    }

    async fn start(&self, event: &InboundEvent) -> Result<(), Error> {
        let db = &self.deps().db;
        let id = event.participant_id();

        let existing = db.get_participant(id).await?;
        let next = match &existing {
            None => {
                let sender = &event.sender;
                let participant =
                    Participant::new(id, &sender.first_name, &sender.last_name, &sender.username);
                db.insert_participant(&participant).await?;
                info!(participant = %id, "New participant");
                DialogState::WelcomeNewParticipant
            }
            Some(p) if p.is_registered() => DialogState::ViewProfile,
            Some(_) => DialogState::WelcomeReturningParticipant,
        };

        let dialog = self
            .registry
            .get(id)
            .await?
            .ok_or_else(|| DialogError::ParticipantMissing(id.to_string()))?;
        let mut dialog = dialog.lock().await;
        dialog.log_inbound(event).await;
        dialog.reconcile().await?;
        dialog.transition_to(next, false).await
    }

    async fn info(&self, event: &InboundEvent) -> Result<(), Error> {
        match self.registry.get(event.participant_id()).await? {
            Some(dialog) => {
                let dialog = dialog.lock().await;
                dialog.log_inbound(event).await;
                dialog.say(replies::ABOUT).await;
                dialog
                    .send(
                        OutgoingMessage::new(replies::MENU_DESCRIPTION.trim_start())
                            .with_markup(ReplyMarkup::Remove),
                    )
                    .await;
            }
            None => {
                let chat = event.participant_id();
                self.notify(chat, OutgoingMessage::new(replies::ABOUT)).await;
                self.notify(
                    chat,
                    OutgoingMessage::new(replies::MENU_DESCRIPTION.trim_start())
                        .with_markup(ReplyMarkup::Remove),
                )
                .await;
            }
        }
        Ok(())
    }

    async fn command_transition(&self, event: &InboundEvent, next: DialogState) -> Result<(), Error> {
        let Some(dialog) = self.registry.get(event.participant_id()).await? else {
            debug!(participant = %event.participant_id(), "Command from unknown participant");
            return Ok(());
        };
        let mut dialog = dialog.lock().await;
        dialog.log_inbound(event).await;
        dialog.reconcile().await?;
        dialog.transition_to(next, false).await
    }

    /// Debug view: stored state next to the cached one.
    async fn status(&self, event: &InboundEvent) -> Result<(), Error> {
        let id = event.participant_id();
        let Some(dialog) = self.registry.get(id).await? else {
            let text = format!("User with ID {id} never sent /start");
            self.notify(id, OutgoingMessage::new(text)).await;
            return Ok(());
        };
        let dialog = dialog.lock().await;
        dialog.log_inbound(event).await;

        let stored = self
            .deps()
            .db
            .get_conversation_state(id)
            .await?
            .unwrap_or_else(|| "-".to_string());
        let cached = dialog
            .state()
            .map(|s| s.to_context().to_json())
            .unwrap_or_else(|| "-".to_string());
        let text = format!(
            "<b>Participant ID:</b> {}\n<b>Stored state:</b> {}\n<b>Cached state:</b> {}",
            replies::escape_html(id),
            replies::escape_html(&stored),
            replies::escape_html(&cached),
        );
        dialog.say(&text).await;
        Ok(())
    }

    /// Move a participant's dialog into `next`, starting from the stored state.
    async fn drive(&self, participant_id: &str, next: DialogState) -> Result<(), Error> {
        let dialog = self
            .registry
            .get(participant_id)
            .await?
            .ok_or_else(|| DialogError::ParticipantMissing(participant_id.to_string()))?;
        let mut dialog = dialog.lock().await;
        dialog.reconcile().await?;
        dialog.transition_to(next, false).await
    }

    /// Deliver and audit a message without going through a dialog.
    async fn notify(&self, participant_id: &str, message: OutgoingMessage) {
        let deps = self.deps();
        let text = message.text.clone();
        let delivery = match deps.messenger.send(participant_id, message).await {
            Ok(receipt) => Some(receipt.message_id),
            Err(e) => {
                warn!(participant = %participant_id, error = %e, "Message delivery failed");
                None
            }
        };
        let entry = MessageLogEntry::new(participant_id, Direction::Out, &text, delivery.as_deref());
        if let Err(e) = deps.db.log_message(&entry).await {
            warn!(participant = %participant_id, error = %e, "Failed to write message log");
        }
    }

    async fn pause(&self) {
        if !self.delivery_pause.is_zero() {
            tokio::time::sleep(self.delivery_pause).await;
        }
    }

    // ── Invitations & matching ──────────────────────────────────────

    /// Invite every registered, enabled participant. Defaults to next week.
    ///
    /// Earlier decisions for that week are reset and the week re-planned
    /// before anyone is asked again. A participant whose dialog fails is
    /// logged and skipped. Returns the number of invitations sent.
    pub async fn send_invitations(&self, week: Option<YearWeek>) -> Result<usize, Error> {
        let week = week.unwrap_or_else(Clock::next_week);
        let db = self.deps().db.clone();

        let invitees: Vec<Participant> = db
            .list_participants()
            .await?
            .into_iter()
            .filter(|p| p.is_registered() && p.enabled)
            .collect();

        let mut reset = 0;
        for participant in &invitees {
            if let Some(mut invitation) = db.get_invitation(&participant.id, week).await? {
                invitation.reset_decision();
                db.upsert_invitation(&invitation).await?;
                reset += 1;
            }
        }
        if reset > 0 {
            self.deps().matchmaker.rearrange(week).await?;
        }

        let mut invited = 0;
        for (i, participant) in invitees.iter().enumerate() {
            if i > 0 {
                self.pause().await;
            }
            match self.drive(&participant.id, DialogState::respond_to_invitation(week)).await {
                Ok(()) => invited += 1,
                Err(e) => warn!(participant = %participant.id, %week, error = %e, "Failed to invite"),
            }
        }

        info!(%week, invited, failed = invitees.len() - invited, reset, "Invitations sent");
        Ok(invited)
    }

    /// Ask one participant again, dropping any earlier decision.
    pub async fn resend_invitation(&self, participant_id: &str, week: YearWeek) -> Result<(), Error> {
        let db = self.deps().db.clone();
        if db.get_participant(participant_id).await?.is_none() {
            return Err(DatabaseError::NotFound {
                entity: "participant".into(),
                id: participant_id.to_string(),
            }
            .into());
        }

        if let Some(mut invitation) = db.get_invitation(participant_id, week).await? {
            invitation.reset_decision();
            db.upsert_invitation(&invitation).await?;
            self.deps().matchmaker.rearrange(week).await?;
        }

        self.drive(participant_id, DialogState::respond_to_invitation(week)).await?;
        info!(participant = %participant_id, %week, "Invitation re-sent");
        Ok(())
    }

    /// Re-plan a week. `None` once the week was broadcast or nobody accepted.
    pub async fn trigger_matching(&self, week: YearWeek) -> Result<Option<Arrangement>, Error> {
        self.deps().matchmaker.rearrange(week).await
    }

    // ── Broadcast & feedback ────────────────────────────────────────

    /// Send every participant of the week the contacts of their partners.
    ///
    /// Returns the number of participants notified. Fails with
    /// [`MatchingError::AlreadyBroadcast`] when the week was already sent.
    pub async fn broadcast_meeting_details(&self, week: YearWeek) -> Result<usize, Error> {
        let matchmaker = self.deps().matchmaker.clone();
        let _guard = matchmaker.lock_week(week).await;
        let db = self.deps().db.clone();

        if db.week_broadcast(week).await? {
            return Err(MatchingError::AlreadyBroadcast(week).into());
        }

        let meetings = db.list_meetings(week).await?;
        let participants = participants_of(&meetings);
        if participants.is_empty() {
            info!(%week, "No meetings scheduled, nothing to broadcast");
            return Ok(0);
        }

        for (i, participant_id) in participants.iter().enumerate() {
            if i > 0 {
                self.pause().await;
            }
            let Some(participant) = db.get_participant(participant_id).await? else {
                warn!(participant = %participant_id, %week, "Meeting references a missing participant");
                continue;
            };

            let mut partners = Vec::new();
            for partner_id in partners_of(&meetings, participant_id) {
                match db.get_participant(&partner_id).await? {
                    Some(partner) => partners.push(partner),
                    None => warn!(partner = %partner_id, "Partner record missing"),
                }
            }

            // Sent outside the dialog: its lock may be waiting on this week's lock.
            self.notify(participant_id, OutgoingMessage::new(replies::meeting_details(&participant, &partners)))
                .await;
            db.mark_broadcast(week, participant_id, Utc::now()).await?;
        }

        info!(%week, notified = participants.len(), "Meeting details broadcast");
        Ok(participants.len())
    }

    /// Ask everyone who had a meeting in the week how it went.
    ///
    /// Earlier answers are cleared. Failures are logged per participant and
    /// do not stop the run. Returns the number of participants asked.
    pub async fn collect_feedback(&self, week: YearWeek) -> Result<usize, Error> {
        let db = self.deps().db.clone();
        let participants = participants_of(&db.list_meetings(week).await?);

        let mut asked = 0;
        for (i, participant_id) in participants.iter().enumerate() {
            if i > 0 {
                self.pause().await;
            }
            match self.ask_for_feedback(week, participant_id).await {
                Ok(()) => asked += 1,
                Err(e) => {
                    warn!(participant = %participant_id, %week, error = %e, "Failed to ask for feedback")
                }
            }
        }

        info!(%week, asked, failed = participants.len() - asked, "Feedback collection started");
        Ok(asked)
    }

    /// Clear one participant's answers for the week and start the survey
    /// with their first partner.
    async fn ask_for_feedback(&self, week: YearWeek, participant_id: &str) -> Result<(), Error> {
        let db = &self.deps().db;
        let mut first_partner = None;
        for mut meeting in db.list_meetings(week).await? {
            if !meeting.involves(participant_id) {
                continue;
            }
            meeting.reset_feedback(participant_id);
            db.update_meeting(&meeting).await?;
            if first_partner.is_none() {
                first_partner = meeting.partner_of(participant_id).map(str::to_string);
            }
        }
        if let Some(partner) = first_partner {
            self.drive(participant_id, DialogState::collect_meeting_feedback(&partner, week))
                .await?;
        }
        Ok(())
    }

    /// Ask both sides of one meeting again. Only after the week was broadcast;
    /// returns the number of participants asked.
    pub async fn collect_feedback_for_pair(
        &self,
        week: YearWeek,
        participant_a: &str,
        participant_b: &str,
    ) -> Result<usize, Error> {
        let db = self.deps().db.clone();
        if !db.week_broadcast(week).await? {
            info!(%week, "Meeting details not broadcast yet, not collecting feedback");
            return Ok(0);
        }

        let mut asked = 0;
        for (me, partner) in [(participant_a, participant_b), (participant_b, participant_a)] {
            let mut meeting = db.get_meeting(week, me, partner).await?.ok_or_else(|| {
                DatabaseError::NotFound {
                    entity: "meeting".into(),
                    id: format!("{week}:{me}:{partner}"),
                }
            })?;
            meeting.reset_feedback(me);
            db.update_meeting(&meeting).await?;
            if asked > 0 {
                self.pause().await;
            }
            self.drive(me, DialogState::collect_meeting_feedback(partner, week)).await?;
            asked += 1;
        }
        Ok(asked)
    }

    // ── Admin overview ──────────────────────────────────────────────

    pub async fn schedule_overview(&self, week: YearWeek) -> Result<ScheduleOverview, Error> {
        let db = &self.deps().db;
        let participants = db.list_participants().await?;
        let invitations: Vec<Invitation> = db.list_invitations(week).await?;

        let mut funnel = Funnel::default();
        for p in &participants {
            let summary = ParticipantSummary::from(p);
            let bucket = if !p.enabled {
                &mut funnel.disabled
            } else if !p.is_registered() {
                &mut funnel.awaiting_registration
            } else {
                match invitations.iter().find(|i| i.participant_id == p.id) {
                    None => &mut funnel.awaiting_invitation,
                    Some(i) => match i.accepted {
                        None => &mut funnel.thinking,
                        Some(true) => &mut funnel.accepted,
                        Some(false) => &mut funnel.declined,
                    },
                }
            };
            bucket.push(summary);
        }

        let summary_of = |id: &str| {
            participants
                .iter()
                .find(|p| p.id == id)
                .map(ParticipantSummary::from)
                .unwrap_or_else(|| ParticipantSummary {
                    id: id.to_string(),
                    full_name: String::new(),
                    username: String::new(),
                })
        };
        let meetings = db
            .list_meetings(week)
            .await?
            .iter()
            .map(|m| MeetingSummary {
                participant_a: summary_of(&m.participant_a),
                participant_b: summary_of(&m.participant_b),
                took_place: m.took_place_aggregated(),
                was_ok: m.was_ok_aggregated(),
            })
            .collect();

        let (day_from, day_to) = week.boundaries();
        Ok(ScheduleOverview {
            week,
            day_from,
            day_to,
            previous_week: week.previous(),
            next_week: week.next(),
            total_participants: participants.len(),
            funnel,
            statistics: ProfileStatistics::from_participants(&participants),
            meetings,
            meeting_details_broadcast: db.week_broadcast(week).await?,
        })
    }
}

/// Everyone with a meeting, in order of first appearance.
fn participants_of(meetings: &[Meeting]) -> Vec<String> {
    let mut ids: Vec<String> = Vec::new();
    for m in meetings {
        for id in [&m.participant_a, &m.participant_b] {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
    }
    ids
}

fn partners_of(meetings: &[Meeting], participant_id: &str) -> Vec<String> {
    let mut partners: Vec<String> = Vec::new();
    for partner in meetings.iter().filter_map(|m| m.partner_of(participant_id)) {
        if !partners.iter().any(|p| p == partner) {
            partners.push(partner.to_string());
        }
    }
    partners
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParticipantSummary {
    pub id: String,
    pub full_name: String,
    pub username: String,
}

impl From<&Participant> for ParticipantSummary {
    fn from(p: &Participant) -> Self {
        Self {
            id: p.id.clone(),
            full_name: p.full_name(),
            username: p.username.clone(),
        }
    }
}

/// Where each participant stands for the week.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Funnel {
    pub accepted: Vec<ParticipantSummary>,
    pub thinking: Vec<ParticipantSummary>,
    pub declined: Vec<ParticipantSummary>,
    pub awaiting_invitation: Vec<ParticipantSummary>,
    pub awaiting_registration: Vec<ParticipantSummary>,
    pub disabled: Vec<ParticipantSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MeetingSummary {
    pub participant_a: ParticipantSummary,
    pub participant_b: ParticipantSummary,
    pub took_place: bool,
    pub was_ok: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScheduleOverview {
    pub week: YearWeek,
    pub day_from: NaiveDate,
    pub day_to: NaiveDate,
    pub previous_week: YearWeek,
    pub next_week: YearWeek,
    pub total_participants: usize,
    pub funnel: Funnel,
    pub statistics: ProfileStatistics,
    pub meetings: Vec<MeetingSummary>,
    pub meeting_details_broadcast: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialog::testing::Fixture;

    fn week() -> YearWeek {
        YearWeek::new(2024, 30).unwrap()
    }

    fn coordinator(fx: &Fixture) -> Coordinator {
        Coordinator::new(fx.deps.clone(), Duration::ZERO)
    }

    #[tokio::test]
    async fn start_creates_participant_and_welcomes() {
        let fx = Fixture::new().await;
        let c = coordinator(&fx);

        c.handle_event(fx.text("5", "/start")).await.unwrap();

        assert!(fx.db.get_participant("5").await.unwrap().is_some());
        let stored = fx.db.get_conversation_state("5").await.unwrap().unwrap();
        assert!(stored.contains("WelcomeNewParticipant"));
        assert_eq!(fx.messenger.sent_to("5").len(), 1);
    }

    #[tokio::test]
    async fn start_for_registered_shows_profile() {
        let fx = Fixture::new().await;
        fx.registered("5").await;
        let c = coordinator(&fx);

        c.handle_event(fx.text("5", "/start")).await.unwrap();
        let stored = fx.db.get_conversation_state("5").await.unwrap().unwrap();
        assert!(stored.contains("ViewProfile"));
    }

    #[tokio::test]
    async fn start_for_unfinished_registration_welcomes_back() {
        let fx = Fixture::new().await;
        let c = coordinator(&fx);
        c.handle_event(fx.text("5", "/start")).await.unwrap();
        c.handle_event(fx.text("5", "/start")).await.unwrap();

        let stored = fx.db.get_conversation_state("5").await.unwrap().unwrap();
        assert!(stored.contains("WelcomeReturningParticipant"));
    }

    #[tokio::test]
    async fn unknown_participant_messages_are_ignored() {
        let fx = Fixture::new().await;
        let c = coordinator(&fx);
        c.handle_event(fx.text("9", "hello")).await.unwrap();
        c.handle_event(fx.text("9", "/feedback")).await.unwrap();
        assert!(fx.db.get_participant("9").await.unwrap().is_none());
        assert!(fx.messenger.sent_to("9").is_empty());
    }

    #[tokio::test]
    async fn info_does_not_change_state() {
        let fx = Fixture::new().await;
        let c = coordinator(&fx);
        c.handle_event(fx.text("5", "/start")).await.unwrap();
        c.handle_event(fx.text("5", "/info")).await.unwrap();

        let sent = fx.messenger.sent_to("5");
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[2].markup, Some(ReplyMarkup::Remove));
        let stored = fx.db.get_conversation_state("5").await.unwrap().unwrap();
        assert!(stored.contains("WelcomeNewParticipant"));
    }

    #[tokio::test]
    async fn status_reports_both_states() {
        let fx = Fixture::new().await;
        let c = coordinator(&fx);
        c.handle_event(fx.text("5", "/start")).await.unwrap();
        c.handle_event(fx.text("5", "/status")).await.unwrap();

        let texts = fx.messenger.texts_to("5");
        let status = texts.last().unwrap();
        assert!(status.contains("Stored state"));
        assert_eq!(status.matches("WelcomeNewParticipant").count(), 2);
    }

    #[tokio::test]
    async fn invitations_go_to_registered_enabled_participants() {
        let fx = Fixture::new().await;
        fx.registered("1").await;
        let mut off = fx.registered("2").await;
        off.enabled = false;
        fx.db.update_participant(&off).await.unwrap();
        fx.dialog("3").await;

        let c = coordinator(&fx);
        assert_eq!(c.send_invitations(Some(week())).await.unwrap(), 1);

        let inv = fx.db.get_invitation("1", week()).await.unwrap().unwrap();
        assert_eq!(inv.send_count, 1);
        assert!(fx.db.get_invitation("2", week()).await.unwrap().is_none());
        assert!(fx.db.get_invitation("3", week()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn one_failed_invitation_does_not_stop_the_rest() {
        let fx = Fixture::with_unreadable_states(&["1"]).await;
        for id in ["1", "2", "3"] {
            fx.registered(id).await;
        }

        let c = coordinator(&fx);
        assert_eq!(c.send_invitations(Some(week())).await.unwrap(), 2);

        assert!(fx.db.get_invitation("1", week()).await.unwrap().is_none());
        for id in ["2", "3"] {
            let inv = fx.db.get_invitation(id, week()).await.unwrap().unwrap();
            assert_eq!(inv.send_count, 1);
        }
        assert!(fx.messenger.texts_to("1").is_empty());
    }

    #[tokio::test]
    async fn reinviting_resets_decision_and_replans() {
        let fx = Fixture::new().await;
        fx.registered("1").await;
        fx.registered("2").await;
        for id in ["1", "2"] {
            let mut inv = Invitation::new(id, week());
            inv.accept();
            fx.db.upsert_invitation(&inv).await.unwrap();
        }
        let c = coordinator(&fx);
        c.trigger_matching(week()).await.unwrap();
        assert_eq!(fx.db.list_meetings(week()).await.unwrap().len(), 1);

        c.resend_invitation("1", week()).await.unwrap();
        let inv = fx.db.get_invitation("1", week()).await.unwrap().unwrap();
        assert_eq!(inv.accepted, None);
        assert_eq!(inv.send_count, 1);
        assert!(fx.db.list_meetings(week()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn resend_to_unknown_participant_fails() {
        let fx = Fixture::new().await;
        let c = coordinator(&fx);
        let err = c.resend_invitation("404", week()).await.unwrap_err();
        assert!(matches!(err, Error::Database(DatabaseError::NotFound { .. })));
    }

    #[tokio::test]
    async fn broadcast_sends_partner_details_once() {
        let fx = Fixture::new().await;
        for id in ["1", "2", "3"] {
            fx.registered(id).await;
        }
        fx.db.insert_meeting(&Meeting::new(week(), "1", "2")).await.unwrap();
        fx.db.insert_meeting(&Meeting::new(week(), "1", "3")).await.unwrap();
        let c = coordinator(&fx);

        assert_eq!(c.broadcast_meeting_details(week()).await.unwrap(), 3);
        let to_one = fx.messenger.texts_to("1");
        assert_eq!(to_one.len(), 1);
        assert!(to_one[0].contains("Person 2") && to_one[0].contains("Person 3"));
        assert!(fx.messenger.texts_to("2")[0].contains("1 meeting"));
        assert!(fx.db.list_meetings(week()).await.unwrap().iter().all(|m| m.broadcast_at.is_some()));

        let again = c.broadcast_meeting_details(week()).await.unwrap_err();
        assert!(matches!(again, Error::Matching(MatchingError::AlreadyBroadcast(_))));
        assert!(c.trigger_matching(week()).await.unwrap().is_none());
        assert_eq!(fx.db.list_meetings(week()).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn collect_feedback_resets_answers_and_asks() {
        let fx = Fixture::new().await;
        fx.registered("1").await;
        fx.registered("2").await;
        let mut m = Meeting::new(week(), "1", "2");
        fx.db.insert_meeting(&m).await.unwrap();
        m.a.took_place = Some(true);
        m.b.took_place = Some(false);
        fx.db.update_meeting(&m).await.unwrap();

        let c = coordinator(&fx);
        assert_eq!(c.collect_feedback(week()).await.unwrap(), 2);

        let m = fx.db.get_meeting(week(), "1", "2").await.unwrap().unwrap();
        assert_eq!(m.a.took_place, None);
        assert_eq!(m.b.took_place, None);
        for id in ["1", "2"] {
            let stored = fx.db.get_conversation_state(id).await.unwrap().unwrap();
            assert!(stored.contains("CollectMeetingFeedback"));
            assert_eq!(fx.messenger.texts_to(id).len(), 1);
        }
    }

    #[tokio::test]
    async fn one_failed_survey_does_not_stop_the_rest() {
        let fx = Fixture::with_unreadable_states(&["1"]).await;
        for id in ["1", "2", "3"] {
            fx.registered(id).await;
        }
        fx.db.insert_meeting(&Meeting::new(week(), "1", "2")).await.unwrap();
        fx.db.insert_meeting(&Meeting::new(week(), "1", "3")).await.unwrap();

        let c = coordinator(&fx);
        assert_eq!(c.collect_feedback(week()).await.unwrap(), 2);

        assert!(fx.messenger.texts_to("1").is_empty());
        for id in ["2", "3"] {
            let stored = fx.db.get_conversation_state(id).await.unwrap().unwrap();
            assert!(stored.contains("CollectMeetingFeedback"));
        }
    }

    #[tokio::test]
    async fn pair_feedback_waits_for_broadcast() {
        let fx = Fixture::new().await;
        fx.registered("1").await;
        fx.registered("2").await;
        fx.db.insert_meeting(&Meeting::new(week(), "1", "2")).await.unwrap();
        let c = coordinator(&fx);

        assert_eq!(c.collect_feedback_for_pair(week(), "1", "2").await.unwrap(), 0);
        fx.db.mark_broadcast(week(), "1", Utc::now()).await.unwrap();
        assert_eq!(c.collect_feedback_for_pair(week(), "2", "1").await.unwrap(), 2);
        assert_eq!(fx.messenger.texts_to("1").len(), 1);
    }

    #[tokio::test]
    async fn overview_counts_funnel_and_meetings() {
        let fx = Fixture::new().await;
        for id in ["1", "2", "3", "4"] {
            fx.registered(id).await;
        }
        fx.dialog("5").await;
        let mut off = fx.registered("6").await;
        off.enabled = false;
        fx.db.update_participant(&off).await.unwrap();

        let mut yes = Invitation::new("1", week());
        yes.accept();
        fx.db.upsert_invitation(&yes).await.unwrap();
        let mut no = Invitation::new("2", week());
        no.decline();
        fx.db.upsert_invitation(&no).await.unwrap();
        fx.db.upsert_invitation(&Invitation::new("3", week())).await.unwrap();
        fx.db.insert_meeting(&Meeting::new(week(), "1", "4")).await.unwrap();

        let c = coordinator(&fx);
        let overview = c.schedule_overview(week()).await.unwrap();
        assert_eq!(overview.total_participants, 6);
        assert_eq!(overview.funnel.accepted.len(), 1);
        assert_eq!(overview.funnel.declined.len(), 1);
        assert_eq!(overview.funnel.thinking.len(), 1);
        assert_eq!(overview.funnel.awaiting_invitation.len(), 1);
        assert_eq!(overview.funnel.awaiting_registration.len(), 1);
        assert_eq!(overview.funnel.disabled.len(), 1);
        assert_eq!(overview.statistics.gender.female, 5);
        assert_eq!(overview.meetings.len(), 1);
        assert_eq!(overview.meetings[0].participant_b.full_name, "Person 4");
        assert_eq!(overview.previous_week, YearWeek::new(2024, 29).unwrap());
        assert!(!overview.meeting_details_broadcast);
    }
}
