//! Test fixture: in-memory store plus a messenger that records everything.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::channels::{
    DeliveryReceipt, InboundEvent, MessageEdit, Messenger, OutgoingMessage, Sender,
};
use crate::clock::YearWeek;
use crate::error::{ChannelError, DatabaseError};
use crate::meetings::{Invitation, Matchmaker, Meeting};
use crate::participants::{
    Feedback, Gender, MeetingFrequency, MeetingMotivation, MessageLogEntry, Participant,
};
use crate::store::{Database, LibSqlBackend};

use super::machine::{Dialog, DialogDeps};

#[derive(Default)]
pub struct RecordingMessenger {
    sent: Mutex<Vec<(String, OutgoingMessage)>>,
    edits: Mutex<Vec<(String, String, MessageEdit)>>,
    next_id: AtomicU64,
    failing: bool,
}

impl RecordingMessenger {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn sent_to(&self, chat_id: &str) -> Vec<OutgoingMessage> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == chat_id)
            .map(|(_, m)| m.clone())
            .collect()
    }

    pub fn texts_to(&self, chat_id: &str) -> Vec<String> {
        self.sent_to(chat_id).into_iter().map(|m| m.text).collect()
    }

    /// `(message_id, edit)` pairs for one chat.
    pub fn edits_to(&self, chat_id: &str) -> Vec<(String, MessageEdit)> {
        self.edits
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _, _)| id == chat_id)
            .map(|(_, mid, e)| (mid.clone(), e.clone()))
            .collect()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(
        &self,
        chat_id: &str,
        message: OutgoingMessage,
    ) -> Result<DeliveryReceipt, ChannelError> {
        if self.failing {
            return Err(ChannelError::SendFailed {
                name: "recording".into(),
                reason: "offline".into(),
            });
        }
        self.sent.lock().unwrap().push((chat_id.to_string(), message));
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(DeliveryReceipt { message_id: id.to_string() })
    }

    async fn edit(
        &self,
        chat_id: &str,
        message_id: &str,
        edit: MessageEdit,
    ) -> Result<(), ChannelError> {
        self.edits
            .lock()
            .unwrap()
            .push((chat_id.to_string(), message_id.to_string(), edit));
        Ok(())
    }
}

/// Store whose conversation state reads fail for the listed participants.
pub struct UnreadableStates {
    inner: Arc<dyn Database>,
    broken: Vec<String>,
}

#[async_trait]
impl Database for UnreadableStates {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        self.inner.run_migrations().await
    }

    async fn insert_participant(&self, participant: &Participant) -> Result<(), DatabaseError> {
        self.inner.insert_participant(participant).await
    }

    async fn get_participant(&self, id: &str) -> Result<Option<Participant>, DatabaseError> {
        self.inner.get_participant(id).await
    }

    async fn update_participant(&self, participant: &Participant) -> Result<(), DatabaseError> {
        self.inner.update_participant(participant).await
    }

    async fn touch_participant(&self, id: &str) -> Result<(), DatabaseError> {
        self.inner.touch_participant(id).await
    }

    async fn list_participants(&self) -> Result<Vec<Participant>, DatabaseError> {
        self.inner.list_participants().await
    }

    async fn ensure_group(&self, name: &str) -> Result<(), DatabaseError> {
        self.inner.ensure_group(name).await
    }

    async fn list_group_names(&self) -> Result<Vec<String>, DatabaseError> {
        self.inner.list_group_names().await
    }

    async fn get_conversation_state(
        &self,
        participant_id: &str,
    ) -> Result<Option<String>, DatabaseError> {
        if self.broken.iter().any(|id| id == participant_id) {
            return Err(DatabaseError::Query(format!("state of {participant_id} is unreadable")));
        }
        self.inner.get_conversation_state(participant_id).await
    }

    async fn save_conversation_state(
        &self,
        participant_id: &str,
        context: &str,
    ) -> Result<(), DatabaseError> {
        self.inner.save_conversation_state(participant_id, context).await
    }

    async fn get_invitation(
        &self,
        participant_id: &str,
        week: YearWeek,
    ) -> Result<Option<Invitation>, DatabaseError> {
        self.inner.get_invitation(participant_id, week).await
    }

    async fn upsert_invitation(&self, invitation: &Invitation) -> Result<(), DatabaseError> {
        self.inner.upsert_invitation(invitation).await
    }

    async fn list_invitations(&self, week: YearWeek) -> Result<Vec<Invitation>, DatabaseError> {
        self.inner.list_invitations(week).await
    }

    async fn insert_meeting(&self, meeting: &Meeting) -> Result<(), DatabaseError> {
        self.inner.insert_meeting(meeting).await
    }

    async fn update_meeting(&self, meeting: &Meeting) -> Result<(), DatabaseError> {
        self.inner.update_meeting(meeting).await
    }

    async fn get_meeting(
        &self,
        week: YearWeek,
        participant: &str,
        partner: &str,
    ) -> Result<Option<Meeting>, DatabaseError> {
        self.inner.get_meeting(week, participant, partner).await
    }

    async fn list_meetings(&self, week: YearWeek) -> Result<Vec<Meeting>, DatabaseError> {
        self.inner.list_meetings(week).await
    }

    async fn list_confirmed_meetings(&self) -> Result<Vec<Meeting>, DatabaseError> {
        self.inner.list_confirmed_meetings().await
    }

    async fn delete_meetings(&self, week: YearWeek) -> Result<u64, DatabaseError> {
        self.inner.delete_meetings(week).await
    }

    async fn week_broadcast(&self, week: YearWeek) -> Result<bool, DatabaseError> {
        self.inner.week_broadcast(week).await
    }

    async fn mark_broadcast(
        &self,
        week: YearWeek,
        participant_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        self.inner.mark_broadcast(week, participant_id, at).await
    }

    async fn insert_feedback(&self, feedback: &Feedback) -> Result<(), DatabaseError> {
        self.inner.insert_feedback(feedback).await
    }

    async fn list_feedback(&self, participant_id: &str) -> Result<Vec<Feedback>, DatabaseError> {
        self.inner.list_feedback(participant_id).await
    }

    async fn log_message(&self, entry: &MessageLogEntry) -> Result<(), DatabaseError> {
        self.inner.log_message(entry).await
    }

    async fn list_messages(
        &self,
        participant_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageLogEntry>, DatabaseError> {
        self.inner.list_messages(participant_id, limit).await
    }
}

pub struct Fixture {
    pub db: Arc<dyn Database>,
    pub messenger: Arc<RecordingMessenger>,
    pub deps: Arc<DialogDeps>,
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_messenger(RecordingMessenger::default()).await
    }

    pub async fn with_messenger(messenger: RecordingMessenger) -> Self {
        let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        Self::assemble(db, messenger)
    }

    /// Conversation state of the listed participants cannot be read.
    pub async fn with_unreadable_states(ids: &[&str]) -> Self {
        let inner: Arc<dyn Database> = Arc::new(LibSqlBackend::new_memory().await.unwrap());
        let db: Arc<dyn Database> = Arc::new(UnreadableStates {
            inner,
            broken: ids.iter().map(|id| id.to_string()).collect(),
        });
        Self::assemble(db, RecordingMessenger::default())
    }

    fn assemble(db: Arc<dyn Database>, messenger: RecordingMessenger) -> Self {
        let messenger = Arc::new(messenger);
        let deps = Arc::new(DialogDeps {
            db: db.clone(),
            messenger: messenger.clone(),
            matchmaker: Arc::new(Matchmaker::with_seed(db.clone(), 7)),
            community: "Test Hub".into(),
        });
        Self { db, messenger, deps }
    }

    /// A fresh dialog for `id`, creating the participant on first use.
    pub async fn dialog(&self, id: &str) -> Dialog {
        let participant = match self.db.get_participant(id).await.unwrap() {
            Some(p) => p,
            None => {
                let p = Participant::new(id, "Ann", "", "ann");
                self.db.insert_participant(&p).await.unwrap();
                p
            }
        };
        Dialog::new(self.deps.clone(), participant)
    }

    /// Insert a fully registered participant.
    pub async fn registered(&self, id: &str) -> Participant {
        let mut p = Participant::new(id, &format!("Person {id}"), "", "");
        p.gender = Some(Gender::Female);
        p.meeting_frequency = Some(MeetingFrequency::Medium);
        p.meeting_motivation = Some(MeetingMotivation::Fun);
        p.phone_number = "+4915100000000".into();
        p.registered_at = Some(Utc::now());
        self.db.insert_participant(&p).await.unwrap();
        p
    }

    fn sender(id: &str) -> Sender {
        Sender {
            id: id.to_string(),
            first_name: "Ann".into(),
            last_name: String::new(),
            username: "ann".into(),
        }
    }

    pub fn text(&self, id: &str, text: &str) -> InboundEvent {
        InboundEvent::text(Self::sender(id), "100", text)
    }

    pub fn contact(&self, id: &str, phone: &str) -> InboundEvent {
        InboundEvent::contact(Self::sender(id), "100", phone)
    }

    pub fn callback(&self, id: &str, message_id: &str, data: &str) -> InboundEvent {
        InboundEvent::callback(Self::sender(id), message_id, data)
    }
}
