//! Unified `Database` trait: single async interface for all persistence.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::clock::YearWeek;
use crate::error::DatabaseError;
use crate::meetings::{Invitation, Meeting};
use crate::participants::{Feedback, MessageLogEntry, Participant};

/// Backend-agnostic database trait covering participants, dialogs and meetings.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Participants ────────────────────────────────────────────────

    /// Insert a participant seen for the first time.
    async fn insert_participant(&self, participant: &Participant) -> Result<(), DatabaseError>;

    async fn get_participant(&self, id: &str) -> Result<Option<Participant>, DatabaseError>;

    /// Overwrite every profile column and bump `updated_at`.
    async fn update_participant(&self, participant: &Participant) -> Result<(), DatabaseError>;

    /// Set `last_seen_at` to now.
    async fn touch_participant(&self, id: &str) -> Result<(), DatabaseError>;

    /// All participants, oldest first.
    async fn list_participants(&self) -> Result<Vec<Participant>, DatabaseError>;

    // ── Groups ──────────────────────────────────────────────────────

    /// Create the group if it does not exist yet.
    async fn ensure_group(&self, name: &str) -> Result<(), DatabaseError>;

    /// Distinct non-empty group names, alphabetically.
    async fn list_group_names(&self) -> Result<Vec<String>, DatabaseError>;

    // ── Conversation state ──────────────────────────────────────────

    /// The serialized conversation state for a participant, if any.
    async fn get_conversation_state(&self, participant_id: &str)
    -> Result<Option<String>, DatabaseError>;

    /// Insert or replace the single state row of a participant.
    async fn save_conversation_state(
        &self,
        participant_id: &str,
        context: &str,
    ) -> Result<(), DatabaseError>;

    // ── Invitations ─────────────────────────────────────────────────

    async fn get_invitation(
        &self,
        participant_id: &str,
        week: YearWeek,
    ) -> Result<Option<Invitation>, DatabaseError>;

    /// Insert or update keyed by (participant, year, week).
    async fn upsert_invitation(&self, invitation: &Invitation) -> Result<(), DatabaseError>;

    /// Every invitation of a week, in creation order.
    async fn list_invitations(&self, week: YearWeek) -> Result<Vec<Invitation>, DatabaseError>;

    // ── Meetings ────────────────────────────────────────────────────

    async fn insert_meeting(&self, meeting: &Meeting) -> Result<(), DatabaseError>;

    /// Overwrite both sides' feedback and the broadcast timestamp.
    async fn update_meeting(&self, meeting: &Meeting) -> Result<(), DatabaseError>;

    /// Look up the meeting of two participants in either order.
    ///
    /// A pair is stored at most once per week; more than one match is a
    /// `Constraint` error.
    async fn get_meeting(
        &self,
        week: YearWeek,
        participant: &str,
        partner: &str,
    ) -> Result<Option<Meeting>, DatabaseError>;

    /// Every meeting of a week, in creation order.
    async fn list_meetings(&self, week: YearWeek) -> Result<Vec<Meeting>, DatabaseError>;

    /// Meetings across all weeks that at least one side confirmed.
    async fn list_confirmed_meetings(&self) -> Result<Vec<Meeting>, DatabaseError>;

    /// Drop every meeting of a week. Returns the number of rows removed.
    async fn delete_meetings(&self, week: YearWeek) -> Result<u64, DatabaseError>;

    /// Whether any meeting of the week carries a broadcast timestamp.
    async fn week_broadcast(&self, week: YearWeek) -> Result<bool, DatabaseError>;

    /// Stamp `broadcast_at` on every meeting of the week involving the participant.
    async fn mark_broadcast(
        &self,
        week: YearWeek,
        participant_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError>;

    // ── Feedback & message log ──────────────────────────────────────

    async fn insert_feedback(&self, feedback: &Feedback) -> Result<(), DatabaseError>;

    async fn list_feedback(&self, participant_id: &str) -> Result<Vec<Feedback>, DatabaseError>;

    /// Append one line to the chat audit log.
    async fn log_message(&self, entry: &MessageLogEntry) -> Result<(), DatabaseError>;

    /// Most recent audit lines of a participant, newest last.
    async fn list_messages(
        &self,
        participant_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageLogEntry>, DatabaseError>;
}
