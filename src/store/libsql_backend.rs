//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::info;
use uuid::Uuid;

use crate::clock::YearWeek;
use crate::error::DatabaseError;
use crate::meetings::{CancelReason, FailureReason, Invitation, Meeting, SideFeedback};
use crate::participants::{
    Direction, Feedback, Gender, MeetingFrequency, MeetingMotivation, MessageLogEntry,
    Participant, ParticipationKind,
};
use crate::store::migrations;
use crate::store::traits::Database;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    /// Get the connection.
    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn parse_optional_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_ref().map(|s| parse_datetime(s))
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Tri-state booleans are stored as nullable integers.
fn opt_bool(b: Option<bool>) -> libsql::Value {
    match b {
        Some(b) => libsql::Value::Integer(i64::from(b)),
        None => libsql::Value::Null,
    }
}

fn opt_datetime(dt: Option<DateTime<Utc>>) -> libsql::Value {
    opt_text(dt.map(|d| d.to_rfc3339()).as_deref())
}

fn get_opt_bool(row: &libsql::Row, idx: i32) -> Option<bool> {
    row.get::<i64>(idx).ok().map(|v| v != 0)
}

fn get_opt_text(row: &libsql::Row, idx: i32) -> Option<String> {
    row.get::<String>(idx).ok()
}

fn row_week(row: &libsql::Row, year_idx: i32, week_idx: i32) -> Result<YearWeek, DatabaseError> {
    let year: i64 = row
        .get(year_idx)
        .map_err(|e| DatabaseError::Serialization(format!("year column: {e}")))?;
    let week: i64 = row
        .get(week_idx)
        .map_err(|e| DatabaseError::Serialization(format!("week column: {e}")))?;
    YearWeek::new(year as i32, week as u32)
        .ok_or_else(|| DatabaseError::Serialization(format!("{year}-W{week} is not an ISO week")))
}

fn text(value: impl Into<String>) -> libsql::Value {
    libsql::Value::Text(value.into())
}

const PARTICIPANT_COLUMNS: &str = "id, first_name, last_name, username, phone_number, gender, kind, group_name, bio, meeting_frequency, meeting_motivation, enabled, first_seen_at, registered_at, last_seen_at, updated_at";

/// Map a libsql Row to a Participant.
///
/// Column order matches PARTICIPANT_COLUMNS.
fn row_to_participant(row: &libsql::Row) -> Result<Participant, libsql::Error> {
    let first_seen: String = row.get(12)?;
    let last_seen: String = row.get(14)?;
    let updated: String = row.get(15)?;
    let enabled: i64 = row.get(11)?;

    Ok(Participant {
        id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        username: row.get(3)?,
        phone_number: row.get(4)?,
        gender: get_opt_text(row, 5).and_then(|s| Gender::from_code(&s)),
        kind: get_opt_text(row, 6).and_then(|s| ParticipationKind::from_code(&s)),
        group: get_opt_text(row, 7).filter(|s| !s.is_empty()),
        bio: row.get(8)?,
        meeting_frequency: get_opt_text(row, 9).and_then(|s| MeetingFrequency::from_code(&s)),
        meeting_motivation: get_opt_text(row, 10).and_then(|s| MeetingMotivation::from_code(&s)),
        enabled: enabled != 0,
        first_seen_at: parse_datetime(&first_seen),
        registered_at: parse_optional_datetime(&get_opt_text(row, 13)),
        last_seen_at: parse_datetime(&last_seen),
        updated_at: parse_datetime(&updated),
    })
}

const INVITATION_COLUMNS: &str = "participant_id, year, week, accepted, cancel_reason, send_count, delivery_id, sent_at, decided_at, created_at";

fn row_to_invitation(row: &libsql::Row) -> Result<Invitation, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Serialization(format!("invitation row: {e}"));
    let created: String = row.get(9).map_err(parse)?;
    let send_count: i64 = row.get(5).map_err(parse)?;

    Ok(Invitation {
        participant_id: row.get(0).map_err(parse)?,
        week: row_week(row, 1, 2)?,
        accepted: get_opt_bool(row, 3),
        cancel_reason: get_opt_text(row, 4).and_then(|s| CancelReason::from_code(&s)),
        send_count: send_count.max(0) as u32,
        delivery_id: get_opt_text(row, 6),
        sent_at: parse_optional_datetime(&get_opt_text(row, 7)),
        decided_at: parse_optional_datetime(&get_opt_text(row, 8)),
        created_at: parse_datetime(&created),
    })
}

const MEETING_COLUMNS: &str = "year, week, participant_a, participant_b, a_took_place, b_took_place, a_happy, b_happy, a_failure_reason, b_failure_reason, created_at, updated_at, broadcast_at";

fn row_to_meeting(row: &libsql::Row) -> Result<Meeting, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Serialization(format!("meeting row: {e}"));
    let created: String = row.get(10).map_err(parse)?;
    let updated: String = row.get(11).map_err(parse)?;

    Ok(Meeting {
        week: row_week(row, 0, 1)?,
        participant_a: row.get(2).map_err(parse)?,
        participant_b: row.get(3).map_err(parse)?,
        a: SideFeedback {
            took_place: get_opt_bool(row, 4),
            happy: get_opt_bool(row, 6),
            failure_reason: get_opt_text(row, 8).and_then(|s| FailureReason::from_code(&s)),
        },
        b: SideFeedback {
            took_place: get_opt_bool(row, 5),
            happy: get_opt_bool(row, 7),
            failure_reason: get_opt_text(row, 9).and_then(|s| FailureReason::from_code(&s)),
        },
        created_at: parse_datetime(&created),
        updated_at: parse_datetime(&updated),
        broadcast_at: parse_optional_datetime(&get_opt_text(row, 12)),
    })
}

async fn collect_meetings(mut rows: libsql::Rows, context: &str) -> Result<Vec<Meeting>, DatabaseError> {
    let mut meetings = Vec::new();
    loop {
        match rows.next().await {
            Ok(Some(row)) => meetings.push(row_to_meeting(&row)?),
            Ok(None) => break,
            Err(e) => return Err(DatabaseError::Query(format!("{context}: {e}"))),
        }
    }
    Ok(meetings)
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Participants ────────────────────────────────────────────────

    async fn insert_participant(&self, p: &Participant) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            &format!(
                "INSERT INTO participants ({PARTICIPANT_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
            ),
            vec![
                text(p.id.as_str()),
                text(p.first_name.as_str()),
                text(p.last_name.as_str()),
                text(p.username.as_str()),
                text(p.phone_number.as_str()),
                opt_text(p.gender.map(|g| g.as_code())),
                opt_text(p.kind.map(|k| k.as_code())),
                opt_text(p.group.as_deref()),
                text(p.bio.as_str()),
                opt_text(p.meeting_frequency.map(|f| f.as_code())),
                opt_text(p.meeting_motivation.map(|m| m.as_code())),
                libsql::Value::Integer(i64::from(p.enabled)),
                text(p.first_seen_at.to_rfc3339()),
                opt_datetime(p.registered_at),
                text(p.last_seen_at.to_rfc3339()),
                text(p.updated_at.to_rfc3339()),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert_participant: {e}")))?;
        Ok(())
    }

    async fn get_participant(&self, id: &str) -> Result<Option<Participant>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {PARTICIPANT_COLUMNS} FROM participants WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_participant: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let participant = row_to_participant(&row)
                    .map_err(|e| DatabaseError::Query(format!("get_participant row parse: {e}")))?;
                Ok(Some(participant))
            }
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_participant: {e}"))),
        }
    }

    async fn update_participant(&self, p: &Participant) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let affected = conn
            .execute(
                "UPDATE participants SET first_name = ?1, last_name = ?2, username = ?3, \
                 phone_number = ?4, gender = ?5, kind = ?6, group_name = ?7, bio = ?8, \
                 meeting_frequency = ?9, meeting_motivation = ?10, enabled = ?11, \
                 registered_at = ?12, last_seen_at = ?13, updated_at = ?14 WHERE id = ?15",
                vec![
                    text(p.first_name.as_str()),
                    text(p.last_name.as_str()),
                    text(p.username.as_str()),
                    text(p.phone_number.as_str()),
                    opt_text(p.gender.map(|g| g.as_code())),
                    opt_text(p.kind.map(|k| k.as_code())),
                    opt_text(p.group.as_deref()),
                    text(p.bio.as_str()),
                    opt_text(p.meeting_frequency.map(|f| f.as_code())),
                    opt_text(p.meeting_motivation.map(|m| m.as_code())),
                    libsql::Value::Integer(i64::from(p.enabled)),
                    opt_datetime(p.registered_at),
                    text(p.last_seen_at.to_rfc3339()),
                    text(now),
                    text(p.id.as_str()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_participant: {e}")))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "participant".into(),
                id: p.id.clone(),
            });
        }
        Ok(())
    }

    async fn touch_participant(&self, id: &str) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "UPDATE participants SET last_seen_at = ?1 WHERE id = ?2",
            params![now, id],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("touch_participant: {e}")))?;
        Ok(())
    }

    async fn list_participants(&self) -> Result<Vec<Participant>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!("SELECT {PARTICIPANT_COLUMNS} FROM participants ORDER BY first_seen_at ASC, rowid ASC"),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_participants: {e}")))?;

        let mut participants = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            match row_to_participant(&row) {
                Ok(p) => participants.push(p),
                Err(e) => {
                    tracing::warn!("Skipping participant row: {e}");
                }
            }
        }
        Ok(participants)
    }

    // ── Groups ──────────────────────────────────────────────────────

    async fn ensure_group(&self, name: &str) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT OR IGNORE INTO groups (name, created_at) VALUES (?1, ?2)",
            params![name, now],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("ensure_group: {e}")))?;
        Ok(())
    }

    async fn list_group_names(&self) -> Result<Vec<String>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT DISTINCT name FROM groups WHERE name != '' ORDER BY name ASC",
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_group_names: {e}")))?;

        let mut names = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            if let Ok(name) = row.get::<String>(0) {
                names.push(name);
            }
        }
        Ok(names)
    }

    // ── Conversation state ──────────────────────────────────────────

    async fn get_conversation_state(
        &self,
        participant_id: &str,
    ) -> Result<Option<String>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT context FROM conversation_states WHERE participant_id = ?1",
                params![participant_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_conversation_state: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<String>(0).ok()),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_conversation_state: {e}"))),
        }
    }

    async fn save_conversation_state(
        &self,
        participant_id: &str,
        context: &str,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        conn.execute(
            "INSERT INTO conversation_states (participant_id, context, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(participant_id) DO UPDATE SET context = excluded.context, updated_at = excluded.updated_at",
            params![participant_id, context, now],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("save_conversation_state: {e}")))?;
        Ok(())
    }

    // ── Invitations ─────────────────────────────────────────────────

    async fn get_invitation(
        &self,
        participant_id: &str,
        week: YearWeek,
    ) -> Result<Option<Invitation>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {INVITATION_COLUMNS} FROM invitations \
                     WHERE participant_id = ?1 AND year = ?2 AND week = ?3"
                ),
                params![participant_id, i64::from(week.year()), i64::from(week.week())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_invitation: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_invitation(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_invitation: {e}"))),
        }
    }

    async fn upsert_invitation(&self, inv: &Invitation) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            &format!(
                "INSERT INTO invitations ({INVITATION_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10) \
                 ON CONFLICT(participant_id, year, week) DO UPDATE SET \
                 accepted = excluded.accepted, cancel_reason = excluded.cancel_reason, \
                 send_count = excluded.send_count, delivery_id = excluded.delivery_id, \
                 sent_at = excluded.sent_at, decided_at = excluded.decided_at"
            ),
            vec![
                text(inv.participant_id.as_str()),
                libsql::Value::Integer(i64::from(inv.week.year())),
                libsql::Value::Integer(i64::from(inv.week.week())),
                opt_bool(inv.accepted),
                opt_text(inv.cancel_reason.map(|r| r.as_code())),
                libsql::Value::Integer(i64::from(inv.send_count)),
                opt_text(inv.delivery_id.as_deref()),
                opt_datetime(inv.sent_at),
                opt_datetime(inv.decided_at),
                text(inv.created_at.to_rfc3339()),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("upsert_invitation: {e}")))?;
        Ok(())
    }

    async fn list_invitations(&self, week: YearWeek) -> Result<Vec<Invitation>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                &format!(
                    "SELECT {INVITATION_COLUMNS} FROM invitations \
                     WHERE year = ?1 AND week = ?2 ORDER BY rowid ASC"
                ),
                params![i64::from(week.year()), i64::from(week.week())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_invitations: {e}")))?;

        let mut invitations = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => invitations.push(row_to_invitation(&row)?),
                Ok(None) => break,
                Err(e) => return Err(DatabaseError::Query(format!("list_invitations: {e}"))),
            }
        }
        Ok(invitations)
    }

    // ── Meetings ────────────────────────────────────────────────────

    async fn insert_meeting(&self, m: &Meeting) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            &format!(
                "INSERT INTO meetings ({MEETING_COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
            ),
            vec![
                libsql::Value::Integer(i64::from(m.week.year())),
                libsql::Value::Integer(i64::from(m.week.week())),
                text(m.participant_a.as_str()),
                text(m.participant_b.as_str()),
                opt_bool(m.a.took_place),
                opt_bool(m.b.took_place),
                opt_bool(m.a.happy),
                opt_bool(m.b.happy),
                opt_text(m.a.failure_reason.map(|r| r.as_code())),
                opt_text(m.b.failure_reason.map(|r| r.as_code())),
                text(m.created_at.to_rfc3339()),
                text(m.updated_at.to_rfc3339()),
                opt_datetime(m.broadcast_at),
            ],
        )
        .await
        .map_err(|e| {
            let msg = e.to_string();
            if msg.contains("UNIQUE") {
                DatabaseError::Constraint(format!("insert_meeting: {msg}"))
            } else {
                DatabaseError::Query(format!("insert_meeting: {msg}"))
            }
        })?;
        Ok(())
    }

    async fn update_meeting(&self, m: &Meeting) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let now = Utc::now().to_rfc3339();
        let affected = conn
            .execute(
                "UPDATE meetings SET a_took_place = ?1, b_took_place = ?2, a_happy = ?3, \
                 b_happy = ?4, a_failure_reason = ?5, b_failure_reason = ?6, \
                 broadcast_at = ?7, updated_at = ?8 \
                 WHERE year = ?9 AND week = ?10 AND participant_a = ?11 AND participant_b = ?12",
                vec![
                    opt_bool(m.a.took_place),
                    opt_bool(m.b.took_place),
                    opt_bool(m.a.happy),
                    opt_bool(m.b.happy),
                    opt_text(m.a.failure_reason.map(|r| r.as_code())),
                    opt_text(m.b.failure_reason.map(|r| r.as_code())),
                    opt_datetime(m.broadcast_at),
                    text(now),
                    libsql::Value::Integer(i64::from(m.week.year())),
                    libsql::Value::Integer(i64::from(m.week.week())),
                    text(m.participant_a.as_str()),
                    text(m.participant_b.as_str()),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_meeting: {e}")))?;

        if affected == 0 {
            return Err(DatabaseError::NotFound {
                entity: "meeting".into(),
                id: format!("{} {}-{}", m.week, m.participant_a, m.participant_b),
            });
        }
        Ok(())
    }

    async fn get_meeting(
        &self,
        week: YearWeek,
        participant: &str,
        partner: &str,
    ) -> Result<Option<Meeting>, DatabaseError> {
        let conn = self.conn();
        let rows = conn
            .query(
                &format!(
                    "SELECT {MEETING_COLUMNS} FROM meetings WHERE year = ?1 AND week = ?2 AND \
                     ((participant_a = ?3 AND participant_b = ?4) OR (participant_a = ?4 AND participant_b = ?3))"
                ),
                params![
                    i64::from(week.year()),
                    i64::from(week.week()),
                    participant,
                    partner
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_meeting: {e}")))?;

        let mut meetings = collect_meetings(rows, "get_meeting").await?;
        if meetings.len() > 1 {
            return Err(DatabaseError::Constraint(format!(
                "get_meeting: {} rows for {participant} and {partner} in {week}",
                meetings.len()
            )));
        }
        Ok(meetings.pop())
    }

    async fn list_meetings(&self, week: YearWeek) -> Result<Vec<Meeting>, DatabaseError> {
        let conn = self.conn();
        let rows = conn
            .query(
                &format!(
                    "SELECT {MEETING_COLUMNS} FROM meetings WHERE year = ?1 AND week = ?2 ORDER BY rowid ASC"
                ),
                params![i64::from(week.year()), i64::from(week.week())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_meetings: {e}")))?;

        collect_meetings(rows, "list_meetings").await
    }

    async fn list_confirmed_meetings(&self) -> Result<Vec<Meeting>, DatabaseError> {
        let conn = self.conn();
        let rows = conn
            .query(
                &format!(
                    "SELECT {MEETING_COLUMNS} FROM meetings \
                     WHERE a_took_place = 1 OR b_took_place = 1 ORDER BY rowid ASC"
                ),
                (),
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_confirmed_meetings: {e}")))?;

        collect_meetings(rows, "list_confirmed_meetings").await
    }

    async fn delete_meetings(&self, week: YearWeek) -> Result<u64, DatabaseError> {
        let conn = self.conn();
        let deleted = conn
            .execute(
                "DELETE FROM meetings WHERE year = ?1 AND week = ?2",
                params![i64::from(week.year()), i64::from(week.week())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("delete_meetings: {e}")))?;
        Ok(deleted)
    }

    async fn week_broadcast(&self, week: YearWeek) -> Result<bool, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT COUNT(*) FROM meetings WHERE year = ?1 AND week = ?2 AND broadcast_at IS NOT NULL",
                params![i64::from(week.year()), i64::from(week.week())],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("week_broadcast: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).unwrap_or(0) > 0),
            Ok(None) => Ok(false),
            Err(e) => Err(DatabaseError::Query(format!("week_broadcast: {e}"))),
        }
    }

    async fn mark_broadcast(
        &self,
        week: YearWeek,
        participant_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let conn = self.conn();
        let at = at.to_rfc3339();
        conn.execute(
            "UPDATE meetings SET broadcast_at = ?1, updated_at = ?1 \
             WHERE year = ?2 AND week = ?3 AND (participant_a = ?4 OR participant_b = ?4)",
            params![at, i64::from(week.year()), i64::from(week.week()), participant_id],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("mark_broadcast: {e}")))?;
        Ok(())
    }

    // ── Feedback & message log ──────────────────────────────────────

    async fn insert_feedback(&self, feedback: &Feedback) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO feedback (id, participant_id, text, sent_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                feedback.id.to_string(),
                feedback.participant_id.as_str(),
                feedback.text.as_str(),
                feedback.sent_at.to_rfc3339()
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("insert_feedback: {e}")))?;
        Ok(())
    }

    async fn list_feedback(&self, participant_id: &str) -> Result<Vec<Feedback>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT id, participant_id, text, sent_at FROM feedback \
                 WHERE participant_id = ?1 ORDER BY rowid ASC",
                params![participant_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_feedback: {e}")))?;

        let mut items = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let id: String = row.get(0).unwrap_or_default();
            let sent: String = row.get(3).unwrap_or_default();
            items.push(Feedback {
                id: Uuid::parse_str(&id).unwrap_or_else(|_| Uuid::nil()),
                participant_id: row.get(1).unwrap_or_default(),
                text: row.get(2).unwrap_or_default(),
                sent_at: parse_datetime(&sent),
            });
        }
        Ok(items)
    }

    async fn log_message(&self, entry: &MessageLogEntry) -> Result<(), DatabaseError> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO message_log (id, participant_id, direction, text, delivery_id, sent_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            vec![
                text(entry.id.to_string()),
                text(entry.participant_id.as_str()),
                text(entry.direction.as_str()),
                text(entry.text.as_str()),
                opt_text(entry.delivery_id.as_deref()),
                text(entry.sent_at.to_rfc3339()),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("log_message: {e}")))?;
        Ok(())
    }

    async fn list_messages(
        &self,
        participant_id: &str,
        limit: usize,
    ) -> Result<Vec<MessageLogEntry>, DatabaseError> {
        let conn = self.conn();
        let mut rows = conn
            .query(
                "SELECT id, participant_id, direction, text, delivery_id, sent_at FROM message_log \
                 WHERE participant_id = ?1 ORDER BY rowid DESC LIMIT ?2",
                params![participant_id, limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_messages: {e}")))?;

        let mut entries = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            let id: String = row.get(0).unwrap_or_default();
            let direction: String = row.get(2).unwrap_or_default();
            let sent: String = row.get(5).unwrap_or_default();
            entries.push(MessageLogEntry {
                id: Uuid::parse_str(&id).unwrap_or_else(|_| Uuid::nil()),
                participant_id: row.get(1).unwrap_or_default(),
                direction: if direction == "in" { Direction::In } else { Direction::Out },
                text: row.get(3).unwrap_or_default(),
                delivery_id: get_opt_text(&row, 4),
                sent_at: parse_datetime(&sent),
            });
        }
        entries.reverse();
        Ok(entries)
    }
}
