//! Version-tracked database migrations for the libSQL backend.
//!
//! Each migration has a version number and SQL. `run_migrations()` checks
//! the current version and applies only the new ones sequentially.

use libsql::Connection;

use crate::error::DatabaseError;

/// A single migration step.
struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

/// All migrations in order. Add new versions to the end.
static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: r#"
            CREATE TABLE IF NOT EXISTS groups (
                name TEXT PRIMARY KEY,
                created_at TEXT NOT NULL DEFAULT (datetime('now'))
            );

            CREATE TABLE IF NOT EXISTS participants (
                id TEXT PRIMARY KEY,
                first_name TEXT NOT NULL,
                last_name TEXT NOT NULL DEFAULT '',
                username TEXT NOT NULL DEFAULT '',
                phone_number TEXT NOT NULL DEFAULT '',
                gender TEXT,
                kind TEXT,
                group_name TEXT REFERENCES groups(name),
                bio TEXT NOT NULL DEFAULT '',
                meeting_frequency TEXT,
                meeting_motivation TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                first_seen_at TEXT NOT NULL,
                registered_at TEXT,
                last_seen_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS conversation_states (
                participant_id TEXT NOT NULL UNIQUE REFERENCES participants(id) ON DELETE CASCADE,
                context TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS invitations (
                participant_id TEXT NOT NULL REFERENCES participants(id) ON DELETE CASCADE,
                year INTEGER NOT NULL,
                week INTEGER NOT NULL,
                accepted INTEGER,
                cancel_reason TEXT,
                send_count INTEGER NOT NULL DEFAULT 0,
                delivery_id TEXT,
                sent_at TEXT,
                decided_at TEXT,
                created_at TEXT NOT NULL,
                UNIQUE (participant_id, year, week)
            );
            CREATE INDEX IF NOT EXISTS idx_invitations_week ON invitations(year, week);

            CREATE TABLE IF NOT EXISTS meetings (
                year INTEGER NOT NULL,
                week INTEGER NOT NULL,
                participant_a TEXT NOT NULL,
                participant_b TEXT NOT NULL,
                a_took_place INTEGER,
                b_took_place INTEGER,
                a_happy INTEGER,
                b_happy INTEGER,
                a_failure_reason TEXT,
                b_failure_reason TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                broadcast_at TEXT,
                UNIQUE (year, week, participant_a, participant_b)
            );
            CREATE INDEX IF NOT EXISTS idx_meetings_week ON meetings(year, week);
            CREATE INDEX IF NOT EXISTS idx_meetings_a ON meetings(participant_a);
            CREATE INDEX IF NOT EXISTS idx_meetings_b ON meetings(participant_b);
        "#,
    },
    Migration {
        version: 2,
        name: "audit_tables",
        sql: r#"
            CREATE TABLE IF NOT EXISTS feedback (
                id TEXT PRIMARY KEY,
                participant_id TEXT NOT NULL REFERENCES participants(id) ON DELETE CASCADE,
                text TEXT NOT NULL,
                sent_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_feedback_participant ON feedback(participant_id);

            CREATE TABLE IF NOT EXISTS message_log (
                id TEXT PRIMARY KEY,
                participant_id TEXT NOT NULL,
                direction TEXT NOT NULL,
                text TEXT NOT NULL,
                delivery_id TEXT,
                sent_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_message_log_participant ON message_log(participant_id, sent_at);
        "#,
    },
    Migration {
        version: 3,
        name: "unordered_meeting_pairs",
        sql: r#"
            DELETE FROM meetings WHERE rowid IN (
                SELECT later.rowid FROM meetings later
                JOIN meetings earlier
                  ON earlier.year = later.year
                 AND earlier.week = later.week
                 AND earlier.participant_a = later.participant_b
                 AND earlier.participant_b = later.participant_a
                 AND earlier.rowid < later.rowid
            );
            CREATE UNIQUE INDEX IF NOT EXISTS idx_meetings_pair ON meetings(
                year,
                week,
                min(participant_a, participant_b),
                max(participant_a, participant_b)
            );
        "#,
    },
];

/// Run all pending migrations against the given connection.
///
/// Creates the `_migrations` table if it doesn't exist.
pub async fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        (),
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to create _migrations table: {e}")))?;

    let current_version = get_current_version(conn).await?;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                version = migration.version,
                name = migration.name,
                "Applying migration"
            );
            conn.execute_batch(migration.sql).await.map_err(|e| {
                DatabaseError::Migration(format!(
                    "Migration V{} ({}) failed: {e}",
                    migration.version, migration.name
                ))
            })?;
            seed_version(conn, migration.version, migration.name).await?;
        }
    }

    let version = get_current_version(conn).await?;
    tracing::debug!(version, "Database migrations complete");

    Ok(())
}

/// Get the highest applied migration version, or 0 if none.
async fn get_current_version(conn: &Connection) -> Result<i64, DatabaseError> {
    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM _migrations", ())
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to query migration version: {e}")))?;

    let row = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Migration(format!("Failed to read migration version: {e}")))?;

    match row {
        Some(row) => {
            let version: i64 = row.get(0).map_err(|e| {
                DatabaseError::Migration(format!("Failed to parse migration version: {e}"))
            })?;
            Ok(version)
        }
        None => Ok(0),
    }
}

/// Insert a version record into `_migrations`.
async fn seed_version(conn: &Connection, version: i64, name: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT OR IGNORE INTO _migrations (version, name) VALUES (?1, ?2)",
        libsql::params![version, name],
    )
    .await
    .map_err(|e| DatabaseError::Migration(format!("Failed to record migration V{version}: {e}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_conn() -> Connection {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .unwrap();
        db.connect().unwrap()
    }

    #[tokio::test]
    async fn migrations_run_on_a_spawned_task() {
        let conn = test_conn().await;
        let applied = tokio::spawn(async move {
            run_migrations(&conn).await.unwrap();
            get_current_version(&conn).await.unwrap()
        })
        .await
        .unwrap();
        assert_eq!(applied, MIGRATIONS.last().map(|m| m.version).unwrap_or(0));
    }

    #[tokio::test]
    async fn migrations_create_all_tables() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();

        for table in &[
            "_migrations",
            "groups",
            "participants",
            "conversation_states",
            "invitations",
            "meetings",
            "feedback",
            "message_log",
        ] {
            let mut rows = conn
                .query(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
                    libsql::params![*table],
                )
                .await
                .unwrap();
            let row = rows.next().await.unwrap().unwrap();
            let count: i64 = row.get(0).unwrap();
            assert_eq!(count, 1, "Table '{}' should exist", table);
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let conn = test_conn().await;
        run_migrations(&conn).await.unwrap();
        run_migrations(&conn).await.unwrap();

        let version = get_current_version(&conn).await.unwrap();
        assert_eq!(version, 3);
    }

    #[tokio::test]
    async fn pair_index_drops_reversed_duplicates_from_older_databases() {
        let conn = test_conn().await;
        conn.execute(
            "CREATE TABLE _migrations (version INTEGER PRIMARY KEY, name TEXT NOT NULL, \
             applied_at TEXT NOT NULL DEFAULT (datetime('now')))",
            (),
        )
        .await
        .unwrap();
        for m in &MIGRATIONS[..2] {
            conn.execute_batch(m.sql).await.unwrap();
            seed_version(&conn, m.version, m.name).await.unwrap();
        }
        for (a, b) in [("1", "2"), ("2", "1")] {
            conn.execute(
                "INSERT INTO meetings (year, week, participant_a, participant_b, created_at, updated_at) \
                 VALUES (2026, 10, ?1, ?2, 'now', 'now')",
                libsql::params![a, b],
            )
            .await
            .unwrap();
        }

        run_migrations(&conn).await.unwrap();

        let mut rows = conn
            .query("SELECT participant_a FROM meetings", ())
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<String>(0).unwrap(), "1");
        assert!(rows.next().await.unwrap().is_none());
    }
}
