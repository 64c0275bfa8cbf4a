use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Completed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Completed => write!(f, "completed"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            other => Err(format!("unknown session status: {other}")),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionRow {
    pub id: i64,
    pub session_id: String,
    pub conversation_id: Option<String>,
    pub project: String,
    pub prompt_counter: i64,
    pub status: SessionStatus,
    pub worker_port: Option<u16>,
    pub created_at: String,
    pub last_activity_at: String,
    pub completed_at: Option<String>,
}

const SESSION_COLUMNS: &str = "id, session_id, conversation_id, project, prompt_counter, \
     status, worker_port, created_at, last_activity_at, completed_at";

pub struct SessionRepo {
    db: Database,
}

impl SessionRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Create a new active session for an external id.
    /// Fails with `Conflict` if an active session already exists for it.
    #[instrument(skip(self), fields(session_id = %external_id, project))]
    pub fn create(
        &self,
        external_id: &str,
        project: &str,
        conversation_id: Option<&str>,
    ) -> Result<SessionRow, StoreError> {
        let now = Utc::now().to_rfc3339();

        self.db.with_tx(|tx| {
            let result = tx.execute(
                "INSERT INTO sessions (session_id, conversation_id, project, status, created_at, last_activity_at)
                 VALUES (?1, ?2, ?3, 'active', ?4, ?4)",
                rusqlite::params![external_id, conversation_id, project, now],
            );

            match result {
                Ok(_) => Ok(SessionRow {
                    id: tx.last_insert_rowid(),
                    session_id: external_id.to_string(),
                    conversation_id: conversation_id.map(str::to_string),
                    project: project.to_string(),
                    prompt_counter: 0,
                    status: SessionStatus::Active,
                    worker_port: None,
                    created_at: now.clone(),
                    last_activity_at: now,
                    completed_at: None,
                }),
                // The partial unique index rejects a second active row
                Err(rusqlite::Error::SqliteFailure(err, _))
                    if err.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    Err(StoreError::Conflict(format!(
                        "active session already exists for {external_id}"
                    )))
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Find the active session for an external id, if any.
    #[instrument(skip(self), fields(session_id = %external_id))]
    pub fn find_active(&self, external_id: &str) -> Result<Option<SessionRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE session_id = ?1 AND status = 'active'"
            ))?;
            let mut rows = stmt.query([external_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_session(row)?)),
                None => Ok(None),
            }
        })
    }

    /// Get a session by internal id.
    #[instrument(skip(self))]
    pub fn get(&self, id: i64) -> Result<SessionRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"
            ))?;
            let mut rows = stmt.query([id])?;
            match rows.next()? {
                Some(row) => row_to_session(row),
                None => Err(StoreError::NotFound(format!("session {id}"))),
            }
        })
    }

    /// Mark a session completed. Idempotent — completing an already-completed
    /// session is a no-op and `completed_at` is never overwritten.
    #[instrument(skip(self))]
    pub fn mark_completed(&self, id: i64) -> Result<(), StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_conn(|conn| {
            conn.execute(
                "UPDATE sessions SET status = 'completed', completed_at = ?1, last_activity_at = ?1
                 WHERE id = ?2 AND status = 'active'",
                rusqlite::params![now, id],
            )?;
            Ok(())
        })
    }

    /// Bump last-activity and the prompt counter. Called once per prompt
    /// boundary; returns the new counter value.
    #[instrument(skip(self))]
    pub fn touch(&self, id: i64) -> Result<i64, StoreError> {
        let now = Utc::now().to_rfc3339();
        self.db.with_tx(|tx| {
            let changed = tx.execute(
                "UPDATE sessions SET prompt_counter = prompt_counter + 1, last_activity_at = ?1
                 WHERE id = ?2",
                rusqlite::params![now, id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("session {id}")));
            }
            let counter: i64 = tx.query_row(
                "SELECT prompt_counter FROM sessions WHERE id = ?1",
                [id],
                |row| row.get(0),
            )?;
            Ok(counter)
        })
    }

    /// Record the loopback port of the worker serving this session.
    #[instrument(skip(self))]
    pub fn set_worker_port(&self, id: i64, port: u16) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE sessions SET worker_port = ?1 WHERE id = ?2",
                rusqlite::params![port, id],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("session {id}")));
            }
            Ok(())
        })
    }
}

pub(crate) fn row_to_session(row: &rusqlite::Row<'_>) -> Result<SessionRow, StoreError> {
    let status_str: String = row_helpers::get(row, 5, "sessions", "status")?;

    Ok(SessionRow {
        id: row_helpers::get(row, 0, "sessions", "id")?,
        session_id: row_helpers::get(row, 1, "sessions", "session_id")?,
        conversation_id: row_helpers::get_opt(row, 2, "sessions", "conversation_id")?,
        project: row_helpers::get(row, 3, "sessions", "project")?,
        prompt_counter: row_helpers::get(row, 4, "sessions", "prompt_counter")?,
        status: row_helpers::parse_enum(&status_str, "sessions", "status")?,
        worker_port: row_helpers::get_opt::<i64>(row, 6, "sessions", "worker_port")?
            .map(|p| p as u16),
        created_at: row_helpers::get(row, 7, "sessions", "created_at")?,
        last_activity_at: row_helpers::get(row, 8, "sessions", "last_activity_at")?,
        completed_at: row_helpers::get_opt(row, 9, "sessions", "completed_at")?,
    })
}
