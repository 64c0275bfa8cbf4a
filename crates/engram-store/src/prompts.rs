use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// A raw user prompt with its ordinal within the session. Immutable.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PromptRow {
    pub id: i64,
    pub session_id: String,
    pub project: String,
    pub prompt_number: i64,
    pub text: String,
    pub created_at: String,
}

pub(crate) const PROMPT_COLUMNS: &str = "id, session_id, project, prompt_number, text, created_at";

pub struct PromptRepo {
    db: Database,
}

impl PromptRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Store a prompt against the active session for this external id,
    /// bumping the session's prompt counter in the same transaction. The
    /// new counter value becomes the prompt's ordinal.
    #[instrument(skip(self, text), fields(session_id = %external_id))]
    pub fn create(&self, external_id: &str, text: &str) -> Result<PromptRow, StoreError> {
        let now = Utc::now().to_rfc3339();

        self.db.with_tx(|tx| {
            let owner: Option<(i64, String)> = tx
                .query_row(
                    "SELECT id, project FROM sessions WHERE session_id = ?1 AND status = 'active'",
                    [external_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(StoreError::from(other)),
                })?;

            let (owner_id, project) = owner.ok_or_else(|| {
                StoreError::NotFound(format!("no active session for {external_id}"))
            })?;

            tx.execute(
                "UPDATE sessions SET prompt_counter = prompt_counter + 1, last_activity_at = ?1
                 WHERE id = ?2",
                rusqlite::params![now, owner_id],
            )?;
            let prompt_number: i64 = tx.query_row(
                "SELECT prompt_counter FROM sessions WHERE id = ?1",
                [owner_id],
                |row| row.get(0),
            )?;

            tx.execute(
                "INSERT INTO prompts (session_id, project, prompt_number, text, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![external_id, project, prompt_number, text, now],
            )?;

            Ok(PromptRow {
                id: tx.last_insert_rowid(),
                session_id: external_id.to_string(),
                project,
                prompt_number,
                text: text.to_string(),
                created_at: now,
            })
        })
    }

    /// List prompts for a session in submission order.
    #[instrument(skip(self), fields(session_id = %external_id))]
    pub fn for_session(&self, external_id: &str) -> Result<Vec<PromptRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {PROMPT_COLUMNS} FROM prompts WHERE session_id = ?1
                 ORDER BY prompt_number ASC"
            ))?;
            let mut rows = stmt.query([external_id])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_prompt(row)?);
            }
            Ok(results)
        })
    }
}

pub(crate) fn row_to_prompt(row: &rusqlite::Row<'_>) -> Result<PromptRow, StoreError> {
    Ok(PromptRow {
        id: row_helpers::get(row, 0, "prompts", "id")?,
        session_id: row_helpers::get(row, 1, "prompts", "session_id")?,
        project: row_helpers::get(row, 2, "prompts", "project")?,
        prompt_number: row_helpers::get(row, 3, "prompts", "prompt_number")?,
        text: row_helpers::get(row, 4, "prompts", "text")?,
        created_at: row_helpers::get(row, 5, "prompts", "created_at")?,
    })
}
