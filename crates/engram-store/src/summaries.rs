use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Structured retrospective for one prompt cycle. Immutable once created.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SummaryRow {
    pub id: i64,
    pub session_id: String,
    pub project: String,
    pub request: String,
    pub investigated: String,
    pub learned: String,
    pub completed: String,
    pub next_steps: String,
    pub notes: String,
    pub prompt_number: i64,
    pub created_at: String,
}

#[derive(Clone, Debug, Default)]
pub struct NewSummary {
    pub session_id: String,
    pub request: String,
    pub investigated: String,
    pub learned: String,
    pub completed: String,
    pub next_steps: String,
    pub notes: String,
}

pub(crate) const SUMMARY_COLUMNS: &str = "id, session_id, project, request, investigated, learned, \
     completed, next_steps, notes, prompt_number, created_at";

pub struct SummaryRepo {
    db: Database,
}

impl SummaryRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert a summary for the session's current prompt cycle. Same unit of
    /// work as the index-sync trigger and the session activity bump.
    #[instrument(skip(self, input), fields(session_id = %input.session_id))]
    pub fn create(&self, input: &NewSummary) -> Result<SummaryRow, StoreError> {
        let now = Utc::now().to_rfc3339();

        self.db.with_tx(|tx| {
            let owner: Option<(i64, String, i64)> = tx
                .query_row(
                    "SELECT id, project, prompt_counter FROM sessions WHERE session_id = ?1
                     ORDER BY id DESC LIMIT 1",
                    [&input.session_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(StoreError::from(other)),
                })?;

            let (owner_id, project, prompt_number) = owner.ok_or_else(|| {
                StoreError::Integrity(format!(
                    "summary references unknown session {}",
                    input.session_id
                ))
            })?;

            tx.execute(
                "INSERT INTO summaries
                    (session_id, project, request, investigated, learned, completed, next_steps, notes, prompt_number, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    input.session_id,
                    project,
                    input.request,
                    input.investigated,
                    input.learned,
                    input.completed,
                    input.next_steps,
                    input.notes,
                    prompt_number,
                    now,
                ],
            )?;
            let id = tx.last_insert_rowid();

            tx.execute(
                "UPDATE sessions SET last_activity_at = ?1 WHERE id = ?2",
                rusqlite::params![now, owner_id],
            )?;

            Ok(SummaryRow {
                id,
                session_id: input.session_id.clone(),
                project,
                request: input.request.clone(),
                investigated: input.investigated.clone(),
                learned: input.learned.clone(),
                completed: input.completed.clone(),
                next_steps: input.next_steps.clone(),
                notes: input.notes.clone(),
                prompt_number,
                created_at: now,
            })
        })
    }

    /// List summaries for a session, creation order, paginated.
    #[instrument(skip(self), fields(session_id = %external_id))]
    pub fn for_session(
        &self,
        external_id: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<SummaryRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SUMMARY_COLUMNS} FROM summaries WHERE session_id = ?1
                 ORDER BY created_at ASC, id ASC LIMIT ?2 OFFSET ?3"
            ))?;
            let mut rows = stmt.query(rusqlite::params![external_id, limit, offset])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_summary(row)?);
            }
            Ok(results)
        })
    }
}

pub(crate) fn row_to_summary(row: &rusqlite::Row<'_>) -> Result<SummaryRow, StoreError> {
    Ok(SummaryRow {
        id: row_helpers::get(row, 0, "summaries", "id")?,
        session_id: row_helpers::get(row, 1, "summaries", "session_id")?,
        project: row_helpers::get(row, 2, "summaries", "project")?,
        request: row_helpers::get(row, 3, "summaries", "request")?,
        investigated: row_helpers::get(row, 4, "summaries", "investigated")?,
        learned: row_helpers::get(row, 5, "summaries", "learned")?,
        completed: row_helpers::get(row, 6, "summaries", "completed")?,
        next_steps: row_helpers::get(row, 7, "summaries", "next_steps")?,
        notes: row_helpers::get(row, 8, "summaries", "notes")?,
        prompt_number: row_helpers::get(row, 9, "summaries", "prompt_number")?,
        created_at: row_helpers::get(row, 10, "summaries", "created_at")?,
    })
}
