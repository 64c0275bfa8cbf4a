use chrono::Utc;
use engram_core::ObservationKind;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// One recorded tool execution. Immutable once created.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObservationRow {
    pub id: i64,
    pub session_id: String,
    pub kind: ObservationKind,
    pub title: String,
    pub narrative: String,
    pub facts: Vec<String>,
    pub concepts: Vec<String>,
    pub files_read: Vec<String>,
    pub files_modified: Vec<String>,
    pub project: String,
    pub created_at: String,
}

#[derive(Clone, Debug, Default)]
pub struct NewObservation {
    pub session_id: String,
    pub kind: Option<ObservationKind>,
    pub title: String,
    pub narrative: String,
    pub facts: Vec<String>,
    pub concepts: Vec<String>,
    pub files_read: Vec<String>,
    pub files_modified: Vec<String>,
}

pub(crate) const OBSERVATION_COLUMNS: &str = "id, session_id, kind, title, narrative, facts, concepts, \
     files_read, files_modified, project, created_at";

pub struct ObservationRepo {
    db: Database,
}

impl ObservationRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Insert an observation. The session reference must exist (any status);
    /// the insert, its index-sync trigger, and the owning session's
    /// last-activity bump all commit in one transaction.
    #[instrument(skip(self, input), fields(session_id = %input.session_id))]
    pub fn create(&self, input: &NewObservation) -> Result<ObservationRow, StoreError> {
        let kind = input.kind.unwrap_or(ObservationKind::Change);
        let now = Utc::now().to_rfc3339();

        let facts = serde_json::to_string(&input.facts)?;
        let concepts = serde_json::to_string(&input.concepts)?;
        let files_read = serde_json::to_string(&input.files_read)?;
        let files_modified = serde_json::to_string(&input.files_modified)?;

        self.db.with_tx(|tx| {
            let owner: Option<(i64, String)> = tx
                .query_row(
                    "SELECT id, project FROM sessions WHERE session_id = ?1
                     ORDER BY id DESC LIMIT 1",
                    [&input.session_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(StoreError::from(other)),
                })?;

            let (owner_id, project) = owner.ok_or_else(|| {
                StoreError::Integrity(format!(
                    "observation references unknown session {}",
                    input.session_id
                ))
            })?;

            tx.execute(
                "INSERT INTO observations
                    (session_id, kind, title, narrative, facts, concepts, files_read, files_modified, project, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    input.session_id,
                    kind.to_string(),
                    input.title,
                    input.narrative,
                    facts,
                    concepts,
                    files_read,
                    files_modified,
                    project,
                    now,
                ],
            )?;
            let id = tx.last_insert_rowid();

            tx.execute(
                "UPDATE sessions SET last_activity_at = ?1 WHERE id = ?2",
                rusqlite::params![now, owner_id],
            )?;

            Ok(ObservationRow {
                id,
                session_id: input.session_id.clone(),
                kind,
                title: input.title.clone(),
                narrative: input.narrative.clone(),
                facts: input.facts.clone(),
                concepts: input.concepts.clone(),
                files_read: input.files_read.clone(),
                files_modified: input.files_modified.clone(),
                project,
                created_at: now,
            })
        })
    }

    /// Get an observation by id.
    pub fn get(&self, id: i64) -> Result<ObservationRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {OBSERVATION_COLUMNS} FROM observations WHERE id = ?1"
            ))?;
            let mut rows = stmt.query([id])?;
            match rows.next()? {
                Some(row) => row_to_observation(row),
                None => Err(StoreError::NotFound(format!("observation {id}"))),
            }
        })
    }

    /// List observations for a session, creation order, paginated.
    #[instrument(skip(self), fields(session_id = %external_id))]
    pub fn for_session(
        &self,
        external_id: &str,
        kind: Option<ObservationKind>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<ObservationRow>, StoreError> {
        self.db.with_conn(|conn| {
            let (sql, params): (String, Vec<String>) = match kind {
                Some(k) => (
                    format!(
                        "SELECT {OBSERVATION_COLUMNS} FROM observations
                         WHERE session_id = ?1 AND kind = ?2
                         ORDER BY created_at ASC, id ASC LIMIT ?3 OFFSET ?4"
                    ),
                    vec![
                        external_id.to_string(),
                        k.to_string(),
                        limit.to_string(),
                        offset.to_string(),
                    ],
                ),
                None => (
                    format!(
                        "SELECT {OBSERVATION_COLUMNS} FROM observations
                         WHERE session_id = ?1
                         ORDER BY created_at ASC, id ASC LIMIT ?2 OFFSET ?3"
                    ),
                    vec![
                        external_id.to_string(),
                        limit.to_string(),
                        offset.to_string(),
                    ],
                ),
            };

            let mut stmt = conn.prepare(&sql)?;
            let params_refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(|p| p as &dyn rusqlite::types::ToSql).collect();
            let mut rows = stmt.query(params_refs.as_slice())?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_observation(row)?);
            }
            Ok(results)
        })
    }
}

pub(crate) fn row_to_observation(row: &rusqlite::Row<'_>) -> Result<ObservationRow, StoreError> {
    let kind_str: String = row_helpers::get(row, 2, "observations", "kind")?;
    let facts: String = row_helpers::get(row, 5, "observations", "facts")?;
    let concepts: String = row_helpers::get(row, 6, "observations", "concepts")?;
    let files_read: String = row_helpers::get(row, 7, "observations", "files_read")?;
    let files_modified: String = row_helpers::get(row, 8, "observations", "files_modified")?;

    Ok(ObservationRow {
        id: row_helpers::get(row, 0, "observations", "id")?,
        session_id: row_helpers::get(row, 1, "observations", "session_id")?,
        kind: row_helpers::parse_enum(&kind_str, "observations", "kind")?,
        title: row_helpers::get(row, 3, "observations", "title")?,
        narrative: row_helpers::get(row, 4, "observations", "narrative")?,
        facts: row_helpers::parse_string_list(&facts, "observations", "facts")?,
        concepts: row_helpers::parse_string_list(&concepts, "observations", "concepts")?,
        files_read: row_helpers::parse_string_list(&files_read, "observations", "files_read")?,
        files_modified: row_helpers::parse_string_list(
            &files_modified,
            "observations",
            "files_modified",
        )?,
        project: row_helpers::get(row, 9, "observations", "project")?,
        created_at: row_helpers::get(row, 10, "observations", "created_at")?,
    })
}
