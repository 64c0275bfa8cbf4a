//! Query surface over the FTS5 shards and the structured columns.
//!
//! The shards themselves are maintained by the schema triggers inside every
//! write transaction; nothing here mutates them.

use engram_core::ObservationKind;
use serde::Serialize;

use crate::database::Database;
use crate::error::StoreError;
use crate::observations::{self, ObservationRow, OBSERVATION_COLUMNS};
use crate::prompts::{self, PromptRow, PROMPT_COLUMNS};
use crate::row_helpers;
use crate::summaries::{self, SummaryRow, SUMMARY_COLUMNS};

/// Which FTS shard a text search runs against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SearchTable {
    Observations,
    Summaries,
    Prompts,
}

/// One ranked full-text match.
#[derive(Clone, Debug, Serialize)]
pub struct SearchHit {
    pub id: i64,
    pub session_id: String,
    pub snippet: String,
    pub score: f64,
}

/// A context record from the merged most-recent-first view.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContextItem {
    Observation(ObservationRow),
    Summary(SummaryRow),
    Prompt(PromptRow),
}

impl ContextItem {
    pub fn created_at(&self) -> &str {
        match self {
            Self::Observation(o) => &o.created_at,
            Self::Summary(s) => &s.created_at,
            Self::Prompt(p) => &p.created_at,
        }
    }

    fn row_id(&self) -> i64 {
        match self {
            Self::Observation(o) => o.id,
            Self::Summary(s) => s.id,
            Self::Prompt(p) => p.id,
        }
    }
}

/// Filters for a conjunction search over observations.
#[derive(Clone, Debug, Default)]
pub struct SearchFilters {
    pub text: Option<String>,
    pub kind: Option<ObservationKind>,
    pub concept: Option<String>,
    pub file: Option<String>,
    pub project: Option<String>,
    pub session_id: Option<String>,
    pub limit: Option<u32>,
}

const DEFAULT_LIMIT: u32 = 20;

pub struct SearchRepo {
    db: Database,
}

impl SearchRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Full-text search with bm25 ranking. The user's query is always
    /// treated as a literal phrase: embedded quotes are doubled and the
    /// whole string wrapped in `"`, so FTS5 boolean and column operators
    /// in the input are inert.
    pub fn search_text(
        &self,
        table: SearchTable,
        query: &str,
        limit: u32,
    ) -> Result<Vec<SearchHit>, StoreError> {
        if query.trim().is_empty() {
            return Ok(Vec::new());
        }
        let phrase = escape_match(query);

        let sql = match table {
            SearchTable::Observations => {
                "SELECT observations.id, observations.session_id,
                        snippet(observations_fts, 2, '', '', '...', 32),
                        bm25(observations_fts)
                 FROM observations_fts
                 JOIN observations
                   ON observations.id = CAST(observations_fts.observation_id AS INTEGER)
                 WHERE observations_fts MATCH ?1
                 ORDER BY bm25(observations_fts) LIMIT ?2"
            }
            SearchTable::Summaries => {
                "SELECT summaries.id, summaries.session_id,
                        snippet(summaries_fts, 1, '', '', '...', 32),
                        bm25(summaries_fts)
                 FROM summaries_fts
                 JOIN summaries
                   ON summaries.id = CAST(summaries_fts.summary_id AS INTEGER)
                 WHERE summaries_fts MATCH ?1
                 ORDER BY bm25(summaries_fts) LIMIT ?2"
            }
            SearchTable::Prompts => {
                "SELECT prompts.id, prompts.session_id,
                        snippet(prompts_fts, 1, '', '', '...', 32),
                        bm25(prompts_fts)
                 FROM prompts_fts
                 JOIN prompts
                   ON prompts.id = CAST(prompts_fts.prompt_id AS INTEGER)
                 WHERE prompts_fts MATCH ?1
                 ORDER BY bm25(prompts_fts) LIMIT ?2"
            }
        };

        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(sql)?;
            let mut rows = stmt.query(rusqlite::params![phrase, limit])?;
            let mut hits = Vec::new();
            while let Some(row) = rows.next()? {
                hits.push(SearchHit {
                    id: row_helpers::get(row, 0, "search", "id")?,
                    session_id: row_helpers::get(row, 1, "search", "session_id")?,
                    snippet: row_helpers::get(row, 2, "search", "snippet")?,
                    score: row_helpers::get(row, 3, "search", "score")?,
                });
            }
            Ok(hits)
        })
    }

    /// Substring match over the structured concepts column, not the
    /// tokenized index.
    pub fn find_by_concept(
        &self,
        concept: &str,
        limit: u32,
    ) -> Result<Vec<ObservationRow>, StoreError> {
        let pattern = format!("%{}%", row_helpers::escape_like(concept));
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {OBSERVATION_COLUMNS} FROM observations
                 WHERE concepts LIKE ?1 ESCAPE '\\'
                 ORDER BY created_at DESC, id DESC LIMIT ?2"
            ))?;
            let rows = collect_observations(stmt.query(rusqlite::params![pattern, limit])?);
            rows
        })
    }

    /// Substring match over the files-read and files-modified columns.
    pub fn find_by_file(
        &self,
        file: &str,
        limit: u32,
    ) -> Result<Vec<ObservationRow>, StoreError> {
        let pattern = format!("%{}%", row_helpers::escape_like(file));
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {OBSERVATION_COLUMNS} FROM observations
                 WHERE files_read LIKE ?1 ESCAPE '\\' OR files_modified LIKE ?1 ESCAPE '\\'
                 ORDER BY created_at DESC, id DESC LIMIT ?2"
            ))?;
            let rows = collect_observations(stmt.query(rusqlite::params![pattern, limit])?);
            rows
        })
    }

    /// Exact match on the observation kind.
    pub fn find_by_kind(
        &self,
        kind: ObservationKind,
        limit: u32,
    ) -> Result<Vec<ObservationRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {OBSERVATION_COLUMNS} FROM observations
                 WHERE kind = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2"
            ))?;
            let rows = collect_observations(stmt.query(rusqlite::params![kind.to_string(), limit])?);
            rows
        })
    }

    /// Observations, summaries, and prompts for a project, merged
    /// most-recent-first.
    pub fn recent_context(
        &self,
        project: &str,
        limit: u32,
    ) -> Result<Vec<ContextItem>, StoreError> {
        let mut items: Vec<ContextItem> = Vec::new();

        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {OBSERVATION_COLUMNS} FROM observations WHERE project = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2"
            ))?;
            let mut rows = stmt.query(rusqlite::params![project, limit])?;
            while let Some(row) = rows.next()? {
                items.push(ContextItem::Observation(observations::row_to_observation(row)?));
            }

            let mut stmt = conn.prepare(&format!(
                "SELECT {SUMMARY_COLUMNS} FROM summaries WHERE project = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2"
            ))?;
            let mut rows = stmt.query(rusqlite::params![project, limit])?;
            while let Some(row) = rows.next()? {
                items.push(ContextItem::Summary(summaries::row_to_summary(row)?));
            }

            let mut stmt = conn.prepare(&format!(
                "SELECT {PROMPT_COLUMNS} FROM prompts WHERE project = ?1
                 ORDER BY created_at DESC, id DESC LIMIT ?2"
            ))?;
            let mut rows = stmt.query(rusqlite::params![project, limit])?;
            while let Some(row) = rows.next()? {
                items.push(ContextItem::Prompt(prompts::row_to_prompt(row)?));
            }

            Ok(())
        })?;

        items.sort_by(|a, b| {
            b.created_at()
                .cmp(a.created_at())
                .then_with(|| b.row_id().cmp(&a.row_id()))
        });
        items.truncate(limit as usize);
        Ok(items)
    }

    /// Conjunction of structured filters with an optional phrase-escaped
    /// text query, over observations.
    pub fn advanced_search(
        &self,
        filters: &SearchFilters,
    ) -> Result<Vec<ObservationRow>, StoreError> {
        use std::fmt::Write;

        let limit = filters.limit.unwrap_or(DEFAULT_LIMIT);
        let text = filters.text.as_deref().filter(|t| !t.trim().is_empty());
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        let mut sql = format!(
            "SELECT {} FROM observations",
            qualified_observation_columns()
        );
        if text.is_some() {
            sql.push_str(
                " JOIN observations_fts
                    ON observations.id = CAST(observations_fts.observation_id AS INTEGER)",
            );
        }
        sql.push_str(" WHERE 1=1");

        if let Some(text) = text {
            params.push(Box::new(escape_match(text)));
            let _ = write!(sql, " AND observations_fts MATCH ?{}", params.len());
        }
        if let Some(kind) = filters.kind {
            params.push(Box::new(kind.to_string()));
            let _ = write!(sql, " AND observations.kind = ?{}", params.len());
        }
        if let Some(concept) = &filters.concept {
            params.push(Box::new(format!("%{}%", row_helpers::escape_like(concept))));
            let _ = write!(sql, " AND observations.concepts LIKE ?{} ESCAPE '\\'", params.len());
        }
        if let Some(file) = &filters.file {
            params.push(Box::new(format!("%{}%", row_helpers::escape_like(file))));
            let n = params.len();
            let _ = write!(
                sql,
                " AND (observations.files_read LIKE ?{n} ESCAPE '\\'
                       OR observations.files_modified LIKE ?{n} ESCAPE '\\')"
            );
        }
        if let Some(project) = &filters.project {
            params.push(Box::new(project.clone()));
            let _ = write!(sql, " AND observations.project = ?{}", params.len());
        }
        if let Some(session_id) = &filters.session_id {
            params.push(Box::new(session_id.clone()));
            let _ = write!(sql, " AND observations.session_id = ?{}", params.len());
        }

        if text.is_some() {
            sql.push_str(" ORDER BY bm25(observations_fts)");
        } else {
            sql.push_str(" ORDER BY observations.created_at DESC, observations.id DESC");
        }
        let _ = write!(sql, " LIMIT {limit}");

        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&sql)?;
            let params_refs: Vec<&dyn rusqlite::types::ToSql> =
                params.iter().map(Box::as_ref).collect();
            let rows = collect_observations(stmt.query(params_refs.as_slice())?);
            rows
        })
    }
}

/// Escape user input for FTS5: double embedded quotes, wrap as a phrase.
fn escape_match(query: &str) -> String {
    format!("\"{}\"", query.replace('"', "\"\""))
}

fn qualified_observation_columns() -> String {
    OBSERVATION_COLUMNS
        .split(',')
        .map(|c| format!("observations.{}", c.trim()))
        .collect::<Vec<_>>()
        .join(", ")
}

fn collect_observations(mut rows: rusqlite::Rows<'_>) -> Result<Vec<ObservationRow>, StoreError> {
    let mut results = Vec::new();
    while let Some(row) = rows.next().map_err(StoreError::from)? {
        results.push(observations::row_to_observation(row)?);
    }
    Ok(results)
}
