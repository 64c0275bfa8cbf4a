//! Versioned DDL for the engram database.
//!
//! Migrations run sequentially from the persisted `schema_version` marker.
//! Each step commits its DDL and the version bump in one transaction, so a
//! failure mid-step leaves the marker unchanged and the step is retried on
//! the next open.

use rusqlite::Connection;
use tracing::info;

use crate::error::StoreError;

pub const SCHEMA_VERSION: u32 = 2;

pub const PRAGMAS: &str = r#"
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
"#;

/// v1 — primary tables and indexes.
///
/// The partial unique index on sessions(session_id) is what holds the
/// at-most-one-active-per-external-id invariant, even across processes.
const V1_TABLES: &str = r#"
CREATE TABLE IF NOT EXISTS sessions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    conversation_id TEXT,
    project TEXT NOT NULL,
    prompt_counter INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'active',
    worker_port INTEGER,
    created_at TEXT NOT NULL,
    last_activity_at TEXT NOT NULL,
    completed_at TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_one_active
    ON sessions(session_id) WHERE status = 'active';
CREATE INDEX IF NOT EXISTS idx_sessions_project ON sessions(project);
CREATE INDEX IF NOT EXISTS idx_sessions_external ON sessions(session_id);

CREATE TABLE IF NOT EXISTS observations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    kind TEXT NOT NULL,
    title TEXT NOT NULL,
    narrative TEXT NOT NULL,
    facts TEXT NOT NULL DEFAULT '[]',
    concepts TEXT NOT NULL DEFAULT '[]',
    files_read TEXT NOT NULL DEFAULT '[]',
    files_modified TEXT NOT NULL DEFAULT '[]',
    project TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_observations_session ON observations(session_id);
CREATE INDEX IF NOT EXISTS idx_observations_kind ON observations(kind);
CREATE INDEX IF NOT EXISTS idx_observations_project ON observations(project);

CREATE TABLE IF NOT EXISTS summaries (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    project TEXT NOT NULL,
    request TEXT NOT NULL,
    investigated TEXT NOT NULL DEFAULT '',
    learned TEXT NOT NULL DEFAULT '',
    completed TEXT NOT NULL DEFAULT '',
    next_steps TEXT NOT NULL DEFAULT '',
    notes TEXT NOT NULL DEFAULT '',
    prompt_number INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_summaries_session ON summaries(session_id);
CREATE INDEX IF NOT EXISTS idx_summaries_project ON summaries(project);

CREATE TABLE IF NOT EXISTS prompts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    project TEXT NOT NULL,
    prompt_number INTEGER NOT NULL,
    text TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_prompts_session ON prompts(session_id);
CREATE INDEX IF NOT EXISTS idx_prompts_project ON prompts(project);
"#;

/// v2 — FTS5 shards and the sync triggers that keep them in lockstep with
/// their source tables. Updates are delete-then-insert so no stale tokens
/// survive a rewrite.
const V2_SEARCH: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS observations_fts USING fts5(
    observation_id,
    title,
    narrative,
    facts,
    concepts,
    files,
    tokenize='porter unicode61'
);

CREATE TRIGGER IF NOT EXISTS observations_fts_insert AFTER INSERT ON observations
BEGIN
    INSERT INTO observations_fts(observation_id, title, narrative, facts, concepts, files)
    VALUES (NEW.id, NEW.title, NEW.narrative, NEW.facts, NEW.concepts,
            NEW.files_read || ' ' || NEW.files_modified);
END;

CREATE TRIGGER IF NOT EXISTS observations_fts_update AFTER UPDATE ON observations
BEGIN
    DELETE FROM observations_fts WHERE observation_id = OLD.id;
    INSERT INTO observations_fts(observation_id, title, narrative, facts, concepts, files)
    VALUES (NEW.id, NEW.title, NEW.narrative, NEW.facts, NEW.concepts,
            NEW.files_read || ' ' || NEW.files_modified);
END;

CREATE TRIGGER IF NOT EXISTS observations_fts_delete AFTER DELETE ON observations
BEGIN
    DELETE FROM observations_fts WHERE observation_id = OLD.id;
END;

CREATE VIRTUAL TABLE IF NOT EXISTS summaries_fts USING fts5(
    summary_id,
    request,
    investigated,
    learned,
    completed,
    next_steps,
    notes,
    tokenize='porter unicode61'
);

CREATE TRIGGER IF NOT EXISTS summaries_fts_insert AFTER INSERT ON summaries
BEGIN
    INSERT INTO summaries_fts(summary_id, request, investigated, learned, completed, next_steps, notes)
    VALUES (NEW.id, NEW.request, NEW.investigated, NEW.learned, NEW.completed,
            NEW.next_steps, NEW.notes);
END;

CREATE TRIGGER IF NOT EXISTS summaries_fts_update AFTER UPDATE ON summaries
BEGIN
    DELETE FROM summaries_fts WHERE summary_id = OLD.id;
    INSERT INTO summaries_fts(summary_id, request, investigated, learned, completed, next_steps, notes)
    VALUES (NEW.id, NEW.request, NEW.investigated, NEW.learned, NEW.completed,
            NEW.next_steps, NEW.notes);
END;

CREATE TRIGGER IF NOT EXISTS summaries_fts_delete AFTER DELETE ON summaries
BEGIN
    DELETE FROM summaries_fts WHERE summary_id = OLD.id;
END;

CREATE VIRTUAL TABLE IF NOT EXISTS prompts_fts USING fts5(
    prompt_id,
    text,
    tokenize='porter unicode61'
);

CREATE TRIGGER IF NOT EXISTS prompts_fts_insert AFTER INSERT ON prompts
BEGIN
    INSERT INTO prompts_fts(prompt_id, text) VALUES (NEW.id, NEW.text);
END;

CREATE TRIGGER IF NOT EXISTS prompts_fts_update AFTER UPDATE ON prompts
BEGIN
    DELETE FROM prompts_fts WHERE prompt_id = OLD.id;
    INSERT INTO prompts_fts(prompt_id, text) VALUES (NEW.id, NEW.text);
END;

CREATE TRIGGER IF NOT EXISTS prompts_fts_delete AFTER DELETE ON prompts
BEGIN
    DELETE FROM prompts_fts WHERE prompt_id = OLD.id;
END;
"#;

const MIGRATIONS: &[(u32, &str)] = &[(1, V1_TABLES), (2, V2_SEARCH)];

/// Apply pending migrations. Safe to call on every open.
pub fn migrate(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);",
    )
    .map_err(|e| StoreError::Schema(format!("schema_version table: {e}")))?;

    let current: u32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
            row.get(0)
        })
        .unwrap_or(0);

    if current == 0 {
        conn.execute("INSERT INTO schema_version (version) VALUES (0)", [])
            .map_err(|e| StoreError::Schema(format!("schema_version seed: {e}")))?;
    }

    for &(version, sql) in MIGRATIONS {
        if version <= current {
            continue;
        }
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| StoreError::Schema(format!("migration {version}: {e}")))?;
        tx.execute_batch(sql)
            .map_err(|e| StoreError::Schema(format!("migration {version}: {e}")))?;
        tx.execute("UPDATE schema_version SET version = ?1", [version])
            .map_err(|e| StoreError::Schema(format!("migration {version}: {e}")))?;
        tx.commit()
            .map_err(|e| StoreError::Schema(format!("migration {version}: {e}")))?;
        info!(version, "applied schema migration");
    }

    Ok(())
}
