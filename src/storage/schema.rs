//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Runkeeper database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- One row per run attempt; rows are never rewritten once finished
CREATE TABLE IF NOT EXISTS runs (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT NOT NULL UNIQUE,
    status TEXT NOT NULL,
    trigger_source TEXT NOT NULL,
    config_hash TEXT NOT NULL,
    created_at TEXT NOT NULL,
    started_at TEXT,
    finished_at TEXT,
    result_ref TEXT,
    error_detail TEXT,
    CHECK ((finished_at IS NULL) = (status IN ('pending', 'running'))),
    CHECK (result_ref IS NULL OR status = 'succeeded'),
    CHECK (error_detail IS NULL OR status IN ('failed', 'timed_out'))
);

-- At most one running run, enforced by the database itself
CREATE UNIQUE INDEX IF NOT EXISTS idx_runs_single_running
    ON runs(status) WHERE status = 'running';

CREATE INDEX IF NOT EXISTS idx_runs_status ON runs(status);
CREATE INDEX IF NOT EXISTS idx_runs_finished_at ON runs(finished_at);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.pragma_update(None, "user_version", get_schema_version())?;
    Ok(())
}

/// Gets the current schema version
///
/// Stored in `PRAGMA user_version` so future migrations can detect it.
pub fn get_schema_version() -> u32 {
    1
}
