//! SQL migration definitions for the ManualForge database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: records, pipeline_runs",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per catalog entry
CREATE TABLE IF NOT EXISTS records (
    id           INTEGER PRIMARY KEY,
    title        TEXT NOT NULL,
    source_link  TEXT NOT NULL,
    state        TEXT NOT NULL DEFAULT 'pending'
                 CHECK (state IN ('pending', 'rejected', 'processed', 'failed')),
    content_ref  TEXT,
    content_hash TEXT,
    extent       INTEGER,
    last_error   TEXT,
    updated_at   TEXT,
    CHECK ((state = 'processed') = (content_ref IS NOT NULL))
);

CREATE INDEX IF NOT EXISTS idx_records_state ON records(state);

-- Batch history
CREATE TABLE IF NOT EXISTS pipeline_runs (
    id          TEXT PRIMARY KEY,
    started_at  TEXT NOT NULL,
    finished_at TEXT NOT NULL,
    stats_json  TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Index pipeline_runs by start time",
            sql: r#"
CREATE INDEX IF NOT EXISTS idx_pipeline_runs_started ON pipeline_runs(started_at);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
