//! Versioned schema for the SQLite store
//!
//! Steps are applied in list order; a step's index is its version. Every
//! statement is guarded (`IF NOT EXISTS`) so a step interrupted before its
//! version is recorded can simply be applied again.

use crate::storage::StorageError;

/// One schema version: a short description and the statements creating it
#[derive(Debug)]
pub struct MigrationStep {
    pub description: &'static str,
    pub statements: &'static [&'static str],
}

pub const MIGRATIONS: &[MigrationStep] = &[
    MigrationStep {
        description: "schema version tracking",
        statements: &[r#"
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                timestamp INTEGER NOT NULL
            )
            "#],
    },
    MigrationStep {
        description: "raw events",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS events (
                timestamp INTEGER NOT NULL,
                host TEXT NOT NULL,
                path TEXT NOT NULL,
                method TEXT NOT NULL,
                status INTEGER NOT NULL,
                region TEXT NOT NULL,
                network TEXT NOT NULL,
                device TEXT NOT NULL,
                os TEXT NOT NULL,
                browser TEXT NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_events_host_path ON events(host, path)",
            "CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp)",
        ],
    },
    MigrationStep {
        description: "daily page counts",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS daily_pages (
                year INTEGER NOT NULL,
                month INTEGER NOT NULL,
                day INTEGER NOT NULL,
                host TEXT NOT NULL,
                path TEXT NOT NULL,
                method TEXT NOT NULL,
                count INTEGER NOT NULL DEFAULT 0
            )
            "#,
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_daily_pages_bucket
                ON daily_pages(year, month, day, host, path, method)
            "#,
        ],
    },
    MigrationStep {
        description: "daily region counts",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS daily_regions (
                year INTEGER NOT NULL,
                month INTEGER NOT NULL,
                day INTEGER NOT NULL,
                host TEXT NOT NULL,
                region TEXT NOT NULL,
                count INTEGER NOT NULL DEFAULT 0
            )
            "#,
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_daily_regions_bucket
                ON daily_regions(year, month, day, host, region)
            "#,
        ],
    },
    MigrationStep {
        description: "daily device counts",
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS daily_devices (
                year INTEGER NOT NULL,
                month INTEGER NOT NULL,
                day INTEGER NOT NULL,
                host TEXT NOT NULL,
                device TEXT NOT NULL,
                os TEXT NOT NULL,
                browser TEXT NOT NULL,
                count INTEGER NOT NULL DEFAULT 0
            )
            "#,
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_daily_devices_bucket
                ON daily_devices(year, month, day, host, device, os, browser)
            "#,
        ],
    },
];

pub const SELECT_TRACKING_TABLE: &str =
    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'";

pub const SELECT_VERSION: &str = "SELECT MAX(version) FROM schema_version";

pub const RECORD_VERSION: &str =
    "INSERT OR IGNORE INTO schema_version (version, timestamp) VALUES (?, ?)";

/// Reject step lists with empty steps or blank statements
pub fn validate(steps: &[MigrationStep]) -> Result<(), StorageError> {
    if steps.is_empty() {
        return Err(StorageError::InvalidMigrations(
            "no schema steps defined".to_string(),
        ));
    }

    for (version, step) in steps.iter().enumerate() {
        if step.statements.is_empty() {
            return Err(StorageError::InvalidMigrations(format!(
                "step {version} ({}) has no statements",
                step.description
            )));
        }
        if step.statements.iter().any(|s| s.trim().is_empty()) {
            return Err(StorageError::InvalidMigrations(format!(
                "step {version} ({}) has a blank statement",
                step.description
            )));
        }
    }

    Ok(())
}

/// Latest version defined by `steps`
pub fn latest_version(steps: &[MigrationStep]) -> i64 {
    steps.len() as i64 - 1
}
