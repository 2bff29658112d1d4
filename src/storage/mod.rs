pub mod aggregate;
pub mod schema;
pub mod sqlite;
pub mod trait_def;

pub use aggregate::DailyBuckets;
pub use schema::{MigrationStep, MIGRATIONS};
pub use sqlite::SqliteStorage;
pub use trait_def::{Storage, StorageError, StorageResult};
