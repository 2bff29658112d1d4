pub mod analytics;
pub mod config;
pub mod cutoff;
pub mod ingest;
pub mod models;
pub mod storage;
