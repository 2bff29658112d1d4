//! Access-log ingestion: follow, decode, assemble, batch.

pub mod batcher;
pub mod decoder;
pub mod follower;
pub mod pipeline;

pub use batcher::{BatchConfig, Batcher, EventSink};
pub use decoder::{
    decode, AssembleError, DecodeError, EventAssembler, FieldError, LineError, ParsedFields,
};
pub use follower::{FollowConfig, FollowError, FollowExit, FollowHandle, LogFollower};
pub use pipeline::{IngestStats, Pipeline};
