//! Visitor enrichment
//!
//! This module derives the dimensions recorded for each access-log line:
//! region and network class from the remote address, and device, OS and
//! browser from the user agent.

pub mod agent;
pub mod geoip;

pub use agent::classify;
pub use geoip::{AddressRange, GeoError, GeoResolver, DEFAULT_CACHE_CAPACITY};
