//! IPv4 range table geolocation
//!
//! This module resolves remote addresses to a region code using a sorted
//! table of disjoint IPv4 ranges (`start end [region]`, one per line,
//! bounds as 32-bit integers). The table is loaded once and is read-only
//! afterwards; recent lookups are kept in a bounded cache.

use moka::sync::Cache;
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

use crate::models::{GeoResult, Network, REGION_NONE, REGION_UNKNOWN};

/// Default number of cached lookups
pub const DEFAULT_CACHE_CAPACITY: u64 = 1024;

#[derive(Debug, Error)]
pub enum GeoError {
    #[error("failed to read geo table {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid geo table entry on line {line}: {reason}")]
    Parse { line: usize, reason: String },
}

/// Closed interval of IPv4 addresses mapped to a region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddressRange {
    pub start: u32,
    pub end: u32,
    pub region: String,
}

/// Geolocation resolver backed by an in-memory range table
pub struct GeoResolver {
    ranges: Vec<AddressRange>,
    cache: Cache<String, GeoResult>,
}

impl GeoResolver {
    /// Load the range table from a file
    ///
    /// # Arguments
    /// * `path` - Path to the newline-delimited range table
    /// * `cache_capacity` - Maximum number of cached lookups
    pub fn load(path: impl AsRef<Path>, cache_capacity: u64) -> Result<Self, GeoError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| GeoError::Read {
            path: path.display().to_string(),
            source,
        })?;

        let resolver = Self::from_table(&content, cache_capacity)?;
        info!(
            path = %path.display(),
            ranges = resolver.len(),
            "Loaded geo range table"
        );
        Ok(resolver)
    }

    /// Build a resolver from the text of a range table
    pub fn from_table(content: &str, cache_capacity: u64) -> Result<Self, GeoError> {
        let ranges = parse_table(content)?;
        Ok(Self::from_ranges(ranges, cache_capacity))
    }

    /// Build a resolver from already parsed ranges (sorted here)
    pub fn from_ranges(mut ranges: Vec<AddressRange>, cache_capacity: u64) -> Self {
        ranges.sort_by_key(|r| r.start);
        Self {
            ranges,
            cache: Cache::new(cache_capacity),
        }
    }

    /// Number of loaded ranges
    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Loaded ranges in ascending order of `start`
    pub fn ranges(&self) -> &[AddressRange] {
        &self.ranges
    }

    /// Classify a remote address string
    ///
    /// Unparsable input resolves to (`None`, none) and IPv6 input to
    /// (`None`, ipv6); neither is an error.
    pub fn lookup(&self, address: &str) -> GeoResult {
        self.cache
            .get_with_by_ref(address, || self.resolve(address))
    }

    fn resolve(&self, address: &str) -> GeoResult {
        match address.trim().parse::<IpAddr>() {
            Ok(IpAddr::V4(ip)) => {
                GeoResult::new(self.region_for(u32::from(ip)), Network::Ipv4)
            }
            Ok(IpAddr::V6(_)) => GeoResult::new(REGION_NONE, Network::Ipv6),
            Err(_) => {
                debug!(address, "Unparsable remote address");
                GeoResult::new(REGION_NONE, Network::None)
            }
        }
    }

    fn region_for(&self, ip: u32) -> &str {
        if self.ranges.is_empty() {
            return REGION_UNKNOWN;
        }

        // First range whose start is not below the address, clamped to the table end.
        let mut idx = self
            .ranges
            .partition_point(|r| r.start < ip)
            .min(self.ranges.len() - 1);

        // Address sits in the gap just below ranges[idx].
        if self.ranges[idx].start > ip {
            if idx == 0 {
                return REGION_UNKNOWN;
            }
            idx -= 1;
        }

        let range = &self.ranges[idx];
        if ip > range.end {
            return REGION_UNKNOWN;
        }
        &range.region
    }
}

fn parse_table(content: &str) -> Result<Vec<AddressRange>, GeoError> {
    let mut ranges = Vec::new();

    for (idx, line) in content.lines().enumerate() {
        let line_no = idx + 1;
        let fields: Vec<&str> = line.split_whitespace().collect();
        let (start, end, region) = match fields.as_slice() {
            [start, end, region] => (*start, *end, *region),
            [start, end] => (*start, *end, REGION_NONE),
            _ => continue,
        };

        let start = parse_bound(start, line_no)?;
        let end = parse_bound(end, line_no)?;
        if start > end {
            return Err(GeoError::Parse {
                line: line_no,
                reason: format!("range start {start} exceeds end {end}"),
            });
        }

        ranges.push(AddressRange {
            start,
            end,
            region: region.to_string(),
        });
    }

    Ok(ranges)
}

fn parse_bound(value: &str, line: usize) -> Result<u32, GeoError> {
    value.parse::<u32>().map_err(|e| GeoError::Parse {
        line,
        reason: format!("{value:?} is not a 32-bit address: {e}"),
    })
}
