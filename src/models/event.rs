use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;

/// Device class derived from the user-agent system tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    Mobile,
    Ipad,
    Iphone,
    Desktop,
    Other,
    Unknown,
}

impl Device {
    pub fn as_str(&self) -> &'static str {
        match self {
            Device::Mobile => "mobile",
            Device::Ipad => "ipad",
            Device::Iphone => "iphone",
            Device::Desktop => "desktop",
            Device::Other => "other",
            Device::Unknown => "unknown",
        }
    }
}

/// Operating system derived from the user-agent system tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Android,
    Ios,
    Macos,
    Windows,
    Linux,
    Other,
    Unknown,
}

impl Os {
    pub fn as_str(&self) -> &'static str {
        match self {
            Os::Android => "android",
            Os::Ios => "ios",
            Os::Macos => "macos",
            Os::Windows => "windows",
            Os::Linux => "linux",
            Os::Other => "other",
            Os::Unknown => "unknown",
        }
    }
}

/// Browser family derived from the user-agent client tokens
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Browser {
    Firefox,
    Edge,
    Brave,
    Chrome,
    Safari,
    Ie,
    Other,
    Unknown,
}

impl Browser {
    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Firefox => "firefox",
            Browser::Edge => "edge",
            Browser::Brave => "brave",
            Browser::Chrome => "chrome",
            Browser::Safari => "safari",
            Browser::Ie => "ie",
            Browser::Other => "other",
            Browser::Unknown => "unknown",
        }
    }
}

macro_rules! display_as_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_as_str!(Device, Os, Browser, Network);

/// Classified user agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Agent {
    pub device: Device,
    pub os: Os,
    pub browser: Browser,
}

impl Agent {
    pub const fn new(device: Device, os: Os, browser: Browser) -> Self {
        Self {
            device,
            os,
            browser,
        }
    }

    /// Agent for strings that do not look like a browser at all
    pub const UNKNOWN: Agent = Agent::new(Device::Unknown, Os::Unknown, Browser::Unknown);
}

/// How a remote address was classified
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Ipv4,
    Ipv6,
    None,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Ipv4 => "ipv4",
            Network::Ipv6 => "ipv6",
            Network::None => "none",
        }
    }
}

/// Region sentinel for addresses that carry no region (IPv6, unparsable, unlabelled ranges)
pub const REGION_NONE: &str = "None";

/// Region sentinel for IPv4 addresses outside every loaded range
pub const REGION_UNKNOWN: &str = "Unknown";

/// Result of a geolocation lookup
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GeoResult {
    pub region: String,
    pub network: Network,
}

impl GeoResult {
    pub fn new(region: impl Into<String>, network: Network) -> Self {
        Self {
            region: region.into(),
            network,
        }
    }
}

/// Canonical enriched access-log record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Request time, always UTC
    pub timestamp: DateTime<Utc>,
    pub host: String,
    pub path: String,
    pub method: String,
    pub status: i64,
    pub region: String,
    pub network: Network,
    pub agent: Agent,
}

/// Row shape of the `events` table
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct EventRow {
    pub timestamp: i64,
    pub host: String,
    pub path: String,
    pub method: String,
    pub status: i64,
    pub region: String,
    pub network: String,
    pub device: String,
    pub os: String,
    pub browser: String,
}

impl From<&Event> for EventRow {
    fn from(event: &Event) -> Self {
        Self {
            timestamp: event.timestamp.timestamp(),
            host: event.host.clone(),
            path: event.path.clone(),
            method: event.method.clone(),
            status: event.status,
            region: event.region.clone(),
            network: event.network.as_str().to_string(),
            device: event.agent.device.as_str().to_string(),
            os: event.agent.os.as_str().to_string(),
            browser: event.agent.browser.as_str().to_string(),
        }
    }
}

/// UTC calendar day an event falls on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Day {
    pub year: i32,
    pub month: u32,
    pub day: u32,
}

impl Day {
    pub fn from_timestamp(timestamp: i64) -> Option<Self> {
        let time = DateTime::<Utc>::from_timestamp(timestamp, 0)?;
        Some(Self {
            year: time.year(),
            month: time.month(),
            day: time.day(),
        })
    }
}

/// Bucket key of `daily_pages`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageBucket {
    pub day: Day,
    pub host: String,
    pub path: String,
    pub method: String,
}

/// Bucket key of `daily_regions`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegionBucket {
    pub day: Day,
    pub host: String,
    pub region: String,
}

/// Bucket key of `daily_devices`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceBucket {
    pub day: Day,
    pub host: String,
    pub device: String,
    pub os: String,
    pub browser: String,
}

/// Row of `daily_pages`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct DailyPage {
    pub year: i64,
    pub month: i64,
    pub day: i64,
    pub host: String,
    pub path: String,
    pub method: String,
    pub count: i64,
}

/// Row of `daily_regions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct DailyRegion {
    pub year: i64,
    pub month: i64,
    pub day: i64,
    pub host: String,
    pub region: String,
    pub count: i64,
}

/// Row of `daily_devices`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromRow)]
pub struct DailyDevice {
    pub year: i64,
    pub month: i64,
    pub day: i64,
    pub host: String,
    pub device: String,
    pub os: String,
    pub browser: String,
    pub count: i64,
}
