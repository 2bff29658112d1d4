pub mod event;

pub use event::{
    Agent, Browser, DailyDevice, DailyPage, DailyRegion, Day, Device, DeviceBucket, Event,
    EventRow, GeoResult, Network, Os, PageBucket, RegionBucket, REGION_NONE, REGION_UNKNOWN,
};
