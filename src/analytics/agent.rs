//! User-agent classification
//!
//! Maps a raw `User-Agent` header to a (device, os, browser) triple by
//! ordered substring matching. Ordering matters: Chromium derivatives
//! carry `chrome/` alongside their own token, so Edge and Brave are
//! checked before Chrome.

use regex::Regex;
use std::sync::LazyLock;

use crate::models::{Agent, Browser, Device, Os};

// mozilla/<major>.<minor> (<system tokens>)<client tokens>
static AGENT_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^mozilla/\d\.\d \(([^)]*)\)(.*)").unwrap());

const SYSTEMS: &[(&str, Device, Os)] = &[
    ("android", Device::Mobile, Os::Android),
    ("ipad", Device::Ipad, Os::Ios),
    ("iphone", Device::Iphone, Os::Ios),
    ("mac os", Device::Desktop, Os::Macos),
    ("windows", Device::Desktop, Os::Windows),
    ("linux", Device::Desktop, Os::Linux),
];

const CLIENTS: &[(&[&str], Browser)] = &[
    (&["firefox/", "fxios/"], Browser::Firefox),
    (&["edg/", "edge/", "edga/", "edgios/"], Browser::Edge),
    (&["brave/"], Browser::Brave),
    (&["chrome/", "crios/"], Browser::Chrome),
    (&["safari/"], Browser::Safari),
];

/// Classify a raw user-agent string
pub fn classify(raw: &str) -> Agent {
    let agent = raw.to_lowercase();

    let Some(captures) = AGENT_REGEX.captures(&agent) else {
        if agent.contains("safari/") {
            return Agent::new(Device::Other, Os::Other, Browser::Safari);
        }
        return Agent::UNKNOWN;
    };

    let system = captures.get(1).map_or("", |m| m.as_str());
    let client = captures.get(2).map_or("", |m| m.as_str());

    let (device, os) = SYSTEMS
        .iter()
        .find(|(token, _, _)| system.contains(token))
        .map(|(_, device, os)| (*device, *os))
        .unwrap_or((Device::Other, Os::Other));

    let browser = CLIENTS
        .iter()
        .find(|(tokens, _)| tokens.iter().any(|t| client.contains(t)))
        .map(|(_, browser)| *browser)
        .unwrap_or_else(|| {
            if system.contains("trident") || system.contains("msie") {
                Browser::Ie
            } else {
                Browser::Other
            }
        });

    Agent::new(device, os, browser)
}
