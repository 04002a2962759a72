use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use crate::error::AddressError;

/// Address of the one peripheral the link loop seeks.
///
/// Normalized to ASCII uppercase at construction, so that matching a
/// discovered device against the configured target is a plain equality
/// check no matter how the platform formats addresses.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeripheralAddress(String);

impl PeripheralAddress {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for PeripheralAddress {
    type Err = AddressError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let value = value.trim();
        if value.is_empty() {
            return Err(AddressError::Empty);
        }
        Ok(PeripheralAddress(value.to_ascii_uppercase()))
    }
}

impl fmt::Display for PeripheralAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Idle,
    Scanning,
    Connecting,
    Connected,
    Disconnected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = match self {
            LinkState::Idle => "idle",
            LinkState::Scanning => "scanning",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Disconnected => "disconnected",
        };

        write!(f, "{}", result)
    }
}

/// One advertisement seen while scanning. Not retained beyond the match
/// check against the configured target.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredDevice {
    pub address: PeripheralAddress,
    pub rssi: Option<i16>,
    pub local_name: Option<String>,
}

impl fmt::Display for DiscoveredDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)?;
        if let Some(name) = &self.local_name {
            write!(f, " {:?}", name)?;
        }
        if let Some(rssi) = self.rssi {
            write!(f, " rssi {}", rssi)?;
        }
        Ok(())
    }
}

/// Callbacks from the adapter, delivered one at a time over a single
/// stream. The adapter does no filtering by identifier; matching is the
/// loop's job.
#[derive(Debug, Clone, PartialEq)]
pub enum AdapterEvent {
    Discovered(DiscoveredDevice),
    LinkUp,
    LinkDown { status: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransitionReason {
    StartRequested,
    StopRequested,
    TargetDiscovered,
    LinkUp,
    LinkDown(Option<String>),
    ConnectFailed(Option<String>),
    Rescan,
}

impl fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransitionReason::StartRequested => write!(f, "start requested"),
            TransitionReason::StopRequested => write!(f, "stop requested"),
            TransitionReason::TargetDiscovered => write!(f, "target advertisement seen"),
            TransitionReason::LinkUp => write!(f, "link up"),
            TransitionReason::LinkDown(None) => write!(f, "link down"),
            TransitionReason::LinkDown(Some(status)) => write!(f, "link down: {}", status),
            TransitionReason::ConnectFailed(None) => write!(f, "connect failed"),
            TransitionReason::ConnectFailed(Some(status)) => write!(f, "connect failed: {}", status),
            TransitionReason::Rescan => write!(f, "rescanning"),
        }
    }
}

/// One state transition of the loop. Every transition is rendered to a
/// single log line for the UI sinks.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub at: SystemTime,
    pub from: LinkState,
    pub to: LinkState,
    pub reason: TransitionReason,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} -> {} ({})",
            humantime::format_rfc3339_seconds(self.at),
            self.from,
            self.to,
            self.reason,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Transition(Transition),
}

/// Optional duty cycling of the adapter-level scan: scan for `active`,
/// pause for `pause`, repeat. The loop state stays `Scanning` throughout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanCycle {
    pub active: Duration,
    pub pause: Duration,
}

#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub target: PeripheralAddress,
    /// Wait between a disconnect and the automatic rescan. Zero rescans
    /// immediately.
    pub rescan_delay: Duration,
    pub scan_cycle: Option<ScanCycle>,
}

impl LinkSettings {
    pub fn new(target: PeripheralAddress) -> Self {
        LinkSettings {
            target,
            rescan_delay: Duration::ZERO,
            scan_cycle: None,
        }
    }
}
