use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::device::constants::DEFAULT_SCAN_PAUSE_MS;
use crate::device::types::ScanCycle;
use crate::error::ConfigError;

/// Scan pacing. Duty cycling is off unless `scan_active_ms` is set. Some
/// platform scanners stall on long uninterrupted scans; cycling stops and
/// restarts the scan at the adapter level while the loop stays scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct ScanTuning {
    /// Stop the scan this long (milliseconds) after each start.
    pub scan_active_ms: Option<u64>,
    /// Restart a duty-cycled scan after this long (milliseconds).
    pub scan_pause_ms: Option<u64>,
    /// Wait this long (milliseconds) before rescanning after a
    /// disconnect. Zero rescans immediately.
    pub rescan_delay_ms: u64,
}

impl ScanTuning {
    pub fn scan_cycle(&self) -> Result<Option<ScanCycle>, ConfigError> {
        match (self.scan_active_ms, self.scan_pause_ms) {
            (None, None) => Ok(None),
            (None, Some(_)) => Err(ConfigError::ScanTuning("scanPauseMs requires scanActiveMs")),
            (Some(0), _) => Err(ConfigError::ScanTuning("scanActiveMs must be > 0")),
            (Some(active), pause) => Ok(Some(ScanCycle {
                active: Duration::from_millis(active),
                pause: Duration::from_millis(pause.unwrap_or(DEFAULT_SCAN_PAUSE_MS)),
            })),
        }
    }

    pub fn rescan_delay(&self) -> Duration {
        Duration::from_millis(self.rescan_delay_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Address of the peripheral to tether to.
    pub target_address: Option<String>,
    /// Only scan for advertisements of this service.
    pub service_uuid: Option<String>,
    pub scan: ScanTuning,
}

impl Config {
    pub fn service_uuid(&self) -> Result<Option<Uuid>, ConfigError> {
        match &self.service_uuid {
            Some(raw) => Ok(Some(Uuid::parse_str(raw)?)),
            None => Ok(None),
        }
    }
}
