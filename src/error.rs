use std::io;
use thiserror::Error;
use std::str::Utf8Error;
use btleplug;
use serde_json;

use crate::device::types::PeripheralAddress;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to determine path to config file")]
    NoConfigPath,

    #[error("Failed to acquire file lock on config file: {source}")]
    CanNotLock { source: io::Error },

    #[error("Failed to encode/decode config as utf-8: {source}")]
    Utf8Error { #[from] source: Utf8Error },

    #[error("Failed to read/write config file: {source}")]
    IOError { #[from] source: io::Error },

    #[error("Failed to parse/build config file: {source}")]
    JsonError { #[from] source: serde_json::Error },

    #[error("Failed to parse service uuid: {source}")]
    InvalidServiceUuid { #[from] source: uuid::Error },

    #[error("Invalid scan tuning: {0}")]
    ScanTuning(&'static str),
}

#[derive(Error, Debug)]
pub enum AddressError {
    #[error("A peripheral address must not be empty")]
    Empty,
}

#[derive(Error, Debug)]
pub enum DeviceError {
    #[error("Error communicating with the adapter (btleplug): {source}")]
    Btle { #[from] source: btleplug::Error },

    #[error("No bluetooth adapter is present on this system")]
    NoAdapter,

    #[error("Peripheral {0} is not known to the adapter")]
    UnknownPeripheral(PeripheralAddress),

    #[error("The adapter event stream has already been taken")]
    EventStreamTaken,
}

/// Errors reported to the caller of `start()`. Everything else the loop
/// handles internally by resuming the scan.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LinkError {
    #[error("The bluetooth adapter is unavailable or not powered on")]
    AdapterUnavailable,
}

#[derive(Error, Debug)]
pub enum AppRunError {
    #[error("Failed to start (config): {source}")]
    Config { #[from] source: ConfigError },

    #[error("Failed to start (device): {source}")]
    Device { #[from] source: DeviceError },

    #[error("Failed to start the link loop: {source}")]
    Link { #[from] source: LinkError },

    #[error("Invalid peripheral address: {source}")]
    Address { #[from] source: AddressError },

    #[error("No target peripheral address given; pass one on the command line or set targetAddress in the config file")]
    NoTarget,

    #[error("Failed to send a command to the link task: {source}")]
    Command { #[from] source: futures::channel::mpsc::SendError },

    #[error("The link task stopped before answering")]
    LinkTaskGone,
}
