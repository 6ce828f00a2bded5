use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::definitions::OutletAddress;

#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("Input hardware unavailable: {0}")]
    HardwareUnavailable(String),
}

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("No audio tracks found")]
    NoMediaAvailable,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("Playback backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Audio file does not exist: {}", .0.display())]
    TrackMissing(PathBuf),

    #[error("Player exited early with code {0:?}")]
    ExitedEarly(Option<i32>),

    #[error("Player exited with code {0:?}")]
    PlaybackFailed(Option<i32>),

    #[error("Player control error: {0}")]
    Control(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum OutletError {
    #[error("Outlet bridge is not running")]
    BridgeUnavailable,

    #[error("Outlet device not found: {0}")]
    DeviceNotFound(String),

    #[error("Endpoint {endpoint} missing on device {device}")]
    EndpointUnavailable { device: String, endpoint: u8 },

    #[error("Outlet transport error: {0}")]
    TransportError(String),

    #[error("Feature not supported by this outlet adapter")]
    FeatureNotSupported,
}

impl OutletError {
    pub fn device_not_found(address: &OutletAddress) -> Self {
        OutletError::DeviceNotFound(address.ieee.to_string())
    }

    pub fn endpoint_unavailable(address: &OutletAddress) -> Self {
        OutletError::EndpointUnavailable {
            device: address.ieee.to_string(),
            endpoint: address.endpoint,
        }
    }
}
