// Copyright 2025 HEM Sp. z o.o.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::definitions::{OutletAddress, OutletCommand};
use crate::errors::OutletError;

/// Longest permit-join window radios accept, in seconds.
pub const MAX_PERMIT_JOIN_SECS: u64 = 254;

/// Result of resolving an [`OutletAddress`] against the devices an adapter knows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceLookup<H> {
    Found(H),
    DeviceNotFound,
    EndpointUnavailable,
}

impl<H> DeviceLookup<H> {
    pub fn into_result(self, address: &OutletAddress) -> Result<H, OutletError> {
        match self {
            DeviceLookup::Found(handle) => Ok(handle),
            DeviceLookup::DeviceNotFound => Err(OutletError::device_not_found(address)),
            DeviceLookup::EndpointUnavailable => Err(OutletError::endpoint_unavailable(address)),
        }
    }
}

/// One device as reported by an adapter's device listing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DeviceSummary {
    pub ieee: String,
    pub name: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
}

impl fmt::Display for DeviceSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}  name={}  manuf={}  model={}",
            self.ieee,
            self.name.as_deref().unwrap_or("-"),
            self.manufacturer.as_deref().unwrap_or("-"),
            self.model.as_deref().unwrap_or("-"),
        )
    }
}

/// Outlet-control session capability.
///
/// A session is started once, used for the lifetime of the process and stopped at
/// shutdown. It is only ever driven from the [`crate::OutletBridge`] thread.
#[async_trait]
pub trait OutletSession: Send {
    async fn start(&mut self) -> Result<(), OutletError>;

    async fn stop(&mut self) {}

    async fn set_power(&mut self, outlet: &OutletAddress, on: bool) -> Result<(), OutletError>;

    async fn list_devices(&mut self) -> Result<Vec<DeviceSummary>, OutletError> {
        Err(OutletError::FeatureNotSupported)
    }

    async fn permit_join(&mut self, _duration: Duration) -> Result<(), OutletError> {
        Err(OutletError::FeatureNotSupported)
    }
}

/// Synchronous submission of outlet commands from show workers.
pub trait OutletSink: Send + Sync {
    /// Submit a command and block until it has been applied or has failed.
    fn submit(&self, command: OutletCommand) -> Result<(), OutletError>;
}

pub fn clamp_permit_join(duration: Duration) -> Duration {
    Duration::from_secs(duration.as_secs().min(MAX_PERMIT_JOIN_SECS))
}
