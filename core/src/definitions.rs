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
use std::str::FromStr;
use std::time::{Duration, Instant};

/// A debounced button press.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerEvent {
    pub at: Instant,
}

/// Logical level of a digital input line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

/// Whether a show is currently in progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ShowState {
    #[default]
    Idle,
    Running,
}

/// What to do with a trigger that arrives while a show is running.
///
/// Fixed at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// Drop the press; the running show continues.
    #[default]
    Ignore,
    /// Stop the running show and do not start another one.
    Stop,
    /// Stop the running show and immediately start a fresh one.
    Restart,
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ignore" => Ok(ConflictPolicy::Ignore),
            "stop" => Ok(ConflictPolicy::Stop),
            "restart" => Ok(ConflictPolicy::Restart),
            _ => Err(format!("Invalid conflict policy: {}", s)),
        }
    }
}

impl fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictPolicy::Ignore => write!(f, "ignore"),
            ConflictPolicy::Stop => write!(f, "stop"),
            ConflictPolicy::Restart => write!(f, "restart"),
        }
    }
}

/// Lifecycle of a single playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackPhase {
    Starting,
    Started,
    Finished,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    On,
    Off,
}

impl PowerState {
    pub fn is_on(self) -> bool {
        self == PowerState::On
    }
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PowerState::On => write!(f, "on"),
            PowerState::Off => write!(f, "off"),
        }
    }
}

/// A power request submitted to the outlet bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutletCommand {
    pub direction: PowerState,
}

impl OutletCommand {
    pub const ON: OutletCommand = OutletCommand { direction: PowerState::On };
    pub const OFF: OutletCommand = OutletCommand { direction: PowerState::Off };
}

/// Timing knobs for one show, supplied by the hosting process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShowTimings {
    /// How long to wait for audible playback before switching the outlet on anyway.
    pub start_confirm_timeout: Duration,
    /// Grace period between a quit request and a forceful kill.
    pub stop_grace: Duration,
    /// Interval for start-confirmation and exit polling.
    pub poll_interval: Duration,
}

impl Default for ShowTimings {
    fn default() -> Self {
        Self {
            start_confirm_timeout: Duration::from_secs(5),
            stop_grace: Duration::from_secs(2),
            poll_interval: Duration::from_millis(50),
        }
    }
}

/// 64-bit IEEE address of a radio device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Eui64(pub u64);

impl FromStr for Eui64 {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex: String = s.trim().chars().filter(|c| *c != ':' && *c != '-').collect();
        if hex.len() != 16 {
            return Err(format!("Invalid IEEE address (expected 16 hex digits): {}", s));
        }
        u64::from_str_radix(&hex, 16)
            .map(Eui64)
            .map_err(|_| format!("Invalid IEEE address: {}", s))
    }
}

impl fmt::Display for Eui64 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.0.to_be_bytes();
        for (i, b) in bytes.iter().enumerate() {
            if i > 0 {
                write!(f, ":")?;
            }
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

/// The switched outlet: device address plus the endpoint carrying the on/off cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutletAddress {
    pub ieee: Eui64,
    pub endpoint: u8,
}

impl fmt::Display for OutletAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ieee, self.endpoint)
    }
}
