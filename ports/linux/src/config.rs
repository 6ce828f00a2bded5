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

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::ValueEnum;
use serde::{Deserialize, Deserializer};
use showtrigger_core::definitions::{ConflictPolicy, Eui64, Level, OutletAddress, ShowTimings};
use showtrigger_core::TriggerConfig;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/showtrigger/config.toml";

fn from_str_field<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Pull {
    #[default]
    Up,
    Down,
    None,
}

impl Pull {
    /// Level the button line sits at while pressed: pulled-up buttons short to ground.
    pub fn pressed_level(self) -> Level {
        match self {
            Pull::Down => Level::High,
            Pull::Up | Pull::None => Level::Low,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GpioMode {
    #[default]
    Poll,
    Interrupt,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GpioConfig {
    pub button_pin: u8,
    pub pull: Pull,
    pub debounce_ms: u64,
    pub mode: GpioMode,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self { button_pin: 17, pull: Pull::Up, debounce_ms: 80, mode: GpioMode::Poll }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutletAdapter {
    Deconz,
    Command,
    Dry,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeconzConfig {
    #[serde(default = "default_deconz_url")]
    pub url: String,
    pub api_key: String,
}

fn default_deconz_url() -> String {
    "http://127.0.0.1/".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommandConfig {
    pub on: Vec<String>,
    pub off: Vec<String>,
    #[serde(default = "default_command_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_command_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutletConfig {
    pub adapter: OutletAdapter,
    #[serde(deserialize_with = "from_str_field")]
    pub ieee: Eui64,
    #[serde(default = "default_endpoint")]
    pub endpoint: u8,
    pub deconz: Option<DeconzConfig>,
    pub command: Option<CommandConfig>,
}

fn default_endpoint() -> u8 {
    1
}

impl OutletConfig {
    pub fn address(&self) -> OutletAddress {
        OutletAddress { ieee: self.ieee, endpoint: self.endpoint }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourcePolicy {
    #[default]
    Random,
    PreferUsb,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub player: String,
    pub alsa_device: String,
    pub usb_autodetect: bool,
    pub usb_mount_roots: Vec<PathBuf>,
    pub local_folders: Vec<PathBuf>,
    pub extensions: Vec<String>,
    pub source_policy: SourcePolicy,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            player: "mpv".to_string(),
            alsa_device: String::new(),
            usb_autodetect: true,
            usb_mount_roots: vec![PathBuf::from("/media"), PathBuf::from("/mnt")],
            local_folders: Vec::new(),
            extensions: [".mp3", ".wav", ".ogg", ".m4a", ".aac"].iter().map(|e| e.to_string()).collect(),
            source_policy: SourcePolicy::Random,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BehaviorConfig {
    #[serde(deserialize_with = "from_str_field")]
    pub press_during_playback: ConflictPolicy,
    pub start_confirm_timeout_ms: u64,
    pub stop_grace_ms: u64,
}

impl Default for BehaviorConfig {
    fn default() -> Self {
        Self {
            press_during_playback: ConflictPolicy::Ignore,
            start_confirm_timeout_ms: 5000,
            stop_grace_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub gpio: GpioConfig,
    pub outlet: OutletConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub behavior: BehaviorConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        match self.outlet.adapter {
            OutletAdapter::Deconz if self.outlet.deconz.is_none() => {
                bail!("[outlet.deconz] section is required for the deconz adapter")
            }
            OutletAdapter::Command if self.outlet.command.is_none() => {
                bail!("[outlet.command] section is required for the command adapter")
            }
            _ => {}
        }
        if self.audio.player.trim().is_empty() {
            bail!("audio.player must not be empty");
        }
        Ok(())
    }

    pub fn trigger_config(&self) -> TriggerConfig {
        TriggerConfig {
            pressed_level: self.gpio.pull.pressed_level(),
            debounce: Duration::from_millis(self.gpio.debounce_ms),
            ..TriggerConfig::default()
        }
    }

    pub fn show_timings(&self) -> ShowTimings {
        ShowTimings {
            start_confirm_timeout: Duration::from_millis(self.behavior.start_confirm_timeout_ms),
            stop_grace: Duration::from_millis(self.behavior.stop_grace_ms),
            ..ShowTimings::default()
        }
    }

    pub fn conflict_policy(&self) -> ConflictPolicy {
        self.behavior.press_during_playback
    }
}
