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

use std::path::PathBuf;

use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use log::LevelFilter;

use crate::config::{Pull, DEFAULT_CONFIG_PATH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_level_filter(self) -> LevelFilter {
        match self {
            LogLevel::Trace => LevelFilter::Trace,
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Error => LevelFilter::Error,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Set the log level
    #[arg(short, long, value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    /// Defaults to `run` with the default config path
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Run the show service until Ctrl+C
    Run {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Outlet maintenance
    Outlet {
        #[command(subcommand)]
        command: OutletCommands,
    },

    /// Button input diagnostics
    Gpio {
        #[command(subcommand)]
        command: GpioCommands,
    },

    /// Media library inspection
    Media {
        #[command(subcommand)]
        command: MediaCommands,
    },
}

impl Default for Commands {
    fn default() -> Self {
        Commands::Run { config: PathBuf::from(DEFAULT_CONFIG_PATH) }
    }
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum OutletCommands {
    /// List devices known to the outlet adapter
    Scan {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },

    /// Switch the configured outlet once
    #[command(group(ArgGroup::new("direction").required(true).args(["on", "off"])))]
    Test {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        #[arg(long)]
        on: bool,

        #[arg(long)]
        off: bool,
    },

    /// Open the network for joining and report new devices
    Permit {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Join window, clamped to 254 seconds
        #[arg(long, default_value_t = 180)]
        seconds: u64,
    },
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum GpioCommands {
    /// Print the raw level of a line every 100 ms
    Monitor {
        /// BCM pin number
        #[arg(long)]
        pin: u8,

        #[arg(long, value_enum, default_value_t = Pull::Up)]
        pull: Pull,
    },
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum MediaCommands {
    /// Print the tracks a show would choose from
    List {
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}
