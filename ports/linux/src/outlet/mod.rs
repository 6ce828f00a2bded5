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

mod command;
mod deconz;
mod dry;

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use showtrigger_core::definitions::OutletAddress;
use showtrigger_core::errors::OutletError;
use showtrigger_core::outlet::{DeviceSummary, OutletSession};
use showtrigger_core::OutletBridge;

pub use command::CommandSession;
pub use deconz::DeconzSession;
pub use dry::DrySession;

use crate::config::{OutletAdapter, OutletConfig};

const BRIDGE_READY_TIMEOUT: Duration = Duration::from_secs(30);

/// The outlet adapters this port ships, selected by configuration at startup.
pub enum OutletAdapterKind {
    Deconz(DeconzSession),
    Command(CommandSession),
    Dry(DrySession),
}

impl OutletAdapterKind {
    pub fn from_config(config: &OutletConfig) -> anyhow::Result<Self> {
        let target = config.address();
        Ok(match config.adapter {
            OutletAdapter::Deconz => {
                let deconz = config.deconz.as_ref().context("missing [outlet.deconz] section")?;
                OutletAdapterKind::Deconz(DeconzSession::new(&deconz.url, &deconz.api_key, target)?)
            }
            OutletAdapter::Command => {
                let command = config.command.as_ref().context("missing [outlet.command] section")?;
                OutletAdapterKind::Command(CommandSession::new(command))
            }
            OutletAdapter::Dry => OutletAdapterKind::Dry(DrySession::new(target)),
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            OutletAdapterKind::Deconz(_) => "deconz",
            OutletAdapterKind::Command(_) => "command",
            OutletAdapterKind::Dry(_) => "dry",
        }
    }

    fn session(&mut self) -> &mut dyn OutletSession {
        match self {
            OutletAdapterKind::Deconz(s) => s,
            OutletAdapterKind::Command(s) => s,
            OutletAdapterKind::Dry(s) => s,
        }
    }
}

#[async_trait]
impl OutletSession for OutletAdapterKind {
    async fn start(&mut self) -> Result<(), OutletError> {
        self.session().start().await
    }

    async fn stop(&mut self) {
        self.session().stop().await
    }

    async fn set_power(&mut self, outlet: &OutletAddress, on: bool) -> Result<(), OutletError> {
        self.session().set_power(outlet, on).await
    }

    async fn list_devices(&mut self) -> Result<Vec<DeviceSummary>, OutletError> {
        self.session().list_devices().await
    }

    async fn permit_join(&mut self, duration: Duration) -> Result<(), OutletError> {
        self.session().permit_join(duration).await
    }
}

/// Build the configured adapter, hand it to a bridge thread and wait for it to start.
pub fn open_bridge(config: &OutletConfig) -> anyhow::Result<OutletBridge> {
    let adapter = OutletAdapterKind::from_config(config)?;
    let name = adapter.name();
    let bridge = OutletBridge::spawn(Box::new(adapter), config.address())?;
    bridge
        .wait_ready(BRIDGE_READY_TIMEOUT)
        .with_context(|| format!("{} outlet adapter failed to start", name))?;
    Ok(bridge)
}
