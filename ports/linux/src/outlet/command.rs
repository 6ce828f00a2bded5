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

use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use showtrigger_core::definitions::OutletAddress;
use showtrigger_core::errors::OutletError;
use showtrigger_core::outlet::OutletSession;
use tokio::process::Command;

use crate::config::CommandConfig;

/// Switches the outlet by running an external program per direction.
pub struct CommandSession {
    on: Vec<String>,
    off: Vec<String>,
    timeout: Duration,
}

impl CommandSession {
    pub fn new(config: &CommandConfig) -> Self {
        Self {
            on: config.on.clone(),
            off: config.off.clone(),
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }
}

fn render(argv: &[String], outlet: &OutletAddress) -> Vec<String> {
    argv.iter()
        .map(|arg| {
            arg.replace("{ieee}", &outlet.ieee.to_string())
                .replace("{endpoint}", &outlet.endpoint.to_string())
        })
        .collect()
}

#[async_trait]
impl OutletSession for CommandSession {
    async fn start(&mut self) -> Result<(), OutletError> {
        if self.on.is_empty() || self.off.is_empty() {
            return Err(OutletError::TransportError("outlet command lines must not be empty".to_string()));
        }
        Ok(())
    }

    async fn set_power(&mut self, outlet: &OutletAddress, on: bool) -> Result<(), OutletError> {
        let argv = render(if on { &self.on } else { &self.off }, outlet);
        let Some((program, args)) = argv.split_first() else {
            return Err(OutletError::TransportError("empty outlet command".to_string()));
        };
        debug!("Running outlet command: {:?}", argv);

        let output = Command::new(program).args(args).kill_on_drop(true).output();
        let output = tokio::time::timeout(self.timeout, output)
            .await
            .map_err(|_| OutletError::TransportError(format!("{} timed out after {:?}", program, self.timeout)))?
            .map_err(|e| OutletError::TransportError(format!("cannot run {}: {}", program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(OutletError::TransportError(format!(
                "{} exited with {}: {}",
                program,
                output.status,
                stderr.trim()
            )));
        }
        Ok(())
    }
}
