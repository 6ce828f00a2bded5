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

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use log::{error, info};
use showtrigger_core::definitions::TriggerEvent;
use showtrigger_core::{ShowController, TriggerSource};

use crate::cli::LogLevel;
use crate::config::{AppConfig, GpioMode};
use crate::gpio::{GpioLine, InterruptTrigger};
use crate::logger::init_service_logger;
use crate::media::MediaLibrary;
use crate::mpv::MpvBackend;
use crate::outlet::open_bridge;

/// Extra time on top of the stop grace period for workers to submit Off and unwind.
const SHUTDOWN_MARGIN: Duration = Duration::from_secs(10);

enum ButtonInput {
    Polled(TriggerSource),
    Interrupt(InterruptTrigger),
}

impl ButtonInput {
    fn start(config: &AppConfig, controller: ShowController) -> anyhow::Result<Self> {
        let line = GpioLine::open(config.gpio.button_pin, config.gpio.pull)?;
        let trigger_config = config.trigger_config();
        let on_press = move |event: TriggerEvent| controller.on_trigger(event);
        Ok(match config.gpio.mode {
            GpioMode::Poll => ButtonInput::Polled(TriggerSource::start(line, trigger_config, on_press)?),
            GpioMode::Interrupt => ButtonInput::Interrupt(InterruptTrigger::start(line, &trigger_config, on_press)?),
        })
    }

    fn stop(self) {
        match self {
            ButtonInput::Polled(source) => source.stop(),
            ButtonInput::Interrupt(trigger) => trigger.stop(),
        }
    }
}

fn wait_for_ctrl_c() -> anyhow::Result<()> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(tokio::signal::ctrl_c())?;
    Ok(())
}

/// Run the show service until Ctrl+C, then shut down in dependency order.
pub fn run(config_path: &Path, log_level: LogLevel) -> anyhow::Result<()> {
    let config = AppConfig::load(config_path)?;
    if let Err(e) = init_service_logger(config.logging.file.as_deref(), log_level) {
        eprintln!("Failed to initialize logger: {}", e);
        return Err(e);
    }
    info!("Starting show service with {}", config_path.display());

    let bridge = Arc::new(open_bridge(&config.outlet)?);
    info!("Outlet {} ready ({:?} adapter)", bridge.target(), config.outlet.adapter);

    let controller = ShowController::new(
        config.conflict_policy(),
        config.show_timings(),
        Arc::new(MediaLibrary::new(&config.audio)),
        Arc::new(MpvBackend::new(&config.audio.player, &config.audio.alsa_device)),
        bridge.clone(),
    );

    let button = match ButtonInput::start(&config, controller.clone()) {
        Ok(button) => button,
        Err(e) => {
            error!("Button input unavailable: {}", e);
            bridge.shutdown();
            return Err(e);
        }
    };
    info!(
        "Waiting for presses on GPIO{} ({:?} mode, press during playback: {})",
        config.gpio.button_pin,
        config.gpio.mode,
        controller.policy()
    );

    let signal = wait_for_ctrl_c();
    info!("Shutting down");

    button.stop();
    if !controller.shutdown(config.show_timings().stop_grace + SHUTDOWN_MARGIN) {
        error!("Show workers did not finish; outlet may be left on");
    }
    bridge.shutdown();
    info!("Show service stopped");
    signal
}
