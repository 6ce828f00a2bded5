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

//! One-shot maintenance commands.

use std::collections::HashSet;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};

use log::info;
use showtrigger_core::definitions::OutletCommand;
use showtrigger_core::outlet::clamp_permit_join;
use showtrigger_core::{InputLine, OutletSink};

use crate::cli::{Commands, GpioCommands, MediaCommands, OutletCommands};
use crate::config::{AppConfig, Pull};
use crate::gpio::GpioLine;
use crate::media::MediaLibrary;
use crate::outlet::open_bridge;

const PERMIT_POLL_INTERVAL: Duration = Duration::from_secs(2);
const GPIO_MONITOR_INTERVAL: Duration = Duration::from_millis(100);

pub fn execute(command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Run { .. } => anyhow::bail!("`run` is not a maintenance command"),
        Commands::Outlet { command } => match command {
            OutletCommands::Scan { config } => outlet_scan(&config),
            OutletCommands::Test { config, on, .. } => {
                outlet_test(&config, if on { OutletCommand::ON } else { OutletCommand::OFF })
            }
            OutletCommands::Permit { config, seconds } => outlet_permit(&config, Duration::from_secs(seconds)),
        },
        Commands::Gpio { command: GpioCommands::Monitor { pin, pull } } => gpio_monitor(pin, pull),
        Commands::Media { command: MediaCommands::List { config } } => media_list(&config),
    }
}

pub fn outlet_scan(config_path: &Path) -> anyhow::Result<()> {
    let config = AppConfig::load(config_path)?;
    let bridge = open_bridge(&config.outlet)?;
    let devices = bridge.list_devices()?;
    if devices.is_empty() {
        println!("No devices known to the adapter");
    }
    for device in devices {
        println!("{}", device);
    }
    bridge.shutdown();
    Ok(())
}

pub fn outlet_test(config_path: &Path, command: OutletCommand) -> anyhow::Result<()> {
    let config = AppConfig::load(config_path)?;
    let bridge = open_bridge(&config.outlet)?;
    info!("Switching outlet {} {}", bridge.target(), command.direction);
    let result = bridge.submit(command);
    bridge.shutdown();
    result?;
    println!("Outlet {} switched {}", config.outlet.address(), command.direction);
    Ok(())
}

pub fn outlet_permit(config_path: &Path, duration: Duration) -> anyhow::Result<()> {
    let config = AppConfig::load(config_path)?;
    let bridge = open_bridge(&config.outlet)?;
    let duration = clamp_permit_join(duration);

    let mut seen: HashSet<String> = bridge.list_devices()?.into_iter().map(|d| d.ieee).collect();
    bridge.permit_join(duration)?;
    println!("Network open for joining for {}s; put the outlet in pairing mode", duration.as_secs());

    let deadline = Instant::now() + duration;
    while Instant::now() < deadline {
        thread::sleep(PERMIT_POLL_INTERVAL);
        for device in bridge.list_devices()? {
            if seen.insert(device.ieee.clone()) {
                println!("New device: {}", device);
            }
        }
    }
    println!("Join window closed");
    bridge.shutdown();
    Ok(())
}

pub fn gpio_monitor(pin: u8, pull: Pull) -> anyhow::Result<()> {
    let mut line = GpioLine::open(pin, pull)?;
    println!("Monitoring GPIO{} (pull {:?}); Ctrl+C to exit", pin, pull);
    loop {
        println!("GPIO{} = {:?}", pin, line.read_level()?);
        thread::sleep(GPIO_MONITOR_INTERVAL);
    }
}

pub fn media_list(config_path: &Path) -> anyhow::Result<()> {
    let config = AppConfig::load(config_path)?;
    let library = MediaLibrary::new(&config.audio);
    if config.audio.usb_autodetect {
        match library.mounted_paths() {
            Ok(mounts) => {
                for mount in mounts {
                    println!("USB mount: {}", mount.display());
                }
            }
            Err(e) => println!("Cannot read mount table: {}", e),
        }
    }
    let tracks = library.list_tracks();
    println!("{} tracks", tracks.len());
    for track in tracks {
        println!("{}", track.display());
    }
    Ok(())
}
