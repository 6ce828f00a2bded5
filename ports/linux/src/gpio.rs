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

use showtrigger_core::definitions::{Level, TriggerEvent};
use showtrigger_core::errors::TriggerError;
use showtrigger_core::{InputLine, TriggerConfig};

use crate::config::Pull;

#[cfg(target_os = "linux")]
mod rpi {
    use std::time::Instant;

    use log::{debug, info, warn};
    use rppal::gpio::{Gpio, InputPin, Trigger};

    use super::*;
    use showtrigger_core::Debouncer;

    fn unavailable(e: rppal::gpio::Error) -> TriggerError {
        TriggerError::HardwareUnavailable(e.to_string())
    }

    /// A BCM GPIO pin configured as an input.
    pub struct GpioLine {
        pin: InputPin,
    }

    impl GpioLine {
        pub fn open(pin: u8, pull: Pull) -> Result<Self, TriggerError> {
            let pin = Gpio::new().map_err(unavailable)?.get(pin).map_err(unavailable)?;
            let pin = match pull {
                Pull::Up => pin.into_input_pullup(),
                Pull::Down => pin.into_input_pulldown(),
                Pull::None => pin.into_input(),
            };
            info!("Opened GPIO{} as input (pull {:?})", pin.pin(), pull);
            Ok(Self { pin })
        }
    }

    impl InputLine for GpioLine {
        fn read_level(&mut self) -> Result<Level, TriggerError> {
            Ok(match self.pin.read() {
                rppal::gpio::Level::High => Level::High,
                rppal::gpio::Level::Low => Level::Low,
            })
        }
    }

    /// Edge-interrupt alternative to polling. Edges are filtered by the same
    /// [`Debouncer`] rules; the interrupt stays armed until [`InterruptTrigger::stop`].
    pub struct InterruptTrigger {
        pin: InputPin,
    }

    impl InterruptTrigger {
        pub fn start<F>(line: GpioLine, config: &TriggerConfig, on_press: F) -> Result<Self, TriggerError>
        where
            F: Fn(TriggerEvent) + Send + 'static,
        {
            let mut pin = line.pin;
            let edge = match config.pressed_level {
                Level::Low => Trigger::FallingEdge,
                Level::High => Trigger::RisingEdge,
            };
            let mut debouncer = Debouncer::new(config.pressed_level, config.debounce);
            pin.set_async_interrupt(edge, Some(config.debounce), move |_event| {
                if let Some(event) = debouncer.on_edge(Instant::now()) {
                    debug!("Button press accepted");
                    on_press(event);
                }
            })
            .map_err(unavailable)?;
            info!("Armed {:?} interrupt on GPIO{}", edge, pin.pin());
            Ok(Self { pin })
        }

        pub fn stop(mut self) {
            if let Err(e) = self.pin.clear_async_interrupt() {
                warn!("Failed to disarm GPIO interrupt: {}", e);
            }
        }
    }
}

#[cfg(target_os = "linux")]
pub use rpi::{GpioLine, InterruptTrigger};

#[cfg(not(target_os = "linux"))]
mod unsupported {
    use super::*;

    const MESSAGE: &str = "GPIO input is only supported on Linux";

    pub struct GpioLine;

    impl GpioLine {
        pub fn open(_pin: u8, _pull: Pull) -> Result<Self, TriggerError> {
            Err(TriggerError::HardwareUnavailable(MESSAGE.to_string()))
        }
    }

    impl InputLine for GpioLine {
        fn read_level(&mut self) -> Result<Level, TriggerError> {
            Err(TriggerError::HardwareUnavailable(MESSAGE.to_string()))
        }
    }

    pub struct InterruptTrigger;

    impl InterruptTrigger {
        pub fn start<F>(_line: GpioLine, _config: &TriggerConfig, _on_press: F) -> Result<Self, TriggerError>
        where
            F: Fn(TriggerEvent) + Send + 'static,
        {
            Err(TriggerError::HardwareUnavailable(MESSAGE.to_string()))
        }

        pub fn stop(self) {}
    }
}

#[cfg(not(target_os = "linux"))]
pub use unsupported::{GpioLine, InterruptTrigger};
