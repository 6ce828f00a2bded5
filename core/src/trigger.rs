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

use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::select;
use tokio::time::MissedTickBehavior;

use crate::definitions::{Level, TriggerEvent};
use crate::errors::TriggerError;
use crate::service::{spawn_service, ServiceHandle};

/// A digital input that can be sampled.
pub trait InputLine: Send + 'static {
    fn read_level(&mut self) -> Result<Level, TriggerError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerConfig {
    /// Level the line sits at while the button is held.
    pub pressed_level: Level,
    /// Minimum time between two accepted presses.
    pub debounce: Duration,
    /// Sampling period of the polling loop.
    pub poll_interval: Duration,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            pressed_level: Level::Low,
            debounce: Duration::from_millis(80),
            poll_interval: Duration::from_millis(10),
        }
    }
}

/// Turns raw samples or edges into debounced [`TriggerEvent`]s.
///
/// A transition into the pressed level is accepted only when at least `debounce`
/// has passed since the previously accepted press. The very first press is always
/// accepted.
#[derive(Debug, Clone)]
pub struct Debouncer {
    pressed_level: Level,
    debounce: Duration,
    last_level: Option<Level>,
    last_accepted: Option<Instant>,
}

impl Debouncer {
    pub fn new(pressed_level: Level, debounce: Duration) -> Self {
        Self { pressed_level, debounce, last_level: None, last_accepted: None }
    }

    /// Record the level observed before sampling starts, so a button held at startup
    /// does not count as a press.
    pub fn prime(&mut self, level: Level) {
        self.last_level = Some(level);
    }

    /// Feed one polled sample.
    pub fn on_sample(&mut self, level: Level, now: Instant) -> Option<TriggerEvent> {
        let was_pressed = self.last_level == Some(self.pressed_level);
        self.last_level = Some(level);
        if level == self.pressed_level && !was_pressed {
            self.on_edge(now)
        } else {
            None
        }
    }

    /// Feed an edge already known to be a transition into the pressed level.
    pub fn on_edge(&mut self, now: Instant) -> Option<TriggerEvent> {
        let accepted = match self.last_accepted {
            Some(last) => now.saturating_duration_since(last) >= self.debounce,
            None => true,
        };
        if !accepted {
            return None;
        }
        self.last_accepted = Some(now);
        Some(TriggerEvent { at: now })
    }
}

/// Polls an [`InputLine`] on its own thread and reports debounced presses.
///
/// The callback is invoked on the polling thread and must return quickly.
pub struct TriggerSource {
    service: ServiceHandle,
}

impl TriggerSource {
    /// Start polling. Fails fast when the line cannot be read at all.
    pub fn start<L, F>(mut line: L, config: TriggerConfig, on_press: F) -> Result<Self, TriggerError>
    where
        L: InputLine,
        F: Fn(TriggerEvent) + Send + 'static,
    {
        let initial = line.read_level()?;
        let mut debouncer = Debouncer::new(config.pressed_level, config.debounce);
        debouncer.prime(initial);
        debug!("Trigger line initial level: {:?}", initial);

        let service = spawn_service("trigger-source", move |mut stop| async move {
            let mut ticker = tokio::time::interval(config.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut read_failing = false;
            loop {
                select! {
                    biased;
                    _ = stop.signaled() => {
                        info!("Trigger source shutdown requested");
                        break;
                    }
                    _ = ticker.tick() => {
                        match line.read_level() {
                            Ok(level) => {
                                read_failing = false;
                                if let Some(event) = debouncer.on_sample(level, Instant::now()) {
                                    debug!("Button press accepted");
                                    on_press(event);
                                }
                            }
                            Err(e) => {
                                if !read_failing {
                                    warn!("Failed to read trigger line: {}", e);
                                }
                                read_failing = true;
                            }
                        }
                    }
                }
            }
        })
        .map_err(|e| TriggerError::HardwareUnavailable(format!("cannot spawn polling thread: {}", e)))?;

        Ok(Self { service })
    }

    pub fn stop(self) {
        if self.service.shutdown().is_err() {
            warn!("Trigger source thread panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};

    fn ms(n: u64) -> Duration { Duration::from_millis(n) }

    #[test]
    fn presses_inside_debounce_window_are_dropped() {
        let base = Instant::now();
        let mut d = Debouncer::new(Level::Low, ms(80));
        d.prime(Level::High);

        let mut accepted = Vec::new();
        for (t, pressed) in [(0, true), (10, false), (30, true), (40, false), (90, true), (100, false)] {
            let level = if pressed { Level::Low } else { Level::High };
            if let Some(ev) = d.on_sample(level, base + ms(t)) {
                accepted.push(ev.at.duration_since(base));
            }
        }
        assert_eq!(accepted, vec![ms(0), ms(90)]);
    }

    #[test]
    fn held_button_produces_single_event() {
        let base = Instant::now();
        let mut d = Debouncer::new(Level::High, ms(10));
        d.prime(Level::Low);
        let events: Vec<_> = (0..20)
            .filter_map(|i| d.on_sample(Level::High, base + ms(i * 50)))
            .collect();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn button_held_at_startup_is_not_a_press() {
        let base = Instant::now();
        let mut d = Debouncer::new(Level::Low, ms(80));
        d.prime(Level::Low);
        assert!(d.on_sample(Level::Low, base).is_none());
        assert!(d.on_sample(Level::High, base + ms(100)).is_none());
        assert!(d.on_sample(Level::Low, base + ms(200)).is_some());
    }

    #[test]
    fn edges_are_debounced_like_samples() {
        let base = Instant::now();
        let mut d = Debouncer::new(Level::Low, ms(80));
        assert!(d.on_edge(base).is_some());
        assert!(d.on_edge(base + ms(79)).is_none());
        assert!(d.on_edge(base + ms(80)).is_some());
    }

    struct ScriptedLine {
        levels: Arc<Mutex<VecDeque<Level>>>,
        idle: Level,
    }

    impl InputLine for ScriptedLine {
        fn read_level(&mut self) -> Result<Level, TriggerError> {
            Ok(self.levels.lock().unwrap().pop_front().unwrap_or(self.idle))
        }
    }

    struct DeadLine;

    impl InputLine for DeadLine {
        fn read_level(&mut self) -> Result<Level, TriggerError> {
            Err(TriggerError::HardwareUnavailable("no gpio".into()))
        }
    }

    #[test]
    fn source_reports_presses_through_callback() {
        let _ = env_logger::builder().is_test(true).try_init();
        // initial read, then two separate presses far apart in sample count
        let mut script = vec![Level::High, Level::Low, Level::Low, Level::High];
        script.extend(std::iter::repeat(Level::High).take(20));
        script.push(Level::Low);
        let levels = Arc::new(Mutex::new(script.into_iter().collect::<VecDeque<_>>()));
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();

        let config = TriggerConfig { pressed_level: Level::Low, debounce: ms(20), poll_interval: ms(5) };
        let source = TriggerSource::start(
            ScriptedLine { levels: levels.clone(), idle: Level::High },
            config,
            move |ev| sink.lock().unwrap().push(ev),
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_secs(2);
        while !levels.lock().unwrap().is_empty() && Instant::now() < deadline {
            std::thread::sleep(ms(5));
        }
        std::thread::sleep(ms(20));
        source.stop();
        assert_eq!(events.lock().unwrap().len(), 2);
    }

    #[test]
    fn unavailable_line_fails_fast() {
        let result = TriggerSource::start(DeadLine, TriggerConfig::default(), |_| {});
        assert!(matches!(result, Err(TriggerError::HardwareUnavailable(_))));
    }
}
