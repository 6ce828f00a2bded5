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

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, info, warn};

use crate::definitions::{PlaybackPhase, ShowTimings};
use crate::errors::PlaybackError;

/// How a player process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Success,
    Failure(Option<i32>),
}

/// One running player invocation, as seen by [`PlaybackSession`].
pub trait PlaybackProcess: Send {
    /// Elapsed audible playback in seconds, if the backend can tell.
    fn playback_position(&mut self) -> Result<Option<f64>, PlaybackError> {
        Ok(None)
    }

    /// Non-blocking exit check.
    fn try_exit(&mut self) -> Result<Option<ExitOutcome>, PlaybackError>;

    /// Ask the player to quit over its control channel.
    fn request_quit(&mut self) -> Result<(), PlaybackError> {
        Err(PlaybackError::Control("graceful quit not supported".to_string()))
    }

    fn kill(&mut self) -> Result<(), PlaybackError>;
}

/// Launches player processes.
pub trait PlaybackBackend: Send + Sync {
    fn launch(&self, track: &Path) -> Result<Box<dyn PlaybackProcess>, PlaybackError>;
}

struct SessionShared {
    track: PathBuf,
    timings: ShowTimings,
    process: Mutex<Box<dyn PlaybackProcess>>,
    phase: Mutex<PlaybackPhase>,
    exit: Mutex<Option<ExitOutcome>>,
    stop_requested: AtomicBool,
}

fn lock<T: ?Sized>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SessionShared {
    fn set_phase(&self, phase: PlaybackPhase) {
        *lock(&self.phase) = phase;
    }

    fn poll_exit(&self) -> Option<ExitOutcome> {
        let mut exit = lock(&self.exit);
        if exit.is_none() {
            *exit = match lock(&self.process).try_exit() {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("Failed to query player state for {}: {}", self.track.display(), e);
                    Some(ExitOutcome::Failure(None))
                }
            };
        }
        *exit
    }

    fn stop(&self) {
        if self.stop_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.poll_exit().is_some() {
            return;
        }
        info!("Stopping playback of {}", self.track.display());
        let quit = lock(&self.process).request_quit();
        if let Err(e) = quit {
            debug!("Graceful quit failed ({}); killing player", e);
            self.kill();
            return;
        }
        let deadline = Instant::now() + self.timings.stop_grace;
        while Instant::now() < deadline {
            if self.poll_exit().is_some() {
                return;
            }
            thread::sleep(self.timings.poll_interval);
        }
        warn!("Player did not quit within {:?}; killing it", self.timings.stop_grace);
        self.kill();
    }

    fn kill(&self) {
        if let Err(e) = lock(&self.process).kill() {
            warn!("Failed to kill player: {}", e);
        }
    }
}

/// One playback of one track. Not reusable.
///
/// Owned by the show worker; other contexts interact through a [`PlaybackHandle`].
pub struct PlaybackSession {
    shared: Arc<SessionShared>,
}

/// Cloneable stop handle for a [`PlaybackSession`].
#[derive(Clone)]
pub struct PlaybackHandle {
    shared: Arc<SessionShared>,
}

impl PlaybackHandle {
    /// Request graceful termination, falling back to a kill after the grace period.
    ///
    /// Safe to call from any thread, any number of times, before or after the player exits.
    pub fn stop(&self) {
        self.shared.stop();
    }
}

impl PlaybackSession {
    /// Launch the backend for `track` and return immediately.
    pub fn start(backend: &dyn PlaybackBackend, track: &Path, timings: ShowTimings) -> Result<Self, PlaybackError> {
        info!("Starting playback: {}", track.display());
        let process = backend.launch(track)?;
        Ok(Self {
            shared: Arc::new(SessionShared {
                track: track.to_path_buf(),
                timings,
                process: Mutex::new(process),
                phase: Mutex::new(PlaybackPhase::Starting),
                exit: Mutex::new(None),
                stop_requested: AtomicBool::new(false),
            }),
        })
    }

    pub fn handle(&self) -> PlaybackHandle {
        PlaybackHandle { shared: self.shared.clone() }
    }

    pub fn phase(&self) -> PlaybackPhase {
        *lock(&self.shared.phase)
    }

    /// Whether [`stop`](Self::stop) was called on this session or any of its handles.
    pub fn stop_requested(&self) -> bool {
        self.shared.stop_requested.load(Ordering::SeqCst)
    }

    /// Wait until the backend reports a strictly positive playback position.
    ///
    /// Returns `Ok(false)` when `timeout` elapses without confirmation and
    /// `Err(ExitedEarly)` when the player exits first.
    pub fn wait_started(&self, timeout: Duration) -> Result<bool, PlaybackError> {
        let shared = &self.shared;
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(outcome) = shared.poll_exit() {
                let code = match outcome {
                    ExitOutcome::Success => Some(0),
                    ExitOutcome::Failure(code) => code,
                };
                shared.set_phase(PlaybackPhase::Failed);
                return Err(PlaybackError::ExitedEarly(code));
            }

            // The control channel may not be up yet right after launch.
            let position = lock(&shared.process).playback_position();
            match position {
                Ok(Some(seconds)) if seconds > 0.0 => {
                    shared.set_phase(PlaybackPhase::Started);
                    return Ok(true);
                }
                Ok(_) => {}
                Err(e) => debug!("Playback position not available yet: {}", e),
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            thread::sleep(shared.timings.poll_interval.min(deadline - now));
        }
    }

    /// Block until the player exits.
    ///
    /// A player that was asked to stop counts as finished regardless of its exit code.
    /// `PlaybackFailed` is only returned for a non-zero exit nobody requested.
    pub fn wait_finished(&self) -> Result<(), PlaybackError> {
        let shared = &self.shared;
        let outcome = loop {
            if let Some(outcome) = shared.poll_exit() {
                break outcome;
            }
            thread::sleep(shared.timings.poll_interval);
        };
        match outcome {
            ExitOutcome::Success => {
                shared.set_phase(PlaybackPhase::Finished);
                Ok(())
            }
            ExitOutcome::Failure(code) if self.stop_requested() => {
                debug!("Player stopped on request (exit {:?})", code);
                shared.set_phase(PlaybackPhase::Finished);
                Ok(())
            }
            ExitOutcome::Failure(code) => {
                shared.set_phase(PlaybackPhase::Failed);
                Err(PlaybackError::PlaybackFailed(code))
            }
        }
    }

    pub fn stop(&self) {
        self.shared.stop();
    }
}

impl Drop for PlaybackSession {
    fn drop(&mut self) {
        if self.shared.poll_exit().is_none() {
            warn!("Playback session dropped while player still running");
            self.shared.stop();
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// Scripted player process driven by wall-clock time since launch.
    #[derive(Clone, Debug)]
    pub struct FakeScript {
        /// Position becomes positive after this delay; `None` never reports.
        pub audible_after: Option<Duration>,
        /// Exits on its own after this delay with this outcome.
        pub exits_after: Option<(Duration, ExitOutcome)>,
        /// Whether a quit request makes it exit.
        pub honors_quit: bool,
    }

    impl FakeScript {
        pub fn healthy(audible_after: Duration, length: Duration) -> Self {
            Self {
                audible_after: Some(audible_after),
                exits_after: Some((length, ExitOutcome::Success)),
                honors_quit: true,
            }
        }
    }

    #[derive(Default, Debug)]
    pub struct FakeLog {
        pub quits: usize,
        pub kills: usize,
    }

    pub struct FakeProcess {
        pub script: FakeScript,
        pub launched: Instant,
        pub forced_exit: Option<ExitOutcome>,
        pub log: Arc<Mutex<FakeLog>>,
    }

    impl PlaybackProcess for FakeProcess {
        fn playback_position(&mut self) -> Result<Option<f64>, PlaybackError> {
            match self.script.audible_after {
                Some(after) if self.launched.elapsed() > after => {
                    Ok(Some((self.launched.elapsed() - after).as_secs_f64() + 0.001))
                }
                Some(_) => Ok(Some(0.0)),
                None => Err(PlaybackError::Control("socket not ready".into())),
            }
        }

        fn try_exit(&mut self) -> Result<Option<ExitOutcome>, PlaybackError> {
            if let Some(outcome) = self.forced_exit {
                return Ok(Some(outcome));
            }
            Ok(match self.script.exits_after {
                Some((after, outcome)) if self.launched.elapsed() >= after => Some(outcome),
                _ => None,
            })
        }

        fn request_quit(&mut self) -> Result<(), PlaybackError> {
            self.log.lock().unwrap().quits += 1;
            if self.script.honors_quit {
                self.forced_exit = Some(ExitOutcome::Success);
            }
            Ok(())
        }

        fn kill(&mut self) -> Result<(), PlaybackError> {
            self.log.lock().unwrap().kills += 1;
            self.forced_exit = Some(ExitOutcome::Failure(None));
            Ok(())
        }
    }

    /// Backend handing out one scripted process per launch, in order.
    pub struct FakeBackend {
        pub scripts: Mutex<Vec<FakeScript>>,
        pub fallback: Option<FakeScript>,
        pub launches: Mutex<Vec<(PathBuf, Instant)>>,
        pub logs: Mutex<Vec<Arc<Mutex<FakeLog>>>>,
    }

    impl FakeBackend {
        pub fn new(scripts: Vec<FakeScript>) -> Self {
            Self {
                scripts: Mutex::new(scripts),
                fallback: None,
                launches: Mutex::new(Vec::new()),
                logs: Mutex::new(Vec::new()),
            }
        }

        pub fn repeating(script: FakeScript) -> Self {
            let mut backend = Self::new(Vec::new());
            backend.fallback = Some(script);
            backend
        }

        pub fn unavailable() -> Self {
            Self::new(Vec::new())
        }

        pub fn launch_count(&self) -> usize {
            self.launches.lock().unwrap().len()
        }

        pub fn log(&self, n: usize) -> Arc<Mutex<FakeLog>> {
            self.logs.lock().unwrap()[n].clone()
        }
    }

    impl PlaybackBackend for FakeBackend {
        fn launch(&self, track: &Path) -> Result<Box<dyn PlaybackProcess>, PlaybackError> {
            let script = {
                let mut scripts = self.scripts.lock().unwrap();
                if scripts.is_empty() {
                    self.fallback.clone()
                } else {
                    Some(scripts.remove(0))
                }
            };
            let script = script.ok_or_else(|| PlaybackError::BackendUnavailable("no player".into()))?;
            self.launches.lock().unwrap().push((track.to_path_buf(), Instant::now()));
            let log = Arc::new(Mutex::new(FakeLog::default()));
            self.logs.lock().unwrap().push(log.clone());
            Ok(Box::new(FakeProcess { script, launched: Instant::now(), forced_exit: None, log }))
        }
    }
}
