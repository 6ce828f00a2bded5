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

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use log::{debug, error, info, warn};

use crate::definitions::{ConflictPolicy, OutletCommand, ShowState, ShowTimings, TriggerEvent};
use crate::media::MediaSource;
use crate::outlet::OutletSink;
use crate::playback::{PlaybackBackend, PlaybackHandle, PlaybackSession};

pub type ShowId = u64;

/// Extra time on top of the stop grace period for a superseded worker to submit its Off.
const SUPERSEDED_OFF_MARGIN: Duration = Duration::from_secs(2);

struct ActiveShow {
    id: ShowId,
    playback: Option<PlaybackHandle>,
    stop_requested: bool,
}

impl ActiveShow {
    fn request_stop(&mut self) -> Option<PlaybackHandle> {
        self.stop_requested = true;
        self.playback.clone()
    }
}

#[derive(Default)]
struct Slot {
    state: ShowState,
    active: Option<ActiveShow>,
    next_id: ShowId,
    /// Restarted shows whose Off has not been submitted yet.
    superseded: Vec<ShowId>,
    live_workers: usize,
    shutting_down: bool,
}

struct Shared {
    policy: ConflictPolicy,
    timings: ShowTimings,
    media: Arc<dyn MediaSource>,
    backend: Arc<dyn PlaybackBackend>,
    outlet: Arc<dyn OutletSink>,
    slot: Mutex<Slot>,
    changed: Condvar,
}

impl Shared {
    fn lock_slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Attach the worker's playback to the active show. Returns `false` when the
    /// show was stopped or superseded before playback began.
    fn register_playback(&self, id: ShowId, handle: PlaybackHandle) -> bool {
        let mut slot = self.lock_slot();
        if slot.shutting_down {
            return false;
        }
        match slot.active.as_mut() {
            Some(active) if active.id == id => {
                active.playback = Some(handle);
                !active.stop_requested
            }
            _ => false,
        }
    }

    fn off_submitted(&self, id: ShowId) {
        let mut slot = self.lock_slot();
        if let Some(pos) = slot.superseded.iter().position(|s| *s == id) {
            slot.superseded.remove(pos);
            self.changed.notify_all();
        }
    }

    /// Block until every show superseded before `id` has submitted its Off, so the
    /// new show's On cannot be overtaken by an older Off.
    fn wait_superseded_off(&self, id: ShowId) {
        let timeout = self.timings.stop_grace + SUPERSEDED_OFF_MARGIN;
        let slot = self.lock_slot();
        let (_slot, result) = self
            .changed
            .wait_timeout_while(slot, timeout, |s| s.superseded.iter().any(|old| *old < id))
            .unwrap_or_else(PoisonError::into_inner);
        if result.timed_out() {
            warn!("Show {}: previous show still running after {:?}", id, timeout);
        }
    }

    fn finish_show(&self, id: ShowId) {
        let mut slot = self.lock_slot();
        slot.live_workers = slot.live_workers.saturating_sub(1);
        if slot.active.as_ref().map(|a| a.id) == Some(id) {
            slot.active = None;
            slot.state = ShowState::Idle;
            info!("Show {} finished; ready for the next press", id);
        } else {
            debug!("Superseded show {} unwound", id);
        }
        self.changed.notify_all();
    }
}

/// Submits the unconditional Off when the worker leaves its show, however it leaves.
struct PowerOffGuard<'a> {
    shared: &'a Shared,
    id: ShowId,
}

impl Drop for PowerOffGuard<'_> {
    fn drop(&mut self) {
        debug!("Show {}: switching outlet OFF", self.id);
        if let Err(e) = self.shared.outlet.submit(OutletCommand::OFF) {
            error!("Show {}: outlet OFF failed: {}", self.id, e);
        }
        self.shared.off_submitted(self.id);
    }
}

/// Releases the show slot once everything else in the worker has unwound.
struct FinishGuard<'a> {
    shared: &'a Shared,
    id: ShowId,
}

impl Drop for FinishGuard<'_> {
    fn drop(&mut self) {
        self.shared.finish_show(self.id);
    }
}

/// The show state machine.
///
/// Consumes trigger events, applies the [`ConflictPolicy`] and runs one worker thread
/// per accepted show. The slot lock is only held for flag and handle updates; playback
/// and outlet calls happen outside it.
#[derive(Clone)]
pub struct ShowController {
    shared: Arc<Shared>,
}

impl ShowController {
    pub fn new(
        policy: ConflictPolicy,
        timings: ShowTimings,
        media: Arc<dyn MediaSource>,
        backend: Arc<dyn PlaybackBackend>,
        outlet: Arc<dyn OutletSink>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                policy,
                timings,
                media,
                backend,
                outlet,
                slot: Mutex::new(Slot::default()),
                changed: Condvar::new(),
            }),
        }
    }

    pub fn policy(&self) -> ConflictPolicy {
        self.shared.policy
    }

    pub fn state(&self) -> ShowState {
        self.shared.lock_slot().state
    }

    /// Handle a debounced press. Never blocks on playback or outlet I/O.
    pub fn on_trigger(&self, _event: TriggerEvent) {
        let to_stop = {
            let mut slot = self.shared.lock_slot();
            if slot.shutting_down {
                debug!("Press ignored: shutting down");
                return;
            }
            match (slot.state, self.shared.policy) {
                (ShowState::Idle, _) => {
                    self.start_show(&mut slot);
                    None
                }
                (ShowState::Running, ConflictPolicy::Ignore) => {
                    debug!("Show already running; press ignored");
                    None
                }
                (ShowState::Running, ConflictPolicy::Stop) => {
                    info!("Press during show; stopping playback");
                    slot.active.as_mut().and_then(ActiveShow::request_stop)
                }
                (ShowState::Running, ConflictPolicy::Restart) => {
                    info!("Press during show; restarting");
                    let old_id = slot.active.as_ref().map(|a| a.id);
                    slot.superseded.extend(old_id);
                    let previous = slot.active.as_mut().and_then(ActiveShow::request_stop);
                    self.start_show(&mut slot);
                    previous
                }
            }
        };
        if let Some(handle) = to_stop {
            stop_in_background(handle);
        }
    }

    /// Block until no show is running and every worker has unwound.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let slot = self.shared.lock_slot();
        let (_slot, result) = self
            .shared
            .changed
            .wait_timeout_while(slot, timeout, |s| s.state == ShowState::Running || s.live_workers > 0)
            .unwrap_or_else(PoisonError::into_inner);
        !result.timed_out()
    }

    /// Refuse further presses, stop the active show and wait for all workers, so
    /// their Off commands are submitted before the outlet session goes away.
    pub fn shutdown(&self, timeout: Duration) -> bool {
        let to_stop = {
            let mut slot = self.shared.lock_slot();
            slot.shutting_down = true;
            slot.active.as_mut().and_then(ActiveShow::request_stop)
        };
        if let Some(handle) = to_stop {
            handle.stop();
        }
        let idle = self.wait_idle(timeout);
        if !idle {
            warn!("Shows still running after {:?}", timeout);
        }
        idle
    }

    fn start_show(&self, slot: &mut Slot) {
        let id = slot.next_id;
        slot.next_id += 1;
        slot.active = Some(ActiveShow { id, playback: None, stop_requested: false });
        slot.state = ShowState::Running;
        slot.live_workers += 1;

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name(format!("show-{}", id))
            .spawn(move || run_show(&shared, id));
        if let Err(e) = spawned {
            error!("Failed to spawn worker for show {}: {}", id, e);
            slot.live_workers -= 1;
            slot.active = None;
            slot.state = ShowState::Idle;
            self.shared.changed.notify_all();
        } else {
            info!("Show {} started", id);
        }
    }
}

fn stop_in_background(handle: PlaybackHandle) {
    let spawned = thread::Builder::new()
        .name("show-stop".to_string())
        .spawn({
            let handle = handle.clone();
            move || handle.stop()
        });
    if let Err(e) = spawned {
        warn!("Cannot spawn stop thread ({}); stopping inline", e);
        handle.stop();
    }
}

fn run_show(shared: &Shared, id: ShowId) {
    let _finish = FinishGuard { shared, id };
    let _off = PowerOffGuard { shared, id };
    play_show(shared, id);
}

fn play_show(shared: &Shared, id: ShowId) {
    let track = match shared.media.next_track() {
        Ok(track) => track,
        Err(e) => {
            error!("Show {}: cannot select a track: {}", id, e);
            return;
        }
    };
    info!("Show {}: selected track {}", id, track.display());

    let session = match PlaybackSession::start(shared.backend.as_ref(), &track, shared.timings) {
        Ok(session) => session,
        Err(e) => {
            error!("Show {}: playback failed to launch: {}", id, e);
            return;
        }
    };

    if !shared.register_playback(id, session.handle()) {
        info!("Show {}: cancelled before playback started", id);
        session.stop();
    }

    match session.wait_started(shared.timings.start_confirm_timeout) {
        Ok(confirmed) => {
            if confirmed {
                info!("Show {}: audio started", id);
            } else {
                warn!(
                    "Show {}: audio start not confirmed within {:?}; switching outlet ON anyway",
                    id, shared.timings.start_confirm_timeout
                );
            }
            shared.wait_superseded_off(id);
            if session.stop_requested() {
                info!("Show {}: stopped before the outlet was switched ON", id);
            } else {
                info!("Show {}: switching outlet ON", id);
                if let Err(e) = shared.outlet.submit(OutletCommand::ON) {
                    error!("Show {}: outlet ON failed: {}", id, e);
                }
            }
        }
        Err(e) if session.stop_requested() => info!("Show {}: playback cancelled ({})", id, e),
        Err(e) => warn!("Show {}: playback did not start: {}", id, e),
    }

    match session.wait_finished() {
        Ok(()) => info!("Show {}: playback finished", id),
        Err(e) => error!("Show {}: {}", id, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definitions::PowerState;
    use crate::errors::{MediaError, OutletError};
    use crate::playback::test_support::{FakeBackend, FakeScript};
    use crate::playback::ExitOutcome;
    use std::path::PathBuf;
    use std::time::Instant;

    fn ms(n: u64) -> Duration { Duration::from_millis(n) }

    #[derive(Default)]
    struct RecordingSink {
        commands: Mutex<Vec<(PowerState, Instant)>>,
        fail_on: bool,
    }

    impl RecordingSink {
        fn directions(&self) -> Vec<PowerState> {
            self.commands.lock().unwrap().iter().map(|(d, _)| *d).collect()
        }

        fn count(&self, direction: PowerState) -> usize {
            self.directions().into_iter().filter(|d| *d == direction).count()
        }

        fn first(&self, direction: PowerState) -> Option<Instant> {
            self.commands.lock().unwrap().iter().find(|(d, _)| *d == direction).map(|(_, t)| *t)
        }
    }

    impl OutletSink for RecordingSink {
        fn submit(&self, command: OutletCommand) -> Result<(), OutletError> {
            self.commands.lock().unwrap().push((command.direction, Instant::now()));
            if self.fail_on && command.direction == PowerState::On {
                return Err(OutletError::DeviceNotFound("00:00:00:00:00:00:00:01".into()));
            }
            Ok(())
        }
    }

    struct FixedMedia(Option<PathBuf>);

    impl MediaSource for FixedMedia {
        fn next_track(&self) -> Result<PathBuf, MediaError> {
            self.0.clone().ok_or(MediaError::NoMediaAvailable)
        }
    }

    struct SlowMedia(Duration);

    impl MediaSource for SlowMedia {
        fn next_track(&self) -> Result<PathBuf, MediaError> {
            thread::sleep(self.0);
            Ok(PathBuf::from("/mnt/usb/slow.mp3"))
        }
    }

    struct PanickingMedia;

    impl MediaSource for PanickingMedia {
        fn next_track(&self) -> Result<PathBuf, MediaError> {
            panic!("media volume vanished");
        }
    }

    fn timings() -> ShowTimings {
        ShowTimings { start_confirm_timeout: Duration::from_secs(1), stop_grace: ms(100), poll_interval: ms(5) }
    }

    struct Harness {
        controller: ShowController,
        backend: Arc<FakeBackend>,
        sink: Arc<RecordingSink>,
    }

    fn harness_with(
        policy: ConflictPolicy,
        timings: ShowTimings,
        media: Arc<dyn MediaSource>,
        backend: FakeBackend,
        sink: RecordingSink,
    ) -> Harness {
        let _ = env_logger::builder().is_test(true).try_init();
        let backend = Arc::new(backend);
        let sink = Arc::new(sink);
        let controller = ShowController::new(policy, timings, media, backend.clone(), sink.clone());
        Harness { controller, backend, sink }
    }

    fn harness(policy: ConflictPolicy, backend: FakeBackend) -> Harness {
        harness_with(
            policy,
            timings(),
            Arc::new(FixedMedia(Some(PathBuf::from("/music/track.mp3")))),
            backend,
            RecordingSink::default(),
        )
    }

    fn press(h: &Harness) {
        h.controller.on_trigger(TriggerEvent { at: Instant::now() });
    }

    #[test]
    fn show_runs_on_then_off_and_returns_to_idle() {
        let h = harness(ConflictPolicy::Ignore, FakeBackend::repeating(FakeScript::healthy(ms(10), ms(60))));
        assert_eq!(h.controller.state(), ShowState::Idle);
        press(&h);
        assert_eq!(h.controller.state(), ShowState::Running);
        assert!(h.controller.wait_idle(Duration::from_secs(2)));
        assert_eq!(h.sink.directions(), vec![PowerState::On, PowerState::Off]);
        assert_eq!(h.controller.state(), ShowState::Idle);
    }

    #[test]
    fn ignore_policy_never_spawns_a_second_worker() {
        let h = harness(ConflictPolicy::Ignore, FakeBackend::repeating(FakeScript::healthy(ms(10), ms(250))));
        press(&h);
        thread::sleep(ms(100));
        press(&h);
        press(&h);
        assert_eq!(h.controller.state(), ShowState::Running);
        assert!(h.controller.wait_idle(Duration::from_secs(2)));
        assert_eq!(h.backend.launch_count(), 1);
        assert_eq!(h.sink.directions(), vec![PowerState::On, PowerState::Off]);
    }

    #[test]
    fn stop_policy_stops_playback_without_starting_another() {
        let h = harness(ConflictPolicy::Stop, FakeBackend::repeating(FakeScript::healthy(ms(5), Duration::from_secs(60))));
        press(&h);
        thread::sleep(ms(50));
        press(&h);
        assert!(h.controller.wait_idle(Duration::from_secs(2)));
        assert_eq!(h.backend.launch_count(), 1);
        assert_eq!(h.backend.log(0).lock().unwrap().quits, 1);
        assert_eq!(h.sink.count(PowerState::Off), 1);
    }

    #[test]
    fn restart_policy_stops_old_session_and_starts_new_one() {
        let backend = FakeBackend::new(vec![
            FakeScript::healthy(ms(5), Duration::from_secs(60)),
            FakeScript::healthy(ms(5), ms(150)),
        ]);
        let h = harness(ConflictPolicy::Restart, backend);
        press(&h);
        thread::sleep(ms(50));
        press(&h);
        assert_eq!(h.controller.state(), ShowState::Running);
        assert!(h.controller.wait_idle(Duration::from_secs(3)));
        assert_eq!(h.backend.launch_count(), 2);
        assert_eq!(h.backend.log(0).lock().unwrap().quits, 1);
        assert_eq!(h.backend.log(1).lock().unwrap().quits, 0);
        assert_eq!(h.sink.directions(), vec![PowerState::On, PowerState::Off, PowerState::On, PowerState::Off]);
        assert_eq!(h.controller.state(), ShowState::Idle);
    }

    #[test]
    fn restart_switches_on_only_after_old_show_switched_off() {
        let stubborn = FakeScript { audible_after: Some(ms(5)), exits_after: None, honors_quit: false };
        let backend = FakeBackend::new(vec![stubborn, FakeScript::healthy(ms(5), ms(600))]);
        let mut t = timings();
        t.stop_grace = ms(300);
        let h = harness_with(
            ConflictPolicy::Restart,
            t,
            Arc::new(FixedMedia(Some(PathBuf::from("a.mp3")))),
            backend,
            RecordingSink::default(),
        );
        press(&h);
        thread::sleep(ms(50));
        press(&h);
        thread::sleep(ms(450));
        assert_eq!(h.controller.state(), ShowState::Running);
        assert_eq!(h.sink.directions().last(), Some(&PowerState::On));

        assert!(h.controller.wait_idle(Duration::from_secs(3)));
        assert_eq!(h.backend.log(0).lock().unwrap().kills, 1);
        assert_eq!(h.sink.directions(), vec![PowerState::On, PowerState::Off, PowerState::On, PowerState::Off]);
    }

    #[test]
    fn stop_press_before_playback_registered_cancels_show() {
        let h = harness_with(
            ConflictPolicy::Stop,
            timings(),
            Arc::new(SlowMedia(ms(150))),
            FakeBackend::repeating(FakeScript::healthy(ms(5), Duration::from_secs(60))),
            RecordingSink::default(),
        );
        press(&h);
        thread::sleep(ms(30));
        press(&h);
        assert!(h.controller.wait_idle(Duration::from_secs(2)));
        assert_eq!(h.backend.launch_count(), 1);
        assert_eq!(h.backend.log(0).lock().unwrap().quits, 1);
        assert_eq!(h.sink.directions(), vec![PowerState::Off]);
    }

    #[test]
    fn restart_press_before_playback_registered_stops_old_session() {
        let backend = FakeBackend::new(vec![
            FakeScript::healthy(ms(5), Duration::from_secs(60)),
            FakeScript::healthy(ms(5), ms(100)),
        ]);
        let h = harness_with(
            ConflictPolicy::Restart,
            timings(),
            Arc::new(SlowMedia(ms(150))),
            backend,
            RecordingSink::default(),
        );
        press(&h);
        thread::sleep(ms(30));
        press(&h);
        assert!(h.controller.wait_idle(Duration::from_secs(3)));
        assert_eq!(h.backend.launch_count(), 2);
        assert_eq!(h.backend.log(0).lock().unwrap().quits, 1);
        assert_eq!(h.backend.log(1).lock().unwrap().quits, 0);
        assert_eq!(h.sink.directions(), vec![PowerState::Off, PowerState::On, PowerState::Off]);
    }

    #[test]
    fn launch_failure_submits_off_but_never_on() {
        let h = harness(ConflictPolicy::Ignore, FakeBackend::unavailable());
        press(&h);
        assert!(h.controller.wait_idle(Duration::from_secs(2)));
        assert_eq!(h.sink.directions(), vec![PowerState::Off]);
        assert_eq!(h.controller.state(), ShowState::Idle);
    }

    #[test]
    fn unconfirmed_start_still_switches_on_after_timeout() {
        let script = FakeScript {
            audible_after: None,
            exits_after: Some((ms(400), ExitOutcome::Success)),
            honors_quit: true,
        };
        let mut t = timings();
        t.start_confirm_timeout = ms(150);
        let h = harness_with(
            ConflictPolicy::Ignore,
            t,
            Arc::new(FixedMedia(Some(PathBuf::from("a.ogg")))),
            FakeBackend::new(vec![script]),
            RecordingSink::default(),
        );
        press(&h);
        assert!(h.controller.wait_idle(Duration::from_secs(2)));
        let launched = h.backend.launches.lock().unwrap()[0].1;
        let on_at = h.sink.first(PowerState::On).unwrap();
        assert!(on_at.duration_since(launched) >= ms(150));
        assert_eq!(h.sink.directions(), vec![PowerState::On, PowerState::Off]);
    }

    #[test]
    fn on_waits_for_confirmed_audio() {
        let h = harness(ConflictPolicy::Ignore, FakeBackend::new(vec![FakeScript::healthy(ms(80), ms(150))]));
        press(&h);
        assert!(h.controller.wait_idle(Duration::from_secs(2)));
        let launched = h.backend.launches.lock().unwrap()[0].1;
        let on_at = h.sink.first(PowerState::On).unwrap();
        assert!(on_at.duration_since(launched) >= ms(80));
    }

    #[test]
    fn missing_media_still_submits_single_off() {
        let h = harness_with(
            ConflictPolicy::Ignore,
            timings(),
            Arc::new(FixedMedia(None)),
            FakeBackend::repeating(FakeScript::healthy(ms(1), ms(10))),
            RecordingSink::default(),
        );
        press(&h);
        assert!(h.controller.wait_idle(Duration::from_secs(2)));
        assert_eq!(h.backend.launch_count(), 0);
        assert_eq!(h.sink.directions(), vec![PowerState::Off]);
    }

    #[test]
    fn early_player_exit_skips_on() {
        let script = FakeScript {
            audible_after: None,
            exits_after: Some((ms(20), ExitOutcome::Failure(Some(2)))),
            honors_quit: true,
        };
        let h = harness(ConflictPolicy::Ignore, FakeBackend::new(vec![script]));
        press(&h);
        assert!(h.controller.wait_idle(Duration::from_secs(2)));
        assert_eq!(h.sink.directions(), vec![PowerState::Off]);
    }

    #[test]
    fn playback_failure_after_start_still_switches_off() {
        let script = FakeScript {
            audible_after: Some(ms(5)),
            exits_after: Some((ms(60), ExitOutcome::Failure(Some(1)))),
            honors_quit: true,
        };
        let h = harness(ConflictPolicy::Ignore, FakeBackend::new(vec![script]));
        press(&h);
        assert!(h.controller.wait_idle(Duration::from_secs(2)));
        assert_eq!(h.sink.directions(), vec![PowerState::On, PowerState::Off]);
    }

    #[test]
    fn outlet_on_error_does_not_abort_show() {
        let sink = RecordingSink { fail_on: true, ..Default::default() };
        let h = harness_with(
            ConflictPolicy::Ignore,
            timings(),
            Arc::new(FixedMedia(Some(PathBuf::from("a.mp3")))),
            FakeBackend::new(vec![FakeScript::healthy(ms(5), ms(60))]),
            sink,
        );
        press(&h);
        assert!(h.controller.wait_idle(Duration::from_secs(2)));
        assert_eq!(h.sink.directions(), vec![PowerState::On, PowerState::Off]);
        assert_eq!(h.backend.log(0).lock().unwrap().quits, 0);
    }

    #[test]
    fn panicking_worker_still_switches_off_and_frees_slot() {
        let h = harness_with(
            ConflictPolicy::Ignore,
            timings(),
            Arc::new(PanickingMedia),
            FakeBackend::unavailable(),
            RecordingSink::default(),
        );
        press(&h);
        assert!(h.controller.wait_idle(Duration::from_secs(2)));
        assert_eq!(h.sink.directions(), vec![PowerState::Off]);
        assert_eq!(h.controller.state(), ShowState::Idle);
    }

    #[test]
    fn shutdown_stops_running_show_and_refuses_new_presses() {
        let h = harness(ConflictPolicy::Restart, FakeBackend::repeating(FakeScript::healthy(ms(5), Duration::from_secs(60))));
        press(&h);
        thread::sleep(ms(50));
        assert!(h.controller.shutdown(Duration::from_secs(2)));
        assert_eq!(h.sink.count(PowerState::Off), 1);
        press(&h);
        assert_eq!(h.controller.state(), ShowState::Idle);
        assert_eq!(h.backend.launch_count(), 1);
    }
}
