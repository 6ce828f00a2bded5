pub mod definitions;
pub mod errors;
pub mod service;
pub mod trigger;
pub mod playback;
pub mod outlet;
pub mod media;

mod outlet_bridge;
mod controller;

pub use controller::{ShowController, ShowId};
pub use outlet_bridge::OutletBridge;
pub use service::{spawn_service, ServiceHandle, StopHandle};
pub use trigger::{Debouncer, InputLine, TriggerConfig, TriggerSource};
pub use playback::{ExitOutcome, PlaybackBackend, PlaybackHandle, PlaybackProcess, PlaybackSession};
pub use outlet::{DeviceLookup, DeviceSummary, OutletSession, OutletSink};
pub use media::MediaSource;
