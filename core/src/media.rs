use std::path::PathBuf;

use crate::errors::MediaError;

/// Supplies the track for the next show.
pub trait MediaSource: Send + Sync {
    fn next_track(&self) -> Result<PathBuf, MediaError>;
}
