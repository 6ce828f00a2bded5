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

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use showtrigger_core::errors::MediaError;
use showtrigger_core::MediaSource;
use walkdir::WalkDir;

use crate::config::{AudioConfig, SourcePolicy};

const PROC_MOUNTS: &str = "/proc/mounts";

/// Audio files on removable drives and local folders.
pub struct MediaLibrary {
    usb_autodetect: bool,
    usb_mount_roots: Vec<PathBuf>,
    local_folders: Vec<PathBuf>,
    extensions: HashSet<String>,
    policy: SourcePolicy,
    mounts_file: PathBuf,
}

impl MediaLibrary {
    pub fn new(config: &AudioConfig) -> Self {
        Self {
            usb_autodetect: config.usb_autodetect,
            usb_mount_roots: config.usb_mount_roots.clone(),
            local_folders: config.local_folders.iter().map(|f| expand_home(f)).collect(),
            extensions: config.extensions.iter().map(|e| normalize_extension(e)).collect(),
            policy: config.source_policy,
            mounts_file: PathBuf::from(PROC_MOUNTS),
        }
    }

    /// Read mount points from a different mount table.
    pub fn with_mounts_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.mounts_file = path.into();
        self
    }

    /// Mount points equal to or below one of the configured USB roots.
    pub fn mounted_paths(&self) -> Result<Vec<PathBuf>, MediaError> {
        let table = std::fs::read_to_string(&self.mounts_file)?;
        Ok(table
            .lines()
            .filter_map(|line| line.split_whitespace().nth(1))
            .map(|m| PathBuf::from(unescape_mount_path(m)))
            .filter(|m| self.usb_mount_roots.iter().any(|root| m.starts_with(root)))
            .collect())
    }

    fn usb_tracks(&self) -> Vec<PathBuf> {
        if !self.usb_autodetect {
            return Vec::new();
        }
        match self.mounted_paths() {
            Ok(mounts) => mounts.iter().flat_map(|m| self.scan_folder(m)).collect(),
            Err(e) => {
                warn!("Cannot read mount table {}: {}", self.mounts_file.display(), e);
                Vec::new()
            }
        }
    }

    fn local_tracks(&self) -> Vec<PathBuf> {
        self.local_folders.iter().flat_map(|f| self.scan_folder(f)).collect()
    }

    fn scan_folder(&self, folder: &Path) -> Vec<PathBuf> {
        if !folder.exists() {
            debug!("Media folder {} does not exist", folder.display());
            return Vec::new();
        }
        WalkDir::new(folder)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!("Skipping unreadable media entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| self.has_audio_extension(path))
            .collect()
    }

    fn has_audio_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .map(|e| self.extensions.contains(&e.to_lowercase()))
            .unwrap_or(false)
    }

    /// Candidate tracks for the next show after applying the source policy.
    pub fn list_tracks(&self) -> Vec<PathBuf> {
        choose_source(self.usb_tracks(), self.local_tracks(), self.policy, &mut rand::thread_rng())
    }
}

impl MediaSource for MediaLibrary {
    fn next_track(&self) -> Result<PathBuf, MediaError> {
        let tracks = self.list_tracks();
        debug!("{} candidate tracks", tracks.len());
        tracks.choose(&mut rand::thread_rng()).cloned().ok_or(MediaError::NoMediaAvailable)
    }
}

fn choose_source<R: Rng>(usb: Vec<PathBuf>, local: Vec<PathBuf>, policy: SourcePolicy, rng: &mut R) -> Vec<PathBuf> {
    if usb.is_empty() {
        return local;
    }
    if local.is_empty() {
        return usb;
    }
    match policy {
        SourcePolicy::PreferUsb => usb,
        SourcePolicy::Random => {
            if rng.gen_bool(0.5) {
                usb
            } else {
                local
            }
        }
    }
}

/// `"MP3"`, `"mp3"` and `".mp3"` all become `"mp3"`.
pub fn normalize_extension(extension: &str) -> String {
    extension.trim().trim_start_matches('.').to_lowercase()
}

fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}

/// Undo the octal escapes (`\040` for space) used in the kernel mount table.
fn unescape_mount_path(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() && bytes[i + 1..i + 4].iter().all(|b| (b'0'..=b'7').contains(b)) {
            let digits = &raw[i + 1..i + 4];
            if let Ok(value) = u8::from_str_radix(digits, 8) {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
