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

use std::ffi::OsString;
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use log::{debug, info, warn};
use serde_json::{json, Value};
use showtrigger_core::errors::PlaybackError;
use showtrigger_core::{ExitOutcome, PlaybackBackend, PlaybackProcess};
use tempfile::TempDir;

const IPC_TIMEOUT: Duration = Duration::from_millis(500);

/// Plays tracks with an `mpv` child process controlled over its JSON IPC socket.
pub struct MpvBackend {
    executable: String,
    alsa_device: Option<String>,
}

impl MpvBackend {
    pub fn new(executable: &str, alsa_device: &str) -> Self {
        let alsa_device = Some(alsa_device.trim()).filter(|d| !d.is_empty()).map(str::to_string);
        Self { executable: executable.to_string(), alsa_device }
    }

    fn command_args(&self, socket: &Path, track: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = [
            "--no-video",
            "--really-quiet",
            "--idle=no",
            "--force-window=no",
            "--audio-display=no",
        ]
        .iter()
        .map(OsString::from)
        .collect();

        let mut ipc = OsString::from("--input-ipc-server=");
        ipc.push(socket);
        args.push(ipc);

        if let Some(device) = &self.alsa_device {
            args.push("--ao=alsa".into());
            args.push(format!("--audio-device=alsa/{}", device).into());
        }
        args.push(track.into());
        args
    }
}

impl PlaybackBackend for MpvBackend {
    fn launch(&self, track: &Path) -> Result<Box<dyn PlaybackProcess>, PlaybackError> {
        if !track.is_file() {
            return Err(PlaybackError::TrackMissing(track.to_path_buf()));
        }
        let dir = tempfile::Builder::new()
            .prefix("showtrigger-mpv")
            .tempdir()
            .map_err(|e| PlaybackError::BackendUnavailable(format!("cannot create IPC directory: {}", e)))?;
        let socket = dir.path().join("mpv.sock");

        let child = Command::new(&self.executable)
            .args(self.command_args(&socket, track))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| PlaybackError::BackendUnavailable(format!("cannot start {}: {}", self.executable, e)))?;
        info!("Launched {} (pid {}) for {}", self.executable, child.id(), track.display());

        Ok(Box::new(MpvProcess { child, ipc: MpvIpc::new(socket), _ipc_dir: dir }))
    }
}

struct MpvIpc {
    socket: PathBuf,
    connection: Option<BufReader<UnixStream>>,
    next_request_id: u64,
}

impl MpvIpc {
    fn new(socket: PathBuf) -> Self {
        Self { socket, connection: None, next_request_id: 1 }
    }

    fn connection(&mut self) -> Result<&mut BufReader<UnixStream>, PlaybackError> {
        if self.connection.is_none() {
            let stream = UnixStream::connect(&self.socket)
                .map_err(|e| PlaybackError::Control(format!("IPC socket not ready: {}", e)))?;
            stream
                .set_read_timeout(Some(IPC_TIMEOUT))
                .and_then(|_| stream.set_write_timeout(Some(IPC_TIMEOUT)))
                .map_err(|e| PlaybackError::Control(e.to_string()))?;
            self.connection = Some(BufReader::new(stream));
        }
        self.connection
            .as_mut()
            .ok_or_else(|| PlaybackError::Control("IPC connection lost".to_string()))
    }

    fn send(&mut self, command: Value, request_id: Option<u64>) -> Result<(), PlaybackError> {
        let mut message = json!({ "command": command });
        if let Some(id) = request_id {
            message["request_id"] = json!(id);
        }
        let mut line = message.to_string();
        line.push('\n');
        let result = self.connection()?.get_mut().write_all(line.as_bytes());
        result.map_err(|e| {
            self.connection = None;
            PlaybackError::Control(format!("IPC write failed: {}", e))
        })
    }

    /// Send `command` and wait for the reply carrying its request id; events are skipped.
    fn request(&mut self, command: Value) -> Result<Value, PlaybackError> {
        let id = self.next_request_id;
        self.next_request_id += 1;
        self.send(command, Some(id))?;

        loop {
            let mut line = String::new();
            let read = self.connection()?.read_line(&mut line);
            match read {
                Ok(0) => {
                    self.connection = None;
                    return Err(PlaybackError::Control("IPC connection closed".to_string()));
                }
                Ok(_) => {
                    if let Some(reply) = parse_reply(&line, id) {
                        return reply.map_err(PlaybackError::Control);
                    }
                }
                Err(e) => {
                    if e.kind() != ErrorKind::WouldBlock && e.kind() != ErrorKind::TimedOut {
                        self.connection = None;
                    }
                    return Err(PlaybackError::Control(format!("IPC read failed: {}", e)));
                }
            }
        }
    }
}

/// `Some` when `line` is the reply to `request_id`: the `data` field on success,
/// the error text otherwise.
fn parse_reply(line: &str, request_id: u64) -> Option<Result<Value, String>> {
    let value: Value = serde_json::from_str(line.trim()).ok()?;
    if value.get("request_id").and_then(Value::as_u64) != Some(request_id) {
        return None;
    }
    match value.get("error").and_then(Value::as_str) {
        Some("success") => Some(Ok(value.get("data").cloned().unwrap_or(Value::Null))),
        Some(error) => Some(Err(error.to_string())),
        None => Some(Err("malformed reply".to_string())),
    }
}

struct MpvProcess {
    child: Child,
    ipc: MpvIpc,
    _ipc_dir: TempDir,
}

impl PlaybackProcess for MpvProcess {
    fn playback_position(&mut self) -> Result<Option<f64>, PlaybackError> {
        match self.ipc.request(json!(["get_property", "playback-time"])) {
            Ok(data) => Ok(data.as_f64()),
            // Reported until the decoder produces audio.
            Err(PlaybackError::Control(e)) if e == "property unavailable" => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn try_exit(&mut self) -> Result<Option<ExitOutcome>, PlaybackError> {
        let status = self
            .child
            .try_wait()
            .map_err(|e| PlaybackError::Control(format!("cannot query player: {}", e)))?;
        Ok(status.map(|status| {
            if status.success() {
                ExitOutcome::Success
            } else {
                ExitOutcome::Failure(status.code())
            }
        }))
    }

    fn request_quit(&mut self) -> Result<(), PlaybackError> {
        debug!("Sending quit to player pid {}", self.child.id());
        self.ipc.send(json!(["quit"]), None)
    }

    fn kill(&mut self) -> Result<(), PlaybackError> {
        match self.child.kill() {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::InvalidInput => {}
            Err(e) => return Err(PlaybackError::Control(format!("cannot kill player: {}", e))),
        }
        self.child
            .wait()
            .map(|_| ())
            .map_err(|e| PlaybackError::Control(format!("cannot reap player: {}", e)))
    }
}

impl Drop for MpvProcess {
    fn drop(&mut self) {
        if let Ok(None) = self.child.try_wait() {
            warn!("Player pid {} still running; killing it", self.child.id());
            if let Err(e) = self.kill() {
                warn!("{}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    fn wait_exit(process: &mut Box<dyn PlaybackProcess>) -> ExitOutcome {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(outcome) = process.try_exit().unwrap() {
                return outcome;
            }
            assert!(Instant::now() < deadline, "process did not exit");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn arguments_select_audio_only_ipc_mode() {
        let backend = MpvBackend::new("mpv", "");
        let args = backend.command_args(Path::new("/tmp/x/mpv.sock"), Path::new("/music/a.mp3"));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            vec![
                "--no-video",
                "--really-quiet",
                "--idle=no",
                "--force-window=no",
                "--audio-display=no",
                "--input-ipc-server=/tmp/x/mpv.sock",
                "/music/a.mp3",
            ]
        );
    }

    #[test]
    fn alsa_device_forces_alsa_output() {
        let backend = MpvBackend::new("mpv", " plughw:1,0 ");
        let args = backend.command_args(Path::new("s"), Path::new("t.wav"));
        let args: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
        assert!(args.contains(&"--ao=alsa".to_string()));
        assert!(args.contains(&"--audio-device=alsa/plughw:1,0".to_string()));
        assert_eq!(args.last().unwrap(), "t.wav");
    }

    #[test]
    fn replies_are_matched_by_request_id() {
        assert_eq!(
            parse_reply(r#"{"data":1.25,"error":"success","request_id":3}"#, 3),
            Some(Ok(json!(1.25)))
        );
        assert_eq!(
            parse_reply(r#"{"error":"property unavailable","request_id":4}"#, 4),
            Some(Err("property unavailable".to_string()))
        );
        assert_eq!(parse_reply(r#"{"event":"playback-restart"}"#, 4), None);
        assert_eq!(parse_reply(r#"{"data":2.0,"error":"success","request_id":2}"#, 4), None);
        assert_eq!(parse_reply("not json", 1), None);
    }

    #[test]
    fn missing_track_is_reported_before_launch() {
        let backend = MpvBackend::new("mpv", "");
        let err = backend.launch(Path::new("/nonexistent/track.mp3")).err().unwrap();
        assert!(matches!(err, PlaybackError::TrackMissing(_)));
    }

    #[test]
    fn missing_executable_is_backend_unavailable() {
        let track = tempfile::NamedTempFile::new().unwrap();
        let backend = MpvBackend::new("/nonexistent/bin/mpv", "");
        let err = backend.launch(track.path()).err().unwrap();
        assert!(matches!(err, PlaybackError::BackendUnavailable(_)));
    }

    #[test]
    fn exit_status_is_reported() {
        let track = tempfile::NamedTempFile::new().unwrap();

        let mut ok = MpvBackend::new("true", "").launch(track.path()).unwrap();
        assert_eq!(wait_exit(&mut ok), ExitOutcome::Success);

        let mut failed = MpvBackend::new("false", "").launch(track.path()).unwrap();
        assert_eq!(wait_exit(&mut failed), ExitOutcome::Failure(Some(1)));
    }

    #[test]
    fn position_without_socket_is_a_control_error() {
        let track = tempfile::NamedTempFile::new().unwrap();
        let mut process = MpvBackend::new("true", "").launch(track.path()).unwrap();
        assert!(matches!(process.playback_position(), Err(PlaybackError::Control(_))));
        assert!(process.request_quit().is_err());
        wait_exit(&mut process);
        process.kill().unwrap();
    }
}
