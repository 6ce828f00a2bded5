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

use std::future::Future;
use std::io;
use std::thread;

use tokio::sync::oneshot;

/// A handle passed to background services that lets them observe a stop request.
///
/// It wraps a oneshot Receiver and is meant to be awaited inside `select!`.
pub struct StopHandle {
    shutdown_rx: oneshot::Receiver<()>,
}

impl StopHandle {
    fn new(shutdown_rx: oneshot::Receiver<()>) -> Self { Self { shutdown_rx } }

    /// Resolves once shutdown is requested or the owning [`ServiceHandle`] is dropped.
    pub async fn signaled(&mut self) {
        (&mut self.shutdown_rx).await.unwrap_or_default();
    }
}

/// Handle to a service running on its own dedicated thread.
pub struct ServiceHandle {
    join: thread::JoinHandle<()>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

impl ServiceHandle {
    /// Request cooperative shutdown without waiting for the thread.
    pub fn request_shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }

    /// Request cooperative shutdown and block until the service thread exits.
    pub fn shutdown(mut self) -> thread::Result<()> {
        self.request_shutdown();
        self.join.join()
    }
}

/// Spawn a service on a dedicated, named thread that hosts its own current-thread
/// Tokio runtime.
///
/// Everything the service future touches lives on that one thread, so a resource that
/// must only be driven from a single scheduling context can be owned by it safely.
pub fn spawn_service<Fut, Func>(name: &str, f: Func) -> io::Result<ServiceHandle>
where
    Fut: Future<Output = ()> + 'static,
    Func: FnOnce(StopHandle) -> Fut + Send + 'static,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
    let stop = StopHandle::new(shutdown_rx);
    let join = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            runtime.block_on(f(stop));
        })?;
    Ok(ServiceHandle { join, shutdown_tx: Some(shutdown_tx) })
}
