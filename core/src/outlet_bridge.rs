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
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::select;
use tokio::sync::{mpsc, oneshot};

use crate::definitions::{OutletAddress, OutletCommand};
use crate::errors::OutletError;
use crate::outlet::{clamp_permit_join, DeviceSummary, OutletSession, OutletSink};
use crate::service::{spawn_service, ServiceHandle};

enum BridgeRequest {
    Power {
        command: OutletCommand,
        reply: oneshot::Sender<Result<(), OutletError>>,
    },
    ListDevices {
        reply: oneshot::Sender<Result<Vec<DeviceSummary>, OutletError>>,
    },
    PermitJoin {
        duration: Duration,
        reply: oneshot::Sender<Result<(), OutletError>>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BridgeStatus {
    Initializing,
    Ready,
    Failed(OutletError),
    Closed,
}

struct StatusCell {
    status: Mutex<BridgeStatus>,
    changed: Condvar,
}

impl StatusCell {
    fn get(&self) -> MutexGuard<'_, BridgeStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, status: BridgeStatus) {
        *self.get() = status;
        self.changed.notify_all();
    }
}

/// Owns the outlet-control session on a single dedicated thread and applies
/// commands submitted from any other thread strictly in arrival order.
pub struct OutletBridge {
    target: OutletAddress,
    status: Arc<StatusCell>,
    tx: mpsc::UnboundedSender<BridgeRequest>,
    service: Mutex<Option<ServiceHandle>>,
}

impl OutletBridge {
    /// Start the bridge thread and begin initializing `session` on it.
    ///
    /// Returns immediately; use [`OutletBridge::wait_ready`] to wait for the session.
    pub fn spawn(session: Box<dyn OutletSession>, target: OutletAddress) -> Result<Self, OutletError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let status = Arc::new(StatusCell {
            status: Mutex::new(BridgeStatus::Initializing),
            changed: Condvar::new(),
        });

        let service_status = status.clone();
        let service = spawn_service("outlet-bridge", move |stop| {
            run_bridge(session, target, rx, service_status, stop)
        })
        .map_err(|e| OutletError::TransportError(format!("cannot spawn outlet bridge: {}", e)))?;

        Ok(Self { target, status, tx, service: Mutex::new(Some(service)) })
    }

    /// Block until the session has started, failed, or `timeout` elapsed.
    pub fn wait_ready(&self, timeout: Duration) -> Result<(), OutletError> {
        let guard = self.status.get();
        let (guard, _) = self
            .status
            .changed
            .wait_timeout_while(guard, timeout, |s| *s == BridgeStatus::Initializing)
            .unwrap_or_else(PoisonError::into_inner);
        match &*guard {
            BridgeStatus::Ready => Ok(()),
            BridgeStatus::Failed(e) => Err(e.clone()),
            BridgeStatus::Initializing | BridgeStatus::Closed => Err(OutletError::BridgeUnavailable),
        }
    }

    pub fn is_ready(&self) -> bool {
        *self.status.get() == BridgeStatus::Ready
    }

    pub fn target(&self) -> OutletAddress {
        self.target
    }

    /// Ask the session to list the devices it knows.
    pub fn list_devices(&self) -> Result<Vec<DeviceSummary>, OutletError> {
        self.request(|reply| BridgeRequest::ListDevices { reply })
    }

    /// Open the network for joining.
    pub fn permit_join(&self, duration: Duration) -> Result<(), OutletError> {
        self.request(|reply| BridgeRequest::PermitJoin { duration, reply })
    }

    /// Stop accepting commands, apply what is already queued, stop the session and
    /// join the bridge thread. Later calls are no-ops.
    pub fn shutdown(&self) {
        let service = self
            .service
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(service) = service {
            debug!("Shutting down outlet bridge");
            if service.shutdown().is_err() {
                error!("Outlet bridge thread panicked");
            }
        }
        self.status.set(BridgeStatus::Closed);
    }

    /// Must not be called from inside an async runtime: it blocks on the reply.
    fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, OutletError>>) -> BridgeRequest,
    ) -> Result<T, OutletError> {
        if !self.is_ready() {
            return Err(OutletError::BridgeUnavailable);
        }
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .map_err(|_| OutletError::BridgeUnavailable)?;
        reply_rx
            .blocking_recv()
            .map_err(|_| OutletError::BridgeUnavailable)?
    }
}

impl OutletSink for OutletBridge {
    fn submit(&self, command: OutletCommand) -> Result<(), OutletError> {
        self.request(|reply| BridgeRequest::Power { command, reply })
    }
}

impl Drop for OutletBridge {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn run_bridge(
    mut session: Box<dyn OutletSession>,
    target: OutletAddress,
    mut rx: mpsc::UnboundedReceiver<BridgeRequest>,
    status: Arc<StatusCell>,
    mut stop: crate::service::StopHandle,
) {
    if let Err(e) = session.start().await {
        error!("Outlet session failed to start: {}", e);
        status.set(BridgeStatus::Failed(e));
        return;
    }
    info!("Outlet session ready (outlet {})", target);
    status.set(BridgeStatus::Ready);

    loop {
        select! {
            biased;
            _ = stop.signaled() => {
                info!("Outlet bridge shutdown requested");
                break;
            }
            request = rx.recv() => {
                match request {
                    Some(request) => handle_request(session.as_mut(), &target, request).await,
                    None => break,
                }
            }
        }
    }

    status.set(BridgeStatus::Closed);
    rx.close();
    while let Some(request) = rx.recv().await {
        handle_request(session.as_mut(), &target, request).await;
    }
    session.stop().await;
    info!("Outlet session stopped");
}

async fn handle_request(session: &mut dyn OutletSession, target: &OutletAddress, request: BridgeRequest) {
    match request {
        BridgeRequest::Power { command, reply } => {
            debug!("Outlet {} -> {}", target, command.direction);
            let result = session.set_power(target, command.direction.is_on()).await;
            if let Err(e) = &result {
                warn!("Outlet command {} failed: {}", command.direction, e);
            }
            let _ = reply.send(result);
        }
        BridgeRequest::ListDevices { reply } => {
            let _ = reply.send(session.list_devices().await);
        }
        BridgeRequest::PermitJoin { duration, reply } => {
            let _ = reply.send(session.permit_join(clamp_permit_join(duration)).await);
        }
    }
}
