use std::time::Duration;

use async_trait::async_trait;
use log::info;
use showtrigger_core::definitions::OutletAddress;
use showtrigger_core::errors::OutletError;
use showtrigger_core::outlet::{DeviceSummary, OutletSession};

/// Bench-test adapter: logs commands and remembers the last requested state.
pub struct DrySession {
    target: OutletAddress,
    last_state: Option<bool>,
}

impl DrySession {
    pub fn new(target: OutletAddress) -> Self {
        Self { target, last_state: None }
    }

    pub fn last_state(&self) -> Option<bool> {
        self.last_state
    }
}

#[async_trait]
impl OutletSession for DrySession {
    async fn start(&mut self) -> Result<(), OutletError> {
        info!("Dry-run outlet adapter: no hardware will be switched");
        Ok(())
    }

    async fn set_power(&mut self, outlet: &OutletAddress, on: bool) -> Result<(), OutletError> {
        info!("[dry] outlet {} -> {}", outlet, if on { "ON" } else { "OFF" });
        self.last_state = Some(on);
        Ok(())
    }

    async fn list_devices(&mut self) -> Result<Vec<DeviceSummary>, OutletError> {
        Ok(vec![DeviceSummary {
            ieee: self.target.ieee.to_string(),
            name: Some("dry-run outlet".to_string()),
            manufacturer: None,
            model: None,
        }])
    }

    async fn permit_join(&mut self, duration: Duration) -> Result<(), OutletError> {
        info!("[dry] permit join for {}s", duration.as_secs());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use showtrigger_core::definitions::Eui64;

    #[tokio::test]
    async fn remembers_last_state() {
        let target = OutletAddress { ieee: Eui64(42), endpoint: 1 };
        let mut session = DrySession::new(target);
        session.start().await.unwrap();
        assert_eq!(session.last_state(), None);
        session.set_power(&target, true).await.unwrap();
        session.set_power(&target, false).await.unwrap();
        assert_eq!(session.last_state(), Some(false));
        assert_eq!(session.list_devices().await.unwrap()[0].ieee, "00:00:00:00:00:00:00:2a");
    }
}
