use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use reqwest::{Client, Url};
use serde_json::{json, Value};
use showtrigger_core::definitions::{Eui64, OutletAddress};
use showtrigger_core::errors::OutletError;
use showtrigger_core::outlet::{DeviceLookup, DeviceSummary, OutletSession};

const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

fn transport<E: ToString>(e: E) -> OutletError {
    OutletError::TransportError(e.to_string())
}

/// Outlet control through a deCONZ / Phoscon gateway REST API.
pub struct DeconzSession {
    client: Client,
    base: Url,
    api_key: String,
    target: OutletAddress,
    light_id: Option<String>,
}

impl DeconzSession {
    pub fn new(url: &str, api_key: &str, target: OutletAddress) -> Result<Self, OutletError> {
        let mut base = Url::parse(url).map_err(|e| transport(format!("invalid gateway url {}: {}", url, e)))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = Client::builder().timeout(HTTP_TIMEOUT).build().map_err(transport)?;
        Ok(Self { client, base, api_key: api_key.to_string(), target, light_id: None })
    }

    fn api_url(&self, path: &str) -> Result<Url, OutletError> {
        self.base.join(&format!("api/{}/{}", self.api_key, path)).map_err(transport)
    }

    async fn get_json(&self, path: &str) -> Result<Value, OutletError> {
        let response = self.client.get(self.api_url(path)?).send().await.map_err(transport)?;
        let response = response.error_for_status().map_err(transport)?;
        let text = response.text().await.map_err(transport)?;
        let value: Value = serde_json::from_str(&text).map_err(transport)?;
        check_api_errors(&value)?;
        Ok(value)
    }

    async fn put_json(&self, path: &str, body: Value) -> Result<Value, OutletError> {
        let response = self
            .client
            .put(self.api_url(path)?)
            .json(&body)
            .send()
            .await
            .map_err(transport)?;
        let response = response.error_for_status().map_err(transport)?;
        let text = response.text().await.map_err(transport)?;
        let value: Value = serde_json::from_str(&text).map_err(transport)?;
        check_api_errors(&value)?;
        Ok(value)
    }

    async fn resolve_light(&mut self) -> Result<String, OutletError> {
        if let Some(id) = &self.light_id {
            return Ok(id.clone());
        }
        let lights = self.get_json("lights").await?;
        let id = find_light(&lights, &self.target).into_result(&self.target)?;
        debug!("Outlet {} is gateway light {}", self.target, id);
        self.light_id = Some(id.clone());
        Ok(id)
    }
}

/// Errors come back as `[{"error": {"type": .., "description": ..}}]`.
fn check_api_errors(value: &Value) -> Result<(), OutletError> {
    let Some(entries) = value.as_array() else {
        return Ok(());
    };
    for entry in entries {
        if let Some(error) = entry.get("error") {
            let description = error["description"].as_str().unwrap_or("unknown gateway error");
            return Err(OutletError::TransportError(description.to_string()));
        }
    }
    Ok(())
}

/// Split a gateway `uniqueid` (`<ieee>-<endpoint hex>[-<cluster hex>]`) into address parts.
fn parse_unique_id(unique_id: &str) -> Option<(Eui64, Option<u8>)> {
    let mut parts = unique_id.split('-');
    let ieee = parts.next()?.parse().ok()?;
    let endpoint = parts.next().and_then(|e| u8::from_str_radix(e, 16).ok());
    Some((ieee, endpoint))
}

/// Find the light id serving `target` in a `GET lights` response.
pub fn find_light(lights: &Value, target: &OutletAddress) -> DeviceLookup<String> {
    let Some(lights) = lights.as_object() else {
        return DeviceLookup::DeviceNotFound;
    };
    let mut device_seen = false;
    for (id, light) in lights {
        let Some((ieee, endpoint)) = light["uniqueid"].as_str().and_then(parse_unique_id) else {
            continue;
        };
        if ieee != target.ieee {
            continue;
        }
        device_seen = true;
        if endpoint == Some(target.endpoint) {
            return DeviceLookup::Found(id.clone());
        }
    }
    if device_seen {
        DeviceLookup::EndpointUnavailable
    } else {
        DeviceLookup::DeviceNotFound
    }
}

pub fn summarize_lights(lights: &Value) -> Vec<DeviceSummary> {
    let Some(lights) = lights.as_object() else {
        return Vec::new();
    };
    let text = |v: &Value| v.as_str().map(str::to_string);
    let mut devices: Vec<DeviceSummary> = lights
        .values()
        .map(|light| DeviceSummary {
            ieee: light["uniqueid"].as_str().unwrap_or("?").to_string(),
            name: text(&light["name"]),
            manufacturer: text(&light["manufacturername"]),
            model: text(&light["modelid"]),
        })
        .collect();
    devices.sort_by(|a, b| a.ieee.cmp(&b.ieee));
    devices
}

#[async_trait]
impl OutletSession for DeconzSession {
    async fn start(&mut self) -> Result<(), OutletError> {
        let lights = self.get_json("lights").await?;
        info!(
            "Connected to gateway at {} ({} lights)",
            self.base,
            lights.as_object().map(|l| l.len()).unwrap_or(0)
        );
        match find_light(&lights, &self.target).into_result(&self.target) {
            Ok(id) => self.light_id = Some(id),
            Err(e) => warn!("Outlet not paired yet: {}", e),
        }
        Ok(())
    }

    async fn set_power(&mut self, outlet: &OutletAddress, on: bool) -> Result<(), OutletError> {
        if *outlet != self.target {
            self.target = *outlet;
            self.light_id = None;
        }
        let id = self.resolve_light().await?;
        let result = self.put_json(&format!("lights/{}/state", id), json!({ "on": on })).await;
        if result.is_err() {
            self.light_id = None;
        }
        result.map(|_| ())
    }

    async fn list_devices(&mut self) -> Result<Vec<DeviceSummary>, OutletError> {
        let lights = self.get_json("lights").await?;
        Ok(summarize_lights(&lights))
    }

    async fn permit_join(&mut self, duration: Duration) -> Result<(), OutletError> {
        self.put_json("config", json!({ "permitjoin": duration.as_secs() })).await?;
        Ok(())
    }
}
