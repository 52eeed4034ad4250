//! Platform client — slot creation, instance init, slot destruction.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use ember_core::{Instance, Meta, Slot, SlotResourceConfig};

use crate::error::{PlatformError, PlatformResult};

/// Capability set the scaler needs from the platform.
///
/// One production implementation (`HttpPlatformClient`) plus fakes in
/// tests. All calls are made with no scaler locks held.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Reserve a resource slot.
    async fn create_slot(
        &self,
        request_id: &str,
        resource_config: &SlotResourceConfig,
    ) -> PlatformResult<Slot>;

    /// Boot an instance of `meta` inside `slot`.
    ///
    /// The returned instance carries the init latency measured by the
    /// platform (`init_duration_in_ms`).
    async fn init(
        &self,
        request_id: &str,
        instance_id: &str,
        slot: Slot,
        meta: Meta,
    ) -> PlatformResult<Instance>;

    /// Release a slot. `reason` is recorded by the platform for audit.
    async fn destroy_slot(
        &self,
        request_id: &str,
        slot_id: &str,
        reason: &str,
    ) -> PlatformResult<()>;
}

#[derive(Serialize)]
struct CreateSlotRequest<'a> {
    request_id: &'a str,
    resource_config: &'a SlotResourceConfig,
}

#[derive(Serialize)]
struct InitRequest<'a> {
    request_id: &'a str,
    instance_id: &'a str,
    slot: &'a Slot,
    meta: &'a Meta,
}

#[derive(Serialize)]
struct DestroySlotRequest<'a> {
    request_id: &'a str,
    reason: &'a str,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

/// Production client speaking JSON over HTTP to the platform endpoint.
pub struct HttpPlatformClient {
    base_url: String,
    http_client: reqwest::Client,
}

impl HttpPlatformClient {
    /// Connect to the platform at `addr` (e.g. "http://10.0.0.1:50051").
    pub fn new(addr: &str) -> PlatformResult<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            base_url: addr.trim_end_matches('/').to_string(),
            http_client,
        })
    }

    async fn check<T: for<'de> Deserialize<'de>>(
        &self,
        operation: &'static str,
        slot_id: &str,
        response: reqwest::Response,
    ) -> PlatformResult<T> {
        if !response.status().is_success() {
            let status = response.status();
            let message = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|b| b.message)
                .unwrap_or_else(|| status.to_string());
            return Err(PlatformError::Rejected {
                operation,
                slot_id: slot_id.to_string(),
                message,
            });
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl PlatformClient for HttpPlatformClient {
    async fn create_slot(
        &self,
        request_id: &str,
        resource_config: &SlotResourceConfig,
    ) -> PlatformResult<Slot> {
        debug!(%request_id, memory_mb = resource_config.memory_in_mb, "creating slot");
        let response = self
            .http_client
            .post(format!("{}/slots", self.base_url))
            .json(&CreateSlotRequest {
                request_id,
                resource_config,
            })
            .send()
            .await?;
        self.check("create_slot", "", response).await
    }

    async fn init(
        &self,
        request_id: &str,
        instance_id: &str,
        slot: Slot,
        meta: Meta,
    ) -> PlatformResult<Instance> {
        debug!(%request_id, %instance_id, slot_id = %slot.id, app = %meta.key, "initializing instance");
        let response = self
            .http_client
            .post(format!("{}/slots/{}/init", self.base_url, slot.id))
            .json(&InitRequest {
                request_id,
                instance_id,
                slot: &slot,
                meta: &meta,
            })
            .send()
            .await?;
        self.check("init", &slot.id, response).await
    }

    async fn destroy_slot(
        &self,
        request_id: &str,
        slot_id: &str,
        reason: &str,
    ) -> PlatformResult<()> {
        debug!(%request_id, %slot_id, %reason, "destroying slot");
        let response = self
            .http_client
            .post(format!("{}/slots/{}/destroy", self.base_url, slot_id))
            .json(&DestroySlotRequest { request_id, reason })
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let message = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|b| b.message)
                .unwrap_or_else(|| status.to_string());
            return Err(PlatformError::Rejected {
                operation: "destroy_slot",
                slot_id: slot_id.to_string(),
                message,
            });
        }
        Ok(())
    }
}
