//! Remote engine provisioning
//!
//! Fetches FHE key material from the gateway and builds a
//! [`RemoteEngine`] bound to the requested chain. Cancellation is handled
//! by the manager aborting the in-flight provisioning future.

use crate::engine::RemoteEngine;
use crate::{Error, Result};
use alloy::hex;
use alloy::primitives::Bytes;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// Provisions a real encryption engine for a non-local chain
#[async_trait]
pub trait EngineProvisioner: Send + Sync {
    async fn provision(&self, endpoint: &str, chain_id: u64) -> Result<RemoteEngine>;
}

/// Default provisioner backed by the FHE gateway's key endpoint
pub struct GatewayProvisioner {
    http: reqwest::Client,
}

impl GatewayProvisioner {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }
}

impl Default for GatewayProvisioner {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Deserialize)]
struct KeyMaterial {
    public_key: String,
}

#[async_trait]
impl EngineProvisioner for GatewayProvisioner {
    async fn provision(&self, endpoint: &str, chain_id: u64) -> Result<RemoteEngine> {
        let url = format!("{}/v1/keys?chain_id={chain_id}", endpoint.trim_end_matches('/'));
        debug!(%url, chain_id, "fetching FHE key material");

        let material: KeyMaterial = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Provisioning(format!("gateway unreachable: {e}")))?
            .error_for_status()
            .map_err(|e| Error::Provisioning(format!("gateway rejected key request: {e}")))?
            .json()
            .await
            .map_err(|e| Error::Provisioning(format!("malformed key material: {e}")))?;

        let stripped = material
            .public_key
            .strip_prefix("0x")
            .unwrap_or(&material.public_key);
        let raw =
            hex::decode(stripped).map_err(|e| Error::Provisioning(format!("bad key hex: {e}")))?;
        if raw.is_empty() {
            return Err(Error::Provisioning(
                "gateway returned empty public key".to_string(),
            ));
        }

        Ok(RemoteEngine::new(
            chain_id,
            endpoint.to_string(),
            Bytes::from(raw),
            self.http.clone(),
        ))
    }
}
