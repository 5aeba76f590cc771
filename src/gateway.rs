use crate::domain::device::Device;
use crate::reachability::ReachabilityHandle;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, instrument};

/// Proxy settings are read-mostly and shared; a mutation never affects
/// in-flight requests, the next probe simply reads the new value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub url: String,
    pub timeout: u64,
}

impl ProxyConfig {
    pub fn is_configured(&self) -> bool {
        !self.url.is_empty()
    }
}

pub type SharedProxyConfig = Arc<RwLock<ProxyConfig>>;

/// The one request shape the proxy understands; it performs the actual
/// device call on our behalf.
#[derive(Debug, Serialize)]
struct ProbeRequest<'a> {
    esp_ip: &'a str,
    esp_port: u16,
    path: &'a str,
    method: &'a str,
    timeout: u64,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    #[error("no proxy server configured")]
    Unconfigured,
    #[error("no network connection")]
    Unreachable,
    #[error("request timed out")]
    Timeout,
    #[error("{0}")]
    RemoteError(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Timeout
        } else {
            GatewayError::RemoteError(e.to_string())
        }
    }
}

/// Seam between the scheduler and the network; scheduler tests script this.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Issues exactly one proxied request to the device. Exactly one outcome
    /// per call, no retries; retry policy belongs to the next poll cycle.
    async fn probe(&self, device: &Device, path: &str, method: &str) -> Result<Value, GatewayError>;
}

pub struct ProxyGateway {
    client: Client,
    proxy: SharedProxyConfig,
    reachability: ReachabilityHandle,
}

impl ProxyGateway {
    pub fn new(proxy: SharedProxyConfig, reachability: ReachabilityHandle) -> Self {
        ProxyGateway {
            client: Client::new(),
            proxy,
            reachability,
        }
    }
}

#[async_trait]
impl Gateway for ProxyGateway {
    #[instrument(skip(self, device), fields(device_id = %device.id))]
    async fn probe(&self, device: &Device, path: &str, method: &str) -> Result<Value, GatewayError> {
        // Both preconditions fail before any network attempt is made.
        if !self.reachability.is_online() {
            return Err(GatewayError::Unreachable);
        }
        let (url, default_timeout) = {
            let proxy = self.proxy.read().await;
            if !proxy.is_configured() {
                return Err(GatewayError::Unconfigured);
            }
            (proxy.url.clone(), proxy.timeout)
        };

        let timeout_secs = device.timeout.unwrap_or(default_timeout);
        let body = ProbeRequest {
            esp_ip: &device.esp_ip,
            esp_port: device.esp_port,
            path,
            method,
            timeout: timeout_secs,
        };

        debug!("📡 Probing {}:{}{}", device.esp_ip, device.esp_port, path);
        let request = async {
            let response = self.client.post(&url).json(&body).send().await?;
            if !response.status().is_success() {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                let message = if text.is_empty() { format!("HTTP error {status}") } else { text };
                return Err(GatewayError::RemoteError(message));
            }
            Ok(response.json::<Value>().await?)
        };

        // Hard client-side deadline; dropping the future cancels the request
        // and the elapsed transport error is reclassified, never surfaced raw.
        match timeout(Duration::from_secs(timeout_secs), request).await {
            Ok(outcome) => outcome,
            Err(_) => Err(GatewayError::Timeout),
        }
    }
}
