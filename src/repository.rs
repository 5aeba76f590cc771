use crate::domain::device::{Device, DeviceStatus};
use crate::gateway::ProxyConfig;
use crate::storage::{Storage, StorageError};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, instrument, warn};

pub const DEVICES_KEY: &str = "smart_home_devices";
pub const PROXY_CONFIG_KEY: &str = "proxy_config";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RosterStats {
    pub total: usize,
    pub online: usize,
}

/// Cloneable handle to the cached device roster and its persistence backend.
/// All lookups go through the canonical string id.
#[derive(Clone)]
pub struct DeviceRepository {
    devices: Arc<RwLock<Vec<Device>>>,
    storage: Arc<dyn Storage>,
}

impl DeviceRepository {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        DeviceRepository {
            devices: Arc::new(RwLock::new(Vec::new())),
            storage,
        }
    }

    /// Loads the roster from storage. Records without an id or name are
    /// dropped, missing fields are defaulted and every status is forced to
    /// offline: freshness cannot be assumed after a restart.
    #[instrument(skip(self))]
    pub async fn load(&self) -> Result<usize, StorageError> {
        info!("📂 Loading device roster...");
        let devices = match self.storage.get(DEVICES_KEY).await? {
            Some(raw) => serde_json::from_value::<Vec<serde_json::Value>>(raw)?
                .into_iter()
                .filter_map(|entry| match serde_json::from_value::<Device>(entry) {
                    Ok(device) if !device.id.is_empty() && !device.name.is_empty() => Some(device),
                    Ok(device) => {
                        warn!("⚠️ Dropping roster entry without id or name: {:?}", device);
                        None
                    }
                    Err(e) => {
                        warn!("⚠️ Dropping unreadable roster entry: {}", e);
                        None
                    }
                })
                .map(|mut device| {
                    device.status = DeviceStatus::Offline;
                    device.ensure_status_command();
                    device
                })
                .collect(),
            None => Vec::new(),
        };

        let count = devices.len();
        *self.devices.write().await = devices;
        info!("📂 Loading device roster... OK, {} device(s)", count);
        Ok(count)
    }

    /// Writes the current roster back to storage.
    pub async fn persist(&self) -> Result<(), StorageError> {
        let devices = self.devices.read().await;
        self.storage.set(DEVICES_KEY, serde_json::to_value(&*devices)?).await
    }

    pub async fn device_ids(&self) -> Vec<String> {
        self.devices.read().await.iter().map(|d| d.id.clone()).collect()
    }

    pub async fn find(&self, id: &str) -> Option<Device> {
        self.devices.read().await.iter().find(|d| d.id == id).cloned()
    }

    pub async fn contains(&self, id: &str) -> bool {
        self.devices.read().await.iter().any(|d| d.id == id)
    }

    /// Runs `mutate` against the device under the write guard. Returns false
    /// when the device no longer exists.
    pub async fn with_device_mut<F>(&self, id: &str, mutate: F) -> bool
    where
        F: FnOnce(&mut Device),
    {
        let mut devices = self.devices.write().await;
        match devices.iter_mut().find(|d| d.id == id) {
            Some(device) => {
                mutate(device);
                true
            }
            None => false,
        }
    }

    pub async fn add(&self, device: Device) {
        self.devices.write().await.push(device);
    }

    /// Replaces the identity fields of an existing device, keeping its cached
    /// status, info and last-update timestamp.
    pub async fn update(&self, id: &str, updated: Device) -> bool {
        self.with_device_mut(id, |device| {
            device.name = updated.name;
            device.esp_ip = updated.esp_ip;
            device.esp_port = updated.esp_port;
            device.timeout = updated.timeout;
            device.commands = updated.commands;
        })
        .await
    }

    pub async fn remove(&self, id: &str) -> Option<Device> {
        let mut devices = self.devices.write().await;
        let index = devices.iter().position(|d| d.id == id)?;
        Some(devices.remove(index))
    }

    pub async fn stats(&self) -> RosterStats {
        let devices = self.devices.read().await;
        RosterStats {
            total: devices.len(),
            online: devices.iter().filter(|d| d.is_online()).count(),
        }
    }

    pub async fn load_proxy_config(&self) -> Result<Option<ProxyConfig>, StorageError> {
        match self.storage.get(PROXY_CONFIG_KEY).await? {
            Some(raw) => Ok(Some(serde_json::from_value(raw)?)),
            None => Ok(None),
        }
    }

    pub async fn save_proxy_config(&self, config: &ProxyConfig) -> Result<(), StorageError> {
        self.storage.set(PROXY_CONFIG_KEY, serde_json::to_value(config)?).await
    }
}
