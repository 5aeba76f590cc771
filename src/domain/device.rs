use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicI64, Ordering};
use thiserror::Error;

/// Reserved path of the implicit status-probe command every device carries.
pub const STATUS_PATH: &str = "/status";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub name: String,
    pub path: String,
}

impl Command {
    pub fn status_probe() -> Self {
        Command {
            name: "Device status".to_string(),
            path: STATUS_PATH.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: String,
    pub name: String,
    pub esp_ip: String,
    pub esp_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub commands: Vec<Command>,
    #[serde(default, deserialize_with = "deserialize_info")]
    pub info: HashMap<String, String>,
    #[serde(default = "DeviceStatus::default_offline")]
    pub status: DeviceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl DeviceStatus {
    fn default_offline() -> Self {
        DeviceStatus::Offline
    }
}

impl Device {
    /// Validates the identity fields and mints a canonical string id from the
    /// current time in milliseconds. The implicit status command is injected
    /// when the caller did not provide one.
    pub fn new(
        name: &str,
        esp_ip: &str,
        esp_port: u16,
        timeout: Option<u64>,
        commands: Vec<Command>,
    ) -> Result<Self, DeviceValidationError> {
        let mut device = Device {
            id: mint_id(),
            name: name.trim().to_string(),
            esp_ip: esp_ip.trim().to_string(),
            esp_port,
            timeout,
            commands,
            info: HashMap::new(),
            status: DeviceStatus::Offline,
            last_updated: None,
        };
        device.validate()?;
        device.ensure_status_command();
        Ok(device)
    }

    pub fn validate(&self) -> Result<(), DeviceValidationError> {
        if self.name.is_empty() {
            return Err(DeviceValidationError::EmptyName);
        }
        if self.esp_ip.parse::<Ipv4Addr>().is_err() {
            return Err(DeviceValidationError::InvalidAddress(self.esp_ip.clone()));
        }
        if self.esp_port == 0 {
            return Err(DeviceValidationError::InvalidPort);
        }
        if self.commands.iter().any(|c| c.name.is_empty() || c.path.is_empty()) {
            return Err(DeviceValidationError::EmptyCommandPath);
        }
        Ok(())
    }

    pub fn ensure_status_command(&mut self) {
        if !self.commands.iter().any(|c| c.path == STATUS_PATH) {
            self.commands.insert(0, Command::status_probe());
        }
    }

    pub fn is_online(&self) -> bool {
        self.status == DeviceStatus::Online
    }

    /// Commands shown as controls, i.e. everything except the status probe.
    pub fn control_commands(&self) -> impl Iterator<Item = &Command> {
        self.commands.iter().filter(|c| c.path != STATUS_PATH)
    }

    /// An "on" control is inert while the device already reports an "on"
    /// state, and likewise for "off".
    pub fn is_command_inert(&self, command: &Command) -> bool {
        let name = command.name.to_lowercase();
        let state = self.info.get("current_state").map(|s| s.to_lowercase()).unwrap_or_default();

        if name.contains("on") && !name.contains("off") {
            state.contains("on") && !state.contains("off")
        } else if name.contains("off") {
            state.contains("off")
        } else {
            false
        }
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DeviceValidationError {
    #[error("device name must not be empty")]
    EmptyName,
    #[error("'{0}' is not a valid IPv4 address")]
    InvalidAddress(String),
    #[error("port must be between 1 and 65535")]
    InvalidPort,
    #[error("command names and paths must not be empty")]
    EmptyCommandPath,
}

// Millisecond timestamp, bumped past the previous id so that two devices
// created within the same millisecond still get unique ids.
fn mint_id() -> String {
    static LAST: AtomicI64 = AtomicI64::new(0);
    let now = Utc::now().timestamp_millis();
    let previous = LAST
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(now.max(last + 1)))
        .unwrap_or(now);
    now.max(previous + 1).to_string()
}

// Legacy rosters stored numeric ids; accept both and canonicalize to a string.
fn deserialize_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!("invalid device id: {other}"))),
    }
}

fn deserialize_info<'de, D>(deserializer: D) -> Result<HashMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = HashMap::<String, Value>::deserialize(deserializer)?;
    Ok(raw.into_iter().map(|(key, value)| (key, stringify(value))).collect())
}

pub(crate) fn stringify(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

pub fn format_time_ago(timestamp: Option<DateTime<Utc>>) -> String {
    let Some(timestamp) = timestamp else {
        return "never updated".to_string();
    };

    let seconds = (Utc::now() - timestamp).num_seconds().max(0);
    if seconds < 10 {
        return "just now".to_string();
    }
    if seconds < 60 {
        return format!("{seconds} second(s) ago");
    }
    let minutes = seconds / 60;
    if minutes < 60 {
        return format!("{minutes} minute(s) ago");
    }
    let hours = minutes / 60;
    if hours < 24 {
        return format!("{hours} hour(s) ago");
    }
    format!("{} day(s) ago", hours / 24)
}
