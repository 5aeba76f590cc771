use async_trait::async_trait;
use serde_json::{Map, Value};
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs;
use tracing::{debug, instrument};

/// Key-value persistence seam. Values are stored wrapped in a
/// `{ "value": … }` envelope per key, matching the roster files written by
/// earlier versions of the app.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;
    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError>;
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

/// Single JSON file holding every key.
#[derive(Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileStorage { path: path.into() }
    }

    async fn read_all(&self) -> Result<Map<String, Value>, StorageError> {
        match fs::read_to_string(&self.path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl Storage for JsonFileStorage {
    #[instrument(skip(self))]
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        let mut entries = self.read_all().await?;
        Ok(entries.remove(key).and_then(|mut envelope| envelope.get_mut("value").map(Value::take)))
    }

    #[instrument(skip(self, value))]
    async fn set(&self, key: &str, value: Value) -> Result<(), StorageError> {
        let mut entries = self.read_all().await?;
        entries.insert(key.to_string(), serde_json::json!({ "value": value }));
        fs::write(&self.path, serde_json::to_vec_pretty(&Value::Object(entries))?).await?;
        debug!("💾 Wrote '{}' to {}", key, self.path.display());
        Ok(())
    }
}
