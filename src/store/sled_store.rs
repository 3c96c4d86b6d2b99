//! Sled-backed sensor store
//!
//! Durable store implementation: JSON-encoded values keyed by the full
//! sensor key string. Sled handles durability via background flushing; a
//! crash may lose the last few writes, which is acceptable for state the
//! engine regenerates every cycle.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

use super::{SensorStore, StoreError};
use crate::types::Value;

#[derive(Debug, Clone)]
pub struct SledStore {
    db: Arc<sled::Db>,
}

impl SledStore {
    /// Open or create the store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let path_ref = path.as_ref();
        let db = sled::open(path_ref)?;
        info!("Sensor store opened at {:?}", path_ref);
        Ok(Self { db: Arc::new(db) })
    }

    fn read_json(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        match self.db.get(key.as_bytes())? {
            Some(bytes) => {
                let value = serde_json::from_slice(&bytes)
                    .map_err(|e| StoreError::Codec(key.to_string(), e.to_string()))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn write_json(&self, key: &str, value: &serde_json::Value) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| StoreError::Codec(key.to_string(), e.to_string()))?;
        self.db.insert(key.as_bytes(), bytes)?;
        Ok(())
    }
}

#[async_trait]
impl SensorStore for SledStore {
    async fn get(&self, key: &str) -> Result<Value, StoreError> {
        match self.read_json(key)? {
            Some(raw) if !raw.is_array() => serde_json::from_value(raw)
                .map_err(|e| StoreError::Codec(key.to_string(), e.to_string())),
            _ => Ok(Value::Absent),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let raw = serde_json::to_value(&value)
            .map_err(|e| StoreError::Codec(key.to_string(), e.to_string()))?;
        self.write_json(key, &raw)
    }

    async fn batch_set(&self, entries: &[(String, Value)]) -> Result<(), StoreError> {
        // A single sled batch applies atomically.
        let mut batch = sled::Batch::default();
        for (key, value) in entries {
            let bytes = serde_json::to_vec(value)
                .map_err(|e| StoreError::Codec(key.clone(), e.to_string()))?;
            batch.insert(key.as_bytes(), bytes);
        }
        self.db.apply_batch(batch)?;
        Ok(())
    }

    async fn get_list(&self, key: &str) -> Result<Vec<Value>, StoreError> {
        match self.read_json(key)? {
            Some(serde_json::Value::Array(items)) => items
                .into_iter()
                .map(|item| {
                    serde_json::from_value(item)
                        .map_err(|e| StoreError::Codec(key.to_string(), e.to_string()))
                })
                .collect(),
            _ => Ok(Vec::new()),
        }
    }

    async fn set_list(&self, key: &str, values: &[Value]) -> Result<(), StoreError> {
        let items = values
            .iter()
            .map(|v| {
                serde_json::to_value(v).map_err(|e| StoreError::Codec(key.to_string(), e.to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        self.write_json(key, &serde_json::Value::Array(items))
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.db.remove(key.as_bytes())?;
        Ok(())
    }

    async fn keys_matching(&self, pattern: &regex::Regex) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        for item in self.db.iter() {
            let (key_bytes, _) = item?;
            if let Ok(key) = std::str::from_utf8(&key_bytes) {
                if pattern.is_match(key) {
                    keys.push(key.to_string());
                }
            }
        }
        Ok(keys)
    }
}
