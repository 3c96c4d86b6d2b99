//! In-memory sensor store
//!
//! Backs tests and self-contained tester runs. Entries live in one map of
//! JSON values behind a `tokio` RwLock, so scalar and list keys share a
//! namespace exactly like the durable store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::warn;

use super::{SensorStore, StoreError};
use crate::types::Value;

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, serde_json::Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys; test convenience.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

fn decode_scalar(key: &str, raw: &serde_json::Value) -> Result<Value, StoreError> {
    if raw.is_array() {
        warn!("Scalar read of list key '{}'", key);
        return Ok(Value::Absent);
    }
    serde_json::from_value(raw.clone())
        .map_err(|e| StoreError::Codec(key.to_string(), e.to_string()))
}

fn encode_scalar(key: &str, value: &Value) -> Result<serde_json::Value, StoreError> {
    serde_json::to_value(value).map_err(|e| StoreError::Codec(key.to_string(), e.to_string()))
}

#[async_trait]
impl SensorStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Value, StoreError> {
        match self.entries.read().await.get(key) {
            Some(raw) => decode_scalar(key, raw),
            None => Ok(Value::Absent),
        }
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let encoded = encode_scalar(key, &value)?;
        self.entries.write().await.insert(key.to_string(), encoded);
        Ok(())
    }

    async fn batch_set(&self, entries: &[(String, Value)]) -> Result<(), StoreError> {
        let mut encoded = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            encoded.push((key.clone(), encode_scalar(key, value)?));
        }
        // One write-lock acquisition: the whole batch becomes visible at once.
        let mut map = self.entries.write().await;
        for (key, value) in encoded {
            map.insert(key, value);
        }
        Ok(())
    }

    async fn get_list(&self, key: &str) -> Result<Vec<Value>, StoreError> {
        match self.entries.read().await.get(key) {
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .map(|item| {
                    serde_json::from_value(item.clone())
                        .map_err(|e| StoreError::Codec(key.to_string(), e.to_string()))
                })
                .collect(),
            Some(_) => Ok(Vec::new()),
            None => Ok(Vec::new()),
        }
    }

    async fn set_list(&self, key: &str, values: &[Value]) -> Result<(), StoreError> {
        let items = values
            .iter()
            .map(|v| serde_json::to_value(v).map_err(|e| StoreError::Codec(key.to_string(), e.to_string())))
            .collect::<Result<Vec<_>, _>>()?;
        self.entries
            .write()
            .await
            .insert(key.to_string(), serde_json::Value::Array(items));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn keys_matching(&self, pattern: &regex::Regex) -> Result<Vec<String>, StoreError> {
        Ok(self
            .entries
            .read()
            .await
            .keys()
            .filter(|k| pattern.is_match(k))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_keys_read_as_absent() {
        let store = MemoryStore::new();
        assert_eq!(store.get("input:missing").await.unwrap(), Value::Absent);
    }

    #[tokio::test]
    async fn scalar_round_trip() {
        let store = MemoryStore::new();
        store.set("input:temperature", Value::Number(35.0)).await.unwrap();
        assert_eq!(
            store.get("input:temperature").await.unwrap(),
            Value::Number(35.0)
        );
    }

    #[tokio::test]
    async fn batch_set_writes_everything() {
        let store = MemoryStore::new();
        store
            .batch_set(&[
                ("output:a".to_string(), Value::Bool(true)),
                ("output:b".to_string(), Value::Text("HOT".into())),
            ])
            .await
            .unwrap();
        assert_eq!(store.get("output:a").await.unwrap(), Value::Bool(true));
        assert_eq!(store.get("output:b").await.unwrap(), Value::Text("HOT".into()));
    }

    #[tokio::test]
    async fn list_round_trip() {
        let store = MemoryStore::new();
        store
            .set_list("buffer:temps", &[Value::Number(1.0), Value::Number(2.0)])
            .await
            .unwrap();
        assert_eq!(
            store.get_list("buffer:temps").await.unwrap(),
            vec![Value::Number(1.0), Value::Number(2.0)]
        );
        // Missing list keys read empty
        assert!(store.get_list("buffer:missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn keys_matching_filters_by_pattern() {
        let store = MemoryStore::new();
        store.set("output:a", Value::Bool(true)).await.unwrap();
        store.set("input:b", Value::Bool(true)).await.unwrap();
        let pattern = regex::Regex::new("^output:").unwrap();
        let keys = store.keys_matching(&pattern).await.unwrap();
        assert_eq!(keys, vec!["output:a".to_string()]);
    }

    #[tokio::test]
    async fn remove_deletes_the_key() {
        let store = MemoryStore::new();
        store.set("output:a", Value::Bool(true)).await.unwrap();
        store.remove("output:a").await.unwrap();
        assert_eq!(store.get("output:a").await.unwrap(), Value::Absent);
    }
}
