//! Pass-through seam for the data-operation channel.
//!
//! The broker does not interpret data operations; it hands them to a
//! [`DataStore`] and relays the answer. [`MemoryDataStore`] is the bundled
//! implementation, holding JSON documents in named tables.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::RwLock;

use crate::error::{BrokerError, Result};

#[async_trait]
pub trait DataStore: Send + Sync {
    /// Run `operation` on `table` with positional `arguments`.
    async fn op(&self, table: &str, operation: &str, arguments: Vec<Value>) -> Result<Value>;

    /// Provision a new named table.
    async fn register_data_store(&self, name: &str) -> Result<Value>;
}

/// Tables of JSON documents keyed by their `_id` field.
#[derive(Debug, Default)]
pub struct MemoryDataStore {
    tables: RwLock<HashMap<String, Vec<Value>>>,
}

impl MemoryDataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches(doc: &Value, query: &Value) -> bool {
    match query.as_object() {
        Some(fields) => fields.iter().all(|(k, v)| doc.get(k) == Some(v)),
        None => query.is_null(),
    }
}

fn arg(arguments: &[Value], index: usize) -> Value {
    arguments.get(index).cloned().unwrap_or(Value::Null)
}

#[async_trait]
impl DataStore for MemoryDataStore {
    async fn op(&self, table: &str, operation: &str, arguments: Vec<Value>) -> Result<Value> {
        let mut tables = self.tables.write().await;
        let docs = tables
            .get_mut(table)
            .ok_or_else(|| BrokerError::DataStore(format!("table '{table}' does not exist")))?;

        match operation {
            "insert" => {
                let mut doc = arg(&arguments, 0);
                let Some(fields) = doc.as_object_mut() else {
                    return Err(BrokerError::DataStore("insert expects an object".to_string()));
                };
                fields
                    .entry("_id")
                    .or_insert_with(|| json!(uuid::Uuid::new_v4().to_string()));
                docs.push(doc.clone());
                Ok(doc)
            }
            "get" => {
                let id = arg(&arguments, 0);
                Ok(docs
                    .iter()
                    .find(|d| d.get("_id") == Some(&id))
                    .cloned()
                    .unwrap_or(Value::Null))
            }
            "find" => {
                let query = arg(&arguments, 0);
                Ok(Value::Array(
                    docs.iter().filter(|d| matches(d, &query)).cloned().collect(),
                ))
            }
            "update" => {
                let query = arg(&arguments, 0);
                let patch = arg(&arguments, 1);
                let Some(patch) = patch.as_object() else {
                    return Err(BrokerError::DataStore("update expects an object".to_string()));
                };
                let mut updated = 0;
                for doc in docs.iter_mut().filter(|d| matches(d, &query)) {
                    if let Some(fields) = doc.as_object_mut() {
                        for (k, v) in patch {
                            fields.insert(k.clone(), v.clone());
                        }
                        updated += 1;
                    }
                }
                Ok(json!(updated))
            }
            "remove" => {
                let query = arg(&arguments, 0);
                let before = docs.len();
                docs.retain(|d| !matches(d, &query));
                Ok(json!(before - docs.len()))
            }
            "count" => Ok(json!(docs.len())),
            other => Err(BrokerError::DataStore(format!(
                "operation '{other}' is not supported on '{table}'"
            ))),
        }
    }

    async fn register_data_store(&self, name: &str) -> Result<Value> {
        let mut tables = self.tables.write().await;
        let created = !tables.contains_key(name);
        tables.entry(name.to_string()).or_default();
        Ok(json!({ "name": name, "created": created }))
    }
}
