//! In-memory implementation of [`StreamStore`] for tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{StreamError, StreamStore, MISSING_TYPE};

#[derive(Debug, Clone)]
enum Entry {
    Stream(Vec<StreamEntry>),
    Hash(HashMap<String, String>),
    SortedSet(HashMap<String, f64>),
    /// Plain string value; only ever seeded by tests.
    String(String),
}

impl Entry {
    fn type_name(&self) -> &'static str {
        match self {
            Entry::Stream(_) => "stream",
            Entry::Hash(_) => "hash",
            Entry::SortedSet(_) => "zset",
            Entry::String(_) => "string",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: Vec<(String, String)>,
}

#[derive(Default)]
pub struct InMemoryStreamStore {
    keys: Mutex<HashMap<String, Entry>>,
    next_id: AtomicU64,
    fail_appends: AtomicBool,
}

impl InMemoryStreamStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every `append` fails.
    pub fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    /// Store a plain string at `key`, replacing whatever was there.
    pub async fn set_string(&self, key: &str, value: &str) {
        self.keys
            .lock()
            .await
            .insert(key.to_string(), Entry::String(value.to_string()));
    }

    /// All entries appended to `stream`, oldest first.
    pub async fn entries(&self, stream: &str) -> Vec<StreamEntry> {
        match self.keys.lock().await.get(stream) {
            Some(Entry::Stream(entries)) => entries.clone(),
            _ => Vec::new(),
        }
    }

    /// Values of `field` across `stream`, skipping entries without it.
    pub async fn field_values(&self, stream: &str, field: &str) -> Vec<String> {
        self.entries(stream)
            .await
            .into_iter()
            .filter_map(|entry| {
                entry
                    .fields
                    .into_iter()
                    .find(|(f, _)| f == field)
                    .map(|(_, v)| v)
            })
            .collect()
    }
}

fn wrong_type(command: &'static str, key: &str, found: &Entry) -> StreamError {
    StreamError::command(
        command,
        format!(
            "WRONGTYPE key '{}' holds a {}",
            key,
            found.type_name()
        ),
    )
}

#[async_trait]
impl StreamStore for InMemoryStreamStore {
    async fn key_type(&self, key: &str) -> Result<String, StreamError> {
        Ok(self
            .keys
            .lock()
            .await
            .get(key)
            .map(|e| e.type_name())
            .unwrap_or(MISSING_TYPE)
            .to_string())
    }

    async fn append(&self, stream: &str, fields: &[(&str, &str)]) -> Result<String, StreamError> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(StreamError::Connection("injected append failure".to_string()));
        }

        let mut keys = self.keys.lock().await;
        let entry = keys
            .entry(stream.to_string())
            .or_insert_with(|| Entry::Stream(Vec::new()));
        let Entry::Stream(entries) = entry else {
            return Err(wrong_type("XADD", stream, entry));
        };

        let id = format!("{}-0", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        entries.push(StreamEntry {
            id: id.clone(),
            fields: fields
                .iter()
                .map(|(f, v)| (f.to_string(), v.to_string()))
                .collect(),
        });
        Ok(id)
    }

    async fn hash_set_if_absent(
        &self,
        key: &str,
        field: &str,
        value: &str,
    ) -> Result<bool, StreamError> {
        let mut keys = self.keys.lock().await;
        let entry = keys
            .entry(key.to_string())
            .or_insert_with(|| Entry::Hash(HashMap::new()));
        let Entry::Hash(hash) = entry else {
            return Err(wrong_type("HSETNX", key, entry));
        };

        if hash.contains_key(field) {
            return Ok(false);
        }
        hash.insert(field.to_string(), value.to_string());
        Ok(true)
    }

    async fn sorted_set_add(
        &self,
        key: &str,
        member: &str,
        score: f64,
    ) -> Result<bool, StreamError> {
        let mut keys = self.keys.lock().await;
        let entry = keys
            .entry(key.to_string())
            .or_insert_with(|| Entry::SortedSet(HashMap::new()));
        let Entry::SortedSet(set) = entry else {
            return Err(wrong_type("ZADD", key, entry));
        };

        if set.contains_key(member) {
            return Ok(false);
        }
        set.insert(member.to_string(), score);
        Ok(true)
    }
}
