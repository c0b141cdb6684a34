use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::tracker::TaskRecord;

/// Pluggable durable store for the task table.
///
/// The whole table is rewritten on every persist; the format must round-trip
/// `TaskRecord` exactly, including nested per-step timing.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn persist(&self, tasks: &HashMap<String, TaskRecord>) -> Result<()>;
    async fn load(&self) -> Result<HashMap<String, TaskRecord>>;
}

/// JSON-file backed store. The file is rewritten in full on every persist.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

#[async_trait]
impl TaskStore for JsonFileStore {
    async fn persist(&self, tasks: &HashMap<String, TaskRecord>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(tasks)?;
        tokio::fs::write(&self.path, json).await?;
        debug!("Persisted {} tasks to {}", tasks.len(), self.path.display());
        Ok(())
    }

    async fn load(&self) -> Result<HashMap<String, TaskRecord>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(tasks) => Ok(tasks),
                Err(e) => {
                    warn!("Failed to parse task file {}: {}", self.path.display(), e);
                    Ok(HashMap::new())
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-memory store for tests. Counts persists so durability policies can be
/// asserted against.
#[derive(Default)]
pub struct MemoryStore {
    saved: Mutex<HashMap<String, TaskRecord>>,
    persist_count: Mutex<usize>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn persist_count(&self) -> usize {
        *self.persist_count.lock().unwrap()
    }

    pub fn saved_snapshot(&self) -> HashMap<String, TaskRecord> {
        self.saved.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn persist(&self, tasks: &HashMap<String, TaskRecord>) -> Result<()> {
        *self.saved.lock().unwrap() = tasks.clone();
        *self.persist_count.lock().unwrap() += 1;
        Ok(())
    }

    async fn load(&self) -> Result<HashMap<String, TaskRecord>> {
        Ok(self.saved.lock().unwrap().clone())
    }
}
