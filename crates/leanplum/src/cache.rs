use std::path::Path;
use std::sync::Mutex;

use serde_json::Value;
use tracing::debug;

/// Last successful start response, kept for offline bootstrap.
///
/// Missing or corrupt cache files degrade to an empty cache; the cache is
/// never an error surface for the caller.
#[derive(Default)]
pub struct StartCache {
    inner: Mutex<Option<Value>>,
}

impl StartCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn store(&self, body: Value) {
        *self.inner.lock().unwrap() = Some(body);
    }

    pub fn get(&self) -> Option<Value> {
        self.inner.lock().unwrap().clone()
    }

    /// Write the cached response to disk, best-effort.
    pub fn persist_to(&self, path: &Path) {
        let Some(body) = self.get() else { return };
        match serde_json::to_string(&body) {
            Ok(text) => {
                if let Err(err) = std::fs::write(path, text) {
                    debug!(error = %err, "failed to persist start cache");
                }
            }
            Err(err) => debug!(error = %err, "failed to serialize start cache"),
        }
    }

    /// Load a previously persisted response, ignoring unreadable files.
    pub fn load(path: &Path) -> Self {
        let inner = std::fs::read_to_string(path)
            .ok()
            .and_then(|text| serde_json::from_str(&text).ok());
        Self {
            inner: Mutex::new(inner),
        }
    }
}
