// src/context.rs
use std::collections::HashMap;

use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Per-message state bag threaded through a path's step chain.
///
/// One instance is created when a dispatch starts, owned exclusively by that
/// dispatch, and dropped when it ends; no synchronization is needed inside.
/// The correlation id is fixed at creation, the extensions map is free for
/// steps to read and write.
#[derive(Debug)]
pub struct Context {
    correlation_id: String,
    extensions: HashMap<String, String>,
    cancel: CancellationToken,
}

impl Context {
    /// Build a context with the given correlation id, or a generated one
    /// when the transport supplied none.
    pub fn new(correlation_id: Option<String>, cancel: CancellationToken) -> Self {
        Self {
            correlation_id: correlation_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            extensions: HashMap::new(),
            cancel,
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn get(&self, name: &str) -> Option<&String> {
        self.extensions.get(name)
    }

    pub fn set(&mut self, name: &str, value: &str) {
        self.extensions.insert(name.to_string(), value.to_string());
    }

    pub fn remove(&mut self, name: &str) {
        self.extensions.remove(name);
    }

    pub fn extensions(&self) -> &HashMap<String, String> {
        &self.extensions
    }

    /// True once the host has asked in-flight dispatches to wind down.
    /// Checked between steps by the path walk; long-running capabilities
    /// may also poll it themselves.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
