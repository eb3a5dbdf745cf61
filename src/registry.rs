//! The handler registry: a keyed mapping from handler name to handler
//! function, consulted by worker threads and mutated mainly before serving
//! begins (§4.5).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::protocol::{Payload, RpcError, MAX_NAME_LEN};

/// A caller-supplied function mapping a payload to an optional payload.
///
/// Returning `None` tells the dispatcher to reply with `ReplyFailure`.
pub type Handler = Arc<dyn Fn(Payload) -> Option<Payload> + Send + Sync>;

/// Keyed storage for registered handlers.
///
/// Cloning a `Registry` is cheap and shares the same underlying map; this is
/// how the listener thread hands the same registry to every worker thread it
/// spawns. Reads (`lookup`) take a shared lock and never block each other;
/// `register`/`unregister` take an exclusive lock, which the specification
/// only requires be safe, not contention-free, since registration is
/// expected to finish before `serve_all` starts handling connections.
#[derive(Clone, Default)]
pub struct Registry {
    entries: Arc<RwLock<HashMap<String, Handler>>>,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .entries
            .read()
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        f.debug_tuple("Registry").field(&names).finish()
    }
}

impl Registry {
    /// An empty registry.
    pub fn new() -> Self {
        Registry::default()
    }

    /// Registers `handler` under `name`, replacing any existing entry for
    /// that name.
    pub fn register<F>(&self, name: &str, handler: F) -> Result<(), RpcError>
    where
        F: Fn(Payload) -> Option<Payload> + Send + Sync + 'static,
    {
        validate_name(name)?;

        let mut entries = self.entries.write().expect("registry lock poisoned");
        entries.insert(name.to_string(), Arc::new(handler));
        Ok(())
    }

    /// Removes any entry registered under `name`.
    pub fn unregister(&self, name: &str) {
        let mut entries = self.entries.write().expect("registry lock poisoned");
        entries.remove(name);
    }

    /// Looks up the handler registered under `name`, if any.
    pub fn lookup(&self, name: &str) -> Option<Handler> {
        let entries = self.entries.read().expect("registry lock poisoned");
        entries.get(name).cloned()
    }

    /// Whether a handler is registered under `name`.
    pub fn contains(&self, name: &str) -> bool {
        let entries = self.entries.read().expect("registry lock poisoned");
        entries.contains_key(name)
    }
}

fn validate_name(name: &str) -> Result<(), RpcError> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        Err(RpcError::InvalidHandlerName(name.len()))
    } else {
        Ok(())
    }
}
