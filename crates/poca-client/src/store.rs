//! Local mirrors and their dependency sets.
//!
//! One `MirrorStore` belongs to one client instance, so two clients mirroring the same
//! key never share dependents. Locks are only held for map access; effects always run
//! after the guard is released so they can read mirrors themselves.

use crate::codec;
use crate::effect::{self, Effect};
use crate::{ClientId, PocaError, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::debug;

struct MirrorEntry {
    value: Value,
    dependents: Vec<Effect>,
}

/// Last-known values for every tracked key of one client.
pub struct MirrorStore {
    client: ClientId,
    entries: Mutex<HashMap<String, MirrorEntry>>,
}

impl MirrorStore {
    pub fn new(client: ClientId) -> Self {
        Self {
            client,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// (Re)initialize the mirror for `key` and reset its dependency set.
    pub fn init(&self, key: &str, value: Value) {
        let mut entries = self.entries.lock().expect("mirror lock poisoned");
        entries.insert(
            key.to_string(),
            MirrorEntry {
                value,
                dependents: Vec::new(),
            },
        );
    }

    /// Current value for `key` without recording a dependency.
    pub fn snapshot(&self, key: &str) -> Option<Value> {
        let entries = self.entries.lock().expect("mirror lock poisoned");
        entries.get(key).map(|entry| entry.value.clone())
    }

    /// Register the current effect, if any, as a dependent of `key`.
    ///
    /// Every call appends; repeated reads in one recording window produce repeated
    /// registrations.
    pub fn track(&self, key: &str) {
        let Some(current) = effect::current() else {
            return;
        };
        let mut entries = self.entries.lock().expect("mirror lock poisoned");
        if let Some(entry) = entries.get_mut(key) {
            entry.dependents.push(current);
        }
    }

    /// Apply `mutate` to the mirror for `key` in place and return the encoded result.
    pub fn modify<F>(&self, key: &str, mutate: F) -> Result<String>
    where
        F: FnOnce(&mut Value) -> Result<()>,
    {
        let mut entries = self.entries.lock().expect("mirror lock poisoned");
        let entry = entries.get_mut(key).ok_or_else(|| PocaError::UnknownKey {
            key: key.to_string(),
        })?;
        mutate(&mut entry.value)?;
        codec::encode_payload(&entry.value)
    }

    /// Replace the mirror for `key` with a server-pushed payload and re-run dependents.
    ///
    /// A payload that fails to decode leaves the mirror untouched.
    pub fn apply_remote(&self, key: &str, payload: &str) -> Result<()> {
        let value: Value = codec::decode_payload(payload)?;
        {
            let mut entries = self.entries.lock().expect("mirror lock poisoned");
            match entries.get_mut(key) {
                Some(entry) => entry.value = value,
                None => {
                    debug!("{}: mirroring {} on first server push", self.client, key);
                    entries.insert(
                        key.to_string(),
                        MirrorEntry {
                            value,
                            dependents: Vec::new(),
                        },
                    );
                }
            }
        }
        self.notify(key);
        Ok(())
    }

    /// Run every dependent of `key` in registration order.
    pub fn notify(&self, key: &str) {
        let dependents = self.dependents(key);
        if !dependents.is_empty() {
            debug!(
                "{}: re-running {} effect(s) for {}",
                self.client,
                dependents.len(),
                key
            );
        }
        effect::run_all(&dependents);
    }

    pub fn dependents(&self, key: &str) -> Vec<Effect> {
        let entries = self.entries.lock().expect("mirror lock poisoned");
        entries
            .get(key)
            .map(|entry| entry.dependents.clone())
            .unwrap_or_default()
    }
}
