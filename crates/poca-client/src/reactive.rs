//! Interception wrapper around one mirrored value.
//!
//! Every read through a [`Reactive`] registers the current effect (if any) as a
//! dependent of its key. Every write mutates the mirror, pushes the whole mirror
//! upstream as a Set, and then synchronously re-runs the key's dependents in
//! registration order. The server's acknowledgement is never awaited.

use crate::connection::Connection;
use crate::store::MirrorStore;
use crate::{PocaError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Handle to a mirrored value of shape `T`.
pub struct Reactive<T> {
    key: String,
    store: Arc<MirrorStore>,
    connection: Arc<Connection>,
    _shape: PhantomData<fn() -> T>,
}

impl<T> Clone for Reactive<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            store: self.store.clone(),
            connection: self.connection.clone(),
            _shape: PhantomData,
        }
    }
}

impl<T> fmt::Debug for Reactive<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reactive")
            .field("key", &self.key)
            .field("value", &self.store.snapshot(&self.key))
            .finish()
    }
}

impl<T> Reactive<T>
where
    T: Serialize + DeserializeOwned,
{
    pub(crate) fn new(key: &str, store: Arc<MirrorStore>, connection: Arc<Connection>) -> Self {
        Self {
            key: key.to_string(),
            store,
            connection,
            _shape: PhantomData,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The whole mirrored value, decoded as `T`.
    pub fn get(&self) -> Result<T> {
        Ok(serde_json::from_value(self.value()?)?)
    }

    /// The whole mirrored value as JSON.
    pub fn value(&self) -> Result<Value> {
        self.store.track(&self.key);
        self.store
            .snapshot(&self.key)
            .ok_or_else(|| PocaError::UnknownKey {
                key: self.key.clone(),
            })
    }

    /// One field of the mirrored object, or `None` if absent.
    pub fn field(&self, name: &str) -> Option<Value> {
        self.store.track(&self.key);
        self.store
            .snapshot(&self.key)
            .and_then(|value| value.get(name).cloned())
    }

    /// One field of the mirrored object, decoded as `V`.
    pub fn field_as<V: DeserializeOwned>(&self, name: &str) -> Result<Option<V>> {
        self.field(name)
            .map(serde_json::from_value)
            .transpose()
            .map_err(PocaError::from)
    }

    /// Replace the whole value.
    pub fn set(&self, value: T) -> Result<()> {
        let value = serde_json::to_value(&value)?;
        self.commit(move |mirror| {
            *mirror = value;
            Ok(())
        })
    }

    /// Set one field of the mirrored object.
    pub fn set_field(&self, name: &str, value: impl Serialize) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.commit(|mirror| match mirror.as_object_mut() {
            Some(object) => {
                object.insert(name.to_string(), value);
                Ok(())
            }
            None => Err(PocaError::NotAnObject {
                key: self.key.clone(),
                field: name.to_string(),
            }),
        })
    }

    /// Mutate the value through its typed form.
    ///
    /// `f` runs without any lock held, so it may read other reactive values.
    pub fn update(&self, f: impl FnOnce(&mut T)) -> Result<()> {
        let current = self
            .store
            .snapshot(&self.key)
            .ok_or_else(|| PocaError::UnknownKey {
                key: self.key.clone(),
            })?;
        let mut typed: T = serde_json::from_value(current)?;
        f(&mut typed);
        self.set(typed)
    }

    fn commit(&self, mutate: impl FnOnce(&mut Value) -> Result<()>) -> Result<()> {
        let payload = self.store.modify(&self.key, mutate)?;
        self.connection.set(&self.key, payload);
        self.store.notify(&self.key);
        Ok(())
    }
}
