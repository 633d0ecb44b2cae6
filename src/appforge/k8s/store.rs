/*
 * Copyright (C) 2024 The Appforge Authors
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 * http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use super::pod::LabelSelector;
use super::Resource;
use crate::appforge::util::BoxError;
use std::collections::HashMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

#[derive(Debug)]
pub enum StoreError {
    AlreadyExists { kind: &'static str, name: String },
    NotFound { kind: &'static str, name: String },
    Conflict { kind: &'static str, name: String },
    Invalid(String),
    Persistence(BoxError),
}

impl StoreError {
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists { .. })
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::AlreadyExists { kind, name } => {
                write!(f, "{kind} '{name}' already exists")
            }
            StoreError::NotFound { kind, name } => write!(f, "{kind} '{name}' not found"),
            StoreError::Conflict { kind, name } => write!(
                f,
                "{kind} '{name}' was modified concurrently; resourceVersion is stale"
            ),
            StoreError::Invalid(message) => f.write_str(message),
            StoreError::Persistence(err) => write!(f, "object store error: {err}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            StoreError::Persistence(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

/// Versioned object store provided by the surrounding runtime.
///
/// `create` must report a name collision as [`StoreError::AlreadyExists`] and
/// `update` must reject a stale `resourceVersion` with
/// [`StoreError::Conflict`].
pub trait ObjectStore<T>: Send + Sync {
    fn get(&self, namespace: Option<&str>, name: &str) -> Result<Option<T>, StoreError>;

    fn list(&self, namespace: Option<&str>, selector: &LabelSelector)
        -> Result<Vec<T>, StoreError>;

    fn create(&self, object: T) -> Result<T, StoreError>;

    fn update(&self, object: T) -> Result<T, StoreError>;
}

pub fn normalize_namespace(namespace: Option<&str>) -> String {
    match namespace {
        Some(ns) if !ns.trim().is_empty() => ns.trim().to_string(),
        _ => "default".to_string(),
    }
}

fn object_key(namespace: Option<&str>, name: &str) -> String {
    format!("{}/{}", normalize_namespace(namespace), name)
}

/// Thread-safe in-process store, used by tests and single-node embeddings.
pub struct InMemoryObjectStore<T> {
    objects: RwLock<HashMap<String, T>>,
    resource_counter: AtomicU64,
    writes: AtomicU64,
    _kind: PhantomData<fn() -> T>,
}

impl<T> Default for InMemoryObjectStore<T> {
    fn default() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
            resource_counter: AtomicU64::new(1),
            writes: AtomicU64::new(0),
            _kind: PhantomData,
        }
    }
}

impl<T> InMemoryObjectStore<T>
where
    T: Resource + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful create/update calls so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Replaces an object without version checks, as another controller
    /// writing status would.
    pub fn replace(&self, mut object: T) -> Result<T, StoreError> {
        let key = self.key_for(&object)?;
        let version = self.next_version();
        object.metadata_mut().resource_version = Some(version);
        self.write_guard()?.insert(key, object.clone());
        Ok(object)
    }

    fn key_for(&self, object: &T) -> Result<String, StoreError> {
        let name = object.name();
        if name.is_empty() {
            return Err(StoreError::Invalid(format!(
                "{} metadata.name is required",
                T::KIND
            )));
        }
        Ok(object_key(object.metadata().namespace.as_deref(), name))
    }

    fn next_version(&self) -> String {
        self.resource_counter
            .fetch_add(1, Ordering::SeqCst)
            .to_string()
    }

    fn read_guard(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, T>>, StoreError> {
        self.objects
            .read()
            .map_err(|_| StoreError::Persistence(format!("{} store lock poisoned", T::KIND).into()))
    }

    fn write_guard(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, T>>, StoreError> {
        self.objects
            .write()
            .map_err(|_| StoreError::Persistence(format!("{} store lock poisoned", T::KIND).into()))
    }
}

impl<T> ObjectStore<T> for InMemoryObjectStore<T>
where
    T: Resource + Clone + Send + Sync,
{
    fn get(&self, namespace: Option<&str>, name: &str) -> Result<Option<T>, StoreError> {
        Ok(self.read_guard()?.get(&object_key(namespace, name)).cloned())
    }

    fn list(
        &self,
        namespace: Option<&str>,
        selector: &LabelSelector,
    ) -> Result<Vec<T>, StoreError> {
        let prefix = format!("{}/", normalize_namespace(namespace));
        let objects = self.read_guard()?;
        let mut items: Vec<T> = objects
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .filter(|(_, object)| selector.matches(&object.metadata().labels))
            .map(|(_, object)| object.clone())
            .collect();
        items.sort_by(|a, b| a.name().cmp(b.name()));
        Ok(items)
    }

    fn create(&self, mut object: T) -> Result<T, StoreError> {
        let key = self.key_for(&object)?;
        let mut objects = self.write_guard()?;
        if objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                kind: T::KIND,
                name: object.name().to_string(),
            });
        }
        object.metadata_mut().resource_version = Some(self.next_version());
        objects.insert(key, object.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(object)
    }

    fn update(&self, mut object: T) -> Result<T, StoreError> {
        let key = self.key_for(&object)?;
        let mut objects = self.write_guard()?;
        let Some(current) = objects.get(&key) else {
            return Err(StoreError::NotFound {
                kind: T::KIND,
                name: object.name().to_string(),
            });
        };
        if let Some(expected) = object.metadata().resource_version.as_deref() {
            if current.metadata().resource_version.as_deref() != Some(expected) {
                return Err(StoreError::Conflict {
                    kind: T::KIND,
                    name: object.name().to_string(),
                });
            }
        }
        object.metadata_mut().resource_version = Some(self.next_version());
        objects.insert(key, object.clone());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(object)
    }
}
