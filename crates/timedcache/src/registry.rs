//! A named registry of factories.
//!
//! Instead of reaching for process-wide singletons, a [`Registry`] is created once at startup and
//! handed to whoever needs to look things up by name.

use std::collections::BTreeMap;
use std::fmt;

use parking_lot::RwLock;

/// Maps names to cheaply clonable values, typically factories behind an `Arc`.
pub struct Registry<T> {
    entries: RwLock<BTreeMap<String, T>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: Default::default(),
        }
    }
}

impl<T> fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("names", &self.entries.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl<T: Clone> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `factory` under `name`, returning whatever was registered there before.
    pub fn register(&self, name: impl Into<String>, factory: T) -> Option<T> {
        let name = name.into();
        tracing::debug!(%name, "Registering factory");
        self.entries.write().insert(name, factory)
    }

    pub fn get(&self, name: &str) -> Option<T> {
        self.entries.read().get(name).cloned()
    }

    /// All registered names in sorted order.
    pub fn names(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }
}
