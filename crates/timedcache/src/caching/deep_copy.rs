use std::fmt;
use std::sync::Arc;

/// Produces independent copies of cached values.
///
/// Cached values are shared between all readers as `Arc<V>`. A caller that wants to modify
/// what it read asks for a copy instead, so that nobody else observes the modification.
///
/// For plain owned data (vectors, maps, nested structs) `Clone` already is a structural deep
/// copy, which is what [`DeepCopier::default`] uses. Values that hold shared handles, like an
/// `Arc<Mutex<_>>`, need a custom copier built with [`DeepCopier::new`].
pub struct DeepCopier<V> {
    copy: Arc<dyn Fn(&V) -> V + Send + Sync>,
}

impl<V> DeepCopier<V> {
    pub fn new<F>(copy: F) -> Self
    where
        F: Fn(&V) -> V + Send + Sync + 'static,
    {
        Self {
            copy: Arc::new(copy),
        }
    }

    pub fn copy(&self, value: &V) -> V {
        (self.copy)(value)
    }
}

impl<V: Clone + 'static> Default for DeepCopier<V> {
    fn default() -> Self {
        Self::new(V::clone)
    }
}

impl<V> Clone for DeepCopier<V> {
    fn clone(&self) -> Self {
        Self {
            copy: Arc::clone(&self.copy),
        }
    }
}

impl<V> fmt::Debug for DeepCopier<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeepCopier").finish_non_exhaustive()
    }
}
