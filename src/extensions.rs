//! Typed per-request state.
//!
//! The pipeline can attach opt-out flags and overrides to a request without
//! the cache having to know about the host application's types. Values are
//! keyed by `TypeId` and shared behind `Arc`, so cloning a request is cheap.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

/// Type-keyed extensions container.
#[derive(Clone, Default)]
pub struct Extensions {
    map: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Extensions {
    /// Create an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a typed value, replacing any existing value of the same type.
    pub fn insert<T: Send + Sync + 'static>(&mut self, value: T) {
        self.map.insert(TypeId::of::<T>(), Arc::new(value));
    }

    /// Get a reference to a typed value, if present.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|arc| arc.downcast_ref::<T>())
    }

    /// Remove a typed value.
    pub fn remove<T: Send + Sync + 'static>(&mut self) {
        self.map.remove(&TypeId::of::<T>());
    }

    /// True when no extensions are attached.
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl std::fmt::Debug for Extensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.map.len())
            .finish()
    }
}

/// Marker that makes the cache step aside for one request.
///
/// The request is forwarded untouched, no lookup or store happens, and the
/// trace records only `pass`.
#[derive(Debug, Clone, Copy)]
pub struct ForcePass(pub bool);
