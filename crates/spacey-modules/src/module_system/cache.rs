// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module cache scopes
//!
//! A [`ModuleCache`] maps canonical locations to module records. Scopes can
//! be layered: an overlay created with [`ModuleCache::overlay`] reads
//! through to its parent but only ever writes into its own table, which is
//! how sandboxed subtrees substitute modules without touching the shared
//! cache.

use crate::module_system::coordinator::Settlement;
use crate::module_system::module::{Module, ModuleState};
use crate::module_system::resolver::Location;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tracing::debug;

/// Outcome of [`ModuleCache::lookup_or_reserve`]
#[derive(Debug, Clone)]
pub enum Lookup {
    /// A record already exists (possibly still in flight)
    Existing(Arc<Module>),
    /// A fresh record was reserved; the caller must load it
    Reserved(Arc<Module>),
}

struct CacheLayer {
    table: DashMap<String, Arc<Module>>,
    parent: Option<ModuleCache>,
}

/// Thread-safe, optionally layered module cache
#[derive(Clone)]
pub struct ModuleCache {
    layer: Arc<CacheLayer>,
}

/// Non-owning reference to a [`ModuleCache`], held by module records
#[derive(Clone)]
pub struct WeakModuleCache {
    layer: Weak<CacheLayer>,
}

impl WeakModuleCache {
    /// Upgrade to a strong handle if the scope is still alive
    pub fn upgrade(&self) -> Option<ModuleCache> {
        self.layer.upgrade().map(|layer| ModuleCache { layer })
    }
}

impl ModuleCache {
    /// Create a new empty root scope
    pub fn new() -> Self {
        Self {
            layer: Arc::new(CacheLayer {
                table: DashMap::new(),
                parent: None,
            }),
        }
    }

    /// Create an overlay scope that falls back to this one for reads
    pub fn overlay(&self) -> Self {
        Self {
            layer: Arc::new(CacheLayer {
                table: DashMap::new(),
                parent: Some(self.clone()),
            }),
        }
    }

    /// Whether this scope is an overlay on another one
    pub fn is_overlay(&self) -> bool {
        self.layer.parent.is_some()
    }

    /// Parent scope of an overlay
    pub fn parent(&self) -> Option<&ModuleCache> {
        self.layer.parent.as_ref()
    }

    /// Whether two handles refer to the same scope
    pub fn same_scope(&self, other: &ModuleCache) -> bool {
        Arc::ptr_eq(&self.layer, &other.layer)
    }

    pub(crate) fn downgrade(&self) -> WeakModuleCache {
        WeakModuleCache {
            layer: Arc::downgrade(&self.layer),
        }
    }

    /// Get a module by location, reading through parent scopes
    pub fn get(&self, location: &str) -> Option<Arc<Module>> {
        if let Some(entry) = self.layer.table.get(location) {
            return Some(Arc::clone(entry.value()));
        }
        self.layer.parent.as_ref().and_then(|p| p.get(location))
    }

    /// Check if a module is visible from this scope
    pub fn has(&self, location: &str) -> bool {
        self.get(location).is_some()
    }

    /// Return the record for `location`, or reserve a new one built by
    /// `make`.
    ///
    /// Reservation happens before any load starts, so a second request for
    /// the same identity always sees the in-flight record.
    pub fn lookup_or_reserve(
        &self,
        location: &str,
        make: impl FnOnce() -> Module,
    ) -> Lookup {
        // Own entries shadow the parent's
        if let Some(entry) = self.layer.table.get(location) {
            return Lookup::Existing(Arc::clone(entry.value()));
        }
        if let Some(existing) = self.layer.parent.as_ref().and_then(|p| p.get(location)) {
            return Lookup::Existing(existing);
        }

        match self.layer.table.entry(location.to_string()) {
            Entry::Occupied(entry) => Lookup::Existing(Arc::clone(entry.get())),
            Entry::Vacant(entry) => {
                let module = Arc::new(make());
                entry.insert(Arc::clone(&module));
                debug!("Reserved {}", location);
                Lookup::Reserved(module)
            }
        }
    }

    /// Insert a record into this scope only
    pub fn set(&self, module: Arc<Module>) {
        self.layer.table.insert(module.location().to_string(), module);
    }

    /// Seed a settled module with `exports` into this scope.
    ///
    /// On an overlay this overrides the shared entry for the sandboxed
    /// subtree only.
    pub fn provide(&self, location: &Location, exports: Value) -> Arc<Module> {
        let module = Module::new(location, None, self);
        // A fresh record is never locked, so this cannot fail
        let _ = module.set_exports(exports);
        module.advance(ModuleState::Settled);
        *module.settlement.lock() = Settlement::settled();
        let module = Arc::new(module);
        self.set(Arc::clone(&module));
        module
    }

    /// Remove `module` from this scope if it is still the cached record
    pub fn evict(&self, module: &Arc<Module>) -> bool {
        let removed = self
            .layer
            .table
            .remove_if(module.location(), |_, cached| Arc::ptr_eq(cached, module))
            .is_some();
        if removed {
            debug!("Evicted {}", module.location());
        }
        removed
    }

    /// Remove a module from this scope by location
    pub fn delete(&self, location: &str) -> Option<Arc<Module>> {
        self.layer.table.remove(location).map(|(_, v)| v)
    }

    /// Clear this scope's own table
    pub fn clear(&self) {
        self.layer.table.clear();
    }

    /// Locations cached in this scope's own table
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .layer
            .table
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Number of records in this scope's own table
    pub fn len(&self) -> usize {
        self.layer.table.len()
    }

    /// Check if this scope's own table is empty
    pub fn is_empty(&self) -> bool {
        self.layer.table.is_empty()
    }
}

impl Default for ModuleCache {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ModuleCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleCache")
            .field("len", &self.len())
            .field("overlay", &self.is_overlay())
            .finish()
    }
}
