// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module records
//!
//! One [`Module`] exists per canonical location within a cache scope. The
//! record owns the public interface slot, the lifecycle state and the
//! bookkeeping the dependency coordinator needs to decide when the module
//! and its subgraph have settled.

use crate::error::{ModuleError, Result};
use crate::module_system::cache::{ModuleCache, WeakModuleCache};
use crate::module_system::coordinator::Settlement;
use crate::module_system::resolver::Location;
use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{trace, warn};

/// Lifecycle of a module record. States only ever move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleState {
    /// Reserved in the cache, no content yet
    Pending,
    /// Content fetch in flight
    Fetching,
    /// Compile step executing
    Compiling,
    /// Compile step returned, some children still unsettled
    AwaitingChildren,
    /// Module and its reachable subgraph have completed
    Settled,
    /// Fetch or compile raised an error
    Failed,
}

impl ModuleState {
    fn rank(self) -> u8 {
        match self {
            ModuleState::Pending => 0,
            ModuleState::Fetching => 1,
            ModuleState::Compiling => 2,
            ModuleState::AwaitingChildren => 3,
            ModuleState::Settled | ModuleState::Failed => 4,
        }
    }

    /// Whether no further transitions are possible
    pub fn is_terminal(self) -> bool {
        matches!(self, ModuleState::Settled | ModuleState::Failed)
    }

    /// Whether the module's own compile step has finished
    pub fn is_loaded(self) -> bool {
        matches!(self, ModuleState::AwaitingChildren | ModuleState::Settled)
    }

    /// Whether `next` is a legal successor of this state
    pub fn can_advance_to(self, next: ModuleState) -> bool {
        match next {
            ModuleState::Failed => !self.is_terminal(),
            _ => next.rank() > self.rank(),
        }
    }
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModuleState::Pending => "pending",
            ModuleState::Fetching => "fetching",
            ModuleState::Compiling => "compiling",
            ModuleState::AwaitingChildren => "awaiting-children",
            ModuleState::Settled => "settled",
            ModuleState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A loaded (or loading) module
pub struct Module {
    id: String,
    location: String,
    scheme: Option<String>,
    extension: String,
    exports: RwLock<Value>,
    locked: AtomicBool,
    state: Mutex<ModuleState>,
    parent: Option<Weak<Module>>,
    children: Mutex<Vec<Arc<Module>>>,
    pending: Mutex<HashMap<String, usize>>,
    scope: WeakModuleCache,
    pub(crate) settlement: Mutex<Settlement>,
}

impl Module {
    /// Create a new record for `location`, owned by `scope`.
    ///
    /// The record starts `Pending` with an empty object as its interface.
    pub fn new(location: &Location, parent: Option<&Arc<Module>>, scope: &ModuleCache) -> Self {
        let uri = location.uri().to_string();
        let extension = extension_of(&uri);
        let id = match uri.strip_suffix(extension.as_str()) {
            Some(stem) if !stem.is_empty() => stem.to_string(),
            _ => uri.clone(),
        };

        Self {
            id,
            location: uri,
            scheme: location.scheme().map(str::to_string),
            extension,
            exports: RwLock::new(Value::Object(Map::new())),
            locked: AtomicBool::new(false),
            state: Mutex::new(ModuleState::Pending),
            parent: parent.map(Arc::downgrade),
            children: Mutex::new(Vec::new()),
            pending: Mutex::new(HashMap::new()),
            scope: scope.downgrade(),
            settlement: Mutex::new(Settlement::default()),
        }
    }

    /// Stable name used for re-lookup (location without its extension)
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Canonical location; the cache key
    pub fn location(&self) -> &str {
        &self.location
    }

    /// Alias of [`Module::location`]
    pub fn filename(&self) -> &str {
        &self.location
    }

    /// Directory containing the module (`.` when there is none)
    pub fn dirname(&self) -> &str {
        match self.location.rfind('/') {
            Some(0) => "/",
            Some(idx) => &self.location[..idx],
            None => ".",
        }
    }

    /// Location as a filesystem path; `None` for scheme-located modules
    pub fn path(&self) -> Option<&Path> {
        match self.scheme {
            Some(_) => None,
            None => Some(Path::new(&self.location)),
        }
    }

    /// Registered scheme the location carries, if any
    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    /// Extension including the leading dot (`.js` when the location has none)
    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// Module that triggered the first load of this identity
    pub fn parent(&self) -> Option<Arc<Module>> {
        self.parent.as_ref().and_then(Weak::upgrade)
    }

    /// Modules whose first load was triggered by this one, in order
    pub fn children(&self) -> Vec<Arc<Module>> {
        self.children.lock().clone()
    }

    /// Identities being resolved as children but not yet materialized
    pub fn pending_identities(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.pending.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Cache scope this record lives in, if it is still alive
    pub fn scope(&self) -> Option<ModuleCache> {
        self.scope.upgrade()
    }

    /// Current lifecycle state
    pub fn state(&self) -> ModuleState {
        *self.state.lock()
    }

    /// Whether the compile step has returned
    pub fn is_loaded(&self) -> bool {
        self.state().is_loaded()
    }

    /// Whether another module has observed the interface
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Acquire)
    }

    /// Snapshot of the public interface
    pub fn exports(&self) -> Value {
        self.exports.read().clone()
    }

    /// Replace the public interface. Fails once the interface is locked.
    pub fn set_exports(&self, value: Value) -> Result<()> {
        let mut slot = self.exports.write();
        if self.is_locked() {
            return Err(ModuleError::LockedInterfaceWrite(self.location.clone()));
        }
        *slot = value;
        Ok(())
    }

    /// Set one member of an object interface in place.
    ///
    /// Allowed after locking: observers holding a snapshot do not see the
    /// change, later observers do.
    pub fn set_export(&self, key: impl Into<String>, value: Value) -> Result<()> {
        match &mut *self.exports.write() {
            Value::Object(map) => {
                map.insert(key.into(), value);
                Ok(())
            }
            other => Err(ModuleError::type_error(format!(
                "cannot set a property on a non-object interface ({}) of {}",
                kind_of(other),
                self.location
            ))),
        }
    }

    /// Read the interface on behalf of another module, locking it
    pub fn observe(&self) -> Value {
        let slot = self.exports.read();
        self.locked.store(true, Ordering::Release);
        slot.clone()
    }

    /// Move to `next`; illegal (backwards) transitions are ignored
    pub(crate) fn advance(&self, next: ModuleState) -> bool {
        let mut state = self.state.lock();
        if !state.can_advance_to(next) {
            warn!("Ignoring transition {} -> {} for {}", *state, next, self.location);
            return false;
        }
        trace!("{}: {} -> {}", self.location, *state, next);
        *state = next;
        true
    }

    pub(crate) fn add_child(&self, child: Arc<Module>) {
        self.children.lock().push(child);
    }

    pub(crate) fn remove_child(&self, child: &Arc<Module>) {
        self.children.lock().retain(|c| !Arc::ptr_eq(c, child));
    }

    pub(crate) fn begin_pending(&self, id: &str) {
        *self.pending.lock().entry(id.to_string()).or_insert(0) += 1;
    }

    pub(crate) fn end_pending(&self, id: &str) {
        let mut pending = self.pending.lock();
        if let Some(count) = pending.get_mut(id) {
            *count -= 1;
            if *count == 0 {
                pending.remove(id);
            }
        }
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("id", &self.id)
            .field("location", &self.location)
            .field("scheme", &self.scheme)
            .field("extension", &self.extension)
            .field("state", &self.state())
            .field("locked", &self.is_locked())
            .field("children", &self.children.lock().len())
            .finish()
    }
}

/// Handle on a module's interface slot, handed to compiled units and
/// native binders.
#[derive(Clone, Copy)]
pub struct InterfaceSlot<'a> {
    module: &'a Module,
}

impl<'a> InterfaceSlot<'a> {
    /// Slot of `module`
    pub fn new(module: &'a Module) -> Self {
        Self { module }
    }

    /// Current value
    pub fn get(&self) -> Value {
        self.module.exports()
    }

    /// Replace the value (see [`Module::set_exports`])
    pub fn set(&self, value: Value) -> Result<()> {
        self.module.set_exports(value)
    }

    /// Set one member (see [`Module::set_export`])
    pub fn insert(&self, key: impl Into<String>, value: Value) -> Result<()> {
        self.module.set_export(key, value)
    }

    /// Owning module
    pub fn module(&self) -> &'a Module {
        self.module
    }
}

/// Extension of the last path segment, defaulting to `.js`
pub(crate) fn extension_of(location: &str) -> String {
    let name = location.rsplit('/').next().unwrap_or(location);
    match name.rfind('.') {
        Some(idx) if idx > 0 => name[idx..].to_string(),
        _ => ".js".to_string(),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
