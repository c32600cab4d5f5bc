// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! The `require` function handed to executing modules
//!
//! A [`Require`] is the import operation pre-bound to a requesting module
//! and a cache scope. Relative identifiers resolve against the bound
//! module's location, and modules it loads inherit its scope.

use crate::error::Result;
use crate::module_system::cache::ModuleCache;
use crate::module_system::loader::ModuleLoader;
use crate::module_system::module::Module;
use crate::module_system::registry::Handler;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;

/// Import function bound to a requesting context
#[derive(Clone)]
pub struct Require {
    loader: ModuleLoader,
    module: Option<Arc<Module>>,
    scope: ModuleCache,
}

impl Require {
    pub(crate) fn top_level(loader: ModuleLoader, scope: ModuleCache) -> Self {
        Self {
            loader,
            module: None,
            scope,
        }
    }

    pub(crate) fn bound(loader: ModuleLoader, module: Arc<Module>, scope: ModuleCache) -> Self {
        Self {
            loader,
            module: Some(module),
            scope,
        }
    }

    /// Import `id` synchronously and return its interface.
    ///
    /// A module that is still loading (a cycle) is returned as it is at
    /// this moment.
    pub fn import(&self, id: &str) -> Result<Value> {
        self.import_module(id).map(|module| module.exports())
    }

    /// Import `id` synchronously and return the module record
    pub fn import_module(&self, id: &str) -> Result<Arc<Module>> {
        self.loader.import_sync(id, self.module.as_ref(), &self.scope)
    }

    /// Import `id` in the background; `callback` receives the interface once
    /// the module has settled, or the error that stopped it.
    ///
    /// The bound module does not settle before `callback` has run.
    pub fn import_async(
        &self,
        id: &str,
        callback: impl FnOnce(Result<Value>) + Send + 'static,
    ) -> Result<()> {
        self.loader
            .spawn_import(id, self.module.clone(), self.scope.clone(), callback)
    }

    /// Canonical location `id` resolves to, without loading it
    pub fn resolve(&self, id: &str) -> Result<String> {
        self.loader.resolve_from(id, self.module.as_ref())
    }

    /// Same binding over a fresh overlay of this scope
    pub fn sandboxed(&self) -> Require {
        Self {
            loader: self.loader.clone(),
            module: self.module.clone(),
            scope: self.scope.overlay(),
        }
    }

    /// Current search roots
    pub fn paths(&self) -> Vec<PathBuf> {
        self.loader.paths()
    }

    /// See [`ModuleLoader::register_extension`]
    pub fn register_extension(&self, ext: &str, handler: Handler) -> Result<()> {
        self.loader.register_extension(ext, handler)
    }

    /// See [`ModuleLoader::register_scheme`]
    pub fn register_scheme(&self, scheme: &str, handler: Handler) -> Result<()> {
        self.loader.register_scheme(scheme, handler)
    }

    /// The program's main module
    pub fn main(&self) -> Option<Arc<Module>> {
        self.loader.main()
    }

    /// Module this function is bound to; `None` at top level
    pub fn module(&self) -> Option<&Arc<Module>> {
        self.module.as_ref()
    }

    /// Cache scope imports go through
    pub fn scope(&self) -> &ModuleCache {
        &self.scope
    }

    /// Owning loader
    pub fn loader(&self) -> &ModuleLoader {
        &self.loader
    }
}

impl std::fmt::Debug for Require {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Require")
            .field("module", &self.module.as_ref().map(|m| m.location().to_string()))
            .field("scope", &self.scope)
            .finish()
    }
}
