// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module loader - resolves, caches, loads and compiles modules
//!
//! [`ModuleLoader`] drives one import pipeline:
//!
//! 1. builtin lookup, scheme delegation or candidate search
//! 2. handler selection (fails before anything is cached)
//! 3. cache reservation, so a second request never starts a second load
//! 4. load, compile and settlement through the dependency coordinator
//!
//! The pipeline is a single `async fn` generic over a suspension strategy.
//! [`ModuleLoader::import`] drives it to completion synchronously,
//! [`ModuleLoader::import_async`] awaits it.

use crate::config::LoaderConfig;
use crate::error::{ModuleError, Result};
use crate::host::{ContentSource, Host, NativeBinder};
use crate::module_system::builtins::{Builtin, builtin_location, builtin_name};
use crate::module_system::cache::{Lookup, ModuleCache};
use crate::module_system::compiler::{JsonCompiler, ScriptCompiler};
use crate::module_system::coordinator::{DependencyCoordinator, Link};
use crate::module_system::module::{InterfaceSlot, Module, ModuleState, extension_of};
use crate::module_system::registry::{
    DEFAULT_EXTENSION, ExtensionRegistry, Handler, LoadHandler, Payload, Pipeline,
};
use crate::module_system::require::Require;
use crate::module_system::resolver::{
    BUILTIN_PREFIX, IdentifierKind, Location, ModuleResolver, classify, normalize,
    normalize_identifier, scheme_prefix,
};
use crate::module_system::suspend::{Deferred, Immediate, Suspension};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::{ReentrantMutex, RwLock};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, instrument, trace};

/// Scheme of builtin module locations
const BUILTIN_SCHEME: &str = "node";

struct Inner {
    host: Host,
    base_dir: PathBuf,
    resolver: RwLock<ModuleResolver>,
    registry: RwLock<ExtensionRegistry>,
    builtins: DashMap<String, Builtin>,
    cache: ModuleCache,
    coordinator: DependencyCoordinator,
    /// Held while a compile step or an import callback runs
    exec: ReentrantMutex<()>,
    main: RwLock<Option<String>>,
}

/// Module loader
///
/// Cheap to clone; clones share the registry, search roots and root cache.
#[derive(Clone)]
pub struct ModuleLoader {
    inner: Arc<Inner>,
}

impl ModuleLoader {
    /// Create a loader from `config`, running against `host`
    pub fn new(config: LoaderConfig, host: Host) -> Result<Self> {
        let base_dir = match &config.base_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?,
        };
        let roots = config.search_roots();
        debug!("Search roots: {:?}", roots);

        let loader = Self {
            inner: Arc::new(Inner {
                host,
                base_dir,
                resolver: RwLock::new(ModuleResolver::new(roots)),
                registry: RwLock::new(ExtensionRegistry::new()),
                builtins: DashMap::new(),
                cache: ModuleCache::new(),
                coordinator: DependencyCoordinator::new(),
                exec: ReentrantMutex::new(()),
                main: RwLock::new(None),
            }),
        };

        if config.bootstrap {
            loader.bootstrap()?;
        }
        Ok(loader)
    }

    /// Register the default handlers: `.js` load and compile, `.json`
    /// compile and `.node` native load
    fn bootstrap(&self) -> Result<()> {
        let host = &self.inner.host;
        self.register_extension(
            DEFAULT_EXTENSION,
            Handler::load(SourceFile {
                source: Arc::clone(&host.source),
            }),
        )?;
        self.register_extension(
            DEFAULT_EXTENSION,
            Handler::compile(ScriptCompiler::new(Arc::clone(&host.evaluator))),
        )?;
        self.register_extension(".json", Handler::compile(JsonCompiler))?;
        self.register_extension(
            ".node",
            Handler::load(NativeLoad {
                binder: Arc::clone(&host.binder),
            }),
        )?;
        Ok(())
    }

    /// Import `id` at top level and return its interface
    pub fn import(&self, id: &str) -> Result<Value> {
        self.import_module(id).map(|module| module.exports())
    }

    /// Import `id` at top level and return the module record
    #[instrument(level = "debug", skip(self))]
    pub fn import_module(&self, id: &str) -> Result<Arc<Module>> {
        self.import_sync(id, None, &self.inner.cache)
    }

    /// Import `id` at top level, resolving once the module and everything
    /// it (transitively) loads have settled
    pub fn import_async(&self, id: &str) -> BoxFuture<'static, Result<Value>> {
        let loader = self.clone();
        let id = id.to_string();
        async move {
            let scope = loader.inner.cache.clone();
            loader
                .import_with::<Deferred>(&id, None, &scope)
                .await
                .map(|module| module.exports())
        }
        .boxed()
    }

    /// Import `id` at top level in the background and hand the result to
    /// `callback` once the module has settled.
    ///
    /// Requires a running tokio runtime.
    pub fn import_with_callback(
        &self,
        id: &str,
        callback: impl FnOnce(Result<Value>) + Send + 'static,
    ) -> Result<()> {
        self.spawn_import(id, None, self.inner.cache.clone(), callback)
    }

    /// Canonical location `id` resolves to at top level, without loading it
    pub fn resolve(&self, id: &str) -> Result<String> {
        self.resolve_from(id, None)
    }

    /// Ordered candidate list for `id` as if requested from the file `from`
    pub fn candidates(&self, id: &str, from: Option<&Path>) -> Result<Vec<PathBuf>> {
        let id = normalize_identifier(id)?;
        Ok(self.candidates_for(id, from))
    }

    /// Register a handler for an extension
    pub fn register_extension(&self, ext: &str, handler: Handler) -> Result<()> {
        self.inner.registry.write().register_extension(ext, handler)
    }

    /// Register a handler for a scheme
    pub fn register_scheme(&self, scheme: &str, handler: Handler) -> Result<()> {
        self.inner.registry.write().register_scheme(scheme, handler)
    }

    /// Register a builtin module, replacing any previous one of that name
    pub fn register_builtin(&self, name: impl Into<String>, builtin: Builtin) {
        let name = name.into();
        debug!("registerBuiltin {}", name);
        self.inner.builtins.insert(name, builtin);
    }

    /// Names of the registered builtins
    pub fn builtins(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .builtins
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Registered extensions in search order
    pub fn extensions(&self) -> Vec<String> {
        self.inner.registry.read().extensions().to_vec()
    }

    /// Current search roots, highest priority first
    pub fn paths(&self) -> Vec<PathBuf> {
        self.inner.resolver.read().roots().to_vec()
    }

    /// Add a search root ahead of all others
    pub fn prepend_path(&self, root: impl Into<PathBuf>) {
        self.inner.resolver.write().prepend_root(root);
    }

    /// Add a search root after all others
    pub fn push_path(&self, root: impl Into<PathBuf>) {
        self.inner.resolver.write().push_root(root);
    }

    /// Directory top-level relative identifiers resolve against
    pub fn base_dir(&self) -> &Path {
        &self.inner.base_dir
    }

    /// The root cache scope
    pub fn cache(&self) -> &ModuleCache {
        &self.inner.cache
    }

    /// Top-level import function over the root scope
    pub fn require(&self) -> Require {
        Require::top_level(self.clone(), self.inner.cache.clone())
    }

    /// Top-level import function over a fresh overlay of the root scope
    pub fn sandbox(&self) -> Require {
        Require::top_level(self.clone(), self.inner.cache.overlay())
    }

    /// Load the program entry point and record it as the main module.
    ///
    /// `path` is taken relative to the base directory. A file that exists
    /// at exactly that path is loaded as is; otherwise a registered
    /// extension on it is dropped and the usual candidate search applies.
    pub fn run_main(&self, path: impl AsRef<Path>) -> Result<Arc<Module>> {
        let path = normalize(&self.inner.base_dir.join(path.as_ref()));
        let source = Arc::clone(&self.inner.host.source);
        if source.exists(&path) {
            let location = Location::file(source.canonicalize(&path));
            debug!("Main module {}", location);
            *self.inner.main.write() = Some(location.uri().to_string());
            return self
                .load_at::<Immediate>(location, None, None, &self.inner.cache)
                .now_or_never()
                .unwrap_or_else(|| Err(ModuleError::Suspended(path.display().to_string())));
        }

        let mut id = path.to_string_lossy().into_owned();
        let ext = extension_of(&id);
        if id.ends_with(&ext) && self.extensions().contains(&ext) {
            id.truncate(id.len() - ext.len());
        }

        let location = self.resolve(&id)?;
        debug!("Main module {}", location);
        *self.inner.main.write() = Some(location);

        self.import_module(&id)
    }

    /// The main module, once [`ModuleLoader::run_main`] has reserved it
    pub fn main(&self) -> Option<Arc<Module>> {
        let location = self.inner.main.read().clone()?;
        self.inner.cache.get(&location)
    }

    pub(crate) fn import_sync(
        &self,
        id: &str,
        requester: Option<&Arc<Module>>,
        scope: &ModuleCache,
    ) -> Result<Arc<Module>> {
        self.import_with::<Immediate>(id, requester, scope)
            .now_or_never()
            .unwrap_or_else(|| Err(ModuleError::Suspended(id.to_string())))
    }

    pub(crate) fn resolve_from(&self, id: &str, requester: Option<&Arc<Module>>) -> Result<String> {
        let id = normalize_identifier(id)?;
        self.target::<Immediate>(id, requester)
            .now_or_never()
            .unwrap_or_else(|| Err(ModuleError::Suspended(id.to_string())))
            .map(|(location, _)| location.uri().to_string())
    }

    /// Run an import on the current tokio runtime; the requester does not
    /// settle before `callback` has run
    pub(crate) fn spawn_import(
        &self,
        id: &str,
        requester: Option<Arc<Module>>,
        scope: ModuleCache,
        callback: impl FnOnce(Result<Value>) + Send + 'static,
    ) -> Result<()> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|_| ModuleError::NoRuntime(id.to_string()))?;

        let counted = requester
            .as_ref()
            .is_some_and(|parent| self.inner.coordinator.open_child(parent));

        let loader = self.clone();
        let id = id.to_string();
        handle.spawn(async move {
            let result = loader
                .import_with::<Deferred>(&id, requester.as_ref(), &scope)
                .await
                .map(|module| module.exports());

            {
                let _exec = loader.inner.exec.lock();
                callback(result);
            }

            if let Some(parent) = requester.as_ref().filter(|_| counted) {
                loader.inner.coordinator.close_child(parent);
            }
        });
        Ok(())
    }

    #[instrument(level = "debug", skip(self, requester, scope), fields(from = requester.map(|m| m.location())))]
    async fn import_with<S: Suspension>(
        &self,
        id: &str,
        requester: Option<&Arc<Module>>,
        scope: &ModuleCache,
    ) -> Result<Arc<Module>> {
        let id = normalize_identifier(id)?;

        if let Some(parent) = requester {
            parent.begin_pending(id);
        }
        let target = self.target::<S>(id, requester).await;
        if let Some(parent) = requester {
            parent.end_pending(id);
        }
        let (location, builtin) = target?;
        self.load_at::<S>(location, builtin, requester, scope).await
    }

    /// Load an already located module into `scope`, or join the record
    /// cached there
    async fn load_at<S: Suspension>(
        &self,
        location: Location,
        builtin: Option<Builtin>,
        requester: Option<&Arc<Module>>,
        scope: &ModuleCache,
    ) -> Result<Arc<Module>> {
        // Handlers are selected before anything is cached
        let (pipeline, home) = match builtin {
            Some(builtin) => (
                self.inner.registry.read().builtin_pipeline(Arc::new(builtin)),
                self.inner.cache.clone(),
            ),
            None => (
                self.inner
                    .registry
                    .read()
                    .pipeline(&extension_of(location.uri()), location.scheme())?,
                scope.clone(),
            ),
        };

        let lookup = match scope.get(location.uri()) {
            Some(existing) if !home.same_scope(scope) => Lookup::Existing(existing),
            _ => home.lookup_or_reserve(location.uri(), || {
                Module::new(&location, requester, &home)
            }),
        };

        match lookup {
            Lookup::Reserved(module) => {
                debug!("Loading {}", module.location());
                if let Some(parent) = requester {
                    parent.add_child(Arc::clone(&module));
                    self.inner.coordinator.attach(parent, &module);
                }

                if let Err(err) = self.instantiate::<S>(&module, &pipeline, &home).await {
                    self.abandon(&module, &home, &err);
                    return Err(err);
                }

                self.join::<S>(&module, requester, Link::Linked).await?;
                Ok(module)
            }
            Lookup::Existing(module) => {
                trace!("Cache hit {} ({})", module.location(), module.state());
                let link = match requester {
                    Some(parent) => self.inner.coordinator.link(parent, &module),
                    None => Link::Linked,
                };
                if let Some(Err(err)) = self.inner.coordinator.outcome(&module) {
                    return Err(err);
                }

                self.join::<S>(&module, requester, link).await?;
                // A module still loading elsewhere may yet replace its interface
                if requester.is_some() && (link == Link::Cyclic || module.state().is_terminal()) {
                    module.observe();
                }
                Ok(module)
            }
        }
    }

    /// Location for `id`, plus the builtin it names if any
    async fn target<S: Suspension>(
        &self,
        id: &str,
        requester: Option<&Arc<Module>>,
    ) -> Result<(Location, Option<Builtin>)> {
        let name = builtin_name(id);
        let builtin = self.inner.builtins.get(name).map(|entry| entry.value().clone());
        if let Some(builtin) = builtin {
            let location = Location::remote(BUILTIN_SCHEME, builtin_location(name));
            return Ok((location, Some(builtin)));
        }
        if id.starts_with(BUILTIN_PREFIX) {
            return Err(ModuleError::module_not_found(id));
        }

        self.locate::<S>(id, requester).await.map(|location| (location, None))
    }

    async fn locate<S: Suspension>(
        &self,
        id: &str,
        requester: Option<&Arc<Module>>,
    ) -> Result<Location> {
        let from = requester.map(|module| module.as_ref());

        // Scheme-prefixed identifiers belong entirely to their scheme
        let prefixed = scheme_prefix(id).filter(|scheme| self.has_scheme(scheme));
        if let Some(scheme) = prefixed {
            let hook = self.inner.registry.read().resolve_hook(scheme);
            return match hook {
                Some(hook) => {
                    let uri = S::resolve_scheme(hook.as_ref(), id, from).await?;
                    Ok(self.location_for(&uri, scheme))
                }
                None => Ok(Location::remote(scheme, id)),
            };
        }

        // Relative identifiers inside a scheme-located module stay in that scheme
        let inherited = requester
            .and_then(|module| module.scheme())
            .filter(|_| classify(id) == IdentifierKind::Relative);
        if let Some(scheme) = inherited {
            let hook = self
                .inner
                .registry
                .read()
                .resolve_hook(scheme)
                .ok_or_else(|| ModuleError::NoHandler {
                    target: format!("{}:", scheme),
                    phase: "resolve",
                })?;
            let uri = S::resolve_scheme(hook.as_ref(), id, from).await?;
            return Ok(self.location_for(&uri, scheme));
        }

        let candidates = self.candidates_for(id, requester.and_then(|module| module.path()));
        trace!("Candidates for {}: {:?}", id, candidates);

        let source = Arc::clone(&self.inner.host.source);
        for candidate in candidates {
            if S::exists(source.as_ref(), &candidate).await {
                let canonical = source.canonicalize(&candidate);
                debug!("Resolved {} to {}", id, canonical.display());
                return Ok(Location::file(canonical));
            }
        }

        Err(ModuleError::module_not_found(id))
    }

    fn candidates_for(&self, id: &str, from: Option<&Path>) -> Vec<PathBuf> {
        let resolver = self.inner.resolver.read();
        let roots = resolver.search_roots(id, from, &self.inner.base_dir);
        let registry = self.inner.registry.read();
        resolver.candidates(id, &roots, registry.extensions())
    }

    fn has_scheme(&self, scheme: &str) -> bool {
        self.inner.registry.read().has_scheme(scheme)
    }

    /// Interpret a location produced by the resolve hook of `scheme`
    fn location_for(&self, uri: &str, scheme: &str) -> Location {
        if let Some(own) = scheme_prefix(uri).filter(|s| self.has_scheme(s)) {
            return Location::remote(own, uri);
        }
        let path = uri
            .strip_prefix("file://")
            .or_else(|| uri.strip_prefix("file:"))
            .unwrap_or(uri);
        if path.starts_with('/') {
            Location::file(normalize(Path::new(path)))
        } else {
            Location::remote(scheme, uri)
        }
    }

    async fn instantiate<S: Suspension>(
        &self,
        module: &Arc<Module>,
        pipeline: &Pipeline,
        scope: &ModuleCache,
    ) -> Result<()> {
        module.advance(ModuleState::Fetching);
        let payload = S::load(pipeline.load.as_ref(), module.as_ref()).await?;

        match payload {
            Payload::Source(content) => self.execute(module, content, pipeline, scope)?,
            Payload::Interface(value) => module.set_exports(value)?,
            // Native bind: no compile phase
            Payload::InPlace => {}
        }

        self.inner.coordinator.compile_returned(module);
        Ok(())
    }

    fn execute(
        &self,
        module: &Arc<Module>,
        content: Bytes,
        pipeline: &Pipeline,
        scope: &ModuleCache,
    ) -> Result<()> {
        let _exec = self.inner.exec.lock();
        module.advance(ModuleState::Compiling);

        let require = Require::bound(self.clone(), Arc::clone(module), scope.clone());
        let no_compiler = || ModuleError::NoHandler {
            target: module.extension().to_string(),
            phase: "compile",
        };

        let compile = pipeline.compile.as_ref().ok_or_else(no_compiler)?;
        let payload = match compile.compile(module, content, &require)? {
            Payload::Source(text) if !pipeline.compile_is_default => {
                let fallback = pipeline.fallback.as_ref().ok_or_else(no_compiler)?;
                fallback.compile(module, text, &require)?
            }
            other => other,
        };

        match payload {
            Payload::Source(_) => Err(ModuleError::compile_failure(
                module.location(),
                "compile step produced no interface",
            )),
            Payload::Interface(value) => module.set_exports(value),
            Payload::InPlace => Ok(()),
        }
    }

    async fn join<S: Suspension>(
        &self,
        module: &Arc<Module>,
        requester: Option<&Arc<Module>>,
        link: Link,
    ) -> Result<()> {
        // A cyclic requester takes the interface as it is right now
        if link == Link::Cyclic {
            return Ok(());
        }
        if S::WAITS {
            return self.inner.coordinator.wait(module).await;
        }
        if let Some(parent) = requester {
            if !self.inner.coordinator.add_dependent(module, parent) {
                self.inner.coordinator.detach(parent, module);
            }
        }
        Ok(())
    }

    /// Fail `module`, evict it and detach it from its parent
    fn abandon(&self, module: &Arc<Module>, scope: &ModuleCache, err: &ModuleError) {
        debug!("Load of {} failed: {}", module.location(), err);
        self.inner.coordinator.fail(module, err);
        scope.evict(module);
        if let Some(parent) = module.parent() {
            parent.remove_child(module);
        }
    }
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("paths", &self.paths())
            .field("extensions", &self.extensions())
            .field("cache", &self.inner.cache)
            .finish()
    }
}

/// Default load step: read the file from the host's content source
struct SourceFile {
    source: Arc<dyn ContentSource>,
}

impl SourceFile {
    fn path<'a>(&self, module: &'a Module) -> Result<&'a Path> {
        module.path().ok_or_else(|| ModuleError::NoHandler {
            target: format!("{}:", module.scheme().unwrap_or_default()),
            phase: "load",
        })
    }
}

#[async_trait]
impl LoadHandler for SourceFile {
    fn load(&self, module: &Module) -> Result<Payload> {
        let path = self.path(module)?;
        Ok(Payload::Source(self.source.read(path)?))
    }

    async fn load_async(&self, module: &Module) -> Result<Payload> {
        let path = self.path(module)?;
        Ok(Payload::Source(self.source.read_async(path).await?))
    }
}

/// Native load step: bind directly into the interface slot
struct NativeLoad {
    binder: Arc<dyn NativeBinder>,
}

impl LoadHandler for NativeLoad {
    fn load(&self, module: &Module) -> Result<Payload> {
        let bind_failure = |reason: String| ModuleError::NativeBindFailure {
            location: module.location().to_string(),
            reason,
        };

        let path = module
            .path()
            .ok_or_else(|| bind_failure("not a filesystem location".to_string()))?;
        debug!("Binding native module {}", path.display());
        self.binder
            .bind(path, InterfaceSlot::new(module))
            .map_err(bind_failure)?;
        Ok(Payload::InPlace)
    }
}
