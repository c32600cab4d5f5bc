// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Extension and scheme handler registry
//!
//! Handlers are tagged by phase and keyed by extension (`.js`) or scheme
//! (`mem`). Each phase can hand on source text to the next phase or
//! return a finished interface, which stops the pipeline:
//!
//! ```rust,ignore
//! loader.register_extension(".coffee", Handler::compile(
//!     |_module: &Arc<Module>, content: Bytes, _require: &Require| {
//!         Ok(Payload::Source(compile_coffee(&content)?))
//!     },
//! ))?;
//! ```

use crate::error::{ModuleError, Result};
use crate::module_system::module::Module;
use crate::module_system::require::Require;
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};
use tracing::debug;

static EXTENSION_PATTERN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^\.\w+$").expect("extension pattern is valid"));

static SCHEME_PATTERN: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[a-z][a-z0-9+.\-]*$").expect("scheme pattern is valid"));

/// Extension whose handlers are used when a more specific one is missing
pub const DEFAULT_EXTENSION: &str = ".js";

/// Pipeline phase a handler runs in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Map an identifier to a location (schemes only)
    Resolve,
    /// Fetch raw content
    Load,
    /// Turn content into an interface
    Compile,
}

impl Phase {
    /// Lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Resolve => "resolve",
            Phase::Load => "load",
            Phase::Compile => "compile",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a handler hands on
#[derive(Debug, Clone)]
pub enum Payload {
    /// Content still destined for the next phase
    Source(Bytes),
    /// Finished interface; short-circuits the remaining phases
    Interface(Value),
    /// The handler populated the interface slot itself
    InPlace,
}

/// Fetches raw content for a module
#[async_trait]
pub trait LoadHandler: Send + Sync {
    /// Fetch synchronously
    fn load(&self, module: &Module) -> Result<Payload>;

    /// Fetch asynchronously; defaults to the synchronous path
    async fn load_async(&self, module: &Module) -> Result<Payload> {
        self.load(module)
    }
}

impl<F> LoadHandler for F
where
    F: Fn(&Module) -> Result<Payload> + Send + Sync,
{
    fn load(&self, module: &Module) -> Result<Payload> {
        self(module)
    }
}

/// Turns raw content into an interface (or into source for the default step)
pub trait CompileHandler: Send + Sync {
    /// Compile `content` for `module`; `require` is bound to `module`
    fn compile(&self, module: &Arc<Module>, content: Bytes, require: &Require) -> Result<Payload>;
}

impl<F> CompileHandler for F
where
    F: Fn(&Arc<Module>, Bytes, &Require) -> Result<Payload> + Send + Sync,
{
    fn compile(&self, module: &Arc<Module>, content: Bytes, require: &Require) -> Result<Payload> {
        self(module, content, require)
    }
}

/// Maps a scheme-prefixed identifier to a location
#[async_trait]
pub trait ResolveHook: Send + Sync {
    /// Resolve synchronously
    fn resolve(&self, id: &str, requester: Option<&Module>) -> Result<String>;

    /// Resolve asynchronously; defaults to the synchronous path
    async fn resolve_async(&self, id: &str, requester: Option<&Module>) -> Result<String> {
        self.resolve(id, requester)
    }
}

impl<F> ResolveHook for F
where
    F: Fn(&str, Option<&Module>) -> Result<String> + Send + Sync,
{
    fn resolve(&self, id: &str, requester: Option<&Module>) -> Result<String> {
        self(id, requester)
    }
}

/// A handler tagged with its phase
#[derive(Clone)]
pub enum Handler {
    /// Resolve-phase hook (schemes only)
    Resolve(Arc<dyn ResolveHook>),
    /// Load-phase handler
    Load(Arc<dyn LoadHandler>),
    /// Compile-phase handler
    Compile(Arc<dyn CompileHandler>),
}

impl Handler {
    /// Wrap a resolve hook
    pub fn resolve(hook: impl ResolveHook + 'static) -> Self {
        Handler::Resolve(Arc::new(hook))
    }

    /// Wrap a load handler
    pub fn load(handler: impl LoadHandler + 'static) -> Self {
        Handler::Load(Arc::new(handler))
    }

    /// Wrap a compile handler
    pub fn compile(handler: impl CompileHandler + 'static) -> Self {
        Handler::Compile(Arc::new(handler))
    }

    /// Phase this handler runs in
    pub fn phase(&self) -> Phase {
        match self {
            Handler::Resolve(_) => Phase::Resolve,
            Handler::Load(_) => Phase::Load,
            Handler::Compile(_) => Phase::Compile,
        }
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handler::{}", self.phase())
    }
}

/// Registry key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Target {
    /// File extension including the dot
    Extension(String),
    /// Scheme name without the colon
    Scheme(String),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Extension(ext) => f.write_str(ext),
            Target::Scheme(scheme) => write!(f, "{}:", scheme),
        }
    }
}

/// The load and compile handlers selected for one module
#[derive(Clone)]
pub(crate) struct Pipeline {
    pub(crate) load: Arc<dyn LoadHandler>,
    pub(crate) compile: Option<Arc<dyn CompileHandler>>,
    /// Whether `compile` is the default textual compile step
    pub(crate) compile_is_default: bool,
    /// Default textual compile step, run when `compile` hands on source
    pub(crate) fallback: Option<Arc<dyn CompileHandler>>,
}

/// Handlers keyed by extension or scheme and phase
#[derive(Default)]
pub struct ExtensionRegistry {
    extensions: Vec<String>,
    schemes: Vec<String>,
    handlers: HashMap<(Target, Phase), Handler>,
}

impl ExtensionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for files ending in `ext`.
    ///
    /// Re-registering the same extension and phase replaces the previous
    /// handler. Extensions keep the position of their first registration in
    /// the candidate search order.
    pub fn register_extension(&mut self, ext: &str, handler: Handler) -> Result<()> {
        if !EXTENSION_PATTERN.is_match(ext) {
            return Err(ModuleError::InvalidExtension(ext.to_string()));
        }
        if handler.phase() == Phase::Resolve {
            return Err(ModuleError::InvalidExtension(format!(
                "{} (resolve hooks can only be registered for schemes)",
                ext
            )));
        }

        debug!("registerExtension {} {}", ext, handler.phase());
        if !self.extensions.iter().any(|e| e == ext) {
            self.extensions.push(ext.to_string());
        }
        self.handlers
            .insert((Target::Extension(ext.to_string()), handler.phase()), handler);
        Ok(())
    }

    /// Register `handler` for locations carrying `scheme` (with or without
    /// its trailing colon)
    pub fn register_scheme(&mut self, scheme: &str, handler: Handler) -> Result<()> {
        let name = scheme.strip_suffix(':').unwrap_or(scheme);
        if !SCHEME_PATTERN.is_match(name) || name == "file" {
            return Err(ModuleError::InvalidScheme(scheme.to_string()));
        }

        debug!("registerScheme {} {}", name, handler.phase());
        if !self.schemes.iter().any(|s| s == name) {
            self.schemes.push(name.to_string());
        }
        self.handlers
            .insert((Target::Scheme(name.to_string()), handler.phase()), handler);
        Ok(())
    }

    /// Registered extensions in registration order
    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    /// Registered schemes in registration order
    pub fn schemes(&self) -> &[String] {
        &self.schemes
    }

    /// Whether `scheme` has any handler
    pub fn has_scheme(&self, scheme: &str) -> bool {
        self.schemes.iter().any(|s| s == scheme)
    }

    /// Handler registered for exactly `target` and `phase`
    pub fn get(&self, target: &Target, phase: Phase) -> Option<&Handler> {
        self.handlers.get(&(target.clone(), phase))
    }

    /// Resolve hook of `scheme`
    pub fn resolve_hook(&self, scheme: &str) -> Option<Arc<dyn ResolveHook>> {
        match self.get(&Target::Scheme(scheme.to_string()), Phase::Resolve) {
            Some(Handler::Resolve(hook)) => Some(Arc::clone(hook)),
            _ => None,
        }
    }

    fn load_for(&self, target: &Target) -> Option<Arc<dyn LoadHandler>> {
        match self.get(target, Phase::Load) {
            Some(Handler::Load(handler)) => Some(Arc::clone(handler)),
            _ => None,
        }
    }

    fn compile_for(&self, target: &Target) -> Option<Arc<dyn CompileHandler>> {
        match self.get(target, Phase::Compile) {
            Some(Handler::Compile(handler)) => Some(Arc::clone(handler)),
            _ => None,
        }
    }

    /// Select the handlers for a module with `extension` and `scheme`.
    ///
    /// A scheme handler wins over an extension handler; a phase missing for
    /// the extension falls back to the default textual extension. Scheme
    /// locations must have a scheme load handler.
    pub(crate) fn pipeline(&self, extension: &str, scheme: Option<&str>) -> Result<Pipeline> {
        let ext = Target::Extension(extension.to_string());
        let default = Target::Extension(DEFAULT_EXTENSION.to_string());
        let scheme = scheme.map(|s| Target::Scheme(s.to_string()));

        let load = match &scheme {
            Some(target) => self.load_for(target).ok_or_else(|| ModuleError::NoHandler {
                target: target.to_string(),
                phase: Phase::Load.as_str(),
            })?,
            None => self
                .load_for(&ext)
                .or_else(|| self.load_for(&default))
                .ok_or_else(|| ModuleError::NoHandler {
                    target: extension.to_string(),
                    phase: Phase::Load.as_str(),
                })?,
        };

        let fallback = self.compile_for(&default);
        let specific = scheme
            .as_ref()
            .and_then(|target| self.compile_for(target))
            .or_else(|| self.compile_for(&ext));

        let (compile, compile_is_default) = match specific {
            Some(handler) => {
                let is_default = fallback
                    .as_ref()
                    .is_some_and(|default| Arc::ptr_eq(default, &handler));
                (Some(handler), is_default)
            }
            None => (fallback.clone(), true),
        };

        Ok(Pipeline {
            load,
            compile,
            compile_is_default,
            fallback,
        })
    }

    /// Pipeline for a builtin: its own load step, then the default compile
    pub(crate) fn builtin_pipeline(&self, load: Arc<dyn LoadHandler>) -> Pipeline {
        let fallback = self.compile_for(&Target::Extension(DEFAULT_EXTENSION.to_string()));
        Pipeline {
            load,
            compile: fallback.clone(),
            compile_is_default: true,
            fallback,
        }
    }
}

impl fmt::Debug for ExtensionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionRegistry")
            .field("extensions", &self.extensions)
            .field("schemes", &self.schemes)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
