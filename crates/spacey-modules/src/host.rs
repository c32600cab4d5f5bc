// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Host collaborators
//!
//! The loader does not read files, bind native libraries or evaluate code
//! itself. It talks to the host through three narrow traits:
//!
//! - [`ContentSource`] - existence checks and byte reads, sync and async
//! - [`NativeBinder`] - binds a native extension into an interface slot
//! - [`Evaluator`] - turns source text into a callable unit

use crate::error::Result;
use crate::module_system::{InterfaceSlot, Module, Require, normalize};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Byte-stream source for module content
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Whether a readable file exists at `path`
    fn exists(&self, path: &Path) -> bool;

    /// Read the whole file at `path`
    fn read(&self, path: &Path) -> io::Result<Bytes>;

    /// Canonical form of an existing `path`, used as the cache key
    fn canonicalize(&self, path: &Path) -> PathBuf {
        normalize(path)
    }

    /// Async form of [`ContentSource::exists`]
    async fn exists_async(&self, path: &Path) -> bool {
        self.exists(path)
    }

    /// Async form of [`ContentSource::read`]
    async fn read_async(&self, path: &Path) -> io::Result<Bytes> {
        self.read(path)
    }
}

/// Content source backed by the real filesystem
#[derive(Debug, Clone, Copy, Default)]
pub struct FsSource;

#[async_trait]
impl ContentSource for FsSource {
    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn read(&self, path: &Path) -> io::Result<Bytes> {
        std::fs::read(path).map(Bytes::from)
    }

    fn canonicalize(&self, path: &Path) -> PathBuf {
        path.canonicalize().unwrap_or_else(|_| normalize(path))
    }

    async fn exists_async(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false)
    }

    async fn read_async(&self, path: &Path) -> io::Result<Bytes> {
        tokio::fs::read(path).await.map(Bytes::from)
    }
}

/// In-memory file table.
///
/// Every async operation yields to the scheduler once before completing, so
/// concurrent imports interleave the way they would against real I/O.
#[derive(Debug, Default)]
pub struct MemorySource {
    files: DashMap<PathBuf, Bytes>,
}

impl MemorySource {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a file
    pub fn insert(&self, path: impl Into<PathBuf>, contents: impl Into<Bytes>) {
        self.files.insert(normalize(&path.into()), contents.into());
    }

    /// Remove a file
    pub fn remove(&self, path: impl AsRef<Path>) -> Option<Bytes> {
        self.files.remove(path.as_ref()).map(|(_, v)| v)
    }

    /// Builder form of [`MemorySource::insert`]
    pub fn with_file(self, path: impl Into<PathBuf>, contents: impl Into<Bytes>) -> Self {
        self.insert(path, contents);
        self
    }
}

#[async_trait]
impl ContentSource for MemorySource {
    fn exists(&self, path: &Path) -> bool {
        self.files.contains_key(path)
    }

    fn read(&self, path: &Path) -> io::Result<Bytes> {
        self.files
            .get(path)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("{} not found", path.display()))
            })
    }

    async fn exists_async(&self, path: &Path) -> bool {
        tokio::task::yield_now().await;
        self.exists(path)
    }

    async fn read_async(&self, path: &Path) -> io::Result<Bytes> {
        tokio::task::yield_now().await;
        self.read(path)
    }
}

/// Dynamic loader for native extensions
pub trait NativeBinder: Send + Sync {
    /// Bind the library at `path` into `slot`
    fn bind(&self, path: &Path, slot: InterfaceSlot<'_>) -> std::result::Result<(), String>;
}

/// Native binder that rejects every library
#[derive(Debug, Clone, Copy, Default)]
pub struct Unsupported;

impl NativeBinder for Unsupported {
    fn bind(&self, _path: &Path, _slot: InterfaceSlot<'_>) -> std::result::Result<(), String> {
        Err("Native addons (.node) are not supported".to_string())
    }
}

/// Arguments a compiled unit is invoked with
pub struct UnitArgs<'a> {
    /// The module's interface slot (`exports`)
    pub exports: InterfaceSlot<'a>,
    /// Import function bound to the module (`require`)
    pub require: &'a Require,
    /// The module record (`module`)
    pub module: &'a Arc<Module>,
    /// Location of the module (`__filename`)
    pub filename: &'a str,
    /// Directory of the module (`__dirname`)
    pub dirname: &'a str,
}

/// Executable unit produced by an [`Evaluator`]
pub trait CompiledUnit: Send {
    /// Execute the unit. Errors raised by the code are returned as-is.
    fn call(&self, args: UnitArgs<'_>) -> Result<()>;
}

/// Source text handed to an [`Evaluator`]
#[derive(Debug, Clone, Copy)]
pub struct ScriptSource<'a> {
    /// Module body with any interpreter directive removed
    pub body: &'a str,
    /// Label for diagnostics (the module location)
    pub label: &'a str,
}

/// Names of the parameters a unit receives, in order
pub const WRAPPER_PARAMS: [&str; 5] = ["exports", "require", "module", "__filename", "__dirname"];

impl ScriptSource<'_> {
    /// Body wrapped in a function expression taking [`WRAPPER_PARAMS`], for
    /// engines that compile whole scripts
    pub fn wrapped(&self) -> String {
        format!("(function ({}) {{ {}\n}});", WRAPPER_PARAMS.join(", "), self.body)
    }
}

/// Source-to-executable compiler
pub trait Evaluator: Send + Sync {
    /// Compile `source` into a unit
    fn compile_unit(&self, source: ScriptSource<'_>) -> Result<Box<dyn CompiledUnit>>;
}

/// Evaluator used when the embedder has not supplied one
#[derive(Debug, Clone, Copy, Default)]
pub struct NullEvaluator;

impl Evaluator for NullEvaluator {
    fn compile_unit(&self, source: ScriptSource<'_>) -> Result<Box<dyn CompiledUnit>> {
        Err(crate::error::ModuleError::compile_failure(
            source.label,
            "no script evaluator is configured",
        ))
    }
}

/// The set of collaborators a loader runs against
#[derive(Clone)]
pub struct Host {
    /// Content source for filesystem locations
    pub source: Arc<dyn ContentSource>,
    /// Native extension binder
    pub binder: Arc<dyn NativeBinder>,
    /// Script evaluator
    pub evaluator: Arc<dyn Evaluator>,
}

impl Host {
    /// Real filesystem, no native binder, and `evaluator`
    pub fn new(evaluator: impl Evaluator + 'static) -> Self {
        Self {
            source: Arc::new(FsSource),
            binder: Arc::new(Unsupported),
            evaluator: Arc::new(evaluator),
        }
    }

    /// Replace the content source
    pub fn with_source(mut self, source: impl ContentSource + 'static) -> Self {
        self.source = Arc::new(source);
        self
    }

    /// Replace the content source with a shared one
    pub fn with_shared_source(mut self, source: Arc<dyn ContentSource>) -> Self {
        self.source = source;
        self
    }

    /// Replace the native binder
    pub fn with_binder(mut self, binder: impl NativeBinder + 'static) -> Self {
        self.binder = Arc::new(binder);
        self
    }
}

impl Default for Host {
    fn default() -> Self {
        Self::new(NullEvaluator)
    }
}
