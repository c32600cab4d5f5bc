// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! # spacey-modules
//!
//! Module resolution, caching and loading for the Spacey runtime.
//!
//! Given an identifier requested by a module, the loader locates a concrete
//! file (or scheme location), loads and compiles it, and guarantees the
//! result is instantiated at most once per canonical location, even when
//! the request graph contains cycles.
//!
//! - Deterministic search over configured roots and registered extensions
//! - Pluggable load/compile handlers per extension or scheme
//! - Builtin modules, JSON modules, native extensions through a host binder
//! - Synchronous `require()` and callback-based async imports
//! - Overlay cache scopes for sandboxed subtrees
//!
//! Reading files, binding native libraries and evaluating code are left to
//! the host (see [`host`]).
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use spacey_modules::{Host, LoaderConfig, ModuleLoader};
//!
//! let loader = ModuleLoader::new(LoaderConfig::from_env(), Host::new(MyEvaluator))?;
//! let exports = loader.import("./app")?;
//! ```
//!
//! ## CLI Usage
//!
//! ```bash
//! # Show the search roots
//! spacey-modules paths
//!
//! # Where would `lodash` be looked for, and where is it found?
//! spacey-modules candidates lodash
//! spacey-modules resolve lodash
//!
//! # Load a JSON module and print it
//! spacey-modules load ./package
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod host;
pub mod module_system;

// Re-exports
pub use config::LoaderConfig;
pub use error::{ModuleError, Result};
pub use host::{
    CompiledUnit, ContentSource, Evaluator, FsSource, Host, MemorySource, NativeBinder,
    NullEvaluator, ScriptSource, UnitArgs, Unsupported,
};
pub use module_system::{
    Builtin, Handler, InterfaceSlot, Module, ModuleCache, ModuleLoader, ModuleState, Payload,
    Phase, Require,
};

/// Version of spacey-modules
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
