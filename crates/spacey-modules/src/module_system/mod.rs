// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module system implementation
//!
//! ## Resolution
//! - Builtins first, with or without the `node:` prefix
//! - Scheme-prefixed identifiers go to the scheme's resolve hook
//! - `./x` searches the requester's directory, `/x` the filesystem root,
//!   anything else the configured roots
//! - Per root and extension: `root/id<ext>` then `root/id/index<ext>`
//!
//! ## Loading
//! - One record per canonical location and cache scope
//! - Pluggable load and compile handlers per extension or scheme
//! - Synchronous `require()` and callback-based async imports
//! - Settlement waits for the whole loaded subgraph; cycles observe the
//!   in-flight interface instead of waiting

mod builtins;
mod cache;
mod compiler;
mod coordinator;
mod loader;
mod module;
mod registry;
mod require;
mod resolver;
mod suspend;

pub use builtins::Builtin;
pub use cache::{Lookup, ModuleCache, WeakModuleCache};
pub use compiler::{JsonCompiler, ScriptCompiler, strip_interpreter_directive};
pub use loader::ModuleLoader;
pub use module::{InterfaceSlot, Module, ModuleState};
pub use registry::{
    CompileHandler, DEFAULT_EXTENSION, ExtensionRegistry, Handler, LoadHandler, Payload, Phase,
    ResolveHook, Target,
};
pub use require::Require;
pub use resolver::{
    BUILTIN_PREFIX, IdentifierKind, Location, ModuleResolver, classify, normalize,
    normalize_identifier, scheme_prefix,
};
