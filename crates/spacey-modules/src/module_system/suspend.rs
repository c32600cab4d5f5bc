// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Suspension strategies
//!
//! The import pipeline is written once as an `async fn` generic over a
//! [`Suspension`]. The strategy decides what happens at each suspension
//! point: [`Immediate`] performs the step synchronously and hands back a
//! ready future, [`Deferred`] awaits the collaborator's async form and
//! waits for in-flight modules to settle.

use crate::error::Result;
use crate::host::ContentSource;
use crate::module_system::module::Module;
use crate::module_system::registry::{LoadHandler, Payload, ResolveHook};
use std::future::{Future, ready};
use std::path::Path;

/// Behaviour of the import pipeline at its suspension points
pub(crate) trait Suspension: Send + Sync + 'static {
    /// Whether a requester waits for an in-flight module to settle
    const WAITS: bool;

    /// Existence check for a candidate
    fn exists<'a>(source: &'a dyn ContentSource, path: &'a Path) -> impl Future<Output = bool> + Send + 'a;

    /// Content fetch
    fn load<'a>(handler: &'a dyn LoadHandler, module: &'a Module) -> impl Future<Output = Result<Payload>> + Send + 'a;

    /// Scheme-delegated resolution
    fn resolve_scheme<'a>(
        hook: &'a dyn ResolveHook,
        id: &'a str,
        requester: Option<&'a Module>,
    ) -> impl Future<Output = Result<String>> + Send + 'a;
}

/// Synchronous calling convention: every step completes before returning,
/// in-flight modules are returned as they are
pub(crate) struct Immediate;

impl Suspension for Immediate {
    const WAITS: bool = false;

    fn exists<'a>(source: &'a dyn ContentSource, path: &'a Path) -> impl Future<Output = bool> + Send + 'a {
        ready(source.exists(path))
    }

    fn load<'a>(handler: &'a dyn LoadHandler, module: &'a Module) -> impl Future<Output = Result<Payload>> + Send + 'a {
        ready(handler.load(module))
    }

    fn resolve_scheme<'a>(
        hook: &'a dyn ResolveHook,
        id: &'a str,
        requester: Option<&'a Module>,
    ) -> impl Future<Output = Result<String>> + Send + 'a {
        ready(hook.resolve(id, requester))
    }
}

/// Cooperative calling convention: steps yield to the scheduler and
/// requesters wait for settlement
pub(crate) struct Deferred;

impl Suspension for Deferred {
    const WAITS: bool = true;

    fn exists<'a>(source: &'a dyn ContentSource, path: &'a Path) -> impl Future<Output = bool> + Send + 'a {
        source.exists_async(path)
    }

    fn load<'a>(handler: &'a dyn LoadHandler, module: &'a Module) -> impl Future<Output = Result<Payload>> + Send + 'a {
        handler.load_async(module)
    }

    fn resolve_scheme<'a>(
        hook: &'a dyn ResolveHook,
        id: &'a str,
        requester: Option<&'a Module>,
    ) -> impl Future<Output = Result<String>> + Send + 'a {
        hook.resolve_async(id, requester)
    }
}
