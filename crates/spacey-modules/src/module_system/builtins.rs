// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Builtin modules
//!
//! Builtins are registered by name and take precedence over any path
//! resolution. They are cached in the root scope under `node:<name>`.

use crate::error::Result;
use crate::module_system::module::Module;
use crate::module_system::registry::{LoadHandler, Payload};
use crate::module_system::resolver::BUILTIN_PREFIX;
use bytes::Bytes;
use serde_json::Value;

/// Content of a builtin module
#[derive(Debug, Clone)]
pub enum Builtin {
    /// Source text run through the default compile step
    Source(Bytes),
    /// Ready-made interface
    Interface(Value),
}

impl Builtin {
    /// Builtin compiled from `source`
    pub fn source(source: impl Into<Bytes>) -> Self {
        Builtin::Source(source.into())
    }

    /// Builtin exposing `value` directly
    pub fn interface(value: Value) -> Self {
        Builtin::Interface(value)
    }
}

impl LoadHandler for Builtin {
    fn load(&self, _module: &Module) -> Result<Payload> {
        Ok(match self {
            Builtin::Source(source) => Payload::Source(source.clone()),
            Builtin::Interface(value) => Payload::Interface(value.clone()),
        })
    }
}

/// Builtin name `id` refers to, with any `node:` prefix removed
pub fn builtin_name(id: &str) -> &str {
    id.strip_prefix(BUILTIN_PREFIX).unwrap_or(id)
}

/// Cache location of builtin `name`
pub fn builtin_location(name: &str) -> String {
    format!("{}{}", BUILTIN_PREFIX, name)
}
