// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Error types for the module loader

use std::sync::Arc;
use thiserror::Error;

/// Result type for module loader operations
pub type Result<T> = std::result::Result<T, ModuleError>;

/// Errors that can occur while resolving, loading or compiling a module.
///
/// Cloneable so that one failure can be delivered to every waiter of a
/// module that is still in flight.
#[derive(Debug, Clone, Error)]
pub enum ModuleError {
    /// No candidate location existed
    #[error("Cannot find module '{0}'")]
    ModuleNotFound(String),

    /// Empty or malformed identifier
    #[error("Invalid module id: '{0}'")]
    InvalidIdentifier(String),

    /// Extension passed to registration is not of the form `.ext`
    #[error("Invalid extension '{0}': expected a string like '.coffee'")]
    InvalidExtension(String),

    /// Scheme passed to registration is malformed
    #[error("Invalid scheme '{0}'")]
    InvalidScheme(String),

    /// No handler registered for the resolved extension or scheme
    #[error("No {phase} handler registered for {target} modules")]
    NoHandler {
        /// Extension or scheme that was looked up
        target: String,
        /// Phase that was missing
        phase: &'static str,
    },

    /// Interface replaced after another module observed it
    #[error("{0}\nCannot set exports after being required by another module")]
    LockedInterfaceWrite(String),

    /// Compiling or executing a module failed
    #[error("Error compiling module '{location}': {message}")]
    CompileFailure {
        /// Location of the failing module
        location: String,
        /// Description of the failure
        message: String,
    },

    /// The native extension loader rejected a module
    #[error("Error binding native module '{location}': {reason}")]
    NativeBindFailure {
        /// Location of the native module
        location: String,
        /// Reason for failure
        reason: String,
    },

    /// Error raised by evaluated module code
    #[error("Error: {0}")]
    Thrown(String),

    /// Type error (wrong interface shape)
    #[error("TypeError: {0}")]
    TypeError(String),

    /// A synchronous import reached a step that can only complete asynchronously
    #[error("Synchronous import of '{0}' cannot complete without suspending")]
    Suspended(String),

    /// Asynchronous import requested outside of a tokio runtime
    #[error("Asynchronous import of '{0}' requires a running tokio runtime")]
    NoRuntime(String),

    /// File system error
    #[error("File system error: {0}")]
    Io(Arc<std::io::Error>),

    /// JSON parsing error
    #[error("JSON parse error: {0}")]
    Json(Arc<serde_json::Error>),
}

impl ModuleError {
    /// Create a module not found error
    pub fn module_not_found(module: impl Into<String>) -> Self {
        Self::ModuleNotFound(module.into())
    }

    /// Create a compile failure for `location`
    pub fn compile_failure(location: impl Into<String>, message: impl ToString) -> Self {
        Self::CompileFailure {
            location: location.into(),
            message: message.to_string(),
        }
    }

    /// Create a new TypeError
    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::TypeError(msg.into())
    }

    /// Create an error as raised by module code
    pub fn thrown(msg: impl Into<String>) -> Self {
        Self::Thrown(msg.into())
    }

    /// Whether this error means the identifier could not be located
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::ModuleNotFound(_))
    }
}

impl From<std::io::Error> for ModuleError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for ModuleError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(Arc::new(err))
    }
}
