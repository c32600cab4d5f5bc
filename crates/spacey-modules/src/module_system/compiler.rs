// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Default compile steps
//!
//! [`ScriptCompiler`] is the textual compile step every other handler falls
//! back to: it strips an interpreter directive, hands the body to the
//! host's [`Evaluator`] and runs the unit against the module's interface
//! slot. [`JsonCompiler`] parses JSON content into a finished interface.

use crate::error::{ModuleError, Result};
use crate::host::{Evaluator, ScriptSource, UnitArgs};
use crate::module_system::module::{InterfaceSlot, Module};
use crate::module_system::registry::{CompileHandler, Payload};
use crate::module_system::require::Require;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

/// Compiles and executes textual source through an [`Evaluator`]
#[derive(Clone)]
pub struct ScriptCompiler {
    evaluator: Arc<dyn Evaluator>,
}

impl ScriptCompiler {
    /// Create a compiler running units through `evaluator`
    pub fn new(evaluator: Arc<dyn Evaluator>) -> Self {
        Self { evaluator }
    }
}

impl CompileHandler for ScriptCompiler {
    fn compile(&self, module: &Arc<Module>, content: Bytes, require: &Require) -> Result<Payload> {
        let text = std::str::from_utf8(&content)
            .map_err(|e| ModuleError::compile_failure(module.location(), e))?;
        let body = strip_interpreter_directive(text);

        debug!("Compiling {}", module.location());
        let unit = self.evaluator.compile_unit(ScriptSource {
            body,
            label: module.location(),
        })?;

        unit.call(UnitArgs {
            exports: InterfaceSlot::new(module),
            require,
            module,
            filename: module.filename(),
            dirname: module.dirname(),
        })?;

        Ok(Payload::InPlace)
    }
}

/// Parses JSON content into the module interface
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCompiler;

impl CompileHandler for JsonCompiler {
    fn compile(&self, module: &Arc<Module>, content: Bytes, _require: &Require) -> Result<Payload> {
        serde_json::from_slice(&content)
            .map(Payload::Interface)
            .map_err(|e| ModuleError::compile_failure(module.location(), e))
    }
}

/// Blank out a leading `#!` line, keeping its newline so line numbers in
/// diagnostics stay correct
pub fn strip_interpreter_directive(text: &str) -> &str {
    if !text.starts_with("#!") {
        return text;
    }
    match text.find('\n') {
        Some(idx) => &text[idx..],
        None => "",
    }
}
