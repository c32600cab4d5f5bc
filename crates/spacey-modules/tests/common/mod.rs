//! Shared fixtures for the loader integration tests
//!
//! Provides a tiny line-oriented script language so module bodies can
//! import, export and fail without a JavaScript engine:
//!
//! ```text
//! # comment
//! import <id> [as <key>]         synchronous import, result stored under <key>
//! try_import <id> as <key>       same, but an error is stored as {"error": ...}
//! import_async <id> as <key>     async import, result stored under <key> on callback
//! export <key> <json>            set one member of the interface
//! exports <json>                 replace the whole interface
//! main as <key>                  store the main module's location under <key>
//! throw <message>                fail with an error
//! ```

#![allow(dead_code)]

use dashmap::DashMap;
use serde_json::{Value, json};
use spacey_modules::{
    CompiledUnit, Evaluator, Host, LoaderConfig, MemorySource, ModuleError, ModuleLoader, Result,
    ScriptSource, UnitArgs,
};
use std::path::PathBuf;
use std::sync::Arc;

enum Line {
    Import { id: String, key: Option<String> },
    TryImport { id: String, key: String },
    ImportAsync { id: String, key: String },
    Export { key: String, value: Value },
    Exports(Value),
    Main { key: String },
    Throw(String),
}

fn parse_line(line: &str) -> std::result::Result<Option<Line>, String> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }

    let (op, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();
    let with_key = |rest: &str| -> (String, Option<String>) {
        if let Some(key) = rest.strip_prefix("as ") {
            return (String::new(), Some(key.trim().to_string()));
        }
        match rest.split_once(" as ") {
            Some((id, key)) => (id.trim().to_string(), Some(key.trim().to_string())),
            None => (rest.to_string(), None),
        }
    };
    let json = |text: &str| serde_json::from_str::<Value>(text).map_err(|e| e.to_string());

    let parsed = match op {
        "import" => {
            let (id, key) = with_key(rest);
            Line::Import { id, key }
        }
        "try_import" | "import_async" => {
            let (id, key) = with_key(rest);
            let key = key.ok_or_else(|| format!("{} needs 'as <key>'", op))?;
            if op == "try_import" {
                Line::TryImport { id, key }
            } else {
                Line::ImportAsync { id, key }
            }
        }
        "export" => {
            let (key, value) = rest
                .split_once(' ')
                .ok_or_else(|| "export needs a key and a value".to_string())?;
            Line::Export {
                key: key.to_string(),
                value: json(value)?,
            }
        }
        "exports" => Line::Exports(json(rest)?),
        "main" => {
            let (_, key) = with_key(rest);
            Line::Main {
                key: key.ok_or_else(|| "main needs 'as <key>'".to_string())?,
            }
        }
        "throw" => Line::Throw(rest.to_string()),
        other => return Err(format!("unknown statement '{}'", other)),
    };
    Ok(Some(parsed))
}

struct LineUnit {
    lines: Vec<Line>,
}

impl CompiledUnit for LineUnit {
    fn call(&self, args: UnitArgs<'_>) -> Result<()> {
        for line in &self.lines {
            match line {
                Line::Import { id, key } => {
                    let value = args.require.import(id)?;
                    if let Some(key) = key {
                        args.exports.insert(key.clone(), value)?;
                    }
                }
                Line::TryImport { id, key } => {
                    let value = args
                        .require
                        .import(id)
                        .unwrap_or_else(|e| json!({ "error": e.to_string() }));
                    args.exports.insert(key.clone(), value)?;
                }
                Line::ImportAsync { id, key } => {
                    let module = Arc::clone(args.module);
                    let key = key.clone();
                    args.require.import_async(id, move |result| {
                        let value = result.unwrap_or_else(|e| json!({ "error": e.to_string() }));
                        let _ = module.set_export(key, value);
                    })?;
                }
                Line::Export { key, value } => args.exports.insert(key.clone(), value.clone())?,
                Line::Exports(value) => args.exports.set(value.clone())?,
                Line::Main { key } => {
                    let main = args
                        .require
                        .main()
                        .map(|m| Value::String(m.location().to_string()))
                        .unwrap_or(Value::Null);
                    args.exports.insert(key.clone(), main)?;
                }
                Line::Throw(message) => return Err(ModuleError::thrown(message.clone())),
            }
        }
        Ok(())
    }
}

/// Evaluator for the line language; counts compilations per location
#[derive(Clone, Default)]
pub struct LineEvaluator {
    compiled: Arc<DashMap<String, usize>>,
}

impl LineEvaluator {
    /// How many times `label` has been compiled
    pub fn compiles(&self, label: &str) -> usize {
        self.compiled.get(label).map(|count| *count).unwrap_or(0)
    }
}

impl Evaluator for LineEvaluator {
    fn compile_unit(&self, source: ScriptSource<'_>) -> Result<Box<dyn CompiledUnit>> {
        *self.compiled.entry(source.label.to_string()).or_insert(0) += 1;

        let mut lines = Vec::new();
        for line in source.body.lines() {
            match parse_line(line) {
                Ok(Some(parsed)) => lines.push(parsed),
                Ok(None) => {}
                Err(message) => return Err(ModuleError::compile_failure(source.label, message)),
            }
        }
        Ok(Box::new(LineUnit { lines }))
    }
}

/// A loader over an in-memory file table
pub struct Fixture {
    pub loader: ModuleLoader,
    pub source: Arc<MemorySource>,
    pub evaluator: LineEvaluator,
}

impl Fixture {
    /// Loader searching `roots`, with `/work` as base directory
    pub fn new(roots: &[&str], files: &[(&str, &str)]) -> Self {
        Self::with_host(roots, files, |host| host)
    }

    /// Like [`Fixture::new`], with a chance to adjust the host
    pub fn with_host(roots: &[&str], files: &[(&str, &str)], adjust: impl FnOnce(Host) -> Host) -> Self {
        let source = Arc::new(MemorySource::new());
        for (path, contents) in files {
            source.insert(*path, contents.to_string());
        }

        let evaluator = LineEvaluator::default();
        let host = adjust(Host::new(evaluator.clone()).with_shared_source(source.clone()));
        let config = LoaderConfig::isolated(roots.iter().map(PathBuf::from).collect())
            .with_base_dir("/work");
        let loader = ModuleLoader::new(config, host).expect("loader");

        Self {
            loader,
            source,
            evaluator,
        }
    }

    /// Compile count for `location`
    pub fn compiles(&self, location: &str) -> usize {
        self.evaluator.compiles(location)
    }
}
