// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Loader configuration
//!
//! Search roots come from two places: roots configured explicitly, which
//! always win, and roots derived from the environment (`NODE_PATH`
//! entries in listed order, then `$HOME/.node_libraries`).

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Per-user library directory, relative to the home directory
pub const HOME_LIBRARIES: &str = ".node_libraries";

/// Configuration for a [`ModuleLoader`](crate::ModuleLoader)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Explicit search roots, highest priority first
    pub paths: Vec<PathBuf>,

    /// Append roots derived from `NODE_PATH` and `HOME`
    pub inherit_env: bool,

    /// Directory top-level relative identifiers resolve against
    /// (defaults to the working directory)
    pub base_dir: Option<PathBuf>,

    /// Register the default `.js`, `.json` and `.node` handlers
    pub bootstrap: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            inherit_env: true,
            base_dir: None,
            bootstrap: true,
        }
    }
}

impl LoaderConfig {
    /// Configuration seeded from the process environment
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Load a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Configuration with only the given roots and no environment roots
    pub fn isolated(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            inherit_env: false,
            ..Self::default()
        }
    }

    /// Set the base directory
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(dir.into());
        self
    }

    /// Final ordered list of search roots
    pub fn search_roots(&self) -> Vec<PathBuf> {
        if !self.inherit_env {
            return self.paths.clone();
        }
        let home = std::env::var_os("HOME")
            .map(PathBuf::from)
            .or_else(dirs::home_dir);
        let node_path = std::env::var("NODE_PATH").ok();
        self.roots_from_vars(home.as_deref(), node_path.as_deref())
    }

    /// Search roots for the given `HOME` and `NODE_PATH` values
    pub fn roots_from_vars(&self, home: Option<&Path>, node_path: Option<&str>) -> Vec<PathBuf> {
        let mut roots = self.paths.clone();
        if !self.inherit_env {
            return roots;
        }

        if let Some(node_path) = node_path {
            roots.extend(
                node_path
                    .split(':')
                    .filter(|entry| !entry.is_empty())
                    .map(PathBuf::from),
            );
        }
        if let Some(home) = home {
            roots.push(home.join(HOME_LIBRARIES));
        }
        roots
    }
}
