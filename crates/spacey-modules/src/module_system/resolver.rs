// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright (c) 2025 Pegasus Heavy Industries, LLC

//! Module path resolution
//!
//! Turns a requested identifier plus the requesting module's location into
//! an ordered list of candidate files. Resolution never reads content; the
//! loader probes the candidates in order and the first that exists wins.

use crate::error::{ModuleError, Result};
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

static SCHEME_PREFIX: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^([a-z][a-z0-9+.\-]*):").expect("scheme prefix pattern is valid")
});

/// Prefix that selects a builtin module explicitly
pub const BUILTIN_PREFIX: &str = "node:";

/// Canonical location of a resolved module
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Location {
    uri: String,
    scheme: Option<String>,
}

impl Location {
    /// A filesystem location
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self {
            uri: path.as_ref().to_string_lossy().into_owned(),
            scheme: None,
        }
    }

    /// A location owned by a registered scheme
    pub fn remote(scheme: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            scheme: Some(scheme.into()),
        }
    }

    /// The location string; also the cache key
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Scheme name without the trailing `:`; `None` for files
    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri)
    }
}

/// How an identifier is to be searched for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentifierKind {
    /// Starts with `.`: only the requesting module's directory is searched
    Relative,
    /// Starts with a path separator: only the filesystem root is searched
    Absolute,
    /// Anything else: the configured roots are searched in order
    Bare,
}

/// Module resolver over an ordered list of search roots
#[derive(Debug, Clone, Default)]
pub struct ModuleResolver {
    roots: Vec<PathBuf>,
}

impl ModuleResolver {
    /// Create a resolver searching `roots` in order
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self { roots }
    }

    /// Configured search roots, highest priority first
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Insert a root ahead of all others
    pub fn prepend_root(&mut self, root: impl Into<PathBuf>) {
        self.roots.insert(0, root.into());
    }

    /// Append a root after all others
    pub fn push_root(&mut self, root: impl Into<PathBuf>) {
        self.roots.push(root.into());
    }

    /// Replace the search roots
    pub fn set_roots(&mut self, roots: Vec<PathBuf>) {
        self.roots = roots;
    }

    /// Search roots for `id` requested from `requester` (the requesting
    /// module's location), or from `base_dir` at top level.
    pub fn search_roots(&self, id: &str, requester: Option<&Path>, base_dir: &Path) -> Vec<PathBuf> {
        match classify(id) {
            IdentifierKind::Absolute => vec![PathBuf::from("/")],
            IdentifierKind::Relative => {
                let dir = requester
                    .and_then(Path::parent)
                    .filter(|p| !p.as_os_str().is_empty())
                    .unwrap_or(base_dir);
                vec![dir.to_path_buf()]
            }
            IdentifierKind::Bare => self.roots.clone(),
        }
    }

    /// Ordered candidate list for `id`.
    ///
    /// For every root, for every extension in order: `root/id<ext>` then
    /// `root/id/index<ext>`.
    pub fn candidates(&self, id: &str, roots: &[PathBuf], extensions: &[String]) -> Vec<PathBuf> {
        let relative = id.trim_start_matches('/');
        let mut candidates = Vec::with_capacity(roots.len() * extensions.len() * 2);

        for root in roots {
            let base = root.join(relative);
            for ext in extensions {
                candidates.push(normalize(&append(&base, ext)));
                candidates.push(normalize(&base.join(format!("index{}", ext))));
            }
        }

        candidates
    }
}

/// Validate an identifier and strip any `file:` prefix
pub fn normalize_identifier(id: &str) -> Result<&str> {
    let stripped = id
        .strip_prefix("file://")
        .or_else(|| id.strip_prefix("file:"))
        .unwrap_or(id);

    if stripped.trim().is_empty() || stripped.contains('\0') {
        return Err(ModuleError::InvalidIdentifier(id.to_string()));
    }
    Ok(stripped)
}

/// Classify an identifier by its leading marker
pub fn classify(id: &str) -> IdentifierKind {
    if id.starts_with('/') {
        IdentifierKind::Absolute
    } else if id.starts_with('.') {
        IdentifierKind::Relative
    } else {
        IdentifierKind::Bare
    }
}

/// Scheme prefix of an identifier (`mem` for `mem://x`), if it has one
pub fn scheme_prefix(id: &str) -> Option<&str> {
    SCHEME_PREFIX
        .captures(id)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Lexically normalize a path: drop `.` segments and fold `..`
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() && !out.has_root() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

fn append(base: &Path, ext: &str) -> PathBuf {
    let mut raw = base.as_os_str().to_os_string();
    raw.push(ext);
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exts(list: &[&str]) -> Vec<String> {
        list.iter().map(|e| e.to_string()).collect()
    }

    #[test]
    fn test_candidate_order() {
        let resolver = ModuleResolver::new(vec!["/r1".into(), "/r2".into()]);
        let roots = resolver.search_roots("id", None, Path::new("/cwd"));
        let candidates = resolver.candidates("id", &roots, &exts(&[".a", ".b"]));

        let expected: Vec<PathBuf> = [
            "/r1/id.a",
            "/r1/id/index.a",
            "/r1/id.b",
            "/r1/id/index.b",
            "/r2/id.a",
            "/r2/id/index.a",
            "/r2/id.b",
            "/r2/id/index.b",
        ]
        .iter()
        .map(PathBuf::from)
        .collect();
        assert_eq!(candidates, expected);
    }

    #[test]
    fn test_relative_uses_requester_dir_only() {
        let resolver = ModuleResolver::new(vec!["/lib".into()]);
        let roots = resolver.search_roots("./x", Some(Path::new("/p/q.ext")), Path::new("/cwd"));
        assert_eq!(roots, vec![PathBuf::from("/p")]);

        let candidates = resolver.candidates("./x", &roots, &exts(&[".js"]));
        assert_eq!(
            candidates,
            vec![PathBuf::from("/p/x.js"), PathBuf::from("/p/x/index.js")]
        );
    }

    #[test]
    fn test_relative_parent_segments() {
        let resolver = ModuleResolver::default();
        let roots = resolver.search_roots("../up", Some(Path::new("/p/q/r.js")), Path::new("/"));
        let candidates = resolver.candidates("../up", &roots, &exts(&[".js"]));
        assert_eq!(candidates[0], PathBuf::from("/p/up.js"));
    }

    #[test]
    fn test_top_level_relative_uses_base_dir() {
        let resolver = ModuleResolver::new(vec!["/lib".into()]);
        let roots = resolver.search_roots("./main", None, Path::new("/work"));
        assert_eq!(roots, vec![PathBuf::from("/work")]);
    }

    #[test]
    fn test_absolute_uses_filesystem_root() {
        let resolver = ModuleResolver::new(vec!["/lib".into()]);
        let roots = resolver.search_roots("/opt/m", Some(Path::new("/p/q.js")), Path::new("/"));
        let candidates = resolver.candidates("/opt/m", &roots, &exts(&[".js"]));
        assert_eq!(candidates[0], PathBuf::from("/opt/m.js"));
        assert_eq!(candidates[1], PathBuf::from("/opt/m/index.js"));
    }

    #[test]
    fn test_normalize_identifier() {
        assert_eq!(normalize_identifier("file:///a/b").unwrap(), "/a/b");
        assert_eq!(normalize_identifier("file:./b").unwrap(), "./b");
        assert!(matches!(
            normalize_identifier(""),
            Err(ModuleError::InvalidIdentifier(_))
        ));
        assert!(normalize_identifier("   ").is_err());
    }

    #[test]
    fn test_scheme_prefix() {
        assert_eq!(scheme_prefix("http://example.com/x.js"), Some("http"));
        assert_eq!(scheme_prefix("mem:a"), Some("mem"));
        assert_eq!(scheme_prefix("./a:b"), None);
        assert_eq!(scheme_prefix("lodash"), None);
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("./a"), IdentifierKind::Relative);
        assert_eq!(classify("../a"), IdentifierKind::Relative);
        assert_eq!(classify("/a"), IdentifierKind::Absolute);
        assert_eq!(classify("a/b"), IdentifierKind::Bare);
    }
}
