//! Loads effect text from disk or memory and resolves `#include` targets so
//! the preprocessor only ever deals with already-read `SourceFile`s. Search
//! order is fixed here and nowhere else: caller include paths in list order,
//! then the directory of the including file.
//!
//! Types:
//!
//! - `MacroSet` is the sorted name → value table handed in by the caller.
//! - `ParseOptions` bundles include paths and macros for one parse.
//! - `SourceFile` is one loaded unit with its display name and real path.
//! - `SourceLoader` performs file reads and include lookups.
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use crate::error::{Location, ParseError, ParseErrorKind};

/// Macro definitions keyed by name. Sorted so that iteration (and therefore
/// any hash computed over it) does not depend on insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MacroSet {
    entries: BTreeMap<String, String>,
}

impl MacroSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pairs `names[i]` with `values[i]`; names past the end of `values`
    /// are defined as empty.
    pub fn from_lists<N, V>(names: &[N], values: &[V]) -> Self
    where
        N: AsRef<str>,
        V: AsRef<str>,
    {
        let mut set = Self::new();
        for (index, name) in names.iter().enumerate() {
            let value = values.get(index).map(|v| v.as_ref()).unwrap_or("");
            set.define(name.as_ref(), value);
        }
        set
    }

    /// Parses `NAME` or `NAME=VALUE` the way compiler command lines spell it.
    pub fn define_arg(&mut self, arg: &str) {
        match arg.split_once('=') {
            Some((name, value)) => self.define(name.trim(), value.trim()),
            None => self.define(arg.trim(), ""),
        }
    }

    pub fn define(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(name.into(), value.into());
    }

    pub fn undefine(&mut self, name: &str) -> bool {
        self.entries.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ParseOptions {
    pub include_paths: Vec<PathBuf>,
    pub macros: MacroSet,
}

impl ParseOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_include_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.include_paths.push(path.into());
        self
    }

    pub fn with_macro(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.macros.define(name, value);
        self
    }
}

#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Name used in diagnostics.
    pub name: String,
    /// Canonical path when the source came from disk.
    pub path: Option<PathBuf>,
    pub text: String,
}

impl SourceFile {
    pub fn from_memory(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: None,
            text: text.into(),
        }
    }

    pub fn directory(&self) -> Option<&Path> {
        self.path.as_deref().and_then(Path::parent)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SourceLoader {
    include_paths: Vec<PathBuf>,
}

impl SourceLoader {
    pub fn new(include_paths: Vec<PathBuf>) -> Self {
        Self { include_paths }
    }

    pub fn include_paths(&self) -> &[PathBuf] {
        &self.include_paths
    }

    pub fn load_file(&self, path: &Path) -> Result<SourceFile, ParseError> {
        let name = path.display().to_string();
        read_source(path, name, Location::new(path.display().to_string(), 0))
    }

    /// Candidate paths for `name`, in lookup order.
    pub fn include_candidates(&self, name: &str, including_dir: Option<&Path>) -> Vec<PathBuf> {
        let requested = Path::new(name);
        if requested.is_absolute() {
            return vec![requested.to_path_buf()];
        }
        self.include_paths
            .iter()
            .map(PathBuf::as_path)
            .chain(including_dir)
            .map(|root| root.join(requested))
            .collect()
    }

    pub fn resolve_include(&self, name: &str, including_dir: Option<&Path>) -> Option<PathBuf> {
        self.include_candidates(name, including_dir)
            .into_iter()
            .find(|candidate| {
                debug!(candidate = %candidate.display(), "checking include candidate");
                candidate.is_file()
            })
    }

    pub fn load_include(
        &self,
        name: &str,
        including_dir: Option<&Path>,
        location: &Location,
    ) -> Result<SourceFile, ParseError> {
        let path = self.resolve_include(name, including_dir).ok_or_else(|| {
            ParseError::new(
                location.clone(),
                ParseErrorKind::IncludeNotFound(name.to_string()),
            )
        })?;
        debug!(include = name, resolved = %path.display(), "resolved include");
        read_source(&path, name.to_string(), location.clone())
    }
}

fn read_source(path: &Path, name: String, location: Location) -> Result<SourceFile, ParseError> {
    let io_error = |err: std::io::Error| {
        ParseError::new(
            location.clone(),
            ParseErrorKind::Io {
                path: path.to_path_buf(),
                reason: err.to_string(),
            },
        )
    };
    let text = fs::read_to_string(path).map_err(io_error)?;
    let canonical = fs::canonicalize(path).map_err(io_error)?;
    Ok(SourceFile {
        name,
        path: Some(canonical),
        text,
    })
}
