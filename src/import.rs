//! Host-side import resolution.
//!
//! libjsonnet calls back into rust every time it evaluates an `import`,
//! `importstr` or `importbin` expression. The callback is answered by an
//! [`ImportResolver`], which is given the directory of the importing file
//! and the path exactly as written in the jsonnet source.

use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};

/// A successfully resolved import.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Resolved {
    /// The path the file was found at.
    ///
    /// libjsonnet uses this both in diagnostics and as the base directory for
    /// any imports made by the imported file.
    pub found_at: PathBuf,

    /// The raw contents of the file.
    pub contents: Vec<u8>,
}

impl Resolved {
    /// Create a new `Resolved` import.
    pub fn new(found_at: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            found_at: found_at.into(),
            contents: contents.into(),
        }
    }
}

impl From<(PathBuf, Vec<u8>)> for Resolved {
    fn from((found_at, contents): (PathBuf, Vec<u8>)) -> Self {
        Self { found_at, contents }
    }
}

/// Why an import could not be resolved.
///
/// The `Display` output is what ends up in the jsonnet error message, so it
/// should make sense to someone reading an evaluation failure.
#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    /// No candidate location contained the file.
    #[error("couldn't open import {:?}: no match locally or in the Jsonnet library paths", .rel)]
    NotFound {
        /// The path as written in the import expression.
        rel: PathBuf,
    },

    /// A candidate existed but could not be read.
    #[error("couldn't open import {}: {source}", .path.display())]
    Io {
        /// The candidate that failed.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// The resolver refused the import for its own reasons.
    #[error("{0}")]
    Rejected(String),
}

impl ImportError {
    /// An import that the resolver refused, with a custom message.
    pub fn rejected(message: impl fmt::Display) -> Self {
        Self::Rejected(message.to_string())
    }

    /// An import that could not be found.
    pub fn not_found(rel: impl Into<PathBuf>) -> Self {
        Self::NotFound { rel: rel.into() }
    }
}

/// Resolves jsonnet imports on behalf of a VM.
///
/// Resolvers are shared between VMs and may be called from any thread that
/// happens to be running an evaluation, so they must be `Send + Sync`. A
/// resolver should not have side effects: jsonnet may import the same file
/// any number of times.
///
/// Any `Fn(&Path, &Path) -> Result<Resolved, ImportError>` is a resolver.
/// For closures with other error types use
/// [`JsonnetVm::import_callback`](crate::JsonnetVm::import_callback).
pub trait ImportResolver: Send + Sync {
    /// Resolve `rel`, as written in a file located in the directory `base`.
    fn resolve(&self, base: &Path, rel: &Path) -> Result<Resolved, ImportError>;
}

impl<F> ImportResolver for F
where
    F: Fn(&Path, &Path) -> Result<Resolved, ImportError> + Send + Sync,
{
    fn resolve(&self, base: &Path, rel: &Path) -> Result<Resolved, ImportError> {
        self(base, rel)
    }
}

/// Adapts a closure returning `(path, contents)` and any displayable error.
pub(crate) struct FnResolver<F, E> {
    cb: F,
    _error: PhantomData<fn() -> E>,
}

impl<F, E> FnResolver<F, E> {
    pub(crate) fn new(cb: F) -> Self {
        Self {
            cb,
            _error: PhantomData,
        }
    }
}

impl<F, E> ImportResolver for FnResolver<F, E>
where
    F: Fn(&Path, &Path) -> Result<(PathBuf, Vec<u8>), E> + Send + Sync,
    E: fmt::Display,
{
    fn resolve(&self, base: &Path, rel: &Path) -> Result<Resolved, ImportError> {
        (self.cb)(base, rel)
            .map(Resolved::from)
            .map_err(ImportError::rejected)
    }
}

/// Resolves imports from the filesystem.
///
/// An import is looked up relative to the importing file first, and then in
/// each library search path. Later search paths take precedence over earlier
/// ones, matching the behaviour of libjsonnet's own importer.
#[derive(Clone, Debug, Default)]
pub struct FileImporter {
    search_paths: Vec<PathBuf>,
}

impl FileImporter {
    /// An importer that only looks next to the importing file.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a library search path.
    pub fn with_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.add_search_path(path);
        self
    }

    /// Append a library search path.
    pub fn add_search_path(&mut self, path: impl Into<PathBuf>) {
        self.search_paths.push(path.into());
    }

    /// The library search paths, in the order they were added.
    pub fn search_paths(&self) -> &[PathBuf] {
        &self.search_paths
    }

    fn candidates(&self, base: &Path, rel: &Path) -> Vec<PathBuf> {
        if rel.is_absolute() {
            return vec![rel.to_path_buf()];
        }

        std::iter::once(base.join(rel))
            .chain(self.search_paths.iter().rev().map(|dir| dir.join(rel)))
            .collect()
    }
}

impl ImportResolver for FileImporter {
    fn resolve(&self, base: &Path, rel: &Path) -> Result<Resolved, ImportError> {
        for candidate in self.candidates(base, rel) {
            // Directories are skipped like missing files so that later search
            // paths still get a chance.
            if !candidate.is_file() {
                continue;
            }

            return match std::fs::read(&candidate) {
                Ok(contents) => {
                    tracing::trace!(path = %candidate.display(), "import found on disk");
                    Ok(Resolved::new(candidate, contents))
                }
                Err(source) => Err(ImportError::Io {
                    path: candidate,
                    source,
                }),
            };
        }

        Err(ImportError::not_found(rel))
    }
}

/// Resolves imports from a fixed in-memory table.
///
/// Entries are matched against the import path exactly as it was written,
/// regardless of which file performed the import.
#[derive(Clone, Debug, Default)]
pub struct MemoryImporter {
    files: BTreeMap<PathBuf, Vec<u8>>,
}

impl MemoryImporter {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file to the table.
    pub fn with_file(mut self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) -> Self {
        self.insert(path, contents);
        self
    }

    /// Add a file to the table, replacing any previous entry.
    pub fn insert(&mut self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) {
        self.files.insert(path.into(), contents.into());
    }

    /// The number of files in the table.
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl ImportResolver for MemoryImporter {
    fn resolve(&self, _base: &Path, rel: &Path) -> Result<Resolved, ImportError> {
        match self.files.get(rel) {
            Some(contents) => Ok(Resolved::new(rel, contents.clone())),
            None => Err(ImportError::not_found(rel)),
        }
    }
}
