//! Declarative VM configuration.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::import::FileImporter;
use crate::{Error, JsonnetVm, Result};

/// Settings applied to a [`JsonnetVm`] before it evaluates anything.
///
/// With the `serde` feature enabled this can be deserialized, e.g. from a
/// tool's config file:
///
/// ```toml
/// max-stack = 200
/// jpath = ["vendor", "lib"]
///
/// [ext-vars]
/// env = "prod"
///
/// [tla-code]
/// replicas = "3"
/// ```
///
/// Unset fields leave libjsonnet's defaults alone.
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default, rename_all = "kebab-case"))]
pub struct VmConfig {
    /// Maximum stack depth.
    pub max_stack: Option<u32>,

    /// Maximum number of stack frames included in error traces.
    pub max_trace: Option<u32>,

    /// Number of objects required before a garbage collection is allowed.
    pub gc_min_objects: Option<u32>,

    /// Growth in the number of objects that triggers a garbage collection.
    pub gc_growth_trigger: Option<f64>,

    /// Library search paths, in increasing order of precedence.
    pub jpath: Vec<PathBuf>,

    /// External variables bound to strings.
    pub ext_vars: BTreeMap<String, String>,

    /// External variables bound to jsonnet code.
    pub ext_code: BTreeMap<String, String>,

    /// Top-level arguments bound to strings.
    pub tla_vars: BTreeMap<String, String>,

    /// Top-level arguments bound to jsonnet code.
    pub tla_code: BTreeMap<String, String>,
}

impl VmConfig {
    /// An empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum stack depth.
    pub fn max_stack(mut self, value: u32) -> Self {
        self.max_stack = Some(value);
        self
    }

    /// Set the maximum number of frames in error traces.
    pub fn max_trace(mut self, value: u32) -> Self {
        self.max_trace = Some(value);
        self
    }

    /// Set the number of objects required before a garbage collection is
    /// allowed.
    pub fn gc_min_objects(mut self, value: u32) -> Self {
        self.gc_min_objects = Some(value);
        self
    }

    /// Set the growth in the number of objects that triggers a garbage
    /// collection.
    pub fn gc_growth_trigger(mut self, value: f64) -> Self {
        self.gc_growth_trigger = Some(value);
        self
    }

    /// Append a library search path.
    pub fn jpath(mut self, path: impl Into<PathBuf>) -> Self {
        self.jpath.push(path.into());
        self
    }

    /// Bind an external variable to a string.
    pub fn ext_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ext_vars.insert(key.into(), value.into());
        self
    }

    /// Bind an external variable to jsonnet code.
    pub fn ext_code(mut self, key: impl Into<String>, code: impl Into<String>) -> Self {
        self.ext_code.insert(key.into(), code.into());
        self
    }

    /// Bind a top-level argument to a string.
    pub fn tla_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tla_vars.insert(key.into(), value.into());
        self
    }

    /// Bind a top-level argument to jsonnet code.
    pub fn tla_code(mut self, key: impl Into<String>, code: impl Into<String>) -> Self {
        self.tla_code.insert(key.into(), code.into());
        self
    }

    /// A [`FileImporter`] that searches the configured library paths.
    ///
    /// Register it with [`JsonnetVm::import_resolver`] to resolve imports in
    /// rust with the same search order libjsonnet would use.
    pub fn file_importer(&self) -> FileImporter {
        self.jpath
            .iter()
            .fold(FileImporter::new(), |importer, path| importer.with_search_path(path))
    }

    /// Check that every value can be passed to libjsonnet.
    ///
    /// # Errors
    /// Returns an error of kind
    /// [`InvalidArgument`](crate::ErrorKind::InvalidArgument) naming the first
    /// entry that contains a nul byte.
    pub fn validate(&self) -> Result<()> {
        let tables = [
            ("ext-vars", &self.ext_vars),
            ("ext-code", &self.ext_code),
            ("tla-vars", &self.tla_vars),
            ("tla-code", &self.tla_code),
        ];

        for (table, entries) in tables {
            for (key, value) in entries {
                if key.contains('\0') || value.contains('\0') {
                    return Err(Error::invalid_argument(
                        &format!("{table}.{}", key.escape_debug()),
                        "contains a nul byte",
                    ));
                }
            }
        }

        for path in &self.jpath {
            if path.as_os_str().as_encoded_bytes().contains(&0) {
                return Err(Error::invalid_argument(
                    "jpath",
                    format_args!("{} contains a nul byte", path.display()),
                ));
            }
        }

        Ok(())
    }

    /// Apply these settings to `vm`.
    ///
    /// # Errors
    /// Fails without touching `vm` if [`validate`](Self::validate) fails.
    pub fn apply(&self, vm: &mut JsonnetVm) -> Result<()> {
        self.validate()?;

        if let Some(value) = self.max_stack {
            vm.max_stack(value);
        }
        if let Some(value) = self.max_trace {
            vm.max_trace(value);
        }
        if let Some(value) = self.gc_min_objects {
            vm.gc_min_objects(value);
        }
        if let Some(value) = self.gc_growth_trigger {
            vm.gc_growth_trigger(value);
        }

        for path in &self.jpath {
            vm.jpath_add(path);
        }
        for (key, value) in &self.ext_vars {
            vm.ext_var(key, value);
        }
        for (key, code) in &self.ext_code {
            vm.ext_code(key, code);
        }
        for (key, value) in &self.tla_vars {
            vm.tla_var(key, value);
        }
        for (key, code) in &self.tla_code {
            vm.tla_code(key, code);
        }

        tracing::debug!(vm = ?vm.handle(), "applied vm config");
        Ok(())
    }
}
