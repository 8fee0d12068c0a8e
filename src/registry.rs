//! Process-wide table of live import contexts.
//!
//! libjsonnet hands the `void *ctx` registered alongside the import callback
//! back to us on every import. Instead of smuggling a pointer to rust data
//! through it, we register the VM and its resolver here and pass an integer
//! token. A token that is not (or no longer) in the table is reported as an
//! error rather than being dereferenced.
//!
//! The lock is only held long enough to clone an entry out. Resolvers run
//! without it, so an import that itself evaluates jsonnet cannot deadlock.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::bridge::{ContextToken, VmHandle};
use crate::import::ImportResolver;
use crate::{Error, Result};

#[derive(Clone)]
pub(crate) struct Entry {
    pub(crate) vm: VmHandle,
    pub(crate) resolver: Arc<dyn ImportResolver>,
}

static CONTEXTS: Lazy<RwLock<HashMap<ContextToken, Entry>>> =
    Lazy::new(|| RwLock::new(HashMap::new()));

pub(crate) fn register(vm: VmHandle, resolver: Arc<dyn ImportResolver>) -> ContextToken {
    let token = ContextToken::next();
    CONTEXTS.write().insert(token, Entry { vm, resolver });

    tracing::debug!(context = %token, vm = ?vm, "registered import context");
    token
}

pub(crate) fn lookup(token: ContextToken) -> Result<Entry> {
    CONTEXTS
        .read()
        .get(&token)
        .cloned()
        .ok_or_else(|| Error::unknown_context(token))
}

/// Remove a context. Returns whether it was live.
pub(crate) fn retire(token: ContextToken) -> bool {
    let removed = CONTEXTS.write().remove(&token).is_some();
    if removed {
        tracing::debug!(context = %token, "retired import context");
    }

    removed
}
