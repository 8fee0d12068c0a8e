//! The boundary between libjsonnet's import callback and rust resolvers.
//!
//! Three pieces live here:
//! - [`ImportCallbackFn`], the exact function-pointer shape libjsonnet calls
//!   for every import,
//! - [`ContextToken`] and [`context_vm`], the opaque context registered with
//!   libjsonnet and the accessor that recovers the VM from it,
//! - [`import_trampoline`], the native entry point that runs an
//!   [`ImportResolver`] and hands the result back to libjsonnet.
//!
//! Import failures never unwind across the boundary. They are reported
//! through the callback's return value together with a diagnostic message in
//! the returned buffer.
//!
//! All buffers follow the ownership convention documented in
//! [`buffer`](crate::buffer).

use std::any::Any;
use std::borrow::Cow;
use std::ffi::{c_char, c_int, c_void, CStr, OsStr};
use std::fmt;
use std::num::NonZeroUsize;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicUsize, Ordering};

use jsonnet_go_sys as sys;

use crate::buffer::VmBuffer;
use crate::import::{ImportResolver, Resolved};
use crate::{registry, Result};

/// The function signature libjsonnet uses to resolve imports.
///
/// Parameters, in order: the opaque context, the directory of the importing
/// file, the imported path as written, an out-pointer for the path the file
/// was found at, an out-pointer for the result buffer, and an out-pointer for
/// the length of the result buffer. It returns `0` on success and `1` on
/// failure, in which case the result buffer holds an error message.
pub type ImportCallbackFn = unsafe extern "C" fn(
    ctx: *mut c_void,
    base: *const c_char,
    rel: *const c_char,
    found_here: *mut *mut c_char,
    buf: *mut *mut c_char,
    buflen: *mut usize,
) -> c_int;

// Fails to compile if the trampoline drifts from the shape in libjsonnet.h.
const _: sys::JsonnetImportCallback = Some(import_trampoline as ImportCallbackFn);

/// Return value of an [`ImportCallbackFn`] for a resolved import.
pub const IMPORT_OK: c_int = 0;

/// Return value of an [`ImportCallbackFn`] for a failed import.
pub const IMPORT_FAILED: c_int = 1;

/// A copyable handle to a native `JsonnetVm`.
///
/// Holding a handle does not keep the VM alive. It is only an address that
/// can be passed back to libjsonnet.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct VmHandle(NonNull<sys::JsonnetVm>);

// SAFETY: the handle is only an address; every use of it goes through
//         libjsonnet functions that are safe to call from any thread.
unsafe impl Send for VmHandle {}
unsafe impl Sync for VmHandle {}

impl VmHandle {
    pub(crate) fn from_non_null(vm: NonNull<sys::JsonnetVm>) -> Self {
        Self(vm)
    }

    /// The raw VM pointer.
    pub fn as_raw(self) -> *mut sys::JsonnetVm {
        self.0.as_ptr()
    }
}

impl fmt::Debug for VmHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VmHandle({:p})", self.0)
    }
}

/// The opaque context passed to libjsonnet alongside the import callback.
///
/// This is a token into a process-wide registry rather than a pointer, so a
/// stale or foreign context is detected instead of being dereferenced.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ContextToken(NonZeroUsize);

impl ContextToken {
    pub(crate) fn next() -> Self {
        static NEXT: AtomicUsize = AtomicUsize::new(1);

        let id = NEXT.fetch_add(1, Ordering::Relaxed);
        Self(NonZeroUsize::new(id).expect("import context tokens exhausted"))
    }

    /// Encode this token as the `void *` handed to libjsonnet.
    pub fn as_ptr(self) -> *mut c_void {
        self.0.get() as *mut c_void
    }

    /// Decode a `void *` previously produced by [`as_ptr`](Self::as_ptr).
    ///
    /// Returns `None` for a null pointer. Any other value decodes, whether or
    /// not it names a live context; [`context_vm`] decides that.
    pub fn from_ptr(ptr: *mut c_void) -> Option<Self> {
        NonZeroUsize::new(ptr as usize).map(Self)
    }
}

impl fmt::Display for ContextToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Recover the VM that an opaque import context belongs to.
///
/// This does not allocate and has no side effects: for a live context it
/// returns the same handle every time.
///
/// # Errors
/// Returns an error of kind [`UnknownContext`] if the token was never
/// registered, or if its VM has since been dropped or had its import
/// callback replaced.
///
/// [`UnknownContext`]: crate::ErrorKind::UnknownContext
pub fn context_vm(ctx: ContextToken) -> Result<VmHandle> {
    registry::lookup(ctx).map(|entry| entry.vm)
}

/// The buffers produced by a single import.
///
/// On success this holds the file contents and the path they were found at.
/// On failure it holds only a diagnostic message. Dropping the reply releases
/// the buffers back to the VM; [`into_raw_parts`](Self::into_raw_parts)
/// transfers them to the caller instead.
#[derive(Debug)]
pub struct ImportReply<'vm> {
    success: bool,
    found_here: Option<VmBuffer<'vm>>,
    buf: VmBuffer<'vm>,
}

impl<'vm> ImportReply<'vm> {
    /// Marshal a resolution outcome into VM-owned buffers.
    ///
    /// # Safety
    /// The VM behind `vm` must outlive `'vm`.
    pub(crate) unsafe fn new(
        vm: VmHandle,
        outcome: std::result::Result<Resolved, String>,
        success: &mut bool,
    ) -> Self {
        let outcome = outcome.and_then(|resolved| {
            let found = resolved.found_at.as_os_str().as_encoded_bytes();
            if found.contains(&0) {
                return Err(format!(
                    "import resolved to a path containing a nul byte: {}",
                    resolved.found_at.display()
                ));
            }

            Ok(resolved)
        });

        let reply = match outcome {
            Ok(resolved) => {
                let found = resolved.found_at.as_os_str().as_encoded_bytes();

                Self {
                    success: true,
                    found_here: Some(unsafe { VmBuffer::alloc(vm, found) }),
                    buf: unsafe { VmBuffer::alloc(vm, &resolved.contents) },
                }
            }
            Err(message) => Self {
                success: false,
                found_here: None,
                buf: unsafe { VmBuffer::alloc(vm, message.as_bytes()) },
            },
        };

        *success = reply.success;
        reply
    }

    /// Whether the import was resolved.
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// The file contents on success, or the diagnostic message on failure.
    pub fn buffer(&self) -> &VmBuffer<'vm> {
        &self.buf
    }

    /// The contents of the buffer as bytes.
    pub fn as_bytes(&self) -> &[u8] {
        self.buf.as_bytes()
    }

    /// The buffer interpreted as a message, replacing invalid UTF-8.
    pub fn message(&self) -> Cow<'_, str> {
        self.buf.to_string_lossy()
    }

    /// The path the import was found at. Only present on success.
    pub fn found_here(&self) -> Option<&VmBuffer<'vm>> {
        self.found_here.as_ref()
    }

    /// Hand the buffers over in libjsonnet's shape: `(found_here, buf,
    /// buflen)`.
    ///
    /// `found_here` is null on failure. On success `buflen` is the length of
    /// the contents; on failure it also counts the nul terminator of the
    /// message. Ownership of both buffers moves to the caller, who must
    /// release them with `jsonnet_realloc(vm, ptr, 0)` (or by rebuilding a
    /// [`VmBuffer`] with [`VmBuffer::from_raw_parts`]).
    pub fn into_raw_parts(self) -> (*mut c_char, *mut c_char, usize) {
        let buflen = if self.success {
            self.buf.len()
        } else {
            self.buf.capacity()
        };

        let found_here = match self.found_here {
            Some(found) => found.into_raw(),
            None => std::ptr::null_mut(),
        };

        (found_here, self.buf.into_raw(), buflen)
    }
}

/// Run `resolver`, turning failures and panics into a diagnostic message.
pub(crate) fn resolve(
    resolver: &dyn ImportResolver,
    base: &Path,
    rel: &Path,
) -> std::result::Result<Resolved, String> {
    let _span = tracing::debug_span!("import", base = %base.display(), rel = %rel.display()).entered();

    let result = std::panic::catch_unwind(AssertUnwindSafe(|| resolver.resolve(base, rel)));

    match result {
        Ok(Ok(resolved)) => {
            tracing::debug!(
                found_at = %resolved.found_at.display(),
                len = resolved.contents.len(),
                "import resolved"
            );
            Ok(resolved)
        }
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "import failed");

            let message = e.to_string();
            if message.is_empty() {
                Err(format!("could not import `{}`", rel.display()))
            } else {
                Err(message)
            }
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::warn!(panic = message, "import resolver panicked");

            Err(format!("import callback panicked: {message}"))
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else {
        "Box<dyn Any>"
    }
}

/// The native entry point registered with `jsonnet_import_callback`.
///
/// Looks up the VM and resolver behind `ctx`, resolves `rel` relative to
/// `base`, and writes the outcome through the out-pointers as described on
/// [`ImportCallbackFn`]. On success `*found_here` and `*buf` are set and
/// [`IMPORT_OK`] is returned. On failure only `*buf` is set, to a
/// nul-terminated message, and [`IMPORT_FAILED`] is returned.
///
/// The buffers are allocated on the VM behind `ctx` and are owned by the
/// caller afterwards. libjsonnet frees them itself; anyone else calling this
/// function must release them with `jsonnet_realloc(vm, ptr, 0)`.
///
/// If `ctx` does not name a live context there is no VM to allocate a
/// message on, so `*buf` is set to null and [`IMPORT_FAILED`] is returned.
///
/// # Safety
/// `base` and `rel` must be valid nul-terminated strings, and the three
/// out-pointers must be valid for writes.
pub unsafe extern "C" fn import_trampoline(
    ctx: *mut c_void,
    base: *const c_char,
    rel: *const c_char,
    found_here: *mut *mut c_char,
    buf: *mut *mut c_char,
    buflen: *mut usize,
) -> c_int {
    let entry = match ContextToken::from_ptr(ctx).map(registry::lookup) {
        Some(Ok(entry)) => entry,
        Some(Err(e)) => {
            tracing::error!(error = %e, "import requested for an unknown context");
            return unsafe { fail_without_vm(buf, buflen) };
        }
        None => {
            tracing::error!("import requested with a null context");
            return unsafe { fail_without_vm(buf, buflen) };
        }
    };

    let base = unsafe { CStr::from_ptr(base) };
    let rel = unsafe { CStr::from_ptr(rel) };

    let outcome = match (path_from_bytes(base.to_bytes()), path_from_bytes(rel.to_bytes())) {
        (Ok(base), Ok(rel)) => resolve(entry.resolver.as_ref(), base, rel),
        (Err(e), _) => Err(format!("base path contained invalid utf8: {e}")),
        (_, Err(e)) => Err(format!("relative path contained invalid utf8: {e}")),
    };

    let mut success = false;
    // SAFETY: libjsonnet only calls us while the VM is alive, and ownership
    //         of the buffers passes to it before we return.
    let reply = unsafe { ImportReply::new(entry.vm, outcome, &mut success) };
    let (found, data, len) = reply.into_raw_parts();

    unsafe {
        if success {
            *found_here = found;
        }
        *buf = data;
        *buflen = len;
    }

    if success {
        IMPORT_OK
    } else {
        IMPORT_FAILED
    }
}

unsafe fn fail_without_vm(buf: *mut *mut c_char, buflen: *mut usize) -> c_int {
    unsafe {
        *buf = std::ptr::null_mut();
        *buflen = 0;
    }

    IMPORT_FAILED
}

#[cfg(unix)]
pub(crate) fn path_from_bytes(bytes: &[u8]) -> std::result::Result<&Path, std::str::Utf8Error> {
    use std::os::unix::ffi::OsStrExt;

    Ok(Path::new(OsStr::from_bytes(bytes)))
}

#[cfg(not(unix))]
pub(crate) fn path_from_bytes(bytes: &[u8]) -> std::result::Result<&Path, std::str::Utf8Error> {
    let path = std::str::from_utf8(bytes)?;
    Ok(Path::new(OsStr::new(path)))
}
