//! Buffers whose memory is owned by a Jsonnet VM.
//!
//! Every buffer that crosses the C boundary follows a single convention:
//!
//! - it is allocated with `jsonnet_realloc(vm, NULL, len + 1)` on the VM that
//!   asked for it, and always carries a trailing nul byte;
//! - it is released with `jsonnet_realloc(vm, ptr, 0)` on that same VM;
//! - when it is handed to libjsonnet (e.g. returned from the import
//!   trampoline) ownership moves to libjsonnet, which releases it itself.
//!
//! [`VmBuffer`] encodes the first two rules in its constructor and `Drop`
//! impl. [`VmBuffer::into_raw`] and [`VmBuffer::from_raw_parts`] are the only
//! ways to move ownership across the boundary in either direction.

use std::borrow::Cow;
use std::ffi::{c_char, CStr};
use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;

use jsonnet_go_sys as sys;

use crate::bridge::VmHandle;
use crate::JsonnetVm;

/// A nul-terminated byte buffer allocated by a Jsonnet VM.
///
/// The payload may itself contain nul bytes (the contents of an `importbin`
/// for example), so the length is tracked separately from the terminator.
pub struct VmBuffer<'vm> {
    vm: VmHandle,
    ptr: NonNull<c_char>,
    len: usize,
    _vm: PhantomData<&'vm JsonnetVm>,
}

impl<'vm> VmBuffer<'vm> {
    /// Copy `bytes` into a new buffer allocated by `vm`.
    pub fn new(vm: &'vm JsonnetVm, bytes: &[u8]) -> Self {
        unsafe { Self::alloc(vm.handle(), bytes) }
    }

    /// Allocate a buffer on a VM that is only known by its handle.
    ///
    /// # Safety
    /// The VM behind `vm` must outlive `'vm`.
    pub(crate) unsafe fn alloc(vm: VmHandle, bytes: &[u8]) -> Self {
        let mem =
            unsafe { sys::jsonnet_realloc(vm.as_raw(), std::ptr::null_mut(), bytes.len() + 1) };
        let ptr = NonNull::new(mem).expect("jsonnet_realloc returned a null pointer");

        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.as_ptr() as *mut u8, bytes.len());
            *ptr.as_ptr().add(bytes.len()) = 0;
        }

        Self {
            vm,
            ptr,
            len: bytes.len(),
            _vm: PhantomData,
        }
    }

    /// Take ownership of a nul-terminated string allocated by `vm`.
    ///
    /// The length is measured up to the first nul byte.
    ///
    /// # Safety
    /// `ptr` must be non-null, nul-terminated, and have been allocated with
    /// `jsonnet_realloc` on `vm`. Nothing else may release it afterwards, and
    /// the VM must outlive `'vm`.
    pub unsafe fn from_raw(vm: VmHandle, ptr: *mut c_char) -> Self {
        let len = unsafe { CStr::from_ptr(ptr) }.to_bytes().len();
        unsafe { Self::from_raw_parts(vm, ptr, len) }
    }

    /// Take ownership of a buffer of `len` payload bytes (plus terminator)
    /// allocated by `vm`.
    ///
    /// This is the documented way to reclaim buffers produced by
    /// [`import_trampoline`](crate::bridge::import_trampoline) when calling it
    /// directly instead of through libjsonnet.
    ///
    /// # Safety
    /// Same requirements as [`from_raw`](Self::from_raw). In addition, `len`
    /// must not exceed the allocation size minus one.
    pub unsafe fn from_raw_parts(vm: VmHandle, ptr: *mut c_char, len: usize) -> Self {
        debug_assert!(!ptr.is_null());

        Self {
            vm,
            ptr: unsafe { NonNull::new_unchecked(ptr) },
            len,
            _vm: PhantomData,
        }
    }

    /// Give up ownership of the buffer without releasing it.
    pub fn into_raw(self) -> *mut c_char {
        ManuallyDrop::new(self).ptr.as_ptr()
    }

    /// The number of payload bytes, excluding the terminator.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The size of the allocation, including the terminator.
    pub fn capacity(&self) -> usize {
        self.len + 1
    }

    /// The VM this buffer belongs to.
    pub fn vm(&self) -> VmHandle {
        self.vm
    }

    /// A pointer to the start of the nul-terminated buffer.
    pub fn as_ptr(&self) -> *const c_char {
        self.ptr.as_ptr()
    }

    /// The payload bytes.
    pub fn as_bytes(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr() as *const u8, self.len) }
    }

    /// The payload as a `&str`.
    pub fn to_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(self.as_bytes())
    }

    /// The payload as a string, replacing invalid UTF-8.
    pub fn to_string_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(self.as_bytes())
    }
}

impl<'vm> Drop for VmBuffer<'vm> {
    fn drop(&mut self) {
        unsafe {
            sys::jsonnet_realloc(self.vm.as_raw(), self.ptr.as_ptr(), 0);
        }
    }
}

impl<'vm> fmt::Debug for VmBuffer<'vm> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VmBuffer")
            .field("len", &self.len)
            .field("data", &self.to_string_lossy())
            .finish()
    }
}

impl<'vm> AsRef<[u8]> for VmBuffer<'vm> {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}
