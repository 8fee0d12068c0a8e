use std::ffi::c_char;
use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;

use jsonnet_go_sys as sys;

use crate::bridge::VmHandle;
use crate::buffer::VmBuffer;
use crate::JsonnetVm;

/// A borrowed JSON value owned by libjsonnet.
///
/// These are the arguments passed to native extensions.
#[derive(Copy, Clone)]
pub struct JsonVal<'vm: 'value, 'value> {
    vm: VmHandle,
    value: NonNull<sys::JsonnetJsonValue>,
    _vm: PhantomData<&'vm JsonnetVm>,
    _value: PhantomData<&'value sys::JsonnetJsonValue>,
}

impl<'vm: 'value, 'value> JsonVal<'vm, 'value> {
    /// Borrow a value that belongs to `vm`.
    pub fn new(vm: &'vm JsonnetVm, value: &'value sys::JsonnetJsonValue) -> Self {
        Self {
            vm: vm.handle(),
            value: NonNull::from(value),
            _vm: PhantomData,
            _value: PhantomData,
        }
    }

    /// The raw value pointer.
    pub fn as_raw(&self) -> *const sys::JsonnetJsonValue {
        self.value.as_ptr()
    }

    fn vm_raw(&self) -> *mut sys::JsonnetVm {
        self.vm.as_raw()
    }

    /// Whether this value is `null`.
    pub fn is_null(&self) -> bool {
        unsafe { sys::jsonnet_json_extract_null(self.vm_raw(), self.as_raw()) != 0 }
    }

    /// This value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match unsafe { sys::jsonnet_json_extract_bool(self.vm_raw(), self.as_raw()) } {
            0 => Some(false),
            1 => Some(true),
            _ => None,
        }
    }

    /// This value as a number, if it is one.
    pub fn as_number(&self) -> Option<f64> {
        let mut number = 0.0;
        let found =
            unsafe { sys::jsonnet_json_extract_number(self.vm_raw(), self.as_raw(), &mut number) };

        (found == 1).then_some(number)
    }

    /// This value as a string, if it is one.
    ///
    /// libjsonnet hands out a fresh copy of the string on every call, so this
    /// allocates. The copy is released before returning.
    pub fn extract_string(&self) -> Option<String> {
        let ptr = unsafe { sys::jsonnet_json_extract_string(self.vm_raw(), self.as_raw()) };
        if ptr.is_null() {
            return None;
        }

        // SAFETY: the copy is owned by the caller and comes from the same
        //         allocator jsonnet_realloc releases to.
        let copy = unsafe { VmBuffer::from_raw(self.vm, ptr as *mut c_char) };
        copy.to_str().ok().map(str::to_owned)
    }
}

impl<'vm, 'value> fmt::Debug for JsonVal<'vm, 'value> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            return f.write_str("Null");
        }

        if let Some(b) = self.as_bool() {
            f.debug_tuple("Bool").field(&b).finish()
        } else if let Some(n) = self.as_number() {
            f.debug_tuple("Number").field(&n).finish()
        } else if let Some(s) = self.extract_string() {
            f.debug_tuple("String").field(&s).finish()
        } else {
            f.write_str("<opaque>")
        }
    }
}

/// An owned JSON value, built to be returned from a native extension.
pub struct JsonValue<'vm>(JsonVal<'vm, 'vm>);

impl<'vm> JsonValue<'vm> {
    /// Take ownership of a value.
    ///
    /// # Safety
    /// `value` must have been returned from one of the `jsonnet_json_make_*`
    /// functions on `vm`, and must not be owned by anything else.
    pub unsafe fn from_raw(vm: &'vm JsonnetVm, value: *mut sys::JsonnetJsonValue) -> Self {
        Self(JsonVal::new(vm, unsafe { &*value }))
    }

    /// The raw value pointer.
    pub fn as_raw(&self) -> *const sys::JsonnetJsonValue {
        self.0.as_raw()
    }

    fn as_raw_mut(&mut self) -> *mut sys::JsonnetJsonValue {
        self.0.value.as_ptr()
    }

    /// Give up ownership of the value, e.g. to return it to libjsonnet.
    pub fn into_raw(self) -> *mut sys::JsonnetJsonValue {
        ManuallyDrop::new(self).0.value.as_ptr()
    }

    /// Borrow this value.
    pub fn as_json_val<'value>(&'value self) -> JsonVal<'vm, 'value> {
        self.0
    }

    /// Whether this value is `null`.
    pub fn is_null(&self) -> bool {
        self.0.is_null()
    }

    /// This value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        self.0.as_bool()
    }

    /// This value as a number, if it is one.
    pub fn as_number(&self) -> Option<f64> {
        self.0.as_number()
    }

    /// This value as a string, if it is one.
    pub fn extract_string(&self) -> Option<String> {
        self.0.extract_string()
    }

    /// `null`.
    pub fn null(vm: &'vm JsonnetVm) -> Self {
        unsafe { Self::from_raw(vm, sys::jsonnet_json_make_null(vm.as_raw())) }
    }

    /// A boolean.
    pub fn bool(vm: &'vm JsonnetVm, value: bool) -> Self {
        let value = unsafe { sys::jsonnet_json_make_bool(vm.as_raw(), value.into()) };
        unsafe { Self::from_raw(vm, value) }
    }

    /// A number.
    pub fn number(vm: &'vm JsonnetVm, value: f64) -> Self {
        unsafe { Self::from_raw(vm, sys::jsonnet_json_make_number(vm.as_raw(), value)) }
    }

    /// A string.
    ///
    /// # Panics
    /// Panics if `value` contains a nul byte.
    pub fn string(vm: &'vm JsonnetVm, value: &str) -> Self {
        let value = crate::str_to_cstring(value);
        let value = unsafe { sys::jsonnet_json_make_string(vm.as_raw(), value.as_ptr()) };
        unsafe { Self::from_raw(vm, value) }
    }

    /// An array of the given items.
    ///
    /// # Panics
    /// Panics if any item belongs to a different VM.
    pub fn array<I, V>(vm: &'vm JsonnetVm, items: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: AsJsonVal<'vm>,
    {
        let mut array = unsafe { Self::from_raw(vm, sys::jsonnet_json_make_array(vm.as_raw())) };

        for item in items {
            let item = item.as_json_val();
            assert_same_vm(vm, &item);

            unsafe {
                sys::jsonnet_json_array_append(
                    vm.as_raw(),
                    array.as_raw_mut(),
                    item.as_raw() as *mut _,
                )
            };
        }

        array
    }

    /// An object with the given fields.
    ///
    /// # Panics
    /// Panics if any value belongs to a different VM, or if a key contains a
    /// nul byte.
    pub fn object<I, K, V>(vm: &'vm JsonnetVm, fields: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsJsonVal<'vm>,
    {
        let mut object = unsafe { Self::from_raw(vm, sys::jsonnet_json_make_object(vm.as_raw())) };

        for (key, value) in fields {
            let key = crate::str_to_cstring(key.as_ref());
            let value = value.as_json_val();
            assert_same_vm(vm, &value);

            unsafe {
                sys::jsonnet_json_object_append(
                    vm.as_raw(),
                    object.as_raw_mut(),
                    key.as_ptr(),
                    value.as_raw() as *mut _,
                )
            };
        }

        object
    }
}

fn assert_same_vm(vm: &JsonnetVm, value: &JsonVal<'_, '_>) {
    assert!(
        value.vm == vm.handle(),
        "attempted to insert a JsonValue from a different Jsonnet VM"
    );
}

impl<'vm> Drop for JsonValue<'vm> {
    fn drop(&mut self) {
        unsafe { sys::jsonnet_json_destroy(self.0.vm_raw(), self.0.value.as_ptr()) }
    }
}

impl<'vm> fmt::Debug for JsonValue<'vm> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Types that can be viewed as a [`JsonVal`] belonging to a VM.
pub trait AsJsonVal<'vm> {
    /// Borrow as a [`JsonVal`].
    fn as_json_val<'value>(&'value self) -> JsonVal<'vm, 'value>;
}

impl<'vm> AsJsonVal<'vm> for JsonValue<'vm> {
    fn as_json_val<'value>(&'value self) -> JsonVal<'vm, 'value> {
        self.0
    }
}

impl<'vm, 'a> AsJsonVal<'vm> for JsonVal<'vm, 'a> {
    fn as_json_val<'value>(&'value self) -> JsonVal<'vm, 'value> {
        JsonVal {
            vm: self.vm,
            value: self.value,
            _vm: PhantomData,
            _value: PhantomData,
        }
    }
}

impl<'vm, T> AsJsonVal<'vm> for &T
where
    T: AsJsonVal<'vm> + ?Sized,
{
    fn as_json_val<'value>(&'value self) -> JsonVal<'vm, 'value> {
        (**self).as_json_val()
    }
}
