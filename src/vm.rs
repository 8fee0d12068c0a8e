use std::collections::BTreeMap;
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::fmt;
use std::iter::FusedIterator;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;

#[cfg(feature = "json")]
use ::serde::{de::DeserializeOwned, Serialize};
use jsonnet_go_sys as sys;

use crate::bridge::{self, ContextToken, ImportReply, VmHandle};
use crate::buffer::VmBuffer;
use crate::import::{FnResolver, ImportResolver};
use crate::value::{JsonVal, JsonValue};
use crate::{osstr_to_cstring, registry, str_to_cstring, Error, Result, VmConfig};

/// The Jsonnet VM.
///
/// It runs Jsonnet programs and owns the memory of every value involved in
/// them, along with the registered import resolver and native extensions.
///
/// See the [`crate`] documentation for more details.
pub struct JsonnetVm {
    vm: VmHandle,

    /// The resolver answering imports, and the context it is registered
    /// under. Retired when replaced or when the VM is dropped.
    import: Option<ImportSlot>,

    /// Callback data for native callbacks, kept alive as long as the VM.
    native_cb_data: BTreeMap<CString, Box<dyn Send>>,

    // libjsonnet VMs must not be shared between threads.
    _not_sync: PhantomData<*mut ()>,
}

struct ImportSlot {
    token: ContextToken,
    resolver: Arc<dyn ImportResolver>,
}

impl JsonnetVm {
    /// Create a new Jsonnet VM.
    pub fn new() -> Self {
        let vm = unsafe { Self::from_raw(sys::jsonnet_make()) };
        tracing::debug!(vm = ?vm.handle(), "created jsonnet vm");
        vm
    }

    /// Create a new Jsonnet VM and apply `config` to it.
    ///
    /// # Errors
    /// Returns an error if `config` contains values that cannot be passed to
    /// libjsonnet.
    pub fn with_config(config: &VmConfig) -> Result<Self> {
        config.validate()?;

        let mut vm = Self::new();
        config.apply(&mut vm)?;
        Ok(vm)
    }

    /// Create a new `JsonnetVm` from a raw [`sys::JsonnetVm`].
    ///
    /// # Safety
    /// `vm` must have been returned from a [`sys::jsonnet_make`] call and
    /// must not be owned by anything else.
    pub unsafe fn from_raw(vm: *mut sys::JsonnetVm) -> Self {
        debug_assert!(!vm.is_null());

        Self {
            vm: VmHandle::from_non_null(unsafe { NonNull::new_unchecked(vm) }),
            import: None,
            native_cb_data: BTreeMap::new(),
            _not_sync: PhantomData,
        }
    }

    /// Borrow a VM owned by libjsonnet for the duration of a callback.
    ///
    /// # Safety
    /// `vm` must be live for as long as the returned value is used.
    unsafe fn borrowed(vm: VmHandle) -> ManuallyDrop<Self> {
        ManuallyDrop::new(unsafe { Self::from_raw(vm.as_raw()) })
    }

    /// Get the raw [`sys::JsonnetVm`] pointer.
    pub fn as_raw(&self) -> *mut sys::JsonnetVm {
        self.vm.as_raw()
    }

    /// A copyable handle to the underlying VM.
    pub fn handle(&self) -> VmHandle {
        self.vm
    }

    /// Convert this VM in to the raw underlying [`sys::JsonnetVm`] pointer.
    ///
    /// The import context and native callback data stay registered for the
    /// rest of the process, since the VM may keep calling them.
    pub fn into_raw(self) -> *mut sys::JsonnetVm {
        // The callback data has to leak since the VM keeps referencing it.
        ManuallyDrop::new(self).as_raw()
    }

    /// Set the maximum stack depth.
    pub fn max_stack(&mut self, max_stack: u32) {
        unsafe { sys::jsonnet_max_stack(self.as_raw(), max_stack) }
    }

    /// Set the maximum number of stack frames shown in error traces.
    pub fn max_trace(&mut self, max_trace: u32) {
        unsafe { sys::jsonnet_max_trace(self.as_raw(), max_trace) }
    }

    /// Set the number of objects required before a garbage collection cycle is
    /// allowed.
    pub fn gc_min_objects(&mut self, min_objects: u32) {
        unsafe { sys::jsonnet_gc_min_objects(self.as_raw(), min_objects) }
    }

    /// Run the garbage collector after this amount of growth in the number of
    /// objects.
    pub fn gc_growth_trigger(&mut self, value: f64) {
        unsafe { sys::jsonnet_gc_growth_trigger(self.as_raw(), value) }
    }

    // Set per call through `EvaluateOptions`.
    fn string_output(&mut self, value: bool) {
        unsafe { sys::jsonnet_string_output(self.as_raw(), value.into()) }
    }

    /// Resolve imports with `resolver` instead of libjsonnet's filesystem
    /// lookup.
    ///
    /// This replaces any previously registered resolver. The context token of
    /// the old resolver is retired, so late calls through it fail cleanly.
    pub fn import_resolver<R>(&mut self, resolver: R)
    where
        R: ImportResolver + 'static,
    {
        self.import_resolver_shared(Arc::new(resolver));
    }

    /// Like [`import_resolver`](Self::import_resolver), but for a resolver
    /// shared with other VMs.
    pub fn import_resolver_shared(&mut self, resolver: Arc<dyn ImportResolver>) {
        let token = registry::register(self.vm, Arc::clone(&resolver));

        unsafe {
            sys::jsonnet_import_callback(
                self.as_raw(),
                Some(bridge::import_trampoline),
                token.as_ptr(),
            );
        }

        if let Some(old) = self.import.replace(ImportSlot { token, resolver }) {
            registry::retire(old.token);
        }
    }

    /// Set the callback used to locate imports.
    ///
    /// The callback takes the following parameters:
    /// - `base` - The path to the directory containing the code that did the
    ///   import.
    /// - `rel`  - The path imported by the code.
    ///
    /// It should return either a tuple containing the path at which the file
    /// was found, and its contents, or an error message explaining why it could
    /// not be found.
    pub fn import_callback<F, E>(&mut self, cb: F)
    where
        F: Fn(&Path, &Path) -> Result<(PathBuf, Vec<u8>), E>,
        F: Send + Sync + 'static,
        E: fmt::Display + 'static,
    {
        self.import_resolver(FnResolver::new(cb));
    }

    /// The resolver currently answering imports, if one was registered.
    pub fn resolver(&self) -> Option<Arc<dyn ImportResolver>> {
        self.import.as_ref().map(|slot| Arc::clone(&slot.resolver))
    }

    /// The opaque context libjsonnet passes to the import trampoline, if a
    /// resolver was registered.
    pub fn context(&self) -> Option<ContextToken> {
        self.import.as_ref().map(|slot| slot.token)
    }

    /// Resolve an import exactly as the import trampoline would, without
    /// going through an evaluation.
    ///
    /// `success` is set to whether the import resolved. The reply holds the
    /// file contents on success and a non-empty diagnostic on failure. Its
    /// buffers are allocated on this VM and released when it is dropped.
    pub fn call_import(&self, base: &Path, rel: &Path, success: &mut bool) -> ImportReply<'_> {
        let outcome = match &self.import {
            Some(slot) => bridge::resolve(slot.resolver.as_ref(), base, rel),
            None => Err(format!(
                "could not import `{}`: no import resolver is registered with this VM",
                rel.display()
            )),
        };

        // SAFETY: the reply borrows self, so the VM outlives it.
        unsafe { ImportReply::new(self.vm, outcome, success) }
    }

    /// Add a callback to provide a native extension to Jsonnet.
    ///
    /// This will appear in Jsonnet as a function and can be accessed via
    /// `std.native`.
    ///
    /// # Side Effects
    /// Do not register native callbacks with side-effects! Jsonnet is a lazy
    /// functional language and will call your function when you least expect
    /// it, more times than you expect, or not at all.
    ///
    /// # Panics
    /// This function will panic if `name` or any of the parameter names contain
    /// a nul byte.
    pub fn native_callback<'a, F>(
        &mut self,
        name: &str,
        params: impl IntoIterator<Item = &'a str>,
        cb: F,
    ) where
        F: for<'vm> Fn(&'vm JsonnetVm, &[JsonVal<'vm, 'vm>]) -> Result<JsonValue<'vm>, String>,
        F: Send + Sync + 'static,
    {
        struct NativeContext<F> {
            vm: VmHandle,
            cb: F,
        }

        unsafe extern "C" fn callback<F>(
            ctx: *mut c_void,
            argv: *const *const sys::JsonnetJsonValue,
            success: *mut c_int,
        ) -> *mut sys::JsonnetJsonValue
        where
            F: for<'vm> Fn(&'vm JsonnetVm, &[JsonVal<'vm, 'vm>]) -> Result<JsonValue<'vm>, String>,
        {
            let ctx = unsafe { &*(ctx as *const NativeContext<F>) };
            let vm = unsafe { JsonnetVm::borrowed(ctx.vm) };

            let result = std::panic::catch_unwind(AssertUnwindSafe(|| {
                let mut args = Vec::new();

                // SAFETY: argv is a null-terminated array of arguments.
                let mut current = argv;
                unsafe {
                    while !(*current).is_null() {
                        args.push(JsonVal::new(&vm, &**current));
                        current = current.add(1);
                    }
                }

                (ctx.cb)(&vm, &args)
            }));

            let (ok, value) = match result {
                Ok(Ok(value)) => (true, value),
                Ok(Err(message)) => (false, JsonValue::string(&vm, &message)),
                Err(payload) => {
                    let message = bridge::panic_message(payload.as_ref());
                    tracing::warn!(panic = message, "native callback panicked");

                    let message = format!("native callback panicked: {message}");
                    (false, JsonValue::string(&vm, &message))
                }
            };

            unsafe { *success = ok.into() };
            value.into_raw()
        }

        let mut ctx = Box::new(NativeContext { vm: self.vm, cb });

        let name = str_to_cstring(name);
        let params: Vec<_> = params.into_iter().map(str_to_cstring).collect();
        let params: Vec<*const c_char> = params
            .iter()
            .map(|p| p.as_ptr())
            .chain(std::iter::once(std::ptr::null()))
            .collect();

        unsafe {
            sys::jsonnet_native_callback(
                self.as_raw(),
                name.as_ptr(),
                Some(callback::<F>),
                ctx.as_mut() as *mut NativeContext<F> as *mut c_void,
                params.as_ptr(),
            );
        }

        self.native_cb_data.insert(name, ctx);
    }

    /// Bind a jsonnet external variable to the given string.
    ///
    /// See the jsonnet language reference section on [external variables][0]
    /// for more details on external variables.
    ///
    /// [0]: https://jsonnet.org/ref/language.html#external-variables-extvars
    ///
    /// # Panics
    /// This method panics if either of `key` or `value` contain a nul byte.
    pub fn ext_var(&mut self, key: &str, value: &str) {
        let (key, value) = (str_to_cstring(key), str_to_cstring(value));
        unsafe { sys::jsonnet_ext_var(self.as_raw(), key.as_ptr(), value.as_ptr()) }
    }

    /// Bind a jsonnet external variable to the result of the provided code
    /// snippet.
    ///
    /// # Panics
    /// This method panics if either of `key` or `code` contain a nul byte.
    pub fn ext_code(&mut self, key: &str, code: &str) {
        let (key, code) = (str_to_cstring(key), str_to_cstring(code));
        unsafe { sys::jsonnet_ext_code(self.as_raw(), key.as_ptr(), code.as_ptr()) }
    }

    /// Bind a jsonnet external variable to a provided json value.
    ///
    /// # Errors
    /// This method will only return an error if the serialization of `value`
    /// returns an error.
    #[cfg(feature = "json")]
    pub fn ext_json<V>(&mut self, key: &str, value: &V) -> serde_json::Result<()>
    where
        V: Serialize + ?Sized,
    {
        let code = json_code(value)?;
        self.ext_code(key, &code);
        Ok(())
    }

    /// Bind a string top-level argument for a top-level parameter.
    ///
    /// See the jsonnet language reference section on [top-level
    /// arguments][0].
    ///
    /// [0]: https://jsonnet.org/ref/language.html#top-level-arguments-tlas
    ///
    /// # Panics
    /// This method panics if either of `key` or `value` contain a nul byte.
    pub fn tla_var(&mut self, key: &str, value: &str) {
        let (key, value) = (str_to_cstring(key), str_to_cstring(value));
        unsafe { sys::jsonnet_tla_var(self.as_raw(), key.as_ptr(), value.as_ptr()) }
    }

    /// Bind a top-level argument to the output of a code snippet.
    ///
    /// # Panics
    /// This method panics if either of `key` or `code` contain a nul byte.
    pub fn tla_code(&mut self, key: &str, code: &str) {
        let (key, code) = (str_to_cstring(key), str_to_cstring(code));
        unsafe { sys::jsonnet_tla_code(self.as_raw(), key.as_ptr(), code.as_ptr()) }
    }

    /// Bind a jsonnet top-level argument to a provided json value.
    ///
    /// # Errors
    /// This method will only return an error if the serialization of `value`
    /// returns an error.
    #[cfg(feature = "json")]
    pub fn tla_json<V>(&mut self, key: &str, value: &V) -> serde_json::Result<()>
    where
        V: Serialize + ?Sized,
    {
        let code = json_code(value)?;
        self.tla_code(key, &code);
        Ok(())
    }

    /// Add to the default import callback's library search path.
    ///
    /// The search order is last to first, so more recently appended paths take
    /// precedence. This has no effect once a rust resolver is registered; use
    /// [`FileImporter::with_search_path`](crate::FileImporter::with_search_path)
    /// there instead.
    pub fn jpath_add(&mut self, jpath: &Path) {
        let jpath = osstr_to_cstring(jpath.as_os_str());
        unsafe { sys::jsonnet_jpath_add(self.as_raw(), jpath.as_ptr()) }
    }

    /// Evaluate some Jsonnet code.
    ///
    /// Depending on `options` this can either read the jsonnet from a file, or
    /// evaluate a jsonnet snippet.
    ///
    /// # Errors
    /// This function will return an error if:
    /// - the Jsonnet VM encounters an error while evaluating the program, or,
    /// - the resulting string is not valid UTF-8.
    pub fn evaluate(&mut self, options: EvaluateOptions<'_>) -> Result<String> {
        let output = self.evaluate_raw(options)?;
        let output = output.to_str().map_err(Error::utf8)?;

        // libjsonnet always appends a newline. That is harmless for JSON but
        // corrupts string output, so strip it.
        Ok(output.strip_suffix('\n').unwrap_or(output).to_owned())
    }

    /// Evaluate some jsonnet code and parse the resulting json to a rust type.
    ///
    /// This ignores the [`string_output`] setting on `options`.
    ///
    /// # Errors
    /// This function will return an error if:
    /// - the Jsonnet VM encounters an error while evaluating the program, or,
    /// - the resulting JSON could not be parsed as a `T`.
    ///
    /// [`string_output`]: EvaluateOptions::string_output
    #[cfg(feature = "json")]
    pub fn evaluate_json<T>(&mut self, options: EvaluateOptions<'_>) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let json = self.evaluate_raw(options.string_output(false))?;
        serde_json::from_slice(json.as_bytes()).map_err(Error::json)
    }

    /// Evaluate Jsonnet code that produces an object of named JSON documents.
    ///
    /// # Errors
    /// This function will return an error if the jsonnet VM encounters an error
    /// while evaluating the program.
    pub fn evaluate_multi(&mut self, options: EvaluateOptions<'_>) -> Result<MultiIter<'_>> {
        let output = self.run(options, Mode::Multi)?;
        Ok(MultiIter(Records::new(output)))
    }

    /// Evaluate Jsonnet code that produces an array of JSON documents.
    ///
    /// # Errors
    /// This function will return an error if the jsonnet VM encounters an error
    /// while evaluating the program.
    pub fn evaluate_stream(&mut self, options: EvaluateOptions<'_>) -> Result<StreamIter<'_>> {
        let output = self.run(options, Mode::Stream)?;
        Ok(StreamIter(Records::new(output)))
    }

    /// Evaluate some Jsonnet code and return the raw output buffer.
    ///
    /// This is useful when the output may not be valid UTF-8.
    ///
    /// # Errors
    /// This function will return an error if the Jsonnet VM encounters an error
    /// while attempting to run the program.
    pub fn evaluate_raw(&mut self, options: EvaluateOptions<'_>) -> Result<VmBuffer<'_>> {
        self.run(options, Mode::Single)
    }

    /// Evaluate a file containing Jsonnet code.
    ///
    /// # Errors
    /// This function will return an error if:
    /// - the Jsonnet VM encounters an error while evaluating the program, or,
    /// - the resulting string is not valid UTF-8.
    pub fn evaluate_file(&mut self, filename: impl AsRef<Path>) -> Result<String> {
        self.evaluate(EvaluateOptions::new(filename.as_ref()))
    }

    /// Evaluate a Jsonnet snippet.
    ///
    /// The filename provided is used for diagnostics and for resolving imports
    /// within the jsonnet code.
    ///
    /// # Errors
    /// This function will return an error if:
    /// - the Jsonnet VM encounters an error while evaluating the program, or,
    /// - the resulting string is not valid UTF-8.
    pub fn evaluate_snippet(
        &mut self,
        filename: impl AsRef<Path>,
        snippet: &str,
    ) -> Result<String> {
        self.evaluate(EvaluateOptions::new(filename.as_ref()).snippet(snippet))
    }

    fn run(&mut self, options: EvaluateOptions<'_>, mode: Mode) -> Result<VmBuffer<'_>> {
        let filename = osstr_to_cstring(options.filename.as_os_str());
        let snippet = options.snippet.map(str_to_cstring);

        let _span = tracing::debug_span!(
            "evaluate",
            file = %options.filename.display(),
            snippet = snippet.is_some(),
            ?mode,
        )
        .entered();

        if options.string_output {
            self.string_output(true);
        }

        let vm = self.as_raw();
        let file = filename.as_ptr();
        let mut error: c_int = 0;

        let output = unsafe {
            match (&snippet, mode) {
                (Some(code), Mode::Single) => {
                    sys::jsonnet_evaluate_snippet(vm, file, code.as_ptr(), &mut error)
                }
                (Some(code), Mode::Multi) => {
                    sys::jsonnet_evaluate_snippet_multi(vm, file, code.as_ptr(), &mut error)
                }
                (Some(code), Mode::Stream) => {
                    sys::jsonnet_evaluate_snippet_stream(vm, file, code.as_ptr(), &mut error)
                }
                (None, Mode::Single) => sys::jsonnet_evaluate_file(vm, file, &mut error),
                (None, Mode::Multi) => sys::jsonnet_evaluate_file_multi(vm, file, &mut error),
                (None, Mode::Stream) => sys::jsonnet_evaluate_file_stream(vm, file, &mut error),
            }
        };

        if options.string_output {
            self.string_output(false);
        }

        // SAFETY: libjsonnet returns either the output or an error message,
        //         allocated on this VM and now owned by us.
        let output = unsafe { VmBuffer::from_raw(self.vm, output) };

        if error == 0 {
            Ok(output)
        } else {
            tracing::debug!("evaluation failed");
            Err(Error::native(&output))
        }
    }
}

impl Drop for JsonnetVm {
    fn drop(&mut self) {
        if let Some(slot) = self.import.take() {
            registry::retire(slot.token);
        }

        unsafe { sys::jsonnet_destroy(self.as_raw()) }
        tracing::debug!(vm = ?self.vm, "destroyed jsonnet vm");
    }
}

impl Default for JsonnetVm {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for JsonnetVm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonnetVm")
            .field("vm", &self.vm)
            .field("context", &self.context())
            .field("native_callbacks", &self.native_cb_data.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[derive(Copy, Clone, Debug)]
enum Mode {
    Single,
    Multi,
    Stream,
}

/// Options that control details of how jsonnet code is evaluated.
#[derive(Copy, Clone, Debug)]
pub struct EvaluateOptions<'a> {
    filename: &'a Path,
    snippet: Option<&'a str>,
    string_output: bool,
}

impl<'a> EvaluateOptions<'a> {
    /// Create a new set of options for the provided file path.
    pub fn new<P>(filename: &'a P) -> Self
    where
        P: AsRef<Path> + ?Sized,
    {
        Self {
            filename: filename.as_ref(),
            snippet: None,
            string_output: false,
        }
    }

    /// Execute the provided jsonnet snippet instead of loading code from the
    /// filename.
    ///
    /// The filename will still be used for resolving imports and within error
    /// messages.
    pub fn snippet(mut self, snippet: &'a str) -> Self {
        self.snippet = Some(snippet);
        self
    }

    /// If the result of the jsonnet program is a string, then it should be
    /// returned directly without being json-encoded.
    pub fn string_output(mut self, value: bool) -> Self {
        self.string_output = value;
        self
    }
}

/// Walks a buffer of nul-separated strings that ends with an empty string,
/// as returned by the `_multi` and `_stream` evaluation functions.
struct Records<'a> {
    buf: VmBuffer<'a>,
    off: *const c_char,
}

impl<'a> Records<'a> {
    fn new(buf: VmBuffer<'a>) -> Self {
        let off = buf.as_ptr();
        Self { buf, off }
    }

    fn next(&mut self) -> Option<&CStr> {
        let record = unsafe { CStr::from_ptr(self.off) };
        if record.is_empty() {
            return None;
        }

        self.off = unsafe { self.off.add(record.to_bytes().len() + 1) };
        Some(record)
    }
}

fn to_utf8(s: &CStr) -> &str {
    s.to_str().expect("jsonnet output contained invalid UTF-8")
}

/// Iterator over the `(filename, json)` pairs returned by
/// [`JsonnetVm::evaluate_multi`].
///
/// [`next_raw`](MultiIter::next_raw) and [`next_lending`](MultiIter::next_lending)
/// give access to the values without copying them.
pub struct MultiIter<'a>(Records<'a>);

impl<'a> MultiIter<'a> {
    /// Get the next entry in the returned list.
    pub fn next_raw(&mut self) -> Option<(&CStr, &CStr)> {
        let key = self.0.next()? as *const CStr;
        let val = self.0.next()?;

        // SAFETY: both records point into the same buffer, which is not
        //         modified while the iterator is borrowed.
        Some((unsafe { &*key }, val))
    }

    /// Get the next entry in the returned list as strings.
    ///
    /// # Panics
    /// Panics if either the key or the value contains invalid UTF-8.
    pub fn next_lending(&mut self) -> Option<(&str, &str)> {
        let (key, val) = self.next_raw()?;
        Some((to_utf8(key), to_utf8(val)))
    }

    /// The VM the output belongs to.
    pub fn vm(&self) -> VmHandle {
        self.0.buf.vm()
    }
}

impl<'a> Iterator for MultiIter<'a> {
    type Item = (String, String);

    fn next(&mut self) -> Option<Self::Item> {
        let (key, val) = self.next_lending()?;
        Some((key.to_owned(), val.to_owned()))
    }
}

impl<'a> FusedIterator for MultiIter<'a> {}

/// Iterator over the JSON documents returned by [`JsonnetVm::evaluate_stream`].
pub struct StreamIter<'a>(Records<'a>);

impl<'a> StreamIter<'a> {
    /// Get the next entry in the returned list.
    pub fn next_raw(&mut self) -> Option<&CStr> {
        self.0.next()
    }

    /// Get the next entry in the returned list as a string.
    ///
    /// # Panics
    /// Panics if the entry contains invalid UTF-8.
    pub fn next_lending(&mut self) -> Option<&str> {
        self.next_raw().map(to_utf8)
    }
}

impl<'a> Iterator for StreamIter<'a> {
    type Item = String;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_lending().map(str::to_owned)
    }
}

impl<'a> FusedIterator for StreamIter<'a> {}

#[cfg(feature = "json")]
fn json_code<V>(value: &V) -> serde_json::Result<String>
where
    V: Serialize + ?Sized,
{
    let json = serde_json::to_string(value)?;

    let mut code = String::with_capacity(json.len() + 32);
    code.push_str("std.parseJson(");
    crate::jsonnet_escape(&json, &mut code)?;
    code.push(')');
    Ok(code)
}
