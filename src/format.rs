//! The jsonnet source formatter, as exposed by libjsonnet.

use std::ffi::{c_char, c_int};
use std::path::Path;

use jsonnet_go_sys as sys;

use crate::buffer::VmBuffer;
use crate::{osstr_to_cstring, str_to_cstring, Error, JsonnetVm, Result};

/// How the formatter rewrites string literals.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StringStyle {
    /// Prefer `"double quotes"`.
    Double,
    /// Prefer `'single quotes'`.
    Single,
    /// Leave string literals as written.
    Leave,
}

impl StringStyle {
    fn as_raw(self) -> c_int {
        let c = match self {
            Self::Double => b'd',
            Self::Single => b's',
            Self::Leave => b'l',
        };
        c.into()
    }
}

/// How the formatter rewrites comments.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CommentStyle {
    /// Rewrite comments to `# hash` style.
    Hash,
    /// Rewrite comments to `// slash` style.
    Slash,
    /// Leave comments as written.
    Leave,
}

impl CommentStyle {
    fn as_raw(self) -> c_int {
        let c = match self {
            Self::Hash => b'h',
            Self::Slash => b's',
            Self::Leave => b'l',
        };
        c.into()
    }
}

fn clamp(value: u32) -> c_int {
    c_int::try_from(value).unwrap_or(c_int::MAX)
}

// Formatter settings are stored on the VM and apply to every later format
// call.
impl JsonnetVm {
    /// Set the number of spaces used per indentation level.
    pub fn fmt_indent(&mut self, spaces: u32) {
        unsafe { sys::jsonnet_fmt_indent(self.as_raw(), clamp(spaces)) }
    }

    /// Set the maximum number of consecutive blank lines kept.
    pub fn fmt_max_blank_lines(&mut self, lines: u32) {
        unsafe { sys::jsonnet_fmt_max_blank_lines(self.as_raw(), clamp(lines)) }
    }

    /// Set the preferred style of string literals.
    pub fn fmt_string(&mut self, style: StringStyle) {
        unsafe { sys::jsonnet_fmt_string(self.as_raw(), style.as_raw()) }
    }

    /// Set the preferred style of comments.
    pub fn fmt_comment(&mut self, style: CommentStyle) {
        unsafe { sys::jsonnet_fmt_comment(self.as_raw(), style.as_raw()) }
    }

    /// Whether to add padding inside array brackets: `[ 1, 2 ]`.
    pub fn fmt_pad_arrays(&mut self, value: bool) {
        unsafe { sys::jsonnet_fmt_pad_arrays(self.as_raw(), value.into()) }
    }

    /// Whether to add padding inside object braces: `{ a: 1 }`.
    pub fn fmt_pad_objects(&mut self, value: bool) {
        unsafe { sys::jsonnet_fmt_pad_objects(self.as_raw(), value.into()) }
    }

    /// Whether to strip quotes from field names that don't need them.
    pub fn fmt_pretty_field_names(&mut self, value: bool) {
        unsafe { sys::jsonnet_fmt_pretty_field_names(self.as_raw(), value.into()) }
    }

    /// Whether to sort top-level imports alphabetically.
    pub fn fmt_sort_imports(&mut self, value: bool) {
        unsafe { sys::jsonnet_fmt_sort_imports(self.as_raw(), value.into()) }
    }

    /// Reformat the jsonnet source in `snippet`.
    ///
    /// `filename` is only used in error messages. The code is not evaluated.
    ///
    /// # Errors
    /// Returns an error of kind [`Vm`](crate::ErrorKind::Vm) if the snippet
    /// cannot be parsed, or [`InvalidUtf8`](crate::ErrorKind::InvalidUtf8)
    /// if the output is not valid UTF-8.
    ///
    /// # Panics
    /// Panics if `filename` or `snippet` contain a nul byte.
    pub fn format_snippet(&mut self, filename: impl AsRef<Path>, snippet: &str) -> Result<String> {
        let filename = filename.as_ref();
        let name = osstr_to_cstring(filename.as_os_str());
        let code = str_to_cstring(snippet);

        let _span = tracing::debug_span!("format", file = %filename.display(), snippet = true)
            .entered();

        let mut error: c_int = 0;
        let output = unsafe {
            sys::jsonnet_fmt_snippet(self.as_raw(), name.as_ptr(), code.as_ptr(), &mut error)
        };

        self.format_output(output, error)
    }

    /// Reformat the jsonnet source stored in the file at `filename`.
    ///
    /// # Errors
    /// Returns an error of kind [`Vm`](crate::ErrorKind::Vm) if the file
    /// cannot be read or parsed, or
    /// [`InvalidUtf8`](crate::ErrorKind::InvalidUtf8) if the output is not
    /// valid UTF-8.
    pub fn format_file(&mut self, filename: impl AsRef<Path>) -> Result<String> {
        let filename = filename.as_ref();
        let name = osstr_to_cstring(filename.as_os_str());

        let _span = tracing::debug_span!("format", file = %filename.display(), snippet = false)
            .entered();

        let mut error: c_int = 0;
        let output = unsafe { sys::jsonnet_fmt_file(self.as_raw(), name.as_ptr(), &mut error) };

        self.format_output(output, error)
    }

    fn format_output(&self, output: *mut c_char, error: c_int) -> Result<String> {
        // SAFETY: libjsonnet returns either the formatted source or an error
        //         message, allocated on this VM and now owned by us.
        let output = unsafe { VmBuffer::from_raw(self.handle(), output) };

        if error != 0 {
            tracing::debug!("formatting failed");
            return Err(Error::native(&output));
        }

        // The formatter's trailing newline is part of the source text.
        output.to_str().map(str::to_owned).map_err(Error::utf8)
    }
}
