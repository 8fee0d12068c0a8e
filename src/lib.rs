//! Route [go-jsonnet] imports through rust, over the libjsonnet C API.
//!
//! [go-jsonnet]: https://github.com/google/go-jsonnet
//!
//! Every time a jsonnet program evaluates `import`, `importstr` or
//! `importbin`, libjsonnet calls an import callback. This crate lets that
//! callback be any rust [`ImportResolver`]: an in-memory table, a filesystem
//! search, a closure, or something of your own.
//!
//! # Quick Start
//! Create a [`JsonnetVm`], register a resolver, and evaluate.
//!
//! ```
//! # use jsonnet_bridge::{JsonnetVm, EvaluateOptions, MemoryImporter};
//! # fn main() -> anyhow::Result<()> {
//! let mut vm = JsonnetVm::new();
//! vm.import_resolver(
//!     MemoryImporter::new()
//!         .with_file("alien.conf", r#"{ type: "alien", name: "Mork" }"#)
//!         .with_file("human.conf", r#"{ type: "human", name: "Mendy" }"#),
//! );
//!
//! let jsonnet = r#"
//! local a = import "alien.conf";
//! local b = import "human.conf";
//! a.name + b.name
//! "#;
//!
//! let options = EvaluateOptions::new("<example 1>")
//!     .snippet(jsonnet)
//!     .string_output(true);
//! assert_eq!(vm.evaluate(options)?, "MorkMendy");
//! # Ok(())
//! # }
//! ```
//!
//! Closures work too, through [`JsonnetVm::import_callback`]:
//!
//! ```
//! # use jsonnet_bridge::{JsonnetVm, EvaluateOptions};
//! # use std::path::{Path, PathBuf};
//! # fn main() -> anyhow::Result<()> {
//! let mut vm = JsonnetVm::new();
//! vm.import_callback(|base, rel| {
//!     if rel == Path::new("data.libsonnet") {
//!         return Ok((
//!             PathBuf::from("data.libsonnet"),
//!             br#" "Here's the file contents!" "#.to_vec(),
//!         ));
//!     }
//!
//!     Err(format!("could not import `{}`", base.join(rel).display()))
//! });
//!
//! let options = EvaluateOptions::new("<example 2>")
//!     .snippet(r#"local data = import "data.libsonnet"; "the data was: " + data"#)
//!     .string_output(true);
//!
//! assert_eq!(vm.evaluate(options)?, "the data was: Here's the file contents!");
//! # Ok(())
//! # }
//! ```
//!
//! # How the bridge works
//! The pieces that cross the C boundary live in [`bridge`]:
//!
//! - [`bridge::ImportCallbackFn`] is the exact shape libjsonnet calls.
//! - [`bridge::import_trampoline`] is the function registered under that
//!   shape. It runs the resolver and marshals the result back.
//! - The `void *ctx` registered next to it is a [`bridge::ContextToken`], an
//!   index into a process-wide registry rather than a pointer. The accessor
//!   [`bridge::context_vm`] recovers the VM from it, and reports a stale
//!   token as an error instead of dereferencing it.
//!
//! Failures are never signalled by unwinding: a resolver error, or a panic,
//! becomes a failed import with a diagnostic message, which libjsonnet then
//! surfaces as an evaluation error.
//!
//! Buffer ownership across the boundary is fixed by the [`buffer`] module:
//! allocate with `jsonnet_realloc` on the requesting VM, release with
//! `jsonnet_realloc(vm, ptr, 0)` on the same VM.
//!
//! [`JsonnetVm::call_import`] runs the same dispatch directly from rust, which
//! is handy for testing resolvers against the real marshalling.
//!
//! # Configuration
//! [`VmConfig`] collects VM settings (stack limits, library paths, external
//! variables, top-level arguments) and can be deserialized with the `serde`
//! feature.
//!
//! ```
//! # use jsonnet_bridge::{JsonnetVm, VmConfig};
//! # fn main() -> anyhow::Result<()> {
//! let config = VmConfig::new()
//!     .ext_var("color", "purple")
//!     .tla_code("gooselevel", "1234 * 10 + 5");
//!
//! let mut vm = JsonnetVm::with_config(&config)?;
//! let output = vm.evaluate_snippet("<example 3>", "function(gooselevel) gooselevel")?;
//! assert_eq!(output, "12345");
//! # Ok(())
//! # }
//! ```
//!
//! # Native Extensions
//! Rust functions can be exposed to jsonnet through `std.native` with
//! [`JsonnetVm::native_callback`].
//!
//! ```
//! # fn main() -> anyhow::Result<()> {
//! # use jsonnet_bridge::{JsonnetVm, JsonValue};
//! let mut vm = JsonnetVm::new();
//! vm.native_callback("cbrt", ["x"], |vm, args| {
//!     let Some(x) = args.first().and_then(|x| x.as_number()) else {
//!         return Err("expected a single number".into());
//!     };
//!
//!     Ok(JsonValue::number(vm, x.cbrt()))
//! });
//!
//! let output = vm.evaluate_snippet("<example 4>", r#"std.native("cbrt")(8)"#)?;
//! let output: f64 = output.parse()?;
//! assert!((output - 2.0).abs() < 1e-10, "2.0 != {output}");
//! # Ok(())
//! # }
//! ```
//!
//! # Formatting
//! The VM also exposes libjsonnet's source formatter, which reformats code
//! without evaluating it.
//!
//! ```
//! # use jsonnet_bridge::JsonnetVm;
//! # fn main() -> anyhow::Result<()> {
//! let mut vm = JsonnetVm::new();
//! vm.fmt_indent(2);
//!
//! let output = vm.format_snippet("<example 5>", r#"{ "a": 1 }"#)?;
//! assert_eq!(output.trim_end(), "{ a: 1 }");
//! # Ok(())
//! # }
//! ```
//!
//! # Features
//! - `serde` - derives `Deserialize` for [`VmConfig`].
//! - `json`  - enables [`JsonnetVm::evaluate_json`], [`JsonnetVm::tla_json`]
//!   and [`JsonnetVm::ext_json`], which need [`serde_json`].
//!
//! # Logging
//! The crate emits [`tracing`] events: VM lifecycle and every import at
//! `debug`, resolver panics at `warn`, and imports arriving for an unknown
//! context at `error`. No subscriber is installed.
//!
//! # Caveats
//! - Nul bytes in strings passed as parameters result in a panic, except
//!   through [`VmConfig`], which reports them as errors.
//! - Nul bytes in strings returned from the jsonnet VM silently truncate the
//!   output.

#![cfg_attr(docsrs, feature(doc_auto_cfg))]
#![warn(missing_docs)]

use std::ffi::{CStr, CString, OsStr};

use jsonnet_go_sys as sys;

pub mod bridge;
pub mod buffer;
mod config;
mod error;
mod format;
mod import;
mod registry;
mod value;
mod vm;

pub use crate::bridge::{ContextToken, ImportReply, VmHandle};
pub use crate::buffer::VmBuffer;
pub use crate::config::VmConfig;
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::format::{CommentStyle, StringStyle};
pub use crate::import::{FileImporter, ImportError, ImportResolver, MemoryImporter, Resolved};
pub use crate::value::{AsJsonVal, JsonVal, JsonValue};
pub use crate::vm::{EvaluateOptions, JsonnetVm, MultiIter, StreamIter};

/// The version of the underlying libjsonnet.
pub fn version() -> &'static str {
    let version = unsafe { CStr::from_ptr(sys::jsonnet_version()) };
    version.to_str().unwrap_or("unknown")
}

fn str_to_cstring(s: &str) -> CString {
    CString::new(s).expect("string contained a nul byte")
}

fn osstr_to_cstring(s: &OsStr) -> CString {
    match CString::new(s.as_encoded_bytes()) {
        Ok(s) => s,
        Err(e) => panic!("OsStr contained a nul byte: {e}"),
    }
}

/// Escape a string suitably for inserting it into a jsonnet string literal.
#[cfg(feature = "json")]
fn jsonnet_escape(mut input: &str, output: &mut String) -> serde_json::Result<()> {
    use ::serde::ser::Error;

    output.push('"');

    while let Some(index) = input.find(&['\0', '\\', '"'][..]) {
        let (head, rest) = input.split_at(index);
        output.push_str(head);

        match rest.as_bytes()[0] {
            b'\0' => {
                return Err(serde_json::Error::custom(
                    "serialized string contained a nul byte",
                ))
            }
            b'\\' => output.push_str("\\\\"),
            _ => output.push_str("\\\""),
        }

        input = &rest[1..];
    }

    output.push_str(input);
    output.push('"');
    Ok(())
}
