use std::fmt;

use crate::bridge::ContextToken;
use crate::buffer::VmBuffer;

/// Result type returned by jsonnet methods.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error type returned by methods within this crate.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct Error(ErrorImpl);

/// The broad category of an [`Error`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// libjsonnet reported an error while evaluating a program.
    Vm,

    /// A string returned by libjsonnet was not valid UTF-8.
    InvalidUtf8,

    /// An opaque context token does not refer to a live VM.
    UnknownContext,

    /// A value passed in could not cross the C boundary (e.g. it contained a
    /// nul byte).
    InvalidArgument,

    /// The jsonnet output could not be deserialized.
    Json,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ErrorImpl {
    #[error("{0}")]
    Vm(String),

    #[error("returned string contained invalid UTF-8")]
    InvalidUtf8(#[source] std::str::Utf8Error),

    #[error("no live jsonnet VM is registered for context {0}")]
    UnknownContext(ContextToken),

    #[error("invalid argument `{name}`: {reason}")]
    InvalidArgument { name: String, reason: String },

    #[cfg(feature = "json")]
    #[error("failed to deserialize json: {0}")]
    Json(#[source] serde_json::Error),
}

impl Error {
    /// The category of this error.
    pub fn kind(&self) -> ErrorKind {
        match &self.0 {
            ErrorImpl::Vm(_) => ErrorKind::Vm,
            ErrorImpl::InvalidUtf8(_) => ErrorKind::InvalidUtf8,
            ErrorImpl::UnknownContext(_) => ErrorKind::UnknownContext,
            ErrorImpl::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            #[cfg(feature = "json")]
            ErrorImpl::Json(_) => ErrorKind::Json,
        }
    }

    pub(crate) fn native(message: &VmBuffer<'_>) -> Self {
        Self(ErrorImpl::Vm(message.to_string_lossy().into_owned()))
    }

    pub(crate) fn utf8(e: std::str::Utf8Error) -> Self {
        Self(ErrorImpl::InvalidUtf8(e))
    }

    pub(crate) fn unknown_context(token: ContextToken) -> Self {
        Self(ErrorImpl::UnknownContext(token))
    }

    pub(crate) fn invalid_argument(name: &str, reason: impl fmt::Display) -> Self {
        Self(ErrorImpl::InvalidArgument {
            name: name.to_owned(),
            reason: reason.to_string(),
        })
    }

    #[cfg(feature = "json")]
    pub(crate) fn json(e: serde_json::Error) -> Self {
        Self(ErrorImpl::Json(e))
    }
}
