//! Error types that cross the public boundary of the crate.
//!
//! Internally we use `anyhow` (`Res<T>`) and attach context as errors propagate. At the boundary
//! of an operation the error is tagged with an `ErrorType` so that callers can decide what to do
//! next, e.g. escalate an authentication failure to a token refresh, or record an API failure
//! against a single intake row and move on.

use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display, Formatter};

/// The internal result type. Use `pub_result` to convert it into a public `Result`.
pub(crate) type Res<T> = anyhow::Result<T>;

/// The public result type.
pub type Result<T> = std::result::Result<T, Error>;

/// The category of a failure. The category decides how a caller reacts to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// Missing or invalid configuration such as client credentials or the intake sheet URL.
    Configuration,
    /// A token or authorization code was rejected by Smartsheet.
    Authentication,
    /// A transport failure: timeout, connection failure, DNS, TLS.
    Network,
    /// A specific Smartsheet API operation failed.
    ApiOperation,
    /// The interactive authorization flow ended without an authorization code.
    FlowAbandoned,
    /// Reading or writing the token store failed.
    Storage,
    /// Anything else.
    Internal,
}

serde_plain::derive_display_from_serialize!(ErrorType);

/// The public error type: an `ErrorType` and the chain of context that led to it.
pub struct Error {
    error_type: ErrorType,
    inner: anyhow::Error,
}

impl Error {
    pub fn new(error_type: ErrorType, inner: impl Into<anyhow::Error>) -> Self {
        Self {
            error_type,
            inner: inner.into(),
        }
    }

    /// Create an error from a message alone.
    pub fn message(error_type: ErrorType, message: impl Display) -> Self {
        Self::new(error_type, anyhow::anyhow!("{message}"))
    }

    pub fn error_type(&self) -> ErrorType {
        self.error_type
    }

    pub fn is(&self, error_type: ErrorType) -> bool {
        self.error_type == error_type
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.inner
    }

    /// Add a layer of context while keeping the `ErrorType`.
    pub fn context(self, context: impl Display + Send + Sync + 'static) -> Self {
        Self {
            error_type: self.error_type,
            inner: self.inner.context(context),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} error: {:#}", self.error_type, self.inner)
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} error: {:?}", self.error_type, self.inner)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

/// Converts an internal `Res<T>` into a public `Result<T>` tagged with an `ErrorType`.
pub(crate) trait IntoResult<T> {
    fn pub_result(self, error_type: ErrorType) -> Result<T>;
}

impl<T> IntoResult<T> for Res<T> {
    fn pub_result(self, error_type: ErrorType) -> Result<T> {
        self.map_err(|e| Error::new(error_type, e))
    }
}
