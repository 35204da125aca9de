//! Custom error types for the scan controller.
//!
//! `ScanError` is the single error type returned by every fallible operation in
//! the crate. It is built with `thiserror` so that lower-level failures (socket
//! I/O, configuration parsing) convert into it with `?`.
//!
//! ## Error Hierarchy
//!
//! - **`Validation`**: one or more limit/budget violations found before any
//!   command was compiled. Carries the full list of reasons.
//! - **`Protocol`**: the controller answered the `ERR?` handshake with a
//!   non-zero code, answered with something that is not an integer, or closed
//!   the connection mid-exchange. See [`ProtocolError`].
//! - **`Connection`**: the initial TCP connect failed. This is fatal; there is
//!   no automatic reconnect.
//! - **`NotReady`**: `start()` was requested while the controller was not in
//!   the `Ready` state.
//! - **`Config`** / **`Configuration`**: file/env parsing errors and semantic
//!   errors in an otherwise well-formed configuration.
//! - **`UnknownParameter`** / **`InvalidParameterValue`**: named access to a
//!   scan parameter used a name or value the schema does not accept.

use crate::controller::ScanState;
use thiserror::Error;

/// Convenience alias for results using the crate error type.
pub type ScanResult<T> = std::result::Result<T, ScanError>;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("Parameter checks failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Failed to connect to controller at {addr}: {source}")]
    Connection {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("Unknown scan parameter '{0}'")]
    UnknownParameter(String),

    #[error("Invalid value {value} for scan parameter '{name}': {reason}")]
    InvalidParameterValue {
        name: String,
        value: f64,
        reason: &'static str,
    },

    #[error("Scan is not ready to start (state: {0})")]
    NotReady(ScanState),
}

impl From<figment::Error> for ScanError {
    fn from(value: figment::Error) -> Self {
        ScanError::Config(Box::new(value))
    }
}

/// Failures of the line-oriented request/response exchange with the controller.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("controller reported error {code} ({description})")]
    Controller {
        code: i32,
        description: &'static str,
    },

    #[error("unparsable response to {query}: {response:?}")]
    UnparsableResponse {
        query: &'static str,
        response: String,
    },

    #[error("connection closed by controller")]
    ConnectionClosed,
}

impl ProtocolError {
    /// Build a `Controller` error for a non-zero `ERR?` answer.
    pub fn controller(code: i32) -> Self {
        ProtocolError::Controller {
            code,
            description: describe_gcs_error(code),
        }
    }
}

/// Human readable description of the common GCS error codes.
///
/// Codes outside this table are reported as "unknown error"; the raw number is
/// always logged alongside.
pub fn describe_gcs_error(code: i32) -> &'static str {
    match code {
        0 => "no error",
        1 => "parameter syntax error",
        2 => "unknown command",
        3 => "command length out of limits or command buffer overrun",
        5 => "move attempted on unreferenced axis or with servo off",
        7 => "position out of limits",
        8 => "velocity out of limits",
        10 => "controller was stopped by command",
        15 => "invalid axis identifier",
        17 => "parameter out of range",
        23 => "illegal axis",
        54 => "unknown parameter",
        _ => "unknown error",
    }
}
