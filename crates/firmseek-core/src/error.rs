//! Error types for the firmseek-core library.
//!
//! Every fallible operation in the crate returns [`Error`]. Variants that end
//! a device's search carry enough context to be logged at the coordinator
//! boundary without consulting the caller.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for firmseek operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for all firmseek operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Failed to read the configuration file
    #[error("failed to read config '{path}': {source}")]
    ConfigRead {
        /// Path to the configuration file
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Configuration file is not valid YAML for the expected shape
    #[error("failed to parse config '{path}': {source}")]
    ConfigParse {
        /// Path to the configuration file
        path: PathBuf,
        /// Underlying YAML error
        #[source]
        source: serde_yaml::Error,
    },

    /// Configuration parsed but failed validation
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Version string does not follow `V<major>.<minor>.<patch> build <YYMMDD>`
    #[error("invalid version '{input}': {reason}")]
    InvalidVersion {
        /// The offending input
        input: String,
        /// What was wrong with it
        reason: String,
    },

    /// Rotation key is empty or not valid hex
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Failed to read input file
    #[error("failed to read file '{path}': {source}")]
    FileRead {
        /// Path to the file that failed to read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to write output file
    #[error("failed to write file '{path}': {source}")]
    FileWrite {
        /// Path to the file that failed to write
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Reading from a stream being transformed failed
    #[error("failed to read input stream: {0}")]
    StreamRead(#[source] std::io::Error),

    /// Writing a transformed stream failed
    #[error("failed to write output stream: {0}")]
    StreamWrite(#[source] std::io::Error),

    /// Connection-level HTTP failure (no response status available)
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A header value could not be encoded
    #[error("invalid header value for '{name}': {value}")]
    InvalidHeader {
        /// Header name
        name: &'static str,
        /// Rejected value
        value: String,
    },

    /// The service answered with a top-level code that is neither success
    /// nor a throttle notice
    #[error("unexpected response code '{code}' (msg: {message})")]
    ProtocolViolation {
        /// Top-level `code` field
        code: String,
        /// Top-level `msg` field, empty if absent
        message: String,
    },

    /// Response body did not carry the expected fields
    #[error("malformed response payload: {payload}")]
    MalformedPayload {
        /// Raw payload as received
        payload: String,
    },

    /// Non-200 transport status under the `abort` policy
    #[error("transport failure: HTTP status {status}")]
    TransportFailure {
        /// HTTP status code
        status: u16,
    },

    /// Throttle retries exceeded the configured cap
    #[error("still throttled after {attempts} attempts")]
    RetryLimitExceeded {
        /// Total attempts made for the candidate
        attempts: u32,
    },
}

impl Error {
    /// Creates a new config read error
    pub fn config_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::ConfigRead {
            path: path.into(),
            source,
        }
    }

    /// Creates a new config parse error
    pub fn config_parse(path: impl Into<PathBuf>, source: serde_yaml::Error) -> Self {
        Self::ConfigParse {
            path: path.into(),
            source,
        }
    }

    /// Creates a new config validation error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Creates a new version parse error
    pub fn invalid_version(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidVersion {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Creates a new key error
    pub fn invalid_key(msg: impl Into<String>) -> Self {
        Self::InvalidKey(msg.into())
    }

    /// Creates a new file read error
    pub fn file_read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileRead {
            path: path.into(),
            source,
        }
    }

    /// Creates a new file write error
    pub fn file_write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileWrite {
            path: path.into(),
            source,
        }
    }

    /// Creates a new protocol violation error
    pub fn protocol_violation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Creates a new malformed payload error
    pub fn malformed_payload(payload: impl Into<String>) -> Self {
        Self::MalformedPayload {
            payload: payload.into(),
        }
    }

    /// Returns true if rerunning the device could plausibly succeed.
    ///
    /// Contract violations (unexpected codes, malformed payloads) are not
    /// recoverable; transport-level trouble is.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Http(_) | Self::TransportFailure { .. } | Self::RetryLimitExceeded { .. }
        )
    }
}
