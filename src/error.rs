//! Error types for ARI operations.
//!
//! All fallible operations in this crate return [`AriResult<T>`].  Errors are
//! classified into two axes for caller convenience:
//!
//! - **Connection errors** ([`AriError::is_connection_error`]) — the event
//!   stream is dead and the caller should call `start()` again.
//! - **Recoverable errors** ([`AriError::is_recoverable`]) — one request
//!   failed but the client is still usable (e.g., a bad argument or a
//!   non-2xx response on a single operation).

use thiserror::Error;

/// Result type alias for ARI operations
pub type AriResult<T> = Result<T, AriError>;

/// Comprehensive error types for ARI operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum AriError {
    /// API description could not be loaded or parsed.
    ///
    /// Carries the URL being fetched and, when the server answered at all,
    /// the HTTP status. Startup aborts on this error; no partially
    /// synthesized operation surface is ever exposed.
    #[error("Spec load failed for {url}{}: {message}", .status.map(|s| format!(" (HTTP {})", s)).unwrap_or_default())]
    SpecLoad {
        url: String,
        status: Option<u16>,
        message: String,
    },

    /// A required parameter was not supplied by the caller.
    ///
    /// Raised before any network I/O.
    #[error("Operation '{operation}' is missing required parameter '{parameter}'")]
    MissingParameter {
        operation: String,
        parameter: String,
    },

    /// A path template placeholder was left unresolved after binding.
    #[error("Operation '{operation}' has unresolved path placeholder '{{{placeholder}}}'")]
    UnresolvedPlaceholder {
        operation: String,
        placeholder: String,
    },

    /// A supplied argument cannot be marshalled into the wire request.
    #[error("Operation '{operation}' parameter '{parameter}': {message}")]
    InvalidParameter {
        operation: String,
        parameter: String,
        message: String,
    },

    /// The named group or operation does not exist in the loaded description.
    #[error("Unknown operation '{group}.{operation}'")]
    UnknownOperation { group: String, operation: String },

    /// The server answered an operation with a non-2xx status.
    ///
    /// The raw body is attached verbatim since failure bodies are not
    /// guaranteed to be well-formed JSON.
    #[error("Request failed with HTTP {status}: {body}")]
    RequestFailed { status: u16, body: String },

    /// HTTP transport failure (connect, send, or read)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket protocol or I/O failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON parsing error
    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    /// URL parsing error
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Event stream could not be opened
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Reconnection attempts exhausted; the supervisor is now Closed
    #[error("Gave up reconnecting after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    /// Event stream is not connected
    #[error("Not connected to ARI event stream")]
    NotConnected,

    /// The client was stopped and must be started again
    #[error("Event stream is closed")]
    Closed,

    /// A malformed event frame was received.
    ///
    /// Never fatal to the stream; surfaced as a side-channel notification.
    #[error("Frame decode error: {message}")]
    FrameDecode { message: String },
}

impl AriError {
    pub fn spec_load(
        url: impl Into<String>,
        status: Option<u16>,
        message: impl Into<String>,
    ) -> Self {
        Self::SpecLoad {
            url: url.into(),
            status,
            message: message.into(),
        }
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn frame_decode(message: impl Into<String>) -> Self {
        Self::FrameDecode {
            message: message.into(),
        }
    }

    /// `true` if the client is still usable and the caller can retry the call.
    ///
    /// Recoverable: binding errors, unknown operations, non-2xx responses,
    /// frame decode errors. Non-recoverable errors (spec load, stream-open
    /// failure, retries exhausted) mean startup failed or the stream is dead.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            AriError::MissingParameter { .. }
                | AriError::UnresolvedPlaceholder { .. }
                | AriError::InvalidParameter { .. }
                | AriError::UnknownOperation { .. }
                | AriError::RequestFailed { .. }
                | AriError::FrameDecode { .. }
        )
    }

    /// `true` if the event stream is dead and `start()` must be called again.
    ///
    /// Matches: `WebSocket`, `Connection`, `RetriesExhausted`,
    /// `NotConnected`, `Closed`.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            AriError::WebSocket(_)
                | AriError::Connection { .. }
                | AriError::RetriesExhausted { .. }
                | AriError::NotConnected
                | AriError::Closed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_load_display_with_status() {
        let err = AriError::spec_load("http://x/resources.json", Some(404), "not found");
        let text = err.to_string();
        assert!(text.contains("http://x/resources.json"));
        assert!(text.contains("404"));
    }

    #[test]
    fn test_spec_load_display_without_status() {
        let err = AriError::spec_load("http://x/resources.json", None, "refused");
        assert!(!err.to_string().contains("HTTP"));
    }

    #[test]
    fn test_binding_errors_are_recoverable() {
        let err = AriError::MissingParameter {
            operation: "originate".into(),
            parameter: "endpoint".into(),
        };
        assert!(err.is_recoverable());
        assert!(!err.is_connection_error());
    }

    #[test]
    fn test_retries_exhausted_is_connection_error() {
        let err = AriError::RetriesExhausted { attempts: 10 };
        assert!(err.is_connection_error());
        assert!(!err.is_recoverable());
    }
}
