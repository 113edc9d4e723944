use thiserror::Error;

/// Top-level error type for the `fleetwatch-api` crate.
///
/// Covers every failure mode across both backend surfaces:
/// the PostgREST read interface and the realtime change channels.
/// `fleetwatch-core` maps these into user-facing diagnostics.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// API key rejected (HTTP 401 or a JWT error from PostgREST).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request or channel join timed out.
    #[error("Request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    /// TLS handshake or client construction error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── REST ────────────────────────────────────────────────────────
    /// Structured error body returned by PostgREST.
    #[error("REST error (HTTP {status}): {message}")]
    Rest {
        status: u16,
        /// PostgREST / Postgres error code, e.g. `"PGRST116"` or `"42P01"`.
        code: Option<String>,
        message: String,
        hint: Option<String>,
    },

    // ── Realtime ────────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed unexpectedly.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// The server answered a channel join with an error reply.
    #[error("Channel {topic} rejected: {reason}")]
    ChannelRejected { topic: String, reason: String },

    /// The realtime socket task has shut down; no further joins possible.
    #[error("Realtime connection closed")]
    RealtimeClosed,

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Timeout { .. } | Self::WebSocketConnect(_) => true,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    ///
    /// PostgREST reports an empty singular result as `PGRST116` (HTTP 406).
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Rest { status: 404, .. } => true,
            Self::Rest { code: Some(code), .. } => code == "PGRST116",
            _ => false,
        }
    }

    /// Extract the backend error code, if available.
    pub fn api_error_code(&self) -> Option<&str> {
        match self {
            Self::Rest { code, .. } => code.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn singular_empty_result_is_not_found() {
        let err = Error::Rest {
            status: 406,
            code: Some("PGRST116".into()),
            message: "JSON object requested, multiple (or no) rows returned".into(),
            hint: None,
        };
        assert!(err.is_not_found());
        assert_eq!(err.api_error_code(), Some("PGRST116"));
    }

    #[test]
    fn missing_table_is_not_not_found() {
        let err = Error::Rest {
            status: 400,
            code: Some("42P01".into()),
            message: "relation \"public.devicez\" does not exist".into(),
            hint: None,
        };
        assert!(!err.is_not_found());
        assert!(!err.is_transient());
    }

    #[test]
    fn join_timeout_is_transient() {
        assert!(Error::Timeout { timeout_secs: 10 }.is_transient());
        assert!(!Error::RealtimeClosed.is_transient());
    }
}
