// ── Core error types ──
//
// User-facing errors from fleetwatch-core. Consumers never see HTTP
// status codes or socket frames directly; the `From<fleetwatch_api::Error>`
// impl translates transport-layer errors into domain variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach backend at {url}: {reason}")]
    ConnectionFailed { url: String, reason: String },

    #[error("Authentication failed: {message}")]
    AuthenticationFailed { message: String },

    #[error("Backend request timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Device not found: {identifier}")]
    DeviceNotFound { identifier: String },

    // ── API errors (wrapped, not exposed raw) ────────────────────────
    #[error("API error: {message}")]
    Api {
        message: String,
        /// Backend error code, e.g. `"42P01"` (undefined table).
        code: Option<String>,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Realtime errors ──────────────────────────────────────────────
    #[error("Change subscription on {record_set} failed: {reason}")]
    SubscriptionFailed { record_set: String, reason: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<fleetwatch_api::Error> for CoreError {
    fn from(err: fleetwatch_api::Error) -> Self {
        use fleetwatch_api::Error as Api;

        match err {
            Api::Authentication { message } => CoreError::AuthenticationFailed { message },
            Api::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout { timeout_secs: 0 }
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        url: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), |u| u.origin().ascii_serialization()),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        code: None,
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            Api::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            Api::Timeout { timeout_secs } => CoreError::Timeout { timeout_secs },
            Api::Tls(msg) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            Api::Rest {
                status,
                code,
                message,
                hint,
            } => CoreError::Api {
                message: match hint {
                    Some(hint) => format!("{message} ({hint})"),
                    None => message,
                },
                code,
                status: Some(status),
            },
            Api::WebSocketConnect(reason) => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("realtime connection failed: {reason}"),
            },
            Api::WebSocketClosed { code, reason } => CoreError::ConnectionFailed {
                url: String::new(),
                reason: format!("realtime socket closed (code {code}): {reason}"),
            },
            Api::RealtimeClosed => CoreError::ConnectionFailed {
                url: String::new(),
                reason: "realtime connection closed".into(),
            },
            Api::ChannelRejected { topic, reason } => CoreError::SubscriptionFailed {
                record_set: topic,
                reason,
            },
            Api::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rest_error_keeps_code_and_hint() {
        let err = CoreError::from(fleetwatch_api::Error::Rest {
            status: 404,
            code: Some("42P01".into()),
            message: "relation does not exist".into(),
            hint: Some("check table name".into()),
        });
        match err {
            CoreError::Api {
                message,
                code,
                status,
            } => {
                assert_eq!(message, "relation does not exist (check table name)");
                assert_eq!(code.as_deref(), Some("42P01"));
                assert_eq!(status, Some(404));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn channel_rejection_is_subscription_failure() {
        let err = CoreError::from(fleetwatch_api::Error::ChannelRejected {
            topic: "realtime:devices:0".into(),
            reason: "denied".into(),
        });
        assert!(matches!(err, CoreError::SubscriptionFailed { .. }));
    }
}
