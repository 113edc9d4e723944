// Shared transport configuration for building reqwest::Client instances.
//
// The REST client and the realtime socket share TLS and timeout settings
// through this module, and both authenticate with the same API key.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};

use crate::error::Error;

const USER_AGENT: &str = concat!("fleetwatch/", env!("CARGO_PKG_VERSION"));

/// TLS verification mode (api-level mirror of core's TLS setting).
#[derive(Debug, Clone, Default)]
pub enum TlsMode {
    /// Use the system certificate store.
    #[default]
    System,
    /// Use a custom CA certificate from the given PEM file.
    CustomCa(PathBuf),
    /// Accept any certificate (self-hosted backends with self-signed certs).
    DangerAcceptInvalid,
}

/// Shared transport configuration for building HTTP clients.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub tls: TlsMode,
    pub timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            tls: TlsMode::System,
            timeout: Duration::from_secs(30),
        }
    }
}

impl TransportConfig {
    /// Build a `reqwest::Client` that sends the backend API key on every request.
    ///
    /// The key goes out twice: as the `apikey` header (gateway routing) and as
    /// a bearer token (row-level security evaluation).
    pub fn build_client(&self, api_key: &SecretString) -> Result<reqwest::Client, Error> {
        let mut headers = HeaderMap::new();
        let key = api_key.expose_secret();

        let mut apikey = HeaderValue::from_str(key)
            .map_err(|_| Error::Authentication {
                message: "API key contains characters not allowed in a header".into(),
            })?;
        apikey.set_sensitive(true);
        headers.insert("apikey", apikey);

        let mut bearer = HeaderValue::from_str(&format!("Bearer {key}"))
            .map_err(|_| Error::Authentication {
                message: "API key contains characters not allowed in a header".into(),
            })?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);

        self.build_client_with_headers(headers)
    }

    /// Build a `reqwest::Client` with additional default headers.
    pub fn build_client_with_headers(&self, headers: HeaderMap) -> Result<reqwest::Client, Error> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .user_agent(USER_AGENT)
            .default_headers(headers);

        match &self.tls {
            TlsMode::System => {}
            TlsMode::CustomCa(path) => {
                let cert_pem = std::fs::read(path)
                    .map_err(|e| Error::Tls(format!("failed to read CA cert: {e}")))?;
                let cert = reqwest::Certificate::from_pem(&cert_pem)
                    .map_err(|e| Error::Tls(format!("invalid CA cert: {e}")))?;
                builder = builder.add_root_certificate(cert);
            }
            TlsMode::DangerAcceptInvalid => {
                builder = builder.danger_accept_invalid_certs(true);
            }
        }

        builder
            .build()
            .map_err(|e| Error::Tls(format!("failed to build HTTP client: {e}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_transport_uses_system_roots() {
        let config = TransportConfig::default();
        assert!(matches!(config.tls, TlsMode::System));
        assert_eq!(config.timeout, Duration::from_secs(30));
    }

    #[test]
    fn header_hostile_key_is_rejected() {
        let config = TransportConfig::default();
        let key = SecretString::from("bad\nkey".to_string());
        let err = config.build_client(&key).unwrap_err();
        assert!(matches!(err, Error::Authentication { .. }));
    }

    #[test]
    fn missing_ca_file_is_a_tls_error() {
        let config = TransportConfig {
            tls: TlsMode::CustomCa(PathBuf::from("/nonexistent/ca.pem")),
            ..TransportConfig::default()
        };
        let key = SecretString::from("anon-key".to_string());
        assert!(matches!(config.build_client(&key), Err(Error::Tls(_))));
    }
}
