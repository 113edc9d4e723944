// ── Device identity types ──
//
// A device has two identifiers with different jobs: `DeviceId` is the
// registry primary key used for lookup and navigation, `DeviceKey` is
// the correlation key telemetry rows carry. Keeping them as distinct
// types makes joining on the wrong one a compile error.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ── DeviceId ────────────────────────────────────────────────────────

/// Registry primary key: a `bigint` identity or a textual (uuid) id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceId {
    Numeric(i64),
    Text(String),
}

impl DeviceId {
    pub fn as_numeric(&self) -> Option<i64> {
        match self {
            Self::Numeric(n) => Some(*n),
            Self::Text(_) => None,
        }
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Numeric(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl FromStr for DeviceId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl From<i64> for DeviceId {
    fn from(n: i64) -> Self {
        Self::Numeric(n)
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        s.trim()
            .parse::<i64>()
            .map_or_else(|_| Self::Text(s.to_owned()), Self::Numeric)
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        match s.trim().parse::<i64>() {
            Ok(n) => Self::Numeric(n),
            Err(_) => Self::Text(s),
        }
    }
}

// ── DeviceKey ───────────────────────────────────────────────────────

/// Correlation key between a device and its telemetry samples.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceKey(String);

impl DeviceKey {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for DeviceKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn device_id_parses_numeric() {
        let id: DeviceId = "42".parse().unwrap();
        assert_eq!(id, DeviceId::Numeric(42));
        assert_eq!(id.as_numeric(), Some(42));
    }

    #[test]
    fn device_id_keeps_uuid_text() {
        let id = DeviceId::from("5f0c1a2e-8d7b-4a8e-9f3a-2b1c0d9e8f7a");
        assert!(matches!(id, DeviceId::Text(_)));
        assert_eq!(id.to_string(), "5f0c1a2e-8d7b-4a8e-9f3a-2b1c0d9e8f7a");
    }

    #[test]
    fn device_id_serializes_untagged() {
        assert_eq!(serde_json::to_value(DeviceId::Numeric(3)).unwrap(), 3);
        assert_eq!(
            serde_json::to_value(DeviceId::Text("ab".into())).unwrap(),
            "ab"
        );
    }

    #[test]
    fn device_key_is_transparent() {
        let key: DeviceKey = serde_json::from_str("\"a1b2\"").unwrap();
        assert_eq!(key.as_str(), "a1b2");
        assert_eq!(serde_json::to_string(&key).unwrap(), "\"a1b2\"");
    }
}
