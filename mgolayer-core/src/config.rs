//! Connection configuration.
//!
//! [`Config`] mirrors the JSON connection record used by deployments:
//!
//! ```json
//! {
//!   "uri": "mongodb://db.internal:27017",
//!   "auth": { "authSource": "admin", "username": "svc", "password": "p%40ss" },
//!   "connectTimeoutMS": 10000,
//!   "maxPoolSize": 50,
//!   "readPreference": { "mode": "secondaryPreferred", "maxStalenessMS": 90000 }
//! }
//! ```
//!
//! Unset or zero fields take their defaults through the accessor methods.

use std::time::Duration;

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};

use crate::error::{MgoError, MgoResult};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_MAX_POOL_SIZE: u32 = 100;
pub const DEFAULT_MIN_POOL_SIZE: u32 = 0;

/// Authentication settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Credential {
    pub auth_mechanism: String,
    pub auth_source: String,
    pub username: String,
    pub password: String,
    /// Set when the mechanism takes a password that may be empty, such as GSSAPI.
    pub password_set: bool,
}

/// A [`Credential`] whose username and password have been validated and percent-decoded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedCredential {
    pub mechanism: Option<String>,
    pub source: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub password_set: bool,
}

fn query_unescape(raw: &str) -> Option<String> {
    let spaced = raw.replace('+', " ");
    let bytes = spaced.as_bytes();
    for (i, byte) in bytes.iter().enumerate() {
        if *byte == b'%' {
            let escape = bytes.get(i + 1..i + 3)?;
            if !escape.iter().all(u8::is_ascii_hexdigit) {
                return None;
            }
        }
    }

    percent_decode_str(&spaced)
        .decode_utf8()
        .ok()
        .map(|decoded| decoded.into_owned())
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_owned())
}

impl Credential {
    /// Validates and decodes the credential.
    ///
    /// # Errors
    ///
    /// - [`MgoError::NotSupportedUsername`] if the username contains `/` or is not valid
    ///   percent-encoding.
    /// - [`MgoError::NotSupportedPassword`] if the password contains `:` or `/` or is not valid
    ///   percent-encoding.
    pub fn resolve(&self) -> MgoResult<ResolvedCredential> {
        let username = if self.username.is_empty() {
            None
        } else {
            if self.username.contains('/') {
                return Err(MgoError::NotSupportedUsername);
            }
            Some(query_unescape(&self.username).ok_or(MgoError::NotSupportedUsername)?)
        };

        let password = if self.password.is_empty() {
            None
        } else {
            if self.password.contains(':') || self.password.contains('/') {
                return Err(MgoError::NotSupportedPassword);
            }
            Some(query_unescape(&self.password).ok_or(MgoError::NotSupportedPassword)?)
        };

        Ok(ResolvedCredential {
            mechanism: non_empty(&self.auth_mechanism),
            source: non_empty(&self.auth_source),
            username,
            password,
            password_set: self.password_set,
        })
    }
}

/// Server selection mode for reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReadMode {
    #[default]
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReadPref {
    #[serde(rename = "maxStalenessMS")]
    pub max_staleness_ms: u64,
    pub mode: ReadMode,
}

impl ReadPref {
    /// Maximum replication lag for a secondary to be eligible, `None` when unset.
    pub fn max_staleness(&self) -> Option<Duration> {
        (self.max_staleness_ms != 0).then(|| Duration::from_millis(self.max_staleness_ms))
    }
}

/// Connection configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Connection string, also the key for on-connected callbacks.
    pub uri: String,
    pub auth: Option<Credential>,
    #[serde(rename = "connectTimeoutMS")]
    pub connect_timeout_ms: Option<u64>,
    pub max_pool_size: Option<u32>,
    pub min_pool_size: Option<u32>,
    #[serde(rename = "socketTimeoutMS")]
    pub socket_timeout_ms: Option<u64>,
    pub read_preference: Option<ReadPref>,
}

impl Config {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            ..Default::default()
        }
    }

    pub fn from_json(json: &str) -> MgoResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Connect timeout; `None` when explicitly disabled with `0`.
    pub fn connect_timeout(&self) -> Option<Duration> {
        match self.connect_timeout_ms {
            None => Some(DEFAULT_CONNECT_TIMEOUT),
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
        }
    }

    pub fn socket_timeout(&self) -> Duration {
        match self.socket_timeout_ms {
            None | Some(0) => DEFAULT_SOCKET_TIMEOUT,
            Some(ms) => Duration::from_millis(ms),
        }
    }

    pub fn max_pool_size(&self) -> u32 {
        match self.max_pool_size {
            None | Some(0) => DEFAULT_MAX_POOL_SIZE,
            Some(size) => size,
        }
    }

    pub fn min_pool_size(&self) -> u32 {
        self.min_pool_size.unwrap_or(DEFAULT_MIN_POOL_SIZE)
    }

    pub fn read_preference(&self) -> ReadPref {
        self.read_preference.clone().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credential(username: &str, password: &str) -> Credential {
        Credential {
            username: username.into(),
            password: password.into(),
            ..Default::default()
        }
    }

    #[test]
    fn slash_in_username_is_rejected() {
        assert!(matches!(
            credential("team/svc", "secret").resolve(),
            Err(MgoError::NotSupportedUsername)
        ));
    }

    #[test]
    fn colon_or_slash_in_password_is_rejected() {
        assert!(matches!(
            credential("svc", "a:b").resolve(),
            Err(MgoError::NotSupportedPassword)
        ));
        assert!(matches!(
            credential("svc", "a/b").resolve(),
            Err(MgoError::NotSupportedPassword)
        ));
    }

    #[test]
    fn malformed_escapes_are_rejected() {
        assert!(matches!(
            credential("svc%zz", "secret").resolve(),
            Err(MgoError::NotSupportedUsername)
        ));
        assert!(matches!(
            credential("svc", "secret%4").resolve(),
            Err(MgoError::NotSupportedPassword)
        ));
    }

    #[test]
    fn values_are_percent_decoded() {
        let resolved = credential("svc%40corp", "p%40ss+word").resolve().unwrap();
        assert_eq!(resolved.username.as_deref(), Some("svc@corp"));
        assert_eq!(resolved.password.as_deref(), Some("p@ss word"));
        assert_eq!(resolved.mechanism, None);
    }

    #[test]
    fn defaults_apply_to_unset_and_zero_fields() {
        let config = Config::from_json(r#"{ "uri": "mongodb://localhost", "maxPoolSize": 0 }"#)
            .unwrap();

        assert_eq!(config.connect_timeout(), Some(DEFAULT_CONNECT_TIMEOUT));
        assert_eq!(config.socket_timeout(), DEFAULT_SOCKET_TIMEOUT);
        assert_eq!(config.max_pool_size(), DEFAULT_MAX_POOL_SIZE);
        assert_eq!(config.min_pool_size(), 0);
        assert_eq!(config.read_preference().mode, ReadMode::Primary);
    }

    #[test]
    fn zero_connect_timeout_disables_it() {
        let config = Config::from_json(
            r#"{
                "uri": "mongodb://localhost",
                "connectTimeoutMS": 0,
                "socketTimeoutMS": 1500,
                "readPreference": { "mode": "nearest", "maxStalenessMS": 90000 }
            }"#,
        )
        .unwrap();

        assert_eq!(config.connect_timeout(), None);
        assert_eq!(config.socket_timeout(), Duration::from_millis(1500));
        let pref = config.read_preference();
        assert_eq!(pref.mode, ReadMode::Nearest);
        assert_eq!(pref.max_staleness(), Some(Duration::from_secs(90)));
    }
}
