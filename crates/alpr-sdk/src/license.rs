//! Device runtime keys and license tokens.
//!
//! The runtime key is a stable SHA-256 fingerprint of the host. A license
//! token names a runtime key and an optional expiry:
//!
//! ```text
//! ALPR1.<runtime key>.<expiry unix seconds, 0 = never>.<checksum>
//! ```
//!
//! The checksum is an unkeyed SHA-256 over the other fields. It catches
//! corrupted or hand-edited tokens; it is not a signature, and
//! anyone can issue a token that parses.
//!
//! Tokens only gate the classifier features (`klass_*_enabled`); plate
//! recognition itself runs without one.

use std::env;
use std::fs;

use chrono::{DateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::digest::hex;
use crate::error::{AlprError, Result};

const TOKEN_VERSION: &str = "ALPR1";

const MACHINE_ID_FILES: [&str; 2] = ["/etc/machine-id", "/var/lib/dbus/machine-id"];

/// Host properties the runtime key is derived from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceFingerprint {
    pub machine_id: String,
    pub os: String,
    pub arch: String,
}

impl DeviceFingerprint {
    /// Fingerprint of the running host.
    pub fn detect() -> Self {
        let machine_id = MACHINE_ID_FILES
            .iter()
            .filter_map(|path| fs::read_to_string(path).ok())
            .map(|id| id.trim().to_string())
            .find(|id| !id.is_empty())
            .or_else(|| env::var("HOSTNAME").ok().filter(|h| !h.is_empty()))
            .or_else(|| env::var("COMPUTERNAME").ok().filter(|h| !h.is_empty()))
            .unwrap_or_else(|| "unknown".to_string());

        Self {
            machine_id,
            os: env::consts::OS.to_string(),
            arch: env::consts::ARCH.to_string(),
        }
    }

    /// Hex runtime key; identical for identical fingerprints.
    pub fn runtime_key(&self) -> String {
        let mut h = Sha256::new();

        // Domain separators prevent field-boundary collisions
        h.update(b"alpr-runtime-key:v1");
        h.update(b"\nm:");
        h.update(self.machine_id.as_bytes());
        h.update(b"\no:");
        h.update(self.os.as_bytes());
        h.update(b"\na:");
        h.update(self.arch.as_bytes());

        hex::encode(h.finalize().into())
    }
}

/// A parsed license token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LicenseToken {
    runtime_key: String,
    expires_at: Option<i64>,
}

impl LicenseToken {
    /// Token string for `runtime_key`, valid until `expires_at` (or forever).
    pub fn issue(runtime_key: &str, expires_at: Option<DateTime<Utc>>) -> String {
        let expiry = expires_at.map(|t| t.timestamp()).unwrap_or(0);
        format!(
            "{}.{}.{}.{}",
            TOKEN_VERSION,
            runtime_key,
            expiry,
            checksum(runtime_key, expiry)
        )
    }

    pub fn parse(token: &str) -> Result<Self> {
        let parts: Vec<&str> = token.trim().split('.').collect();
        let (version, key, expiry, sum) = match parts.as_slice() {
            [version, key, expiry, sum] => (*version, *key, *expiry, *sum),
            _ => return Err(AlprError::License("malformed license token".to_string())),
        };
        if version != TOKEN_VERSION {
            return Err(AlprError::License(format!(
                "unsupported license token version '{}'",
                version
            )));
        }
        let expiry: i64 = expiry
            .parse()
            .map_err(|_| AlprError::License("malformed license token expiry".to_string()))?;
        if sum != checksum(key, expiry) {
            return Err(AlprError::License("license token checksum mismatch".to_string()));
        }

        Ok(Self {
            runtime_key: key.to_string(),
            expires_at: (expiry != 0).then_some(expiry),
        })
    }

    pub fn runtime_key(&self) -> &str {
        &self.runtime_key
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
            .and_then(|t| Utc.timestamp_opt(t, 0).single())
    }

    /// Check the token against this device at `now`.
    pub fn verify(&self, runtime_key: &str, now: DateTime<Utc>) -> Result<()> {
        if self.runtime_key != runtime_key {
            return Err(AlprError::License(
                "license token was issued for another device".to_string(),
            ));
        }
        if let Some(expiry) = self.expires_at {
            if now.timestamp() >= expiry {
                return Err(AlprError::License(format!(
                    "license token expired at {}",
                    self.expires_at()
                        .map(|t| t.to_rfc3339())
                        .unwrap_or_else(|| expiry.to_string())
                )));
            }
        }
        Ok(())
    }
}

fn checksum(runtime_key: &str, expiry: i64) -> String {
    let mut h = Sha256::new();
    h.update(b"alpr-license:v1");
    h.update(b"\nk:");
    h.update(runtime_key.as_bytes());
    h.update(b"\ne:");
    h.update(expiry.to_be_bytes());
    hex::encode(h.finalize().into())
}

/// Token text from `license_token_data` or `license_token_file`.
fn configured_token(config: &EngineConfig) -> Result<Option<String>> {
    if let Some(data) = &config.license_token_data {
        return Ok(Some(data.clone()));
    }
    match &config.license_token_file {
        Some(path) => fs::read_to_string(path)
            .map(|s| Some(s.trim().to_string()))
            .map_err(|e| AlprError::License(format!("cannot read license token file {}: {}", path, e))),
        None => Ok(None),
    }
}

/// Ensure the configuration may use every feature it enables.
pub(crate) fn check(config: &EngineConfig, runtime_key: &str) -> Result<()> {
    let protected = config.protected_features();

    if protected.is_empty() {
        // Not needed, but surface bad tokens early
        let verified = configured_token(config).and_then(|token| match token {
            Some(token) => LicenseToken::parse(&token)?.verify(runtime_key, Utc::now()),
            None => Ok(()),
        });
        if let Err(e) = verified {
            warn!(error = %e, "ignoring invalid license token");
        }
        return Ok(());
    }

    let token = configured_token(config)?.ok_or_else(|| {
        AlprError::License(format!("{} require a license token", protected.join(", ")))
    })?;
    let token = LicenseToken::parse(&token)?;
    token.verify(runtime_key, Utc::now())?;

    info!(features = %protected.join(","), "license token accepted");
    Ok(())
}
