//! Trusted key store
//!
//! A keyring is a directory holding one `<name>.pub` file per trusted
//! public key (single-line base64 Ed25519 key) and a `keyring.toml` index
//! assigning each key a fingerprint, a trust level, and an optional expiry.
//! The loader cross-checks every index row against the key file it points
//! at; a fingerprint that does not match the key bytes is a configuration
//! error, not a soft warning.
//!
//! The directory path comes from an explicit argument or from the
//! `MODELSEAL_TRUSTED_KEYS_DIR` environment variable.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use ed25519_dalek::VerifyingKey;
use serde::{Deserialize, Serialize};

use crate::signing::{compute_key_fingerprint, decode_verifying_key};

/// Environment variable naming the trusted keys directory
pub const TRUSTED_KEYS_DIR_ENV: &str = "MODELSEAL_TRUSTED_KEYS_DIR";

/// Index file name inside the keyring directory
pub const KEYRING_INDEX_FILE: &str = "keyring.toml";

/// Default warning window for soon-to-expire keys, in days
pub const DAYS_WARNING_FOR_KEY_EXPIRY: i64 = 30;

/// Errors from loading or validating a keyring
#[derive(Debug, thiserror::Error)]
pub enum KeyringError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse keyring index: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("keyring directory not found: {0}")]
    NotFound(PathBuf),

    #[error("no trusted keys directory configured; pass a path or set MODELSEAL_TRUSTED_KEYS_DIR")]
    EnvNotSet,

    #[error("key '{name}' listed in the index has no key file at {path}")]
    MissingKeyFile { name: String, path: PathBuf },

    #[error("key '{name}' is malformed: {reason}")]
    InvalidKey { name: String, reason: String },

    #[error("fingerprint '{fingerprint}' is not 64 hex characters")]
    InvalidFingerprint { fingerprint: String },

    #[error("key '{name}': index fingerprint {expected} does not match key file ({actual})")]
    FingerprintMismatch {
        name: String,
        expected: String,
        actual: String,
    },

    #[error("duplicate key name '{0}' in index")]
    DuplicateName(String),

    #[error("duplicate fingerprint '{0}' in index")]
    DuplicateFingerprint(String),
}

/// Trust assignment for a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustLevel {
    Ultimate,
    Full,
    Marginal,
    Never,
}

impl TrustLevel {
    /// Whether signatures from this key are accepted
    pub fn is_sufficient(self) -> bool {
        matches!(self, Self::Ultimate | Self::Full)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ultimate => "ultimate",
            Self::Full => "full",
            Self::Marginal => "marginal",
            Self::Never => "never",
        }
    }
}

impl std::fmt::Display for TrustLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of `keyring.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
struct KeyIndexEntry {
    name: String,
    fingerprint: String,
    trust: TrustLevel,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct KeyIndex {
    #[serde(default, rename = "key")]
    keys: Vec<KeyIndexEntry>,
}

/// A loaded, fingerprint-verified trusted key
#[derive(Debug, Clone)]
pub struct TrustedKey {
    pub name: String,
    pub fingerprint: String,
    pub trust: TrustLevel,
    pub expires_at: Option<DateTime<Utc>>,
    pub verifying_key: VerifyingKey,
}

impl TrustedKey {
    /// Days until expiry relative to `now`; `None` means the key never
    /// expires, negative values mean it already has.
    pub fn days_until_expiry(&self, now: DateTime<Utc>) -> Option<i64> {
        self.expires_at.map(|at| (at - now).num_days())
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// Expiry classification for one key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryStatus {
    Ok,
    ExpiresSoon,
    Expired,
}

/// One row of a keyring expiry report
#[derive(Debug, Clone, Serialize)]
pub struct ExpiryReport {
    pub name: String,
    pub fingerprint: String,
    /// `None` for keys that never expire
    pub days_remaining: Option<i64>,
    pub status: ExpiryStatus,
}

/// The set of public keys whose signatures the verifier accepts
#[derive(Debug, Clone)]
pub struct TrustedKeyring {
    keys: Vec<TrustedKey>,
}

impl TrustedKeyring {
    /// Resolve the keyring directory from an explicit path or the
    /// environment variable.
    pub fn resolve_dir(explicit: Option<&Path>) -> Result<PathBuf, KeyringError> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }
        match std::env::var_os(TRUSTED_KEYS_DIR_ENV) {
            Some(dir) => Ok(PathBuf::from(dir)),
            None => Err(KeyringError::EnvNotSet),
        }
    }

    /// Load and validate a keyring directory
    pub fn load(dir: &Path) -> Result<Self, KeyringError> {
        if !dir.is_dir() {
            return Err(KeyringError::NotFound(dir.to_path_buf()));
        }

        let index_path = dir.join(KEYRING_INDEX_FILE);
        if !index_path.exists() {
            return Err(KeyringError::MissingKeyFile {
                name: KEYRING_INDEX_FILE.to_string(),
                path: index_path,
            });
        }
        let index: KeyIndex = toml::from_str(&std::fs::read_to_string(&index_path)?)?;

        let mut names = BTreeSet::new();
        let mut fingerprints = BTreeSet::new();
        let mut keys = Vec::with_capacity(index.keys.len());

        for row in index.keys {
            if !names.insert(row.name.clone()) {
                return Err(KeyringError::DuplicateName(row.name));
            }
            validate_fingerprint(&row.fingerprint)?;
            if !fingerprints.insert(row.fingerprint.clone()) {
                return Err(KeyringError::DuplicateFingerprint(row.fingerprint));
            }

            let key_path = dir.join(format!("{}.pub", row.name));
            if !key_path.exists() {
                return Err(KeyringError::MissingKeyFile {
                    name: row.name,
                    path: key_path,
                });
            }
            let encoded = std::fs::read_to_string(&key_path)?;
            let verifying_key =
                decode_verifying_key(encoded.trim()).map_err(|e| KeyringError::InvalidKey {
                    name: row.name.clone(),
                    reason: e.to_string(),
                })?;

            let actual = compute_key_fingerprint(&verifying_key);
            if actual != row.fingerprint {
                return Err(KeyringError::FingerprintMismatch {
                    name: row.name,
                    expected: row.fingerprint,
                    actual,
                });
            }

            keys.push(TrustedKey {
                name: row.name,
                fingerprint: row.fingerprint,
                trust: row.trust,
                expires_at: row.expires_at,
                verifying_key,
            });
        }

        Ok(Self { keys })
    }

    /// Load from an explicit path, falling back to the environment variable
    pub fn load_default(explicit: Option<&Path>) -> Result<Self, KeyringError> {
        let dir = Self::resolve_dir(explicit)?;
        Self::load(&dir)
    }

    pub fn get_by_fingerprint(&self, fingerprint: &str) -> Option<&TrustedKey> {
        self.keys.iter().find(|k| k.fingerprint == fingerprint)
    }

    pub fn keys(&self) -> &[TrustedKey] {
        &self.keys
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Classify every key against an expiry warning window
    pub fn check_expiry(&self, days_before_warning: i64, now: DateTime<Utc>) -> Vec<ExpiryReport> {
        self.keys
            .iter()
            .map(|key| {
                let days_remaining = key.days_until_expiry(now);
                let status = match days_remaining {
                    Some(days) if days < 0 => ExpiryStatus::Expired,
                    Some(days) if days <= days_before_warning => ExpiryStatus::ExpiresSoon,
                    _ => ExpiryStatus::Ok,
                };
                ExpiryReport {
                    name: key.name.clone(),
                    fingerprint: key.fingerprint.clone(),
                    days_remaining,
                    status,
                }
            })
            .collect()
    }
}

/// Write a `keyring.toml` index for the given rows. Used by provisioning
/// tooling and tests; key files are written separately.
pub fn write_index(
    dir: &Path,
    rows: &[(String, String, TrustLevel, Option<DateTime<Utc>>)],
) -> Result<(), KeyringError> {
    let index = KeyIndex {
        keys: rows
            .iter()
            .map(|(name, fingerprint, trust, expires_at)| KeyIndexEntry {
                name: name.clone(),
                fingerprint: fingerprint.clone(),
                trust: *trust,
                expires_at: *expires_at,
            })
            .collect(),
    };
    let text = toml::to_string_pretty(&index).map_err(|e| {
        KeyringError::InvalidKey {
            name: KEYRING_INDEX_FILE.to_string(),
            reason: e.to_string(),
        }
    })?;
    std::fs::write(dir.join(KEYRING_INDEX_FILE), text)?;
    Ok(())
}

fn validate_fingerprint(fingerprint: &str) -> Result<(), KeyringError> {
    let valid = fingerprint.len() == 64
        && fingerprint.chars().all(|c| c.is_ascii_hexdigit());
    if valid {
        Ok(())
    } else {
        Err(KeyringError::InvalidFingerprint {
            fingerprint: fingerprint.to_string(),
        })
    }
}
