//! Detached signing and verification of manifest bytes
//!
//! The signer treats the canonical manifest bytes as opaque: it signs what
//! it is given with an Ed25519 key looked up by fingerprint in a local
//! signer home. The verifier checks the signer against the trusted keyring
//! first (trust, then expiry, then the signature itself), so an archive
//! signed by an unknown key fails on trust before any cryptography runs.

use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;
use zeroize::Zeroize;

use crate::keyring::{TrustedKeyring, TrustLevel, DAYS_WARNING_FOR_KEY_EXPIRY};

/// Signature algorithm identifier recorded in signature blobs
pub const SIGNATURE_ALGORITHM: &str = "Ed25519";

/// Errors from the signing side of the boundary
#[derive(Debug, thiserror::Error)]
pub enum SignError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse signer key file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to encode key file: {0}")]
    Encode(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("signer home directory not found: {0}")]
    HomeNotFound(PathBuf),

    #[error("no signing key with fingerprint {fingerprint} in the signer home")]
    UnknownKey { fingerprint: String },

    #[error("signing key {fingerprint} requires a passphrase")]
    PassphraseRequired { fingerprint: String },

    #[error("wrong passphrase for signing key {fingerprint}")]
    WrongPassphrase { fingerprint: String },

    #[error("signing key {fingerprint} expired at {expired_at}")]
    ExpiredKey {
        fingerprint: String,
        expired_at: DateTime<Utc>,
    },

    #[error("malformed signing key: {0}")]
    InvalidKey(String),
}

/// The signature bytes themselves are bad
#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("archive has no signature blob")]
    Missing,

    #[error("malformed signature blob: {0}")]
    Malformed(String),

    #[error("unsupported signature algorithm '{algorithm}'")]
    UnsupportedAlgorithm { algorithm: String },

    #[error("signature verification failed for signer {fingerprint}")]
    BadSignature { fingerprint: String },
}

/// The signer is not trusted by the keyring
#[derive(Debug, thiserror::Error)]
pub enum TrustError {
    #[error("signer {fingerprint} is not in the trusted keyring")]
    UntrustedSigner { fingerprint: String },

    #[error("signer {fingerprint} has insufficient trust level '{trust}'")]
    InsufficientTrust {
        fingerprint: String,
        trust: TrustLevel,
    },
}

/// The signing key was expired at verification time
#[derive(Debug, thiserror::Error)]
#[error("signing key {fingerprint} expired at {expired_at}; pass allow_expired_signing_key to accept it")]
pub struct ExpiredKeyError {
    pub fingerprint: String,
    pub expired_at: DateTime<Utc>,
}

/// Any verification-side failure, in check order
#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error(transparent)]
    Trust(#[from] TrustError),

    #[error(transparent)]
    ExpiredKey(#[from] ExpiredKeyError),

    #[error(transparent)]
    Signature(#[from] SignatureError),
}

/// A detached signature over canonical manifest bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetachedSignature {
    /// Always "Ed25519" for signatures produced by this crate
    pub signature_algorithm: String,

    /// Base64 signature bytes
    pub signature: String,

    /// SHA-256 fingerprint of the signing public key, hex-encoded
    pub pubkey_fingerprint: String,
}

impl DetachedSignature {
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_json_bytes(bytes: &[u8]) -> Result<Self, SignatureError> {
        serde_json::from_slice(bytes).map_err(|e| SignatureError::Malformed(e.to_string()))
    }
}

/// Compute the SHA-256 fingerprint of an Ed25519 public key
pub fn compute_key_fingerprint(key: &VerifyingKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Generate a new Ed25519 signing key
pub fn generate_signing_key() -> SigningKey {
    SigningKey::generate(&mut rand::rngs::OsRng)
}

/// Encode a verifying key to base64 for storage
pub fn encode_verifying_key(key: &VerifyingKey) -> String {
    BASE64.encode(key.as_bytes())
}

/// Decode a verifying key from base64
pub fn decode_verifying_key(encoded: &str) -> Result<VerifyingKey, SignError> {
    let bytes = BASE64
        .decode(encoded)
        .map_err(|e| SignError::InvalidKey(e.to_string()))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| SignError::InvalidKey("public key must be 32 bytes".to_string()))?;
    VerifyingKey::from_bytes(&bytes).map_err(|e| SignError::InvalidKey(e.to_string()))
}

fn passphrase_digest(passphrase: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(passphrase.as_bytes());
    hex::encode(hasher.finalize())
}

/// On-disk record for one signing key in the signer home
#[derive(Debug, Serialize, Deserialize)]
struct SignerKeyFile {
    fingerprint: String,
    /// Base64 Ed25519 seed
    secret_key: String,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    expires_at: Option<DateTime<Utc>>,
    /// Hex SHA-256 of the passphrase. An access check against accidental
    /// key use, not encryption; the container format never relies on the
    /// signer home being confidential.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    passphrase_sha256: Option<String>,
}

/// A freshly created signing key, with the material callers need to
/// provision the matching keyring entry.
#[derive(Debug)]
pub struct GeneratedKey {
    pub fingerprint: String,
    pub public_key: String,
    pub verifying_key: VerifyingKey,
}

/// A directory of signing key files, one `<fingerprint>.key` per key
#[derive(Debug, Clone)]
pub struct SignerHome {
    dir: PathBuf,
}

impl SignerHome {
    pub fn open(dir: &Path) -> Result<Self, SignError> {
        if !dir.is_dir() {
            return Err(SignError::HomeNotFound(dir.to_path_buf()));
        }
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Generate a key and store it in the home directory.
    pub fn create_key(
        &self,
        expires_at: Option<DateTime<Utc>>,
        passphrase: Option<&str>,
    ) -> Result<GeneratedKey, SignError> {
        let signing_key = generate_signing_key();
        let verifying_key = signing_key.verifying_key();
        let fingerprint = compute_key_fingerprint(&verifying_key);

        let record = SignerKeyFile {
            fingerprint: fingerprint.clone(),
            secret_key: BASE64.encode(signing_key.to_bytes()),
            created_at: Utc::now(),
            expires_at,
            passphrase_sha256: passphrase.map(passphrase_digest),
        };
        let text = toml::to_string_pretty(&record)?;
        std::fs::write(self.key_path(&fingerprint), text)?;

        Ok(GeneratedKey {
            public_key: encode_verifying_key(&verifying_key),
            verifying_key,
            fingerprint,
        })
    }

    fn key_path(&self, fingerprint: &str) -> PathBuf {
        self.dir.join(format!("{fingerprint}.key"))
    }

    /// Sign `message` with the key identified by `fingerprint`.
    pub fn sign(
        &self,
        message: &[u8],
        fingerprint: &str,
        passphrase: Option<&str>,
    ) -> Result<DetachedSignature, SignError> {
        let path = self.key_path(fingerprint);
        if !path.exists() {
            return Err(SignError::UnknownKey {
                fingerprint: fingerprint.to_string(),
            });
        }
        let record: SignerKeyFile = toml::from_str(&std::fs::read_to_string(&path)?)?;

        match (&record.passphrase_sha256, passphrase) {
            (Some(_), None) => {
                return Err(SignError::PassphraseRequired {
                    fingerprint: fingerprint.to_string(),
                })
            }
            (Some(expected), Some(given)) => {
                if *expected != passphrase_digest(given) {
                    return Err(SignError::WrongPassphrase {
                        fingerprint: fingerprint.to_string(),
                    });
                }
            }
            (None, _) => {}
        }

        let now = Utc::now();
        if let Some(expires_at) = record.expires_at {
            if expires_at <= now {
                return Err(SignError::ExpiredKey {
                    fingerprint: fingerprint.to_string(),
                    expired_at: expires_at,
                });
            }
            let days_remaining = (expires_at - now).num_days();
            if days_remaining <= DAYS_WARNING_FOR_KEY_EXPIRY {
                warn!(
                    fingerprint,
                    days_remaining, "signing key expires soon, rotate it"
                );
            }
        }

        let mut seed = BASE64
            .decode(&record.secret_key)
            .map_err(|e| SignError::InvalidKey(e.to_string()))?;
        let seed_array: [u8; 32] = seed
            .as_slice()
            .try_into()
            .map_err(|_| SignError::InvalidKey("secret key must be 32 bytes".to_string()))?;
        let signing_key = SigningKey::from_bytes(&seed_array);
        seed.zeroize();

        let signature: Signature = signing_key.sign(message);
        let actual_fingerprint = compute_key_fingerprint(&signing_key.verifying_key());

        Ok(DetachedSignature {
            signature_algorithm: SIGNATURE_ALGORITHM.to_string(),
            signature: BASE64.encode(signature.to_bytes()),
            pubkey_fingerprint: actual_fingerprint,
        })
    }
}

/// Verify a detached signature over `message` against the trusted keyring.
///
/// Check order is fixed: keyring membership, trust level, key expiry, then
/// the signature itself. Returns the signer fingerprint on success.
pub fn verify_manifest(
    message: &[u8],
    signature: &DetachedSignature,
    keyring: &TrustedKeyring,
    allow_expired_signing_key: bool,
    now: DateTime<Utc>,
) -> Result<String, VerifyError> {
    if signature.signature_algorithm != SIGNATURE_ALGORITHM {
        return Err(SignatureError::UnsupportedAlgorithm {
            algorithm: signature.signature_algorithm.clone(),
        }
        .into());
    }

    let fingerprint = &signature.pubkey_fingerprint;
    let key = keyring
        .get_by_fingerprint(fingerprint)
        .ok_or_else(|| TrustError::UntrustedSigner {
            fingerprint: fingerprint.clone(),
        })?;

    if !key.trust.is_sufficient() {
        return Err(TrustError::InsufficientTrust {
            fingerprint: fingerprint.clone(),
            trust: key.trust,
        }
        .into());
    }

    if let Some(expired_at) = key.expires_at.filter(|at| *at <= now) {
        if allow_expired_signing_key {
            warn!(
                fingerprint = %fingerprint,
                %expired_at,
                "accepting signature from expired key by explicit configuration"
            );
        } else {
            return Err(ExpiredKeyError {
                fingerprint: fingerprint.clone(),
                expired_at,
            }
            .into());
        }
    }

    let sig_bytes = BASE64
        .decode(&signature.signature)
        .map_err(|e| SignatureError::Malformed(e.to_string()))?;
    let sig = Signature::from_slice(&sig_bytes)
        .map_err(|e| SignatureError::Malformed(e.to_string()))?;

    key.verifying_key
        .verify(message, &sig)
        .map_err(|_| SignatureError::BadSignature {
            fingerprint: fingerprint.clone(),
        })?;

    Ok(fingerprint.clone())
}
