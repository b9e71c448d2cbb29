//! Save and load pipelines
//!
//! The save pipeline decomposes a composite artifact into codec'd entries,
//! builds and signs the manifest, and packages everything into one archive.
//! The load pipeline is its adversarial mirror: it verifies the signature
//! and every entry tag before any codec touches entry bytes, then rebuilds
//! the artifact and runs its validation callback.
//!
//! Ordering inside a load is absolute: signature verification happens
//! before manifest-driven work, every tag check happens before the
//! corresponding decode, the skeleton decode happens before attribute
//! binding, binding before the post-load hook, and the hook before
//! validation.

mod load;
mod save;

pub use load::{load_from_path, load_from_reader};
pub use save::{save_to_path, save_to_writer};

use crate::archive::ArchiveError;
use crate::codec::{CodecError, RegistryError};
use crate::manifest::ManifestError;
use crate::model::{ModelError, ValidationError};
use crate::signing::{ExpiredKeyError, SignError, SignatureError, TrustError, VerifyError};
use crate::stream::StreamError;

/// Entry name holding the encoded skeleton
pub const SKELETON_ENTRY_NAME: &str = "skeleton.json";

/// A hash mismatch, entry-set disagreement, or sentinel disagreement.
///
/// Any of these means the archive does not describe the artifact its
/// manifest was signed for.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IntegrityError {
    #[error("entry '{entry}': authentication tag mismatch")]
    TagMismatch { entry: String },

    #[error("entry '{entry}' is listed in the manifest but missing from the archive")]
    MissingEntry { entry: String },

    #[error("archive blob '{entry}' is not listed in the manifest")]
    UnexpectedEntry { entry: String },

    #[error("skeleton has no sentinel for declared attribute '{attribute}'")]
    MissingSentinel { attribute: String },

    #[error("sentinel for attribute '{attribute}' does not match its manifest entry")]
    SentinelMismatch { attribute: String },

    #[error("skeleton carries sentinel for undeclared attribute '{attribute}'")]
    UnexpectedSentinel { attribute: String },

    #[error("skeleton artifact name '{skeleton}' does not match manifest '{manifest}'")]
    NameMismatch { manifest: String, skeleton: String },
}

/// Failures while saving an artifact. The partial archive is always
/// discarded; a failed save never leaves a usable-looking file behind.
#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("stream error: {0}")]
    Stream(#[from] StreamError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("signing error: {0}")]
    Sign(#[from] SignError),

    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures while loading an artifact, one variant per failure kind so
/// callers can distinguish signature, trust, expiry, integrity, decode, and
/// validation outcomes.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("archive error: {0}")]
    Archive(#[from] ArchiveError),

    #[error(transparent)]
    Signature(#[from] SignatureError),

    #[error(transparent)]
    Trust(#[from] TrustError),

    #[error(transparent)]
    ExpiredKey(#[from] ExpiredKeyError),

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Integrity(#[from] IntegrityError),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("decode error: {0}")]
    Decode(#[from] CodecError),

    #[error("model error: {0}")]
    Model(#[from] ModelError),

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

impl From<VerifyError> for LoadError {
    fn from(err: VerifyError) -> Self {
        match err {
            VerifyError::Signature(e) => Self::Signature(e),
            VerifyError::Trust(e) => Self::Trust(e),
            VerifyError::ExpiredKey(e) => Self::ExpiredKey(e),
        }
    }
}
