//! modelseal - signed containers for composite machine-learning artifacts
//!
//! A composite artifact is an object whose parts are serialized by
//! different codecs. This crate persists such objects into a single gzipped
//! tar archive holding one authenticated byte blob per attribute, a
//! skeleton entry describing the object's remaining structure, and a
//! canonical manifest covered by a detached Ed25519 signature.
//!
//! The load path never lets a codec decode a byte that was not
//! authenticated first: the signature over the manifest is verified, then
//! every entry's HMAC tag is recomputed and compared in constant time, and
//! only then are codecs invoked to reconstitute the artifact. The final
//! step runs the artifact's own validation callback, catching drift that
//! byte-level checks cannot (codec libraries are not required to be
//! byte-deterministic across versions).

pub mod archive;
pub mod codec;
pub mod config;
pub mod keyring;
pub mod manifest;
pub mod model;
pub mod pipeline;
pub mod signing;
pub mod stream;
pub mod value;

pub use archive::{
    read_archive, read_archive_file, ArchiveBlob, ArchiveError, ArchiveWriter,
    MANIFEST_BLOB_NAME, SIGNATURE_BLOB_NAME,
};
pub use codec::{
    Codec, CodecError, CodecRegistry, RegistryError, CODEC_BYTES, CODEC_GENERIC_OBJECT,
    CODEC_KEY_VALUE, CODEC_TABULAR, CODEC_TENSOR, CODEC_TEXT_STRUCTURED,
};
pub use config::Config;
pub use keyring::{
    ExpiryReport, ExpiryStatus, KeyringError, TrustLevel, TrustedKey, TrustedKeyring,
    DAYS_WARNING_FOR_KEY_EXPIRY, KEYRING_INDEX_FILE, TRUSTED_KEYS_DIR_ENV,
};
pub use manifest::{Manifest, ManifestEntry, ManifestError, FORMAT_VERSION};
pub use model::{
    AttributeBinding, CompositeArtifact, ModelError, Sentinel, Skeleton, ValidationError,
};
pub use pipeline::{
    load_from_path, load_from_reader, save_to_path, save_to_writer, IntegrityError, LoadError,
    SaveError, SKELETON_ENTRY_NAME,
};
pub use signing::{
    compute_key_fingerprint, decode_verifying_key, encode_verifying_key, generate_signing_key,
    verify_manifest, DetachedSignature, ExpiredKeyError, GeneratedKey, SignError, SignatureError,
    SignerHome, TrustError, VerifyError, SIGNATURE_ALGORITHM,
};
pub use stream::{
    verify_stream, HmacAlgorithm, HmacKey, StreamError, Tag, VerifiableStream, HMAC_KEY_LEN,
};
pub use value::{AttributeValue, Table, Tensor, ValueError};
