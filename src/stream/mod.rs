//! Verifiable byte streams
//!
//! A `VerifiableStream` couples an in-memory byte buffer with a running
//! keyed MAC. It is written once, finalized exactly once (finalize is
//! idempotent), and only then becomes readable. The finalize step yields the
//! authentication tag that the manifest records for the entry.
//!
//! The HMAC key is generated fresh for every save and travels inside the
//! signed manifest. The tag therefore binds an entry's bytes to the manifest
//! rather than authenticating them in isolation; the signature over the
//! manifest is what carries the trust.

use std::io;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Sha256, Sha512};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

/// Byte length of freshly generated HMAC keys
pub const HMAC_KEY_LEN: usize = 32;

/// Errors from misusing a `VerifiableStream`'s write/finalize/read protocol
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    #[error("stream is finalized and no longer accepts writes")]
    AlreadyFinalized,

    #[error("stream is not finalized and cannot be read yet")]
    NotFinalized,
}

/// Keyed-hash algorithm used for entry tags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HmacAlgorithm {
    #[default]
    HmacSha256,
    HmacSha512,
}

impl HmacAlgorithm {
    /// Stable wire name, as recorded in manifests
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HmacSha256 => "hmac-sha256",
            Self::HmacSha512 => "hmac-sha512",
        }
    }

    /// Tag length in bytes
    pub fn tag_len(self) -> usize {
        match self {
            Self::HmacSha256 => 32,
            Self::HmacSha512 => 64,
        }
    }

    /// Parse a wire name
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "hmac-sha256" => Some(Self::HmacSha256),
            "hmac-sha512" => Some(Self::HmacSha512),
            _ => None,
        }
    }
}

impl std::fmt::Display for HmacAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HMAC key material, zeroized on drop
pub struct HmacKey(Vec<u8>);

impl HmacKey {
    /// Generate a fresh random key from the OS CSPRNG
    pub fn generate() -> Self {
        let mut bytes = vec![0u8; HMAC_KEY_LEN];
        OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.0)
    }

    pub fn from_base64(encoded: &str) -> Result<Self, base64::DecodeError> {
        Ok(Self(BASE64.decode(encoded)?))
    }
}

impl Drop for HmacKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for HmacKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material
        write!(f, "HmacKey({} bytes)", self.0.len())
    }
}

/// An authentication tag produced by finalizing a stream
#[derive(Clone)]
pub struct Tag(Vec<u8>);

impl Tag {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.0)
    }

    pub fn from_base64(encoded: &str) -> Result<Self, base64::DecodeError> {
        Ok(Self(BASE64.decode(encoded)?))
    }

    /// Constant-time equality
    pub fn ct_eq(&self, other: &Tag) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl PartialEq for Tag {
    fn eq(&self, other: &Self) -> bool {
        self.ct_eq(other)
    }
}

impl Eq for Tag {}

impl std::fmt::Debug for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Tag({})", hex::encode(&self.0))
    }
}

enum MacState {
    Sha256(Hmac<Sha256>),
    Sha512(Hmac<Sha512>),
}

impl MacState {
    fn new(key: &HmacKey, algorithm: HmacAlgorithm) -> Self {
        // new_from_slice accepts any key length for HMAC
        match algorithm {
            HmacAlgorithm::HmacSha256 => Self::Sha256(
                Hmac::<Sha256>::new_from_slice(key.as_bytes()).expect("HMAC accepts any key length"),
            ),
            HmacAlgorithm::HmacSha512 => Self::Sha512(
                Hmac::<Sha512>::new_from_slice(key.as_bytes()).expect("HMAC accepts any key length"),
            ),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Self::Sha256(mac) => mac.update(data),
            Self::Sha512(mac) => mac.update(data),
        }
    }

    fn finalize(self) -> Tag {
        match self {
            Self::Sha256(mac) => Tag(mac.finalize().into_bytes().to_vec()),
            Self::Sha512(mac) => Tag(mac.finalize().into_bytes().to_vec()),
        }
    }
}

/// A write-then-finalize-then-read byte container with a running HMAC.
///
/// Lifecycle:
/// - construct with the save's HMAC key;
/// - write all data (the stream is not readable yet);
/// - call [`finalize`](Self::finalize), keeping the returned tag;
/// - read the data back (the stream is not writable any more).
pub struct VerifiableStream {
    algorithm: HmacAlgorithm,
    buffer: Vec<u8>,
    cursor: usize,
    mac: Option<MacState>,
    tag: Option<Tag>,
}

impl VerifiableStream {
    /// Create an open stream keyed for this save
    pub fn new(key: &HmacKey, algorithm: HmacAlgorithm) -> Self {
        Self {
            algorithm,
            buffer: Vec::new(),
            cursor: 0,
            mac: Some(MacState::new(key, algorithm)),
            tag: None,
        }
    }

    pub fn algorithm(&self) -> HmacAlgorithm {
        self.algorithm
    }

    pub fn is_finalized(&self) -> bool {
        self.tag.is_some()
    }

    /// Number of bytes written so far
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Append bytes. Zero-length writes are legal. Fails once finalized.
    pub fn write(&mut self, data: &[u8]) -> Result<(), StreamError> {
        match self.mac.as_mut() {
            Some(mac) => {
                self.buffer.extend_from_slice(data);
                mac.update(data);
                Ok(())
            }
            None => Err(StreamError::AlreadyFinalized),
        }
    }

    /// Transition to the finalized state and return the tag.
    ///
    /// Idempotent: repeated calls return the same tag without changing state.
    /// Finalizing an empty stream yields the well-defined tag of the empty
    /// message.
    pub fn finalize(&mut self) -> Tag {
        if let Some(mac) = self.mac.take() {
            self.tag = Some(mac.finalize());
        }
        self.tag.clone().expect("tag is set once mac is consumed")
    }

    /// Read up to `buf.len()` bytes from the current cursor. Reads past the
    /// end return 0 (end of stream), not an error. Fails before finalize.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, StreamError> {
        if !self.is_finalized() {
            return Err(StreamError::NotFinalized);
        }
        let remaining = &self.buffer[self.cursor..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.cursor += n;
        Ok(n)
    }

    /// Read everything from the current cursor to the end
    pub fn read_to_end(&mut self) -> Result<Vec<u8>, StreamError> {
        if !self.is_finalized() {
            return Err(StreamError::NotFinalized);
        }
        let out = self.buffer[self.cursor..].to_vec();
        self.cursor = self.buffer.len();
        Ok(out)
    }

    /// Full contents, independent of the read cursor
    pub fn bytes(&self) -> Result<&[u8], StreamError> {
        if !self.is_finalized() {
            return Err(StreamError::NotFinalized);
        }
        Ok(&self.buffer)
    }

    /// Restart reading from offset 0
    pub fn rewind(&mut self) -> Result<(), StreamError> {
        if !self.is_finalized() {
            return Err(StreamError::NotFinalized);
        }
        self.cursor = 0;
        Ok(())
    }

    /// Constant-time comparison of the stream's tag against an expected one
    pub fn verify_against(&self, expected: &Tag) -> Result<bool, StreamError> {
        match &self.tag {
            Some(tag) => Ok(tag.ct_eq(expected)),
            None => Err(StreamError::NotFinalized),
        }
    }
}

impl io::Write for VerifiableStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        VerifiableStream::write(self, buf).map_err(io::Error::other)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl io::Read for VerifiableStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        VerifiableStream::read(self, buf).map_err(io::Error::other)
    }
}

/// Recompute a tag over `data` and compare it to `expected` in constant time.
///
/// This is the load-side check: entry bytes read back from an archive are
/// verified against the manifest's recorded tag before any codec sees them.
pub fn verify_stream(
    key: &HmacKey,
    algorithm: HmacAlgorithm,
    expected: &Tag,
    data: &[u8],
) -> bool {
    let mut mac = MacState::new(key, algorithm);
    mac.update(data);
    mac.finalize().ct_eq(expected)
}
