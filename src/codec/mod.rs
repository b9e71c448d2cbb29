//! Codecs and the codec registry
//!
//! A codec is a named stream-in/stream-out pair for one kind of attribute
//! value. Codecs never see archive bytes before those bytes have passed
//! signature and tag verification; their own obligation is to consume their
//! entire input, so that trailing garbage in an entry is an error rather
//! than silently ignored.
//!
//! The registry maps codec names to implementations. It is populated at
//! process start and frozen on first use by a save or load pipeline; late
//! registration is a caller bug.

mod builtin;

pub use builtin::{
    BytesCodec, GenericObjectCodec, KeyValueCodec, TabularCodec, TensorCodec,
    TextStructuredCodec,
};

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::value::AttributeValue;

/// Built-in codec names
pub const CODEC_GENERIC_OBJECT: &str = "generic-object";
pub const CODEC_TENSOR: &str = "tensor";
pub const CODEC_TABULAR: &str = "tabular";
pub const CODEC_TEXT_STRUCTURED: &str = "text-structured";
pub const CODEC_KEY_VALUE: &str = "key-value";
pub const CODEC_BYTES: &str = "bytes";

/// Errors from codec encode/decode
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("codec '{codec}' cannot encode a {actual} value, expected {expected}")]
    UnsupportedValue {
        codec: &'static str,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("malformed entry: {0}")]
    Malformed(String),

    #[error("{trailing} trailing byte(s) after decoded value")]
    TrailingBytes { trailing: usize },
}

/// Errors from registry misuse
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("codec '{0}' is already registered")]
    DuplicateCodec(String),

    #[error("registry is frozen; codecs must be registered before the first save or load")]
    Frozen,

    #[error("no codec named '{0}' is registered")]
    UnknownCodec(String),
}

/// A named serializer/deserializer for one kind of attribute value.
///
/// `decode` must consume the entire stream; implementations report leftover
/// input as [`CodecError::TrailingBytes`].
pub trait Codec: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    fn encode(&self, value: &AttributeValue, sink: &mut dyn Write) -> Result<(), CodecError>;

    fn decode(&self, source: &mut dyn Read) -> Result<AttributeValue, CodecError>;
}

/// Name → codec mapping, write-once then read-shared.
pub struct CodecRegistry {
    codecs: BTreeMap<String, Arc<dyn Codec>>,
    frozen: AtomicBool,
}

impl CodecRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            codecs: BTreeMap::new(),
            frozen: AtomicBool::new(false),
        }
    }

    /// A registry holding every built-in codec
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        let builtins: Vec<Arc<dyn Codec>> = vec![
            Arc::new(GenericObjectCodec),
            Arc::new(TensorCodec),
            Arc::new(TabularCodec),
            Arc::new(TextStructuredCodec),
            Arc::new(KeyValueCodec),
            Arc::new(BytesCodec),
        ];
        for codec in builtins {
            registry
                .register(codec)
                .expect("built-in codec names are distinct");
        }
        registry
    }

    /// Register a codec. Duplicate names and post-freeze registration fail fast.
    pub fn register(&mut self, codec: Arc<dyn Codec>) -> Result<(), RegistryError> {
        if self.frozen.load(Ordering::Acquire) {
            return Err(RegistryError::Frozen);
        }
        let name = codec.name().to_string();
        if self.codecs.contains_key(&name) {
            return Err(RegistryError::DuplicateCodec(name));
        }
        self.codecs.insert(name, codec);
        Ok(())
    }

    /// Freeze the registry. Idempotent; called by pipelines on entry.
    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.codecs.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn Codec>, RegistryError> {
        self.codecs
            .get(name)
            .cloned()
            .ok_or_else(|| RegistryError::UnknownCodec(name.to_string()))
    }

    /// Registered codec names, sorted
    pub fn names(&self) -> Vec<&str> {
        self.codecs.keys().map(String::as_str).collect()
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct DummyCodec;

    impl Codec for DummyCodec {
        fn name(&self) -> &'static str {
            "dummy"
        }

        fn encode(&self, _: &AttributeValue, sink: &mut dyn Write) -> Result<(), CodecError> {
            sink.write_all(b"dummy")?;
            Ok(())
        }

        fn decode(&self, source: &mut dyn Read) -> Result<AttributeValue, CodecError> {
            let mut data = Vec::new();
            source.read_to_end(&mut data)?;
            Ok(AttributeValue::Bytes(data))
        }
    }

    #[test]
    fn test_builtin_registry_has_expected_codecs() {
        let registry = CodecRegistry::builtin();
        for name in [
            CODEC_GENERIC_OBJECT,
            CODEC_TENSOR,
            CODEC_TABULAR,
            CODEC_TEXT_STRUCTURED,
            CODEC_KEY_VALUE,
            CODEC_BYTES,
        ] {
            assert!(registry.contains(name), "missing codec {name}");
        }
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = CodecRegistry::new();
        registry.register(Arc::new(DummyCodec)).unwrap();

        let err = registry.register(Arc::new(DummyCodec)).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateCodec("dummy".to_string()));
    }

    #[test]
    fn test_registration_after_freeze_fails() {
        let mut registry = CodecRegistry::builtin();
        registry.freeze();

        let err = registry.register(Arc::new(DummyCodec)).unwrap_err();
        assert_eq!(err, RegistryError::Frozen);
    }

    #[test]
    fn test_freeze_is_idempotent() {
        let registry = CodecRegistry::builtin();
        registry.freeze();
        registry.freeze();
        assert!(registry.is_frozen());
    }

    #[test]
    fn test_unknown_codec_lookup_fails() {
        let registry = CodecRegistry::builtin();
        let err = registry.get("no-such-codec").unwrap_err();
        assert_eq!(err, RegistryError::UnknownCodec("no-such-codec".to_string()));
    }

    #[test]
    fn test_custom_codec_round_trip() {
        let mut registry = CodecRegistry::new();
        registry.register(Arc::new(DummyCodec)).unwrap();

        let codec = registry.get("dummy").unwrap();
        let mut sink = Vec::new();
        codec
            .encode(&AttributeValue::Bytes(vec![]), &mut sink)
            .unwrap();
        let decoded = codec.decode(&mut sink.as_slice()).unwrap();
        assert_eq!(decoded, AttributeValue::Bytes(b"dummy".to_vec()));
    }
}
