//! Post-load statistical validation
//!
//! Byte-level checks cannot catch a codec that decodes to slightly
//! different values than were encoded; the artifact's validation callback
//! is the safety net for that class of drift.

mod fixtures;

use std::io::{Read, Write};
use std::sync::Arc;

use fixtures::{test_env, GreeterModel};
use modelseal::codec::{GenericObjectCodec, TensorCodec, TextStructuredCodec};
use modelseal::{
    load_from_reader, save_to_writer, AttributeValue, Codec, CodecError, CodecRegistry, Config,
    LoadError, Tensor,
};

/// Tensor codec whose decode truncates every value toward zero. Bytes on
/// disk are identical, so every hash check passes; only the validation
/// callback can notice.
#[derive(Debug)]
struct LossyTensorCodec;

impl Codec for LossyTensorCodec {
    fn name(&self) -> &'static str {
        "tensor"
    }

    fn encode(&self, value: &AttributeValue, sink: &mut dyn Write) -> Result<(), CodecError> {
        TensorCodec.encode(value, sink)
    }

    fn decode(&self, source: &mut dyn Read) -> Result<AttributeValue, CodecError> {
        match TensorCodec.decode(source)? {
            AttributeValue::Tensor(tensor) => {
                let data = tensor.data().iter().map(|v| v.trunc()).collect();
                let lossy = Tensor::new(tensor.shape().to_vec(), data)
                    .map_err(|e| CodecError::Malformed(e.to_string()))?;
                Ok(AttributeValue::Tensor(lossy))
            }
            other => Ok(other),
        }
    }
}

fn lossy_registry() -> CodecRegistry {
    let mut registry = CodecRegistry::new();
    registry.register(Arc::new(GenericObjectCodec)).unwrap();
    registry.register(Arc::new(TextStructuredCodec)).unwrap();
    registry.register(Arc::new(LossyTensorCodec)).unwrap();
    registry
}

#[test]
fn test_lossy_codec_caught_by_validation() {
    let env = test_env();
    let mut model = GreeterModel::sample();
    let bytes = save_to_writer(
        &mut model,
        Vec::new(),
        &CodecRegistry::builtin(),
        &env.signer,
        &env.key.fingerprint,
        None,
        &Config::default(),
    )
    .unwrap();

    // Weights [0.2, 0.7] truncate to [0.0, 0.0]; the argmax tie resolves
    // to "farewell" and the probe expectation fails
    let err = load_from_reader::<GreeterModel, _>(
        bytes.as_slice(),
        &lossy_registry(),
        &env.keyring,
        &Config::default(),
    )
    .unwrap_err();

    assert!(matches!(err, LoadError::Validation(_)));
    let message = err.to_string();
    assert!(message.contains("farewell"), "unexpected message: {message}");
}

#[test]
fn test_validation_can_be_skipped_explicitly() {
    let env = test_env();
    let mut model = GreeterModel::sample();
    let bytes = save_to_writer(
        &mut model,
        Vec::new(),
        &CodecRegistry::builtin(),
        &env.signer,
        &env.key.fingerprint,
        None,
        &Config::default(),
    )
    .unwrap();

    // With validation off the drifted model loads; the caller owns the risk
    let config = Config::default().with_run_validation(false);
    let loaded: GreeterModel =
        load_from_reader(bytes.as_slice(), &lossy_registry(), &env.keyring, &config).unwrap();

    assert_eq!(loaded.predict("hello").unwrap(), "farewell");
}

#[test]
fn test_honest_codec_passes_validation() {
    let env = test_env();
    let mut model = GreeterModel::sample();
    let bytes = save_to_writer(
        &mut model,
        Vec::new(),
        &CodecRegistry::builtin(),
        &env.signer,
        &env.key.fingerprint,
        None,
        &Config::default(),
    )
    .unwrap();

    let loaded: GreeterModel = load_from_reader(
        bytes.as_slice(),
        &CodecRegistry::builtin(),
        &env.keyring,
        &Config::default(),
    )
    .unwrap();
    assert_eq!(loaded.predict("hello").unwrap(), "greeting");
}
