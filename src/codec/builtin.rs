//! Built-in codecs
//!
//! None of these is privileged by the pipelines; the skeleton entry happens
//! to use `generic-object` because the skeleton is a plain JSON record.

use std::io::{Read, Write};

use crate::value::{AttributeValue, Table, Tensor};

use super::{
    Codec, CodecError, CODEC_BYTES, CODEC_GENERIC_OBJECT, CODEC_KEY_VALUE, CODEC_TABULAR,
    CODEC_TENSOR, CODEC_TEXT_STRUCTURED,
};

/// Magic prefix of the tensor wire format
const TENSOR_MAGIC: &[u8; 4] = b"MSTN";

fn read_all(source: &mut dyn Read) -> Result<Vec<u8>, CodecError> {
    let mut data = Vec::new();
    source.read_to_end(&mut data)?;
    Ok(data)
}

fn take_bytes<'a>(data: &'a [u8], offset: &mut usize, n: usize) -> Result<&'a [u8], CodecError> {
    let end = offset
        .checked_add(n)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| CodecError::Malformed("truncated tensor entry".to_string()))?;
    let slice = &data[*offset..end];
    *offset = end;
    Ok(slice)
}

/// Canonical-JSON codec for structured values; also the skeleton codec.
///
/// Output is JCS-canonicalized, so identical values yield identical bytes
/// and therefore identical tags within one build.
#[derive(Debug)]
pub struct GenericObjectCodec;

impl Codec for GenericObjectCodec {
    fn name(&self) -> &'static str {
        CODEC_GENERIC_OBJECT
    }

    fn encode(&self, value: &AttributeValue, sink: &mut dyn Write) -> Result<(), CodecError> {
        let AttributeValue::Json(json) = value else {
            return Err(CodecError::UnsupportedValue {
                codec: CODEC_GENERIC_OBJECT,
                expected: "json",
                actual: value.kind(),
            });
        };
        let bytes = serde_json_canonicalizer::to_vec(json)
            .map_err(|e| CodecError::Malformed(format!("canonicalization failed: {e}")))?;
        sink.write_all(&bytes)?;
        Ok(())
    }

    fn decode(&self, source: &mut dyn Read) -> Result<AttributeValue, CodecError> {
        let data = read_all(source)?;
        // from_slice rejects trailing input, so the whole stream is consumed
        let json: serde_json::Value = serde_json::from_slice(&data)?;
        Ok(AttributeValue::Json(json))
    }
}

/// Little-endian binary codec for dense f32 tensors.
///
/// Wire layout: magic `MSTN`, u32 rank, u64 per dimension, then the f32
/// elements. The element count is implied by the shape, so any leftover
/// bytes are trailing garbage.
#[derive(Debug)]
pub struct TensorCodec;

impl Codec for TensorCodec {
    fn name(&self) -> &'static str {
        CODEC_TENSOR
    }

    fn encode(&self, value: &AttributeValue, sink: &mut dyn Write) -> Result<(), CodecError> {
        let AttributeValue::Tensor(tensor) = value else {
            return Err(CodecError::UnsupportedValue {
                codec: CODEC_TENSOR,
                expected: "tensor",
                actual: value.kind(),
            });
        };
        sink.write_all(TENSOR_MAGIC)?;
        sink.write_all(&(tensor.shape().len() as u32).to_le_bytes())?;
        for dim in tensor.shape() {
            sink.write_all(&(*dim as u64).to_le_bytes())?;
        }
        for v in tensor.data() {
            sink.write_all(&v.to_le_bytes())?;
        }
        Ok(())
    }

    fn decode(&self, source: &mut dyn Read) -> Result<AttributeValue, CodecError> {
        let data = read_all(source)?;

        let mut offset = 0usize;

        if take_bytes(&data, &mut offset, 4)? != TENSOR_MAGIC {
            return Err(CodecError::Malformed("bad tensor magic".to_string()));
        }

        let rank_bytes: [u8; 4] = take_bytes(&data, &mut offset, 4)?
            .try_into()
            .map_err(|_| CodecError::Malformed("truncated tensor rank".to_string()))?;
        let rank = u32::from_le_bytes(rank_bytes) as usize;

        let mut shape = Vec::with_capacity(rank);
        for _ in 0..rank {
            let dim_bytes: [u8; 8] = take_bytes(&data, &mut offset, 8)?
                .try_into()
                .map_err(|_| CodecError::Malformed("truncated tensor shape".to_string()))?;
            let dim = u64::from_le_bytes(dim_bytes);
            shape.push(usize::try_from(dim).map_err(|_| {
                CodecError::Malformed(format!("tensor dimension {dim} exceeds address space"))
            })?);
        }

        let element_count: usize = shape.iter().try_fold(1usize, |acc, &d| {
            acc.checked_mul(d)
                .ok_or_else(|| CodecError::Malformed("tensor element count overflows".to_string()))
        })?;

        let mut values = Vec::with_capacity(element_count.min(1 << 20));
        for _ in 0..element_count {
            let v_bytes: [u8; 4] = take_bytes(&data, &mut offset, 4)?
                .try_into()
                .map_err(|_| CodecError::Malformed("truncated tensor data".to_string()))?;
            values.push(f32::from_le_bytes(v_bytes));
        }

        if offset != data.len() {
            return Err(CodecError::TrailingBytes {
                trailing: data.len() - offset,
            });
        }

        let tensor = Tensor::new(shape, values)
            .map_err(|e| CodecError::Malformed(e.to_string()))?;
        Ok(AttributeValue::Tensor(tensor))
    }
}

/// Canonical-JSON codec for column-named tables
#[derive(Debug)]
pub struct TabularCodec;

impl Codec for TabularCodec {
    fn name(&self) -> &'static str {
        CODEC_TABULAR
    }

    fn encode(&self, value: &AttributeValue, sink: &mut dyn Write) -> Result<(), CodecError> {
        let AttributeValue::Table(table) = value else {
            return Err(CodecError::UnsupportedValue {
                codec: CODEC_TABULAR,
                expected: "table",
                actual: value.kind(),
            });
        };
        let bytes = serde_json_canonicalizer::to_vec(table)
            .map_err(|e| CodecError::Malformed(format!("canonicalization failed: {e}")))?;
        sink.write_all(&bytes)?;
        Ok(())
    }

    fn decode(&self, source: &mut dyn Read) -> Result<AttributeValue, CodecError> {
        let data = read_all(source)?;
        let table: Table = serde_json::from_slice(&data)?;
        // Re-run the arity check; serde accepted any row lengths
        let table = Table::new(table.columns, table.rows)
            .map_err(|e| CodecError::Malformed(e.to_string()))?;
        Ok(AttributeValue::Table(table))
    }
}

/// Human-readable JSON text codec
#[derive(Debug)]
pub struct TextStructuredCodec;

impl Codec for TextStructuredCodec {
    fn name(&self) -> &'static str {
        CODEC_TEXT_STRUCTURED
    }

    fn encode(&self, value: &AttributeValue, sink: &mut dyn Write) -> Result<(), CodecError> {
        let AttributeValue::Json(json) = value else {
            return Err(CodecError::UnsupportedValue {
                codec: CODEC_TEXT_STRUCTURED,
                expected: "json",
                actual: value.kind(),
            });
        };
        let text = serde_json::to_string_pretty(json)?;
        sink.write_all(text.as_bytes())?;
        sink.write_all(b"\n")?;
        Ok(())
    }

    fn decode(&self, source: &mut dyn Read) -> Result<AttributeValue, CodecError> {
        let data = read_all(source)?;
        let json: serde_json::Value = serde_json::from_slice(&data)?;
        Ok(AttributeValue::Json(json))
    }
}

/// Sorted `key=value` line codec for flat string maps
#[derive(Debug)]
pub struct KeyValueCodec;

impl Codec for KeyValueCodec {
    fn name(&self) -> &'static str {
        CODEC_KEY_VALUE
    }

    fn encode(&self, value: &AttributeValue, sink: &mut dyn Write) -> Result<(), CodecError> {
        let AttributeValue::KeyValue(map) = value else {
            return Err(CodecError::UnsupportedValue {
                codec: CODEC_KEY_VALUE,
                expected: "key-value",
                actual: value.kind(),
            });
        };
        // BTreeMap iteration gives sorted keys, so the emission is stable
        for (key, val) in map {
            if key.contains('=') || key.contains('\n') {
                return Err(CodecError::Malformed(format!(
                    "key '{key}' contains a reserved character"
                )));
            }
            if val.contains('\n') {
                return Err(CodecError::Malformed(format!(
                    "value for key '{key}' contains a newline"
                )));
            }
            sink.write_all(key.as_bytes())?;
            sink.write_all(b"=")?;
            sink.write_all(val.as_bytes())?;
            sink.write_all(b"\n")?;
        }
        Ok(())
    }

    fn decode(&self, source: &mut dyn Read) -> Result<AttributeValue, CodecError> {
        let data = read_all(source)?;
        let text = String::from_utf8(data)
            .map_err(|e| CodecError::Malformed(format!("entry is not UTF-8: {e}")))?;

        let mut map = std::collections::BTreeMap::new();
        for line in text.lines() {
            let (key, val) = line.split_once('=').ok_or_else(|| {
                CodecError::Malformed(format!("line without '=' separator: '{line}'"))
            })?;
            if map.insert(key.to_string(), val.to_string()).is_some() {
                return Err(CodecError::Malformed(format!("duplicate key '{key}'")));
            }
        }
        Ok(AttributeValue::KeyValue(map))
    }
}

/// Raw byte passthrough
#[derive(Debug)]
pub struct BytesCodec;

impl Codec for BytesCodec {
    fn name(&self) -> &'static str {
        CODEC_BYTES
    }

    fn encode(&self, value: &AttributeValue, sink: &mut dyn Write) -> Result<(), CodecError> {
        let AttributeValue::Bytes(bytes) = value else {
            return Err(CodecError::UnsupportedValue {
                codec: CODEC_BYTES,
                expected: "bytes",
                actual: value.kind(),
            });
        };
        sink.write_all(bytes)?;
        Ok(())
    }

    fn decode(&self, source: &mut dyn Read) -> Result<AttributeValue, CodecError> {
        Ok(AttributeValue::Bytes(read_all(source)?))
    }
}
