//! Attribute value model
//!
//! Attributes move through the save/load pipelines as `AttributeValue`s, a
//! closed set of shapes each codec knows how to stream. Keeping the set
//! closed keeps the skeleton codec schema-driven: nothing in an archive can
//! describe an arbitrary object graph.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Errors from constructing malformed values
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValueError {
    #[error("tensor shape {shape:?} implies {expected} elements, got {actual}")]
    ShapeMismatch {
        shape: Vec<usize>,
        expected: usize,
        actual: usize,
    },

    #[error("table row {row} has {actual} cells, expected {expected}")]
    RowArity {
        row: usize,
        expected: usize,
        actual: usize,
    },
}

/// A dense tensor of f32 values in row-major order.
///
/// Fields are private so the shape/element-count agreement established by
/// the constructors holds for every instance; codecs may stream the shape
/// and data without re-checking.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    shape: Vec<usize>,
    data: Vec<f32>,
}

impl Tensor {
    /// Construct a tensor, checking that `data` fills `shape` exactly
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, ValueError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ValueError::ShapeMismatch {
                shape,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// A rank-1 tensor
    pub fn vector(data: Vec<f32>) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// A column-named table of JSON cells
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<serde_json::Value>>,
}

impl Table {
    /// Construct a table, checking that every row matches the column count
    pub fn new(
        columns: Vec<String>,
        rows: Vec<Vec<serde_json::Value>>,
    ) -> Result<Self, ValueError> {
        for (i, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(ValueError::RowArity {
                    row: i,
                    expected: columns.len(),
                    actual: row.len(),
                });
            }
        }
        Ok(Self { columns, rows })
    }
}

/// One attribute's in-memory value
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Bytes(Vec<u8>),
    Text(String),
    Json(serde_json::Value),
    KeyValue(BTreeMap<String, String>),
    Tensor(Tensor),
    Table(Table),
}

impl AttributeValue {
    /// Short name of the variant, for error messages
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bytes(_) => "bytes",
            Self::Text(_) => "text",
            Self::Json(_) => "json",
            Self::KeyValue(_) => "key-value",
            Self::Tensor(_) => "tensor",
            Self::Table(_) => "table",
        }
    }
}
