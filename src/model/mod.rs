//! The composite artifact protocol
//!
//! A composite artifact is a named object whose attributes are each
//! serialized by their own codec into their own archive entry. The object
//! declares an attribute map, can export and rebuild its non-attribute state
//! (the skeleton body), hands attributes over destructively at save time,
//! and accepts them back at load time. Every loadable artifact also carries
//! a validation callback that is run after reconstruction.
//!
//! No inheritance is required; any type implementing [`CompositeArtifact`]
//! participates.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::AttributeValue;

/// Errors from an artifact's attribute map disagreeing with its live state
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("attribute '{attribute}' is declared but not present on the artifact")]
    MissingAttribute { attribute: String },

    #[error("attribute '{attribute}' has already been taken; the artifact was saved before")]
    AttributeAlreadyTaken { attribute: String },

    #[error(
        "attribute '{attribute}' is still present after serialization; \
         take_attribute must remove the value, not copy it"
    )]
    AttributeStillPresent { attribute: String },

    #[error("attribute '{attribute}' is declared more than once")]
    DuplicateAttribute { attribute: String },

    #[error("entry name '{entry}' is used by more than one attribute")]
    DuplicateEntryName { entry: String },

    #[error("entry name '{entry}' is reserved by the container format")]
    ReservedEntryName { entry: String },

    #[error("attribute '{attribute}' received a {actual} value, expected {expected}")]
    TypeMismatch {
        attribute: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("artifact state error: {0}")]
    State(String),

    #[error("post-load hook failed: {0}")]
    Hook(String),
}

/// The user validation callback rejected the reconstituted artifact
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("model validation failed: {message}")]
pub struct ValidationError {
    pub message: String,
}

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// One row of an artifact's declarative attribute map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeBinding {
    /// Attribute name on the artifact
    pub attribute: String,
    /// Codec used to serialize it
    pub codec: String,
    /// Archive entry name holding its bytes
    pub entry: String,
}

impl AttributeBinding {
    pub fn new(
        attribute: impl Into<String>,
        codec: impl Into<String>,
        entry: impl Into<String>,
    ) -> Self {
        Self {
            attribute: attribute.into(),
            codec: codec.into(),
            entry: entry.into(),
        }
    }
}

/// Placeholder recorded in the skeleton where a serialized attribute lived.
///
/// Sentinels are plain data; they carry no references back into the
/// artifact, so the skeleton never contains cycles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sentinel {
    pub attribute: String,
    pub codec: String,
    pub entry: String,
}

impl Sentinel {
    /// Whether this sentinel agrees with a binding on all three fields
    pub fn matches(&self, binding: &AttributeBinding) -> bool {
        self.attribute == binding.attribute
            && self.codec == binding.codec
            && self.entry == binding.entry
    }
}

/// The artifact with its serialized attributes replaced by sentinels,
/// itself encoded as one archive entry via the generic-object codec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Skeleton {
    pub artifact_name: String,
    /// Non-attribute state exported by the artifact
    pub state: serde_json::Value,
    /// Sentinels keyed by attribute name
    pub sentinels: BTreeMap<String, Sentinel>,
}

/// The contract a saveable/loadable composite object satisfies.
///
/// Saving is destructive: the pipeline calls [`take_attribute`]
/// (Self::take_attribute) for every declared attribute, leaving the object
/// hollowed out. Callers that need the object afterwards should reload it.
pub trait CompositeArtifact: Sized {
    /// Stable identifier recorded in the manifest
    fn artifact_name(&self) -> &str;

    /// Declarative attribute → (codec, entry) map
    fn attribute_map(&self) -> Vec<AttributeBinding>;

    /// Export the non-attribute remainder of the object as the skeleton body
    fn export_state(&self) -> Result<serde_json::Value, ModelError>;

    /// Rebuild an empty shell from a skeleton body; attributes are bound
    /// afterwards via [`put_attribute`](Self::put_attribute)
    fn from_state(state: &serde_json::Value) -> Result<Self, ModelError>;

    /// Remove and return a live attribute value
    fn take_attribute(&mut self, attribute: &str) -> Result<AttributeValue, ModelError>;

    /// Bind a deserialized attribute value back onto the artifact
    fn put_attribute(&mut self, attribute: &str, value: AttributeValue)
        -> Result<(), ModelError>;

    /// Optional hook invoked after all attributes are bound
    fn post_load_hook(&mut self) -> Result<(), ModelError> {
        Ok(())
    }

    /// Mandatory statistical validation callback, run after the hook
    fn validate(&self) -> Result<(), ValidationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sentinel_matches_binding() {
        let binding = AttributeBinding::new("weights", "tensor", "weights.bin");
        let sentinel = Sentinel {
            attribute: "weights".to_string(),
            codec: "tensor".to_string(),
            entry: "weights.bin".to_string(),
        };
        assert!(sentinel.matches(&binding));

        let other = AttributeBinding::new("weights", "bytes", "weights.bin");
        assert!(!sentinel.matches(&other));
    }

    #[test]
    fn test_skeleton_serde_round_trip() {
        let mut sentinels = BTreeMap::new();
        sentinels.insert(
            "weights".to_string(),
            Sentinel {
                attribute: "weights".to_string(),
                codec: "tensor".to_string(),
                entry: "weights.bin".to_string(),
            },
        );
        let skeleton = Skeleton {
            artifact_name: "demo".to_string(),
            state: serde_json::json!({"labels": ["a", "b"]}),
            sentinels,
        };

        let json = serde_json::to_value(&skeleton).unwrap();
        let back: Skeleton = serde_json::from_value(json).unwrap();
        assert_eq!(back, skeleton);
    }

    #[test]
    fn test_validation_error_message() {
        let err = ValidationError::new("prediction drifted");
        assert_eq!(err.to_string(), "model validation failed: prediction drifted");
    }
}
