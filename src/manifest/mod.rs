//! The archive manifest
//!
//! The manifest is the canonical, signable description of a saved artifact:
//! format version, artifact identity, the HMAC key and algorithm used for
//! entry tags, and one row per entry. Its canonical bytes (JCS) are exactly
//! what the detached signature covers, so building and parsing must agree
//! byte for byte.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::archive::{MANIFEST_BLOB_NAME, SIGNATURE_BLOB_NAME};
use crate::codec::CodecRegistry;
use crate::stream::{HmacAlgorithm, HmacKey, Tag};

/// Container format version; incompatible reads refuse
pub const FORMAT_VERSION: u32 = 1;

/// Top-level manifest fields recognized by this version
const KNOWN_FIELDS: &[&str] = &[
    "format_version",
    "artifact_name",
    "skeleton_entry",
    "hmac_key",
    "hmac_algorithm",
    "entries",
    "created_at",
];

/// Errors from building or parsing a manifest
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("canonicalization error: {0}")]
    Canonicalize(String),

    #[error("archive has no manifest blob")]
    Missing,

    #[error("unknown manifest field '{field}'")]
    UnknownField { field: String },

    #[error("unsupported format version {found}, this build reads version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    #[error("manifest is not a JSON object")]
    NotAnObject,

    #[error("manifest has no entry matching skeleton_entry '{entry}'")]
    SkeletonEntryMissing { entry: String },

    #[error("entry '{entry}' has a null attribute but is not the skeleton entry")]
    UnexpectedSkeletonEntry { entry: String },

    #[error("skeleton entry '{entry}' uses codec '{codec}', expected '{expected}'")]
    SkeletonCodec {
        entry: String,
        codec: String,
        expected: &'static str,
    },

    #[error("duplicate entry name '{entry}'")]
    DuplicateEntryName { entry: String },

    #[error("attribute '{attribute}' appears in more than one entry")]
    DuplicateAttribute { attribute: String },

    #[error("entry name '{entry}' is reserved by the container format")]
    ReservedEntryName { entry: String },

    #[error("entry '{entry}' names unknown codec '{codec}'")]
    UnknownCodec { entry: String, codec: String },

    #[error("manifest HMAC key is not valid base64")]
    InvalidKey,

    #[error("entry '{entry}' has a malformed tag")]
    InvalidTag { entry: String },
}

/// One entry row: an archive blob, its codec, the attribute it belongs to
/// (null for the skeleton entry), and its authentication tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Archive blob name
    pub name: String,

    /// Codec that produced (and will consume) the entry bytes
    pub codec: String,

    /// Attribute the entry belongs to; `None` marks the skeleton entry
    pub attribute: Option<String>,

    /// Base64 HMAC tag over the entry bytes
    pub tag: String,
}

impl ManifestEntry {
    /// Decode the recorded tag
    pub fn decoded_tag(&self) -> Result<Tag, ManifestError> {
        Tag::from_base64(&self.tag).map_err(|_| ManifestError::InvalidTag {
            entry: self.name.clone(),
        })
    }
}

/// Canonical, deterministically encoded description of a saved artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Container format version
    pub format_version: u32,

    /// Stable artifact identifier
    pub artifact_name: String,

    /// Name of the entry holding the encoded skeleton
    pub skeleton_entry: String,

    /// Base64 per-save HMAC key; confidentiality is not relied upon, the
    /// signature over these bytes is what binds the entries
    pub hmac_key: String,

    /// Keyed-hash algorithm for all entry tags
    pub hmac_algorithm: HmacAlgorithm,

    /// Entry rows, sorted by name
    pub entries: Vec<ManifestEntry>,

    /// When the manifest was created (informational)
    pub created_at: DateTime<Utc>,
}

impl Manifest {
    /// Assemble a manifest, sorting entries by name and checking the
    /// build-time invariants against the registry.
    pub fn build(
        format_version: u32,
        artifact_name: impl Into<String>,
        skeleton_entry: impl Into<String>,
        hmac_key: &HmacKey,
        hmac_algorithm: HmacAlgorithm,
        mut entries: Vec<ManifestEntry>,
        registry: &CodecRegistry,
    ) -> Result<Self, ManifestError> {
        if format_version != FORMAT_VERSION {
            return Err(ManifestError::UnsupportedVersion {
                found: format_version,
                supported: FORMAT_VERSION,
            });
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let manifest = Self {
            format_version,
            artifact_name: artifact_name.into(),
            skeleton_entry: skeleton_entry.into(),
            hmac_key: hmac_key.to_base64(),
            hmac_algorithm,
            entries,
            created_at: Utc::now(),
        };
        manifest.validate(registry)?;
        Ok(manifest)
    }

    /// The exact byte sequence the detached signature covers
    pub fn canonical_bytes(&self) -> Result<Vec<u8>, ManifestError> {
        serde_json_canonicalizer::to_vec(self)
            .map_err(|e| ManifestError::Canonicalize(e.to_string()))
    }

    /// Parse manifest bytes.
    ///
    /// Unknown top-level fields are refused unless `allow_unknown_fields` is
    /// set; a manifest written by a future version must not be silently
    /// reinterpreted. The version gate runs before full deserialization.
    pub fn parse(bytes: &[u8], allow_unknown_fields: bool) -> Result<Self, ManifestError> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        let object = value.as_object().ok_or(ManifestError::NotAnObject)?;

        if !allow_unknown_fields {
            for field in object.keys() {
                if !KNOWN_FIELDS.contains(&field.as_str()) {
                    return Err(ManifestError::UnknownField {
                        field: field.clone(),
                    });
                }
            }
        }

        if let Some(version) = object.get("format_version").and_then(|v| v.as_u64()) {
            if version != u64::from(FORMAT_VERSION) {
                return Err(ManifestError::UnsupportedVersion {
                    found: version.try_into().unwrap_or(u32::MAX),
                    supported: FORMAT_VERSION,
                });
            }
        }

        Ok(serde_json::from_value(value)?)
    }

    /// Check the structural invariants and that every codec resolves.
    pub fn validate(&self, registry: &CodecRegistry) -> Result<(), ManifestError> {
        use std::collections::BTreeSet;

        if self.format_version != FORMAT_VERSION {
            return Err(ManifestError::UnsupportedVersion {
                found: self.format_version,
                supported: FORMAT_VERSION,
            });
        }

        let decoded = HmacKey::from_base64(&self.hmac_key).map_err(|_| ManifestError::InvalidKey)?;
        if decoded.as_bytes().is_empty() {
            return Err(ManifestError::InvalidKey);
        }

        let mut names = BTreeSet::new();
        let mut attributes = BTreeSet::new();
        let mut skeleton_seen = false;

        for entry in &self.entries {
            if !names.insert(entry.name.as_str()) {
                return Err(ManifestError::DuplicateEntryName {
                    entry: entry.name.clone(),
                });
            }
            if entry.name == MANIFEST_BLOB_NAME || entry.name == SIGNATURE_BLOB_NAME {
                return Err(ManifestError::ReservedEntryName {
                    entry: entry.name.clone(),
                });
            }
            if !registry.contains(&entry.codec) {
                return Err(ManifestError::UnknownCodec {
                    entry: entry.name.clone(),
                    codec: entry.codec.clone(),
                });
            }
            entry.decoded_tag()?;

            match &entry.attribute {
                None => {
                    if entry.name != self.skeleton_entry {
                        return Err(ManifestError::UnexpectedSkeletonEntry {
                            entry: entry.name.clone(),
                        });
                    }
                    if entry.codec != crate::codec::CODEC_GENERIC_OBJECT {
                        return Err(ManifestError::SkeletonCodec {
                            entry: entry.name.clone(),
                            codec: entry.codec.clone(),
                            expected: crate::codec::CODEC_GENERIC_OBJECT,
                        });
                    }
                    skeleton_seen = true;
                }
                Some(attribute) => {
                    if !attributes.insert(attribute.as_str()) {
                        return Err(ManifestError::DuplicateAttribute {
                            attribute: attribute.clone(),
                        });
                    }
                }
            }
        }

        if !skeleton_seen {
            return Err(ManifestError::SkeletonEntryMissing {
                entry: self.skeleton_entry.clone(),
            });
        }

        Ok(())
    }

    /// Look up an entry by blob name
    pub fn entry(&self, name: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    /// The skeleton entry row
    pub fn skeleton(&self) -> Option<&ManifestEntry> {
        self.entry(&self.skeleton_entry)
    }

    /// Non-skeleton entries with their attribute names, in manifest order
    pub fn attribute_entries(&self) -> impl Iterator<Item = (&str, &ManifestEntry)> {
        self.entries
            .iter()
            .filter_map(|e| e.attribute.as_deref().map(|a| (a, e)))
    }

    /// Decode the stored HMAC key
    pub fn decoded_key(&self) -> Result<HmacKey, ManifestError> {
        HmacKey::from_base64(&self.hmac_key).map_err(|_| ManifestError::InvalidKey)
    }
}
