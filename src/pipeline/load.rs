//! The load pipeline

use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use chrono::Utc;
use tracing::{info, warn};

use crate::archive::{read_archive, MANIFEST_BLOB_NAME, SIGNATURE_BLOB_NAME};
use crate::codec::{CodecError, CodecRegistry};
use crate::config::Config;
use crate::keyring::{ExpiryStatus, TrustedKeyring, DAYS_WARNING_FOR_KEY_EXPIRY};
use crate::manifest::{Manifest, ManifestError};
use crate::model::{CompositeArtifact, Skeleton};
use crate::signing::{verify_manifest, DetachedSignature, SignatureError};
use crate::stream::verify_stream;
use crate::value::AttributeValue;

use super::{IntegrityError, LoadError};

/// Load an artifact from archive bytes supplied by `reader`.
///
/// All signature and integrity checks run before any codec other than the
/// manifest parser and the byte-authenticated skeleton codec; no codec ever
/// decodes unauthenticated bytes.
pub fn load_from_reader<A: CompositeArtifact, R: Read>(
    reader: R,
    registry: &CodecRegistry,
    keyring: &TrustedKeyring,
    config: &Config,
) -> Result<A, LoadError> {
    registry.freeze();
    let now = Utc::now();

    for report in keyring.check_expiry(DAYS_WARNING_FOR_KEY_EXPIRY, now) {
        match report.status {
            ExpiryStatus::Expired => warn!(
                name = %report.name,
                fingerprint = %report.fingerprint,
                "trusted key is expired, fix now"
            ),
            ExpiryStatus::ExpiresSoon => warn!(
                name = %report.name,
                fingerprint = %report.fingerprint,
                days_remaining = report.days_remaining,
                "trusted key expires soon"
            ),
            ExpiryStatus::Ok => {}
        }
    }

    // Buffer every blob; nothing is interpreted until verified
    let mut blobs: BTreeMap<String, Vec<u8>> = BTreeMap::new();
    for blob in read_archive(reader)? {
        blobs.insert(blob.name, blob.data);
    }

    let manifest_bytes = blobs
        .remove(MANIFEST_BLOB_NAME)
        .ok_or(ManifestError::Missing)?;
    let signature_bytes = blobs
        .remove(SIGNATURE_BLOB_NAME)
        .ok_or(SignatureError::Missing)?;

    let signature = DetachedSignature::from_json_bytes(&signature_bytes)?;
    let signer = verify_manifest(
        &manifest_bytes,
        &signature,
        keyring,
        config.allow_expired_signing_key,
        now,
    )?;
    info!(signer = %signer, "manifest signature verified");

    let manifest = Manifest::parse(&manifest_bytes, config.allow_unknown_manifest_fields)?;
    manifest.validate(registry)?;

    // Entry-set agreement in both directions, before any hashing
    for entry in &manifest.entries {
        if !blobs.contains_key(&entry.name) {
            return Err(IntegrityError::MissingEntry {
                entry: entry.name.clone(),
            }
            .into());
        }
    }
    for name in blobs.keys() {
        if manifest.entry(name).is_none() {
            return Err(IntegrityError::UnexpectedEntry {
                entry: name.clone(),
            }
            .into());
        }
    }

    let key = manifest.decoded_key()?;
    let algorithm = manifest.hmac_algorithm;

    // Verify every non-skeleton entry tag, in manifest order
    for entry in manifest.entries.iter().filter(|e| e.attribute.is_some()) {
        let expected = entry.decoded_tag()?;
        if !verify_stream(&key, algorithm, &expected, &blobs[&entry.name]) {
            return Err(IntegrityError::TagMismatch {
                entry: entry.name.clone(),
            }
            .into());
        }
    }

    // Then the skeleton entry
    let skeleton_entry = manifest
        .skeleton()
        .ok_or_else(|| ManifestError::SkeletonEntryMissing {
            entry: manifest.skeleton_entry.clone(),
        })?;
    let expected = skeleton_entry.decoded_tag()?;
    if !verify_stream(&key, algorithm, &expected, &blobs[&skeleton_entry.name]) {
        return Err(IntegrityError::TagMismatch {
            entry: skeleton_entry.name.clone(),
        }
        .into());
    }

    info!(entries = manifest.entries.len(), "all entry tags verified");

    // Every byte is authenticated from here on; decoding may begin
    let skeleton_codec = registry.get(&skeleton_entry.codec)?;
    let decoded = skeleton_codec.decode(&mut blobs[&skeleton_entry.name].as_slice())?;
    let AttributeValue::Json(skeleton_json) = decoded else {
        return Err(CodecError::Malformed("skeleton entry is not a JSON object".to_string()).into());
    };
    let skeleton: Skeleton =
        serde_json::from_value(skeleton_json).map_err(CodecError::Json)?;

    if skeleton.artifact_name != manifest.artifact_name {
        return Err(IntegrityError::NameMismatch {
            manifest: manifest.artifact_name.clone(),
            skeleton: skeleton.artifact_name.clone(),
        }
        .into());
    }

    // Sentinel agreement: every declared attribute must carry a matching
    // sentinel, and the skeleton may not smuggle extra ones
    for (attribute, entry) in manifest.attribute_entries() {
        match skeleton.sentinels.get(attribute) {
            None => {
                return Err(IntegrityError::MissingSentinel {
                    attribute: attribute.to_string(),
                }
                .into())
            }
            Some(sentinel) => {
                let matches = sentinel.attribute == attribute
                    && sentinel.codec == entry.codec
                    && sentinel.entry == entry.name;
                if !matches {
                    return Err(IntegrityError::SentinelMismatch {
                        attribute: attribute.to_string(),
                    }
                    .into());
                }
            }
        }
    }
    for attribute in skeleton.sentinels.keys() {
        let declared = manifest
            .attribute_entries()
            .any(|(a, _)| a == attribute.as_str());
        if !declared {
            return Err(IntegrityError::UnexpectedSentinel {
                attribute: attribute.clone(),
            }
            .into());
        }
    }

    let mut artifact = A::from_state(&skeleton.state)?;

    // Decode and bind attributes, in manifest order
    for (attribute, entry) in manifest.attribute_entries() {
        let codec = registry.get(&entry.codec)?;
        let value = codec.decode(&mut blobs[&entry.name].as_slice())?;
        artifact.put_attribute(attribute, value)?;
    }

    artifact.post_load_hook()?;

    if config.run_validation {
        artifact.validate()?;
    } else {
        warn!(
            "loaded model without running validation; it may break when used, \
             do not do this in production"
        );
    }

    info!(artifact = %manifest.artifact_name, "artifact loaded and validated");
    Ok(artifact)
}

/// Load an artifact from an archive file
pub fn load_from_path<A: CompositeArtifact>(
    path: &Path,
    registry: &CodecRegistry,
    keyring: &TrustedKeyring,
    config: &Config,
) -> Result<A, LoadError> {
    let file = std::fs::File::open(path)?;
    load_from_reader(std::io::BufReader::new(file), registry, keyring, config)
}
