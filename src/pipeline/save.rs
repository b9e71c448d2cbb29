//! The save pipeline

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;
use std::path::Path;

use tracing::{info, warn};

use crate::archive::{ArchiveWriter, MANIFEST_BLOB_NAME, SIGNATURE_BLOB_NAME};
use crate::codec::{CodecRegistry, CODEC_GENERIC_OBJECT};
use crate::config::Config;
use crate::manifest::{Manifest, ManifestEntry};
use crate::model::{AttributeBinding, CompositeArtifact, ModelError, Sentinel, Skeleton};
use crate::signing::SignerHome;
use crate::stream::{HmacKey, VerifiableStream};
use crate::value::AttributeValue;

use super::{SaveError, SKELETON_ENTRY_NAME};

/// Check the declared attribute map before anything is serialized
fn validate_bindings(bindings: &[AttributeBinding]) -> Result<(), ModelError> {
    let mut attributes = BTreeSet::new();
    let mut entries = BTreeSet::new();

    for binding in bindings {
        if !attributes.insert(binding.attribute.as_str()) {
            return Err(ModelError::DuplicateAttribute {
                attribute: binding.attribute.clone(),
            });
        }
        if !entries.insert(binding.entry.as_str()) {
            return Err(ModelError::DuplicateEntryName {
                entry: binding.entry.clone(),
            });
        }
        let reserved = binding.entry == MANIFEST_BLOB_NAME
            || binding.entry == SIGNATURE_BLOB_NAME
            || binding.entry == SKELETON_ENTRY_NAME;
        if reserved {
            return Err(ModelError::ReservedEntryName {
                entry: binding.entry.clone(),
            });
        }
    }
    Ok(())
}

/// Save an artifact into an archive written to `writer`.
///
/// This hollows the artifact out: every declared attribute is taken off the
/// object and replaced by nothing but its serialized entry. The writer is
/// never rewound; callers streaming to a socket or pipe must treat an
/// errored save as producing an invalid stream.
pub fn save_to_writer<A: CompositeArtifact, W: Write>(
    artifact: &mut A,
    writer: W,
    registry: &CodecRegistry,
    signer: &SignerHome,
    signing_key_fingerprint: &str,
    passphrase: Option<&str>,
    config: &Config,
) -> Result<W, SaveError> {
    registry.freeze();

    if config.run_validation {
        artifact.validate()?;
    } else {
        warn!(
            "saving without running model validation; the archive may hold a \
             model that breaks on use, do not do this in production"
        );
    }

    let artifact_name = artifact.artifact_name().to_string();
    let bindings = artifact.attribute_map();
    validate_bindings(&bindings)?;

    // Resolve every codec up front so a bad map fails before the artifact
    // is hollowed out
    for binding in &bindings {
        registry.get(&binding.codec)?;
    }

    let key = HmacKey::generate();
    let mut blobs: BTreeMap<String, VerifiableStream> = BTreeMap::new();
    let mut manifest_entries = Vec::with_capacity(bindings.len() + 1);
    let mut sentinels = BTreeMap::new();

    info!(artifact = %artifact_name, "serializing artifact attributes");

    for binding in &bindings {
        let codec = registry.get(&binding.codec)?;
        let value = artifact.take_attribute(&binding.attribute)?;

        let mut stream = VerifiableStream::new(&key, config.hmac_algorithm);
        codec.encode(&value, &mut stream)?;
        let tag = stream.finalize();

        manifest_entries.push(ManifestEntry {
            name: binding.entry.clone(),
            codec: binding.codec.clone(),
            attribute: Some(binding.attribute.clone()),
            tag: tag.to_base64(),
        });
        sentinels.insert(
            binding.attribute.clone(),
            Sentinel {
                attribute: binding.attribute.clone(),
                codec: binding.codec.clone(),
                entry: binding.entry.clone(),
            },
        );
        blobs.insert(binding.entry.clone(), stream);
    }

    // The artifact must be hollow before its skeleton is encoded; a
    // take_attribute that copies instead of removing would leave live
    // values behind the sentinels
    for binding in &bindings {
        if artifact.take_attribute(&binding.attribute).is_ok() {
            return Err(ModelError::AttributeStillPresent {
                attribute: binding.attribute.clone(),
            }
            .into());
        }
    }

    info!(artifact = %artifact_name, "serializing skeleton");

    let skeleton = Skeleton {
        artifact_name: artifact_name.clone(),
        state: artifact.export_state()?,
        sentinels,
    };
    let skeleton_value = AttributeValue::Json(serde_json::to_value(&skeleton).map_err(
        |e| ModelError::State(format!("skeleton is not JSON-serializable: {e}")),
    )?);

    let generic = registry.get(CODEC_GENERIC_OBJECT)?;
    let mut skeleton_stream = VerifiableStream::new(&key, config.hmac_algorithm);
    generic.encode(&skeleton_value, &mut skeleton_stream)?;
    let skeleton_tag = skeleton_stream.finalize();

    manifest_entries.push(ManifestEntry {
        name: SKELETON_ENTRY_NAME.to_string(),
        codec: CODEC_GENERIC_OBJECT.to_string(),
        attribute: None,
        tag: skeleton_tag.to_base64(),
    });
    blobs.insert(SKELETON_ENTRY_NAME.to_string(), skeleton_stream);

    let manifest = Manifest::build(
        config.format_version,
        artifact_name.clone(),
        SKELETON_ENTRY_NAME,
        &key,
        config.hmac_algorithm,
        manifest_entries,
        registry,
    )?;
    let manifest_bytes = manifest.canonical_bytes()?;

    info!(artifact = %artifact_name, fingerprint = signing_key_fingerprint, "signing manifest");

    let signature = signer.sign(&manifest_bytes, signing_key_fingerprint, passphrase)?;
    let signature_bytes = signature.to_json_bytes().map_err(crate::signing::SignError::Json)?;

    info!(artifact = %artifact_name, entries = manifest.entries.len(), "writing archive");

    let mut archive = ArchiveWriter::new(writer);
    archive.append_blob(MANIFEST_BLOB_NAME, &manifest_bytes)?;
    archive.append_blob(SIGNATURE_BLOB_NAME, &signature_bytes)?;
    for entry in &manifest.entries {
        let stream = blobs
            .get(&entry.name)
            .ok_or_else(|| ModelError::MissingAttribute {
                attribute: entry.name.clone(),
            })?;
        archive.append_blob(&entry.name, stream.bytes()?)?;
    }
    let writer = archive.finish()?;

    // `key` is zeroized on drop here
    Ok(writer)
}

/// Save an artifact to a file path.
///
/// The archive is staged in a temporary file next to the destination and
/// only renamed into place on success, so a failed or cancelled save never
/// leaves a usable-looking truncated archive.
pub fn save_to_path<A: CompositeArtifact>(
    artifact: &mut A,
    path: &Path,
    registry: &CodecRegistry,
    signer: &SignerHome,
    signing_key_fingerprint: &str,
    passphrase: Option<&str>,
    config: &Config,
) -> Result<(), SaveError> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let mut staged = match dir {
        Some(dir) => tempfile::NamedTempFile::new_in(dir)?,
        None => tempfile::NamedTempFile::new()?,
    };

    save_to_writer(
        artifact,
        staged.as_file_mut(),
        registry,
        signer,
        signing_key_fingerprint,
        passphrase,
        config,
    )?;

    staged.persist(path).map_err(|e| SaveError::Io(e.error))?;
    info!(path = %path.display(), "archive written");
    Ok(())
}
