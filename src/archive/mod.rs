//! The archive container
//!
//! An archive is a gzipped tar of named byte blobs: `manifest`,
//! `manifest.sig`, then one blob per manifest entry. Writers emit the
//! manifest and signature first so a reader can fail early; readers treat
//! blob names as authoritative and ignore physical order.
//!
//! Tar headers are canonicalized (epoch mtime, zero uid/gid, fixed mode) so
//! identical blob sets produce identical archives.

use std::fs;
use std::io::{Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Builder, Header};

/// Blob name of the manifest
pub const MANIFEST_BLOB_NAME: &str = "manifest";

/// Blob name of the detached signature
pub const SIGNATURE_BLOB_NAME: &str = "manifest.sig";

/// Errors from reading or writing archives
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("blob name '{name}' is not a plain file name")]
    InvalidBlobName { name: String },

    #[error("archive contains blob '{name}' more than once")]
    DuplicateBlob { name: String },
}

/// One named blob read back from an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveBlob {
    pub name: String,
    pub data: Vec<u8>,
}

fn check_blob_name(name: &str) -> Result<(), ArchiveError> {
    let plain = !name.is_empty()
        && !name.contains('/')
        && !name.contains('\\')
        && name != "."
        && name != "..";
    if plain {
        Ok(())
    } else {
        Err(ArchiveError::InvalidBlobName {
            name: name.to_string(),
        })
    }
}

/// Streaming archive writer. Blobs are appended in call order; the stream
/// is never rewound, so the caller must append the manifest and signature
/// before any entry blobs.
pub struct ArchiveWriter<W: Write> {
    builder: Builder<GzEncoder<W>>,
}

impl<W: Write> ArchiveWriter<W> {
    pub fn new(writer: W) -> Self {
        let encoder = GzEncoder::new(writer, Compression::default());
        Self {
            builder: Builder::new(encoder),
        }
    }

    /// Append one named blob with a canonical header
    pub fn append_blob(&mut self, name: &str, data: &[u8]) -> Result<(), ArchiveError> {
        check_blob_name(name)?;

        let mut header = Header::new_gnu();
        header.set_path(name)?;
        header.set_size(data.len() as u64);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_mode(0o644);
        header.set_cksum();

        self.builder.append(&header, data)?;
        Ok(())
    }

    /// Finish the tar stream and the gzip trailer, returning the writer
    pub fn finish(self) -> Result<W, ArchiveError> {
        let encoder = self.builder.into_inner()?;
        Ok(encoder.finish()?)
    }
}

/// Read every blob of an archive into memory, preserving physical order.
///
/// The bytes are only buffered here; nothing interprets them until the
/// signature and entry tags have been verified upstream.
pub fn read_archive<R: Read>(reader: R) -> Result<Vec<ArchiveBlob>, ArchiveError> {
    let mut archive = tar::Archive::new(GzDecoder::new(reader));
    let mut blobs: Vec<ArchiveBlob> = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        let name = {
            let path = entry.path()?;
            match path.to_str() {
                Some(s) => s.to_string(),
                None => {
                    return Err(ArchiveError::InvalidBlobName {
                        name: path.to_string_lossy().into_owned(),
                    })
                }
            }
        };
        check_blob_name(&name)?;
        if blobs.iter().any(|b| b.name == name) {
            return Err(ArchiveError::DuplicateBlob { name });
        }

        let mut data = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut data)?;
        blobs.push(ArchiveBlob { name, data });
    }

    Ok(blobs)
}

/// Read an archive from a file path
pub fn read_archive_file(path: &Path) -> Result<Vec<ArchiveBlob>, ArchiveError> {
    let file = fs::File::open(path)?;
    read_archive(std::io::BufReader::new(file))
}
