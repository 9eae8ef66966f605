//! Deterministic archive packaging.
//!
//! Two container formats are produced:
//!
//! - **zip** (deflate) for a module's distributable: entry bundle, configs,
//!   stylesheets and the `dapplet.json` overlay manifest.
//! - **tar** (uncompressed) for overlay asset directories.
//!
//! Both writers pin every piece of metadata that would otherwise vary between
//! runs (timestamps, owners, permissions) and keep entries in input order, so
//! packaging the same entries twice gives byte-identical output. The storage
//! layer depends on that: the archive hash is compared against the hash the
//! centralized backup computes.

use std::io::{Cursor, Read, Write};

use bytes::Bytes;
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

/// Highest deflate level, used for the distributable.
pub const MAX_COMPRESSION: i64 = 9;

/// A named file to be packed into an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Relative path inside the archive
    pub path: String,
    /// File contents
    pub data: Bytes,
}

impl ArchiveEntry {
    /// Create a new entry.
    pub fn new(path: impl Into<String>, data: impl Into<Bytes>) -> Self {
        ArchiveEntry {
            path: path.into(),
            data: data.into(),
        }
    }
}

/// Archive read/write failure.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive I/O error")]
    Io(#[from] std::io::Error),

    #[error("zip error")]
    Zip(#[from] zip::result::ZipError),

    #[error("invalid archive path `{0}`")]
    InvalidPath(String),
}

/// Normalize an entry path: forward slashes, no leading `/`, no `.` segments.
pub fn normalize_path(path: &str) -> Result<String, ArchiveError> {
    let normalized = path.replace('\\', "/");
    let parts: Vec<&str> = normalized
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
        .collect();

    if parts.is_empty() || parts.contains(&"..") {
        return Err(ArchiveError::InvalidPath(path.to_string()));
    }

    Ok(parts.join("/"))
}

/// Pack entries into an uncompressed tar archive.
pub fn pack_tar(entries: &[ArchiveEntry]) -> Result<Vec<u8>, ArchiveError> {
    let mut builder = tar::Builder::new(Vec::new());
    builder.mode(tar::HeaderMode::Deterministic);

    for entry in entries {
        let path = normalize_path(&entry.path)?;

        let mut header = tar::Header::new_gnu();
        header.set_size(entry.data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        header.set_entry_type(tar::EntryType::Regular);

        builder.append_data(&mut header, &path, entry.data.as_ref())?;
    }

    Ok(builder.into_inner()?)
}

/// Read every regular file out of a tar archive, in archive order.
pub fn unpack_tar(data: &[u8]) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    let mut archive = tar::Archive::new(Cursor::new(data));
    let mut entries = Vec::new();

    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }

        let path = entry.path()?.to_string_lossy().replace('\\', "/");
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents)?;
        entries.push(ArchiveEntry::new(path, contents));
    }

    Ok(entries)
}

/// Pack entries into a deflate-compressed zip archive.
///
/// `level` is the deflate level (0-9).
pub fn pack_zip(entries: &[ArchiveEntry], level: i64) -> Result<Vec<u8>, ArchiveError> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));

    for entry in entries {
        let path = normalize_path(&entry.path)?;
        writer.start_file(path, zip_options(level))?;
        writer.write_all(&entry.data)?;
    }

    Ok(writer.finish()?.into_inner())
}

fn zip_options(level: i64) -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .compression_level(Some(level))
        .last_modified_time(DateTime::default())
        .unix_permissions(0o644)
}

/// Read every file out of a zip archive, in archive order.
pub fn unpack_zip(data: &[u8]) -> Result<Vec<ArchiveEntry>, ArchiveError> {
    let mut archive = ZipArchive::new(Cursor::new(data))?;
    let mut entries = Vec::new();

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() {
            continue;
        }

        let path = file.name().to_string();
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;
        entries.push(ArchiveEntry::new(path, contents));
    }

    Ok(entries)
}
