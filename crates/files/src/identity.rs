//! Fingerprinting of local files and shared-folder scans.

use crate::descriptor::{validate_display_name, ContentRecord, Fingerprint};
use crate::error::{FilesError, Result};
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;
use tracing::{debug, warn};

/// Read granularity used while hashing.
pub const HASH_CHUNK_SIZE: usize = 4096;

/// Hash everything readable from `reader`, returning the digest and byte count.
pub fn fingerprint_reader<R: Read>(mut reader: R) -> io::Result<(Fingerprint, u64)> {
    let mut hasher = Sha256::new();
    let mut buf = [0u8; HASH_CHUNK_SIZE];
    let mut total = 0u64;

    loop {
        let read = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        hasher.update(&buf[..read]);
        total += read as u64;
    }

    Ok((Fingerprint::from_bytes(hasher.finalize().into()), total))
}

/// Fingerprint a file on disk.
pub fn fingerprint_file(path: &Path) -> Result<(Fingerprint, u64)> {
    let file = File::open(path).map_err(|e| FilesError::io(path, e))?;
    fingerprint_reader(file).map_err(|e| FilesError::io(path, e))
}

/// Describe every shareable file directly under `root`.
///
/// Only regular files at the top level are listed because the file server
/// resolves requests by bare name against the root. Hidden files are skipped
/// so in-progress downloads (`.name.part`) are never announced. Files that
/// cannot be read are logged and left out. A missing root yields an empty list.
pub fn scan_shared_folder(root: &Path) -> Result<Vec<ContentRecord>> {
    if !root.exists() {
        warn!("Shared folder does not exist: {}", root.display());
        return Ok(Vec::new());
    }

    let entries = fs::read_dir(root).map_err(|e| FilesError::io(root, e))?;
    let mut records = Vec::new();

    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("Skipping unreadable entry in {}: {}", root.display(), err);
                continue;
            }
        };

        let path = entry.path();
        if !path.is_file() {
            continue;
        }

        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            warn!("Skipping file with non UTF-8 name: {}", path.display());
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        if let Err(err) = validate_display_name(&name) {
            warn!("Skipping file {}: {}", path.display(), err);
            continue;
        }

        match fingerprint_file(&path) {
            Ok((fingerprint, size_bytes)) => {
                debug!("Fingerprinted {} ({} bytes): {}", name, size_bytes, fingerprint);
                records.push(ContentRecord::new(fingerprint, name, size_bytes));
            }
            Err(err) => warn!("Skipping file {}: {}", name, err),
        }
    }

    records.sort_by(|a, b| a.display_name.cmp(&b.display_name));
    Ok(records)
}
