//! PeerShare content identity
//!
//! Every shared file is keyed across the whole network by a whole-file
//! SHA-256 fingerprint. This crate computes fingerprints, describes the
//! announced record for a file, and scans a peer's shared folder.

pub mod descriptor;
pub mod error;
pub mod identity;

pub use descriptor::{validate_display_name, ContentRecord, Fingerprint, MAX_DISPLAY_NAME_LEN};
pub use error::{FilesError, Result};
pub use identity::{fingerprint_file, fingerprint_reader, scan_shared_folder, HASH_CHUNK_SIZE};

#[cfg(test)]
mod tests;
