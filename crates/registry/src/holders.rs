//! Holder identity directory.
//!
//! Issuing identities is outside the registry's job; this module only
//! provides the contract the registry relies on (resolve a holder, map a
//! bearer credential to a holder) plus an in-memory implementation that is
//! seeded from configuration.

use crate::errors::{RegistryError, Result};
use crate::types::{Holder, HolderId};
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Identity collaborator used by the registry and its HTTP surface.
pub trait HolderDirectory: Send + Sync {
    /// Create a holder with the next free id. Fails with `Conflict` when the
    /// label or credential is already taken.
    fn register(&self, label: &str, credential: &str) -> Result<Holder>;

    /// Create a holder with a caller-chosen id.
    fn register_with_id(&self, id: HolderId, label: &str, credential: &str) -> Result<Holder>;

    /// Look up a holder by id.
    fn resolve(&self, id: HolderId) -> Option<Holder>;

    /// Look up a holder by label (case-insensitive).
    fn find_by_label(&self, label: &str) -> Option<Holder>;

    /// Map a bearer credential to the holder it belongs to.
    fn authenticate(&self, credential: &str) -> Result<HolderId>;

    /// Number of known holders.
    fn count(&self) -> usize;
}

#[derive(Default)]
struct DirectoryTables {
    holders: HashMap<HolderId, Holder>,
    by_label: HashMap<String, HolderId>,
    by_credential: HashMap<[u8; 32], HolderId>,
    next_id: u64,
}

/// In-memory holder directory. Credentials are kept only as SHA-256 digests.
#[derive(Default)]
pub struct MemoryHolderDirectory {
    tables: RwLock<DirectoryTables>,
}

impl MemoryHolderDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, id: Option<HolderId>, label: &str, credential: &str) -> Result<Holder> {
        let label = normalize_label(label)?;
        if credential.trim().is_empty() {
            return Err(RegistryError::Validation(
                "credential must not be empty".to_string(),
            ));
        }
        let digest = credential_digest(credential);

        let mut tables = self.tables.write();
        if tables.by_label.contains_key(&label) {
            return Err(RegistryError::Conflict(format!("holder '{label}'")));
        }
        if tables.by_credential.contains_key(&digest) {
            return Err(RegistryError::Conflict("credential".to_string()));
        }

        let id = match id {
            Some(id) => {
                if tables.holders.contains_key(&id) {
                    return Err(RegistryError::Conflict(format!("holder id {id}")));
                }
                id
            }
            None => {
                let mut candidate = tables.next_id.max(1);
                while tables.holders.contains_key(&HolderId(candidate)) {
                    candidate += 1;
                }
                HolderId(candidate)
            }
        };
        tables.next_id = tables.next_id.max(id.0 + 1);

        let holder = Holder {
            id,
            label: label.clone(),
        };
        tables.holders.insert(id, holder.clone());
        tables.by_label.insert(label, id);
        tables.by_credential.insert(digest, id);
        Ok(holder)
    }
}

impl HolderDirectory for MemoryHolderDirectory {
    fn register(&self, label: &str, credential: &str) -> Result<Holder> {
        self.insert(None, label, credential)
    }

    fn register_with_id(&self, id: HolderId, label: &str, credential: &str) -> Result<Holder> {
        self.insert(Some(id), label, credential)
    }

    fn resolve(&self, id: HolderId) -> Option<Holder> {
        self.tables.read().holders.get(&id).cloned()
    }

    fn find_by_label(&self, label: &str) -> Option<Holder> {
        let label = label.trim().to_lowercase();
        let tables = self.tables.read();
        tables
            .by_label
            .get(&label)
            .and_then(|id| tables.holders.get(id))
            .cloned()
    }

    fn authenticate(&self, credential: &str) -> Result<HolderId> {
        if credential.is_empty() {
            return Err(RegistryError::Unauthorized(
                "missing credential".to_string(),
            ));
        }
        self.tables
            .read()
            .by_credential
            .get(&credential_digest(credential))
            .copied()
            .ok_or_else(|| RegistryError::Unauthorized("could not validate credentials".to_string()))
    }

    fn count(&self) -> usize {
        self.tables.read().holders.len()
    }
}

fn normalize_label(label: &str) -> Result<String> {
    let label = label.trim().to_lowercase();
    if label.len() < 3 || label.len() > 50 {
        return Err(RegistryError::Validation(
            "holder label must be 3-50 characters".to_string(),
        ));
    }
    if !label
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(RegistryError::Validation(
            "holder label may only contain letters, digits, '_' and '-'".to_string(),
        ));
    }
    Ok(label)
}

fn credential_digest(credential: &str) -> [u8; 32] {
    Sha256::digest(credential.as_bytes()).into()
}
