//! Content record data model for announced files.

use crate::error::FilesError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum length of a display name accepted in an announcement.
pub const MAX_DISPLAY_NAME_LEN: usize = 255;

/// Whole-file SHA-256 digest, rendered as 64 lowercase hex characters on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    /// Create from raw digest bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the underlying bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Render as lowercase hexadecimal.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from a hex string. Upper-case input is case-folded first.
    pub fn from_hex(hex_str: &str) -> Result<Self, FilesError> {
        if hex_str.len() != 64 {
            return Err(FilesError::InvalidFingerprintLength(hex_str.len()));
        }
        let normalized = hex_str.to_ascii_lowercase();
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(&normalized, &mut bytes)
            .map_err(|e| FilesError::InvalidFingerprintHex(e.to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({})", self.to_hex())
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Fingerprint {
    type Err = FilesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl From<Fingerprint> for String {
    fn from(value: Fingerprint) -> Self {
        value.to_hex()
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = FilesError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

/// Metadata describing one shared file.
///
/// The registry keeps the first record it sees for a fingerprint; later
/// announcers of the same bytes only add themselves as holders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRecord {
    /// SHA-256 of the file content.
    pub fingerprint: Fingerprint,

    /// Bare file name, without any directory components.
    pub display_name: String,

    /// File size in bytes.
    pub size_bytes: u64,
}

impl ContentRecord {
    pub fn new(fingerprint: Fingerprint, display_name: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            fingerprint,
            display_name: display_name.into(),
            size_bytes,
        }
    }

    /// Validate the record fields.
    pub fn validate(&self) -> Result<(), FilesError> {
        validate_display_name(&self.display_name)
    }
}

/// Check that a name is a plain file name that cannot address anything
/// outside a shared root.
pub fn validate_display_name(name: &str) -> Result<(), FilesError> {
    let reject = |reason| {
        Err(FilesError::InvalidDisplayName {
            name: name.to_string(),
            reason,
        })
    };

    if name.is_empty() {
        return reject("must not be empty");
    }
    if name.len() > MAX_DISPLAY_NAME_LEN {
        return reject("longer than 255 bytes");
    }
    if name.contains("..") {
        return reject("must not contain '..'");
    }
    if name.contains('/') || name.contains('\\') {
        return reject("must not contain path separators");
    }
    if name.chars().any(char::is_control) {
        return reject("must not contain control characters");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_hex_roundtrip() {
        let fp = Fingerprint::from_bytes([0xab; 32]);
        let hex = fp.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(Fingerprint::from_hex(&hex).unwrap(), fp);
    }

    #[test]
    fn test_fingerprint_case_folded() {
        let upper = "AB".repeat(32);
        let fp = Fingerprint::from_hex(&upper).unwrap();
        assert_eq!(fp.to_hex(), "ab".repeat(32));
    }

    #[test]
    fn test_fingerprint_rejects_bad_input() {
        assert!(matches!(
            Fingerprint::from_hex("abc"),
            Err(FilesError::InvalidFingerprintLength(3))
        ));
        assert!(matches!(
            Fingerprint::from_hex(&"g".repeat(64)),
            Err(FilesError::InvalidFingerprintHex(_))
        ));
    }

    #[test]
    fn test_fingerprint_serde_as_string() {
        let fp = Fingerprint::from_bytes([0x0f; 32]);
        let json = serde_json::to_string(&fp).unwrap();
        assert_eq!(json, format!("\"{}\"", "0f".repeat(32)));

        let parsed: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, fp);

        let bad: Result<Fingerprint, _> = serde_json::from_str("\"not-hex\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_display_name_validation() {
        assert!(validate_display_name("notes.txt").is_ok());
        assert!(validate_display_name("report v2.pdf").is_ok());

        assert!(validate_display_name("").is_err());
        assert!(validate_display_name("../etc/passwd").is_err());
        assert!(validate_display_name("a..b").is_err());
        assert!(validate_display_name("dir/file").is_err());
        assert!(validate_display_name("dir\\file").is_err());
        assert!(validate_display_name("bad\nname").is_err());
        assert!(validate_display_name(&"x".repeat(256)).is_err());
    }

    #[test]
    fn test_record_validation() {
        let fp = Fingerprint::from_bytes([1u8; 32]);
        assert!(ContentRecord::new(fp, "x.txt", 0).validate().is_ok());
        assert!(ContentRecord::new(fp, "../x.txt", 10).validate().is_err());
    }
}
