//! Tests for the files crate.

#[cfg(test)]
mod integration_tests {
    use crate::descriptor::Fingerprint;
    use crate::identity::{fingerprint_file, scan_shared_folder};
    use std::fs;

    #[test]
    fn test_scan_lists_top_level_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), b"bravo").unwrap();
        fs::write(dir.path().join("a.txt"), b"alpha!").unwrap();
        fs::write(dir.path().join(".a.txt.part"), b"partial").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("c.txt"), b"charlie").unwrap();

        let records = scan_shared_folder(dir.path()).unwrap();
        let names: Vec<&str> = records.iter().map(|r| r.display_name.as_str()).collect();
        assert_eq!(names, vec!["a.txt", "b.txt"]);

        assert_eq!(records[0].size_bytes, 6);
        assert_eq!(records[1].size_bytes, 5);
        let (expected, _) = fingerprint_file(&dir.path().join("a.txt")).unwrap();
        assert_eq!(records[0].fingerprint, expected);
    }

    #[test]
    fn test_identical_content_shares_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("one.bin"), b"same bytes").unwrap();
        fs::write(dir.path().join("two.bin"), b"same bytes").unwrap();

        let records = scan_shared_folder(dir.path()).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].fingerprint, records[1].fingerprint);
        assert_ne!(records[0].fingerprint, Fingerprint::from_bytes([0u8; 32]));
    }

    #[test]
    fn test_missing_root_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let records = scan_shared_folder(&dir.path().join("absent")).unwrap();
        assert!(records.is_empty());
    }
}
