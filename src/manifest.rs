//! Parsers for the server's `Manifest` and `Hashes` files.

use std::collections::HashMap;

use crate::models::ManifestEntry;

const BYTE_ORDER_MARK: char = '\u{feff}';

/// Keeps every line that, once trimmed, starts with `/`. Order is preserved.
pub fn parse_manifest(text: &str) -> Vec<ManifestEntry> {
    text.lines()
        .map(str::trim)
        .filter(|line| line.starts_with('/'))
        .map(ManifestEntry::new)
        .collect()
}

/// Expected content hash per manifest path.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashLedger {
    hashes: HashMap<String, String>,
}

impl HashLedger {
    /// Parses tab-separated `<path>\t<hash>[\t...]` records. Lines with fewer
    /// than two fields are skipped; hash format is not checked.
    pub fn parse(text: &str) -> Self {
        let text = text.strip_prefix(BYTE_ORDER_MARK).unwrap_or(text);
        let mut hashes = HashMap::new();
        for line in text.lines().map(str::trim).filter(|line| !line.is_empty()) {
            let mut fields = line.split('\t');
            if let (Some(path), Some(hash)) = (fields.next(), fields.next()) {
                hashes.insert(path.trim().to_string(), hash.trim().to_string());
            }
        }
        Self { hashes }
    }

    /// The expected hash for `path`, or the empty string when the ledger has
    /// no record of it.
    pub fn expected_hash(&self, path: &str) -> &str {
        self.hashes.get(path).map(String::as_str).unwrap_or("")
    }

    pub fn len(&self) -> usize {
        self.hashes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_keeps_only_rooted_lines() {
        let text = "# comment\r\n  /a.txt  \n\nrelative.txt\n/-b.txt\n/+c.txt\n";
        let entries = parse_manifest(text);
        let paths: Vec<&str> = entries.iter().map(|e| e.path()).collect();
        assert_eq!(paths, vec!["/a.txt", "/-b.txt", "/+c.txt"]);
    }

    #[test]
    fn ledger_strips_bom_and_extra_fields() {
        let text = "\u{feff}/a.txt\tABC123\tignored\n/b.txt\tdef456\n";
        let ledger = HashLedger::parse(text);
        assert_eq!(ledger.len(), 2);
        assert_eq!(ledger.expected_hash("/a.txt"), "ABC123");
        assert_eq!(ledger.expected_hash("/b.txt"), "def456");
    }

    #[test]
    fn ledger_skips_short_lines() {
        let text = "/only-path\n\n   \n/ok\t1234\n";
        let ledger = HashLedger::parse(text);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.expected_hash("/only-path"), "");
    }

    #[test]
    fn ledger_miss_is_empty_hash() {
        let ledger = HashLedger::default();
        assert!(ledger.is_empty());
        assert_eq!(ledger.expected_hash("/missing"), "");
    }
}
