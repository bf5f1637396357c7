//! HTTP-01 challenge provider (spec.md §4.2): a custom provider that stores the
//! key-authorization keyed by challenge path in a small map; the plaintext listener
//! serves it from memory and falls back to a file root on a miss (SPEC_FULL.md §4.2 —
//! operator-placed static files, never written to by this binary).

use dashmap::DashMap;

#[derive(Default)]
pub struct ChallengeTable {
    entries: DashMap<String, String>,
    file_root: Option<std::path::PathBuf>,
}

impl ChallengeTable {
    pub fn new(file_root: Option<String>) -> Self {
        Self { entries: DashMap::new(), file_root: file_root.map(std::path::PathBuf::from) }
    }

    pub fn insert(&self, token: &str, key_authorization: &str) {
        self.entries.insert(token.to_owned(), key_authorization.to_owned());
    }

    /// `CleanUp` (spec.md §4.2): removes the entry once the challenge has been validated
    /// or abandoned.
    pub fn remove(&self, token: &str) {
        self.entries.remove(token);
    }

    /// Serves `/.well-known/acme-challenge/<token>`: memory first, file root on a miss.
    pub fn get(&self, token: &str) -> Option<String> {
        if let Some(value) = self.entries.get(token) {
            return Some(value.clone());
        }
        let root = self.file_root.as_ref()?;
        std::fs::read_to_string(root.join(token)).ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_hit_short_circuits_file_fallback() {
        let table = ChallengeTable::new(None);
        table.insert("tok1", "key-auth-1");
        assert_eq!(table.get("tok1").as_deref(), Some("key-auth-1"));
    }

    #[test]
    fn cleanup_removes_entry() {
        let table = ChallengeTable::new(None);
        table.insert("tok1", "key-auth-1");
        table.remove("tok1");
        assert_eq!(table.get("tok1"), None);
    }

    #[test]
    fn file_fallback_only_consulted_on_memory_miss() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tok2"), "key-auth-file").unwrap();
        let table = ChallengeTable::new(Some(dir.path().to_string_lossy().into_owned()));
        assert_eq!(table.get("tok2").as_deref(), Some("key-auth-file"));
        assert_eq!(table.get("missing"), None);
    }
}
