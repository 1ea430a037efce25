use std::fmt;

use sha2::{Digest, Sha256};

use crate::types::ModuleRef;

/// The key of one disk cache entry.
///
/// The key is derived from the sanitized `(debug_filename, debug_id)` pair.
/// Its sha256 fingerprint determines the shard directory, capping per-directory
/// fan-out; the sanitized components themselves keep the on-disk layout
/// human-readable.
#[derive(Debug, Clone, Eq)]
pub struct CacheKey {
    debug_file: String,
    debug_id: String,
    hash: [u8; 32],
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.hash == other.hash
    }
}

impl std::hash::Hash for CacheKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.debug_file, self.debug_id)
    }
}

impl CacheKey {
    pub fn for_module(module: &ModuleRef) -> Self {
        Self::new(&module.debug_file, &module.debug_id)
    }

    /// Creates a key from sanitized path segments.
    ///
    /// Reconstructing a key from its on-disk path components yields the same
    /// key, which is what the startup warm scan relies on.
    pub fn new(debug_file: &str, debug_id: &str) -> Self {
        let debug_file = safe_path_segment(debug_file);
        let debug_id = safe_path_segment(debug_id);

        let mut hasher = Sha256::new();
        hasher.update(&debug_file);
        hasher.update("/");
        hasher.update(&debug_id);
        let hash = <[u8; 32]>::try_from(hasher.finalize().as_slice()).unwrap();

        CacheKey {
            debug_file,
            debug_id,
            hash,
        }
    }

    pub fn debug_file(&self) -> &str {
        &self.debug_file
    }

    pub fn debug_id(&self) -> &str {
        &self.debug_id
    }

    /// The first two hex characters of the key fingerprint.
    pub fn shard(&self) -> String {
        format!("{:02x}", self.hash[0])
    }

    /// The relative path of this entry for the given symcache format version:
    /// `<shard>/<debug_filename>/<debug_id>/<version>/symcache`.
    pub fn cache_path(&self, version: u32) -> String {
        format!(
            "{}/{}/{}/{}/symcache",
            self.shard(),
            self.debug_file,
            self.debug_id,
            version
        )
    }
}

/// Protect against:
/// * ".."
/// * absolute paths
/// * ":" (not a threat on POSIX filesystems, but confuses OS X Finder)
fn safe_path_segment(s: &str) -> String {
    s.replace(['.', '/', '\\', ':'], "_")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_path_shape() {
        let module = ModuleRef::new("xul.pdb", "44e4ec8c2f41492b9369d6b9a059577c2").unwrap();
        let key = CacheKey::for_module(&module);

        let path = key.cache_path(1);
        let segments: Vec<_> = path.split('/').collect();
        assert_eq!(segments.len(), 5);
        assert_eq!(segments[0].len(), 2);
        assert_eq!(segments[1], "xul_pdb");
        assert_eq!(segments[2], "44E4EC8C2F41492B9369D6B9A059577C2");
        assert_eq!(segments[3], "1");
        assert_eq!(segments[4], "symcache");
    }

    #[test]
    fn test_path_traversal_sanitized() {
        let key = CacheKey::new("../../etc/passwd", "AA");
        assert!(!key.cache_path(1).contains(".."));
    }

    #[test]
    fn test_reconstructed_key_matches() {
        let module = ModuleRef::new("libxul.so", "AABBCCDD0").unwrap();
        let key = CacheKey::for_module(&module);

        let reconstructed = CacheKey::new(key.debug_file(), key.debug_id());
        assert_eq!(key, reconstructed);
        assert_eq!(key.cache_path(1), reconstructed.cache_path(1));
    }
}
