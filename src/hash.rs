//! Deterministic fingerprints for resource specifications
//!
//! A `HashKey` names a cache entry. Keys are SHA256 digests truncated to
//! 32 hex characters (128 bits) over a canonical serialization of the
//! inputs: items are trimmed, empty items dropped, and the rest sorted, so
//! presentation order never changes the key. No process-local seeding is
//! involved, so every process computes the same key for the same spec.

use crate::error::{BoostError, BoostResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::os::unix::ffi::OsStrExt;
use std::path::{Component, Path, PathBuf};

/// Number of hex characters kept from the digest
pub const KEY_HEX_LEN: usize = 32;

/// Fixed-length digest naming a cached resource
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashKey(String);

impl HashKey {
    /// Order-independent key over a multiset of items
    pub fn from_items<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = items
            .into_iter()
            .map(|item| item.as_ref().trim().to_string())
            .filter(|item| !item.is_empty())
            .collect();
        normalized.sort();

        let mut hasher = Sha256::new();
        for item in &normalized {
            hasher.update(item.as_bytes());
            hasher.update([0u8]);
        }
        Self::from_digest(&hasher.finalize())
    }

    /// Key over raw content, with no normalization
    pub fn of_bytes(bytes: &[u8]) -> Self {
        Self::from_digest(&Sha256::digest(bytes))
    }

    /// Key for an archive path
    ///
    /// Matches the key the generated shell computes with
    /// `realpath -ms -- PATH | sha256sum`, so Rust-side tooling and running
    /// jobs agree on the mount directory.
    pub fn for_archive(path: &Path) -> BoostResult<Self> {
        let absolute = lexical_absolute(path)?;
        Ok(Self::of_bytes(absolute.as_os_str().as_bytes()))
    }

    /// Parse a key previously rendered with `Display`
    pub fn parse(s: &str) -> Option<Self> {
        let valid = s.len() == KEY_HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit());
        valid.then(|| Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn from_digest(digest: &[u8]) -> Self {
        let hex = hex::encode(digest);
        Self(hex[..KEY_HEX_LEN].to_string())
    }
}

impl fmt::Display for HashKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Absolute path with `.` and `..` resolved lexically; symlinks are not followed
pub fn lexical_absolute(path: &Path) -> BoostResult<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map_err(|e| BoostError::io("getting current directory", e))?
            .join(path)
    };

    let mut out = PathBuf::from("/");
    for component in joined.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::ParentDir => {
                out.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_independent() {
        let a = HashKey::from_items(["numpy==1.26", "pandas", "scipy"]);
        let b = HashKey::from_items(["scipy", "numpy==1.26", "pandas"]);
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), KEY_HEX_LEN);
    }

    #[test]
    fn whitespace_is_not_significant() {
        let a = HashKey::from_items(["  pandas ", "scipy\n"]);
        let b = HashKey::from_items(["pandas", "", "scipy"]);
        assert_eq!(a, b);
    }

    #[test]
    fn versions_change_the_key() {
        let keys = [
            HashKey::from_items(["numpy==1.26"]),
            HashKey::from_items(["numpy==1.25"]),
            HashKey::from_items(["numpy"]),
            HashKey::from_items(["numpy", "numpy"]),
            HashKey::from_items(["nump", "y"]),
        ];
        for (i, a) in keys.iter().enumerate() {
            for b in &keys[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn no_collisions_across_a_corpus() {
        let mut seen = std::collections::HashSet::new();
        for major in 0..40 {
            for minor in 0..50 {
                let key = HashKey::from_items([format!("pkg=={major}.{minor}"), "base".into()]);
                assert!(seen.insert(key));
            }
        }
    }

    #[test]
    fn content_hash_is_stable() {
        let key = HashKey::of_bytes(b"echo hello");
        assert_eq!(key, HashKey::of_bytes(b"echo hello"));
        assert_ne!(key, HashKey::of_bytes(b"echo hello "));
    }

    #[test]
    fn archive_key_normalizes_path() {
        let a = HashKey::for_archive(Path::new("/data/./sub/../input.tar.gz")).unwrap();
        let b = HashKey::for_archive(Path::new("/data/input.tar.gz")).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn lexical_absolute_resolves_dots() {
        assert_eq!(
            lexical_absolute(Path::new("/a/b/../c/./d")).unwrap(),
            PathBuf::from("/a/c/d")
        );
        assert_eq!(lexical_absolute(Path::new("/..")).unwrap(), PathBuf::from("/"));
    }

    #[test]
    fn parse_roundtrip() {
        let key = HashKey::from_items(["x"]);
        assert_eq!(HashKey::parse(key.as_str()), Some(key));
        assert_eq!(HashKey::parse("not-a-key"), None);
    }
}
