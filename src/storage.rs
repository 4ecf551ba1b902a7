//! The storage adapter contract (§6): an external collaborator this crate
//! only specifies an interface for. No concrete adapter (filesystem, cloud
//! blob store, in-memory) lives in this crate — implementing one is up to
//! whoever embeds the engine.

use anyhow::Result;

/// A storage key: a list of non-empty path segments with no `/`, joined 1:1
/// onto a string path by the adapter. Implementers MUST splay the first
/// segment by its first two characters into two nested directories (mirrors
/// a content-addressed blob store's usual layout) to avoid directory
/// blow-up once a document accumulates many incremental saves.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct StorageKey(Vec<String>);

impl StorageKey {
    pub fn new(segments: impl IntoIterator<Item = String>) -> anyhow::Result<Self> {
        let segments: Vec<String> = segments.into_iter().collect();
        if segments.iter().any(|s| s.is_empty() || s.contains('/')) {
            anyhow::bail!("storage key segments must be non-empty and contain no '/'");
        }
        Ok(Self(segments))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn splayed_path(&self) -> String {
        match self.0.split_first() {
            Some((first, rest)) if first.len() >= 2 => {
                let (a, b) = first.split_at(2);
                std::iter::once(a.to_string())
                    .chain(std::iter::once(b.to_string()))
                    .chain(rest.iter().cloned())
                    .collect::<Vec<_>>()
                    .join("/")
            }
            _ => self.0.join("/"),
        }
    }
}

/// The storage contract a document persistence layer (out of scope here)
/// implements. No ordering or atomicity across keys is required beyond
/// single-key overwrite atomicity.
pub trait Storage {
    fn load(&self, key: &StorageKey) -> Result<Option<Vec<u8>>>;
    fn load_range(&self, prefix: &StorageKey) -> Result<Vec<(StorageKey, Vec<u8>)>>;
    fn put(&self, key: &StorageKey, bytes: &[u8]) -> Result<()>;
    fn delete(&self, key: &StorageKey) -> Result<()>;
}

/// The persisted layout a `Storage` implementation is expected to keep per
/// document (§6): a compacted snapshot plus incremental per-change blobs
/// awaiting the next compaction. Compaction is safe to run concurrently
/// because every key is content-addressed.
pub fn snapshot_key(doc: &str) -> anyhow::Result<StorageKey> {
    StorageKey::new([doc.to_string(), "snapshot".to_string()])
}

pub fn incremental_key(doc: &str, change_hash: &str) -> anyhow::Result<StorageKey> {
    StorageKey::new([doc.to_string(), "incremental".to_string(), change_hash.to_string()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splays_first_segment() {
        let key = StorageKey::new(["abcdef".to_string(), "snapshot".to_string()]).unwrap();
        assert_eq!(key.splayed_path(), "ab/cdef/snapshot");
    }

    #[test]
    fn rejects_segments_with_slash() {
        assert!(StorageKey::new(["a/b".to_string()]).is_err());
    }
}
