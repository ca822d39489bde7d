//! The local, content-addressed compiled-tree cache: `<compile-dir>/<stemcell-hash>/<fingerprint>/compiled`
//! (§3, §4.4 step 3). Finalization from a `compiled-temp` workspace to
//! `compiled` is a single atomic rename, so a reader never observes a
//! partially-populated tree.

use fingerprint::Fingerprint;
use std::path::{Path, PathBuf};

pub struct LocalCache {
    root: PathBuf,
}

impl LocalCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn compiled_dir(&self, stemcell_hash: &str, fingerprint: &Fingerprint) -> PathBuf {
        self.root.join(stemcell_hash).join(fingerprint.as_str()).join("compiled")
    }

    pub fn temp_dir(&self, stemcell_hash: &str, fingerprint: &Fingerprint) -> PathBuf {
        self.root.join(stemcell_hash).join(fingerprint.as_str()).join("compiled-temp")
    }

    /// A compile step is skipped only when the compiled directory exists and
    /// contains at least one entry -- an empty directory left behind by a
    /// crashed run must not be mistaken for a completed compile.
    pub fn is_populated(&self, stemcell_hash: &str, fingerprint: &Fingerprint) -> bool {
        let dir = self.compiled_dir(stemcell_hash, fingerprint);
        match std::fs::read_dir(&dir) {
            Ok(mut entries) => entries.next().is_some(),
            Err(_) => false,
        }
    }

    /// Renames `temp_dir(...)` to `compiled_dir(...)`, removing any stale
    /// directory already at the destination first.
    pub fn finalize(&self, stemcell_hash: &str, fingerprint: &Fingerprint) -> std::io::Result<()> {
        let temp = self.temp_dir(stemcell_hash, fingerprint);
        let dest = self.compiled_dir(stemcell_hash, fingerprint);
        if dest.exists() {
            std::fs::remove_dir_all(&dest)?;
        }
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::rename(&temp, &dest)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fingerprint::fingerprint_of;

    fn fp() -> Fingerprint {
        fingerprint_of(["fp"])
    }

    #[test]
    fn empty_directory_is_not_populated() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(dir.path());
        std::fs::create_dir_all(cache.compiled_dir("stemcell", &fp())).unwrap();
        assert!(!cache.is_populated("stemcell", &fp()));
    }

    #[test]
    fn missing_directory_is_not_populated() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(dir.path());
        assert!(!cache.is_populated("stemcell", &fp()));
    }

    #[test]
    fn finalize_renames_temp_into_place() {
        let dir = tempfile::tempdir().unwrap();
        let cache = LocalCache::new(dir.path());
        let temp = cache.temp_dir("stemcell", &fp());
        std::fs::create_dir_all(&temp).unwrap();
        std::fs::write(temp.join("bin"), b"compiled output").unwrap();

        cache.finalize("stemcell", &fp()).unwrap();

        assert!(cache.is_populated("stemcell", &fp()));
        assert!(!temp.exists());
    }
}
