//! The `Package` type: a source unit compiled by a `packaging` script.

use fingerprint::Fingerprint;
use std::path::{Path, PathBuf};

/// Belongs to exactly one [`crate::Release`]. Two packages in two different
/// releases that happen to share source contents and dependency names share
/// a `fingerprint`, and therefore share a compiled artifact (§3, §4.3 design
/// note on content-addressed cache identity) -- the fingerprint is computed
/// without reference to the enclosing release's name or version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub name: String,
    pub version: String,
    pub fingerprint: Fingerprint,
    pub sha1: String,
    /// Names of dependency packages, ordered as declared. Resolved to sibling
    /// `Package` values by the loader once every package in the release has
    /// been parsed.
    pub dependencies: Vec<String>,
    pub archive_path: PathBuf,
}

impl Package {
    /// `<cache-root>/<stemcell-hash>/<package-fingerprint>/compiled`
    ///
    /// Pure function of its inputs: moving the cache root never requires
    /// rewriting any persisted state, and two packages with the same
    /// fingerprint under the same stemcell resolve to the same path.
    pub fn compiled_dir(&self, cache_root: &Path, stemcell_hash: &str) -> PathBuf {
        cache_root
            .join(stemcell_hash)
            .join(self.fingerprint.as_str())
            .join("compiled")
    }
}
