//! Parsing of `release.MF`, the top-level manifest of a final BOSH release.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub(crate) struct ReleaseMf {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub commit_hash: Option<String>,
    #[serde(default)]
    pub jobs: Vec<JobEntry>,
    #[serde(default)]
    pub packages: Vec<PackageEntry>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JobEntry {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    pub fingerprint: Option<String>,
    pub sha1: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PackageEntry {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
    pub fingerprint: Option<String>,
    pub sha1: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
}
