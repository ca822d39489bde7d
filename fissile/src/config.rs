//! On-disk configuration for one build run, read from a TOML file (§6's
//! wire formats are all YAML for releases/role-manifests; the engine's own
//! run configuration is TOML).

use anyhow::{Context, Result};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};

/// Constrains `Config::schema_version` to a single accepted value: loading a
/// config file written for a different schema version fails fast instead of
/// silently misreading renamed or restructured fields.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct SchemaVersion<const N: u32>;

impl<const N: u32> fmt::Display for SchemaVersion<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{N}")
    }
}

impl<const N: u32> Serialize for SchemaVersion<N> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(N)
    }
}

impl<'de, const N: u32> Deserialize<'de> for SchemaVersion<N> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = u32::deserialize(deserializer)?;
        if value != N {
            return Err(D::Error::custom(format!(
                "unsupported config schema_version {value}, expected {N}"
            )));
        }
        Ok(Self)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReleaseSource {
    Directory { path: PathBuf },
    Tarball { url: String, name: Option<String>, version: Option<String>, sha1: Option<String> },
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationMode {
    Container,
    Namespace,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BlobCache {
    pub url: String,
    #[serde(default = "default_true")]
    pub read: bool,
    #[serde(default)]
    pub write: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    pub schema_version: SchemaVersion<1>,
    pub releases: Vec<ReleaseSource>,
    pub role_manifest: PathBuf,
    pub scripts_root: Option<PathBuf>,
    pub stemcell_name: String,
    pub stemcell_hash: String,
    pub base_layer_tag: String,
    pub generator_version: String,
    pub build_root: PathBuf,
    pub cache_dir: PathBuf,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    pub isolation: IsolationMode,
    /// Image the container isolation mode runs `packaging` in. Ignored
    /// under `isolation = "namespace"`.
    pub isolation_image: Option<String>,
    pub blob_cache: Option<BlobCache>,
    pub graph_output: Option<PathBuf>,
}

fn default_concurrency() -> usize {
    num_cpus::get()
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{}'", path.display()))?;
        toml::from_str(&contents)
            .with_context(|| format!("failed to parse config file '{}'", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_an_unsupported_schema_version() {
        let toml = r#"
            schema-version = 2
            releases = []
            role-manifest = "role-manifest.yml"
            stemcell-name = "stemcell"
            stemcell-hash = "deadbeef"
            base-layer-tag = "fissile/base:latest"
            generator-version = "0.1.0"
            build-root = "build"
            cache-dir = "cache"
            isolation = "namespace"
        "#;
        let err = toml::from_str::<Config>(toml).unwrap_err();
        assert!(err.to_string().contains("schema_version"));
    }

    #[test]
    fn parses_a_minimal_config() {
        let toml = r#"
            schema-version = 1
            releases = []
            role-manifest = "role-manifest.yml"
            stemcell-name = "stemcell"
            stemcell-hash = "deadbeef"
            base-layer-tag = "fissile/base:latest"
            generator-version = "0.1.0"
            build-root = "build"
            cache-dir = "cache"
            isolation = "namespace"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.stemcell_name, "stemcell");
        assert!(matches!(config.isolation, IsolationMode::Namespace));
    }
}
