//! Validates a BOSH-style role manifest against a set of loaded releases and
//! produces a fully resolved [`RoleManifest`] with links bound, RBAC/PSP
//! expansion applied, and templates/scripts checked.

mod error;
mod raw;
mod resolve;
mod types;

pub use error::{ValidationError, ValidationErrors};
pub use raw::RawManifest;
pub use resolve::{resolve, ResolveOptions};
pub use types::*;

use release::Release;
use std::path::Path;

/// Parses role-manifest YAML and resolves it against `releases` in one call.
pub fn load_and_resolve(yaml: &str, releases: &[Release], opts: &ResolveOptions) -> Result<RoleManifest, ValidationErrors> {
    let raw: RawManifest = serde_yaml::from_str(yaml).map_err(|e| vec![ValidationError::Internal { reason: format!("malformed role manifest: {e}") }])?;
    resolve(raw, releases, opts)
}

/// Convenience wrapper for callers that already have a manifest path on disk.
pub fn load_and_resolve_file(path: &Path, releases: &[Release], opts: &ResolveOptions) -> Result<RoleManifest, ValidationErrors> {
    let yaml = std::fs::read_to_string(path)
        .map_err(|e| vec![ValidationError::Internal { reason: format!("failed to read '{}': {e}", path.display()) }])?;
    load_and_resolve(&yaml, releases, opts)
}
