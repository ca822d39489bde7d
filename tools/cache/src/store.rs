//! The `BlobStore` trait and its implementations: a no-op store for runs
//! with no remote cache configured, and an HTTP-backed store that fetches
//! into a temp file and renames it into place once the download completes.

use crate::error::{self, Result};
use snafu::ResultExt;
use std::path::Path;
use tracing::{debug, instrument, warn};
use url::Url;

/// Keys are `<stemcell-name>/<package-fingerprint>.tar` (§6).
pub trait BlobStore: Send + Sync {
    /// Attempts to fetch `key` and unpack it into `dest`. `Ok(true)` means a
    /// cache hit (dest is now populated); `Ok(false)` means a clean miss.
    /// Reads are idempotent -- calling this twice for a hit produces the
    /// same tree.
    fn get(&self, key: &str, dest: &Path) -> Result<bool>;

    /// Packs `source_dir` as a tar and uploads it under `key`. Overwrites
    /// safely. Callers treat failures here as non-fatal (§7: cache write
    /// failures are logged, not propagated) -- this trait still returns a
    /// `Result` so callers can choose to log it themselves.
    fn put(&self, key: &str, source_dir: &Path) -> Result<()>;
}

/// Used when no remote cache is configured. Every `get` is a miss; every
/// `put` is a silent no-op.
pub struct NullBlobStore;

impl BlobStore for NullBlobStore {
    fn get(&self, _key: &str, _dest: &Path) -> Result<bool> {
        Ok(false)
    }

    fn put(&self, _key: &str, _source_dir: &Path) -> Result<()> {
        Ok(())
    }
}

pub struct HttpBlobStore {
    version: String,
    base_url: Url,
    read_enabled: bool,
    write_enabled: bool,
}

impl HttpBlobStore {
    pub fn new(version: impl Into<String>, base_url: Url, read_enabled: bool, write_enabled: bool) -> Self {
        Self { version: version.into(), base_url, read_enabled, write_enabled }
    }

    fn user_agent(&self) -> String {
        format!("fissile-cache/{}", self.version)
    }
}

impl BlobStore for HttpBlobStore {
    #[instrument(level = "debug", skip(self, dest), fields(%key))]
    fn get(&self, key: &str, dest: &Path) -> Result<bool> {
        if !self.read_enabled {
            return Ok(false);
        }
        let url = self
            .base_url
            .join(key)
            .unwrap_or_else(|_| self.base_url.clone());

        let client = reqwest::blocking::Client::new();
        let response = match client.get(url.clone()).header(reqwest::header::USER_AGENT, self.user_agent()).send() {
            Ok(response) => response,
            Err(source) => {
                debug!(%key, %source, "blob cache request failed, treating as a miss");
                return Ok(false);
            }
        };
        if !response.status().is_success() {
            debug!(%key, status = %response.status(), "blob cache miss");
            return Ok(false);
        }

        std::fs::create_dir_all(dest).context(error::CreateDirSnafu { path: dest.to_path_buf() })?;
        let tmp_dir = dest.with_extension("tmp-download");
        std::fs::create_dir_all(&tmp_dir).context(error::CreateDirSnafu { path: tmp_dir.clone() })?;

        let bytes = response.bytes().context(error::RequestSnafu { key: key.to_string(), url: url.to_string() })?;
        let mut archive = tar::Archive::new(bytes.as_ref());
        archive
            .unpack(&tmp_dir)
            .context(error::UnpackSnafu { key: key.to_string(), dest: tmp_dir.clone() })?;

        std::fs::remove_dir_all(dest).ok();
        std::fs::rename(&tmp_dir, dest).context(error::WriteTempSnafu { path: dest.to_path_buf() })?;

        Ok(true)
    }

    #[instrument(level = "debug", skip(self, source_dir), fields(%key))]
    fn put(&self, key: &str, source_dir: &Path) -> Result<()> {
        if !self.write_enabled {
            return Ok(());
        }
        let url = self
            .base_url
            .join(key)
            .unwrap_or_else(|_| self.base_url.clone());

        let mut bytes = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut bytes);
            builder
                .append_dir_all(".", source_dir)
                .context(error::ArchiveSnafu { source_dir: source_dir.to_path_buf() })?;
            builder.finish().context(error::ArchiveSnafu { source_dir: source_dir.to_path_buf() })?;
        }

        let client = reqwest::blocking::Client::new();
        let response = client
            .put(url.clone())
            .header(reqwest::header::USER_AGENT, self.user_agent())
            .body(bytes)
            .send()
            .context(error::UploadSnafu { key: key.to_string(), url: url.to_string() })?;
        if !response.status().is_success() {
            warn!(%key, status = %response.status(), "blob cache upload failed");
        }
        Ok(())
    }
}
