//! Resolves a list of release references (local directories or downloadable
//! tarballs) into loaded [`Release`]s.

use crate::archive;
use crate::error::{self, Result};
use crate::release::Release;
use sha1::{Digest, Sha1};
use snafu::{ensure, OptionExt, ResultExt};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};
use url::Url;

/// One entry in the list of releases a build is asked to load.
#[derive(Debug, Clone)]
pub enum ReleaseRef {
    /// A release already unpacked (or checked out) on disk, in either
    /// final-release or dev-release layout.
    Directory(PathBuf),
    /// A final release tarball, fetched once and cached by content address.
    Tarball {
        url: Url,
        name: Option<String>,
        version: Option<String>,
        sha1: Option<String>,
    },
}

#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// Where downloaded archives are cached, content-addressed by
    /// `<name>-<version>-<sha1>.tgz` under `.final_releases/`.
    pub cache_dir: PathBuf,
    /// Where downloaded archives get unpacked before parsing.
    pub final_releases_dir: PathBuf,
}

#[instrument(level = "debug", skip(refs, opts))]
pub fn load_releases(refs: &[ReleaseRef], opts: &LoaderOptions) -> Result<Vec<Release>> {
    let mut releases: Vec<Release> = Vec::with_capacity(refs.len());
    for r in refs {
        let release = match r {
            ReleaseRef::Directory(dir) => {
                info!(path = %dir.display(), "loading release from directory");
                Release::from_directory(dir, None, None)?
            }
            ReleaseRef::Tarball { url, name, version, sha1 } => {
                load_tarball(url, name.as_deref(), version.as_deref(), sha1.as_deref(), opts)?
            }
        };
        ensure!(
            !releases.iter().any(|existing| existing.name == release.name),
            error::DuplicateReleaseNameSnafu { name: release.name.clone() }
        );
        releases.push(release);
    }
    Ok(releases)
}

#[instrument(level = "debug", skip(opts), fields(%url))]
fn load_tarball(
    url: &Url,
    name: Option<&str>,
    version: Option<&str>,
    expected_sha1: Option<&str>,
    opts: &LoaderOptions,
) -> Result<Release> {
    let cache_subdir = opts.cache_dir.join(".final_releases");
    std::fs::create_dir_all(&cache_subdir).context(error::CreateDirSnafu { path: cache_subdir.clone() })?;

    // If we already know the content address, skip the download entirely.
    if let (Some(name), Some(version), Some(sha1)) = (name, version, expected_sha1) {
        let cached = cache_subdir.join(format!("{name}-{version}-{sha1}.tgz"));
        if cached.is_file() {
            debug!(path = %cached.display(), "using cached release archive");
            return unpack_and_parse(&cached, name, version, sha1, opts);
        }
    }

    let download_path = cache_subdir.join(download_temp_name(url)?);
    let (actual_sha1, downloaded_bytes) = download_to_file(url, &download_path)?;
    if let Some(expected) = expected_sha1 {
        ensure!(
            expected.eq_ignore_ascii_case(&actual_sha1),
            error::HashMismatchSnafu {
                path: download_path.clone(),
                expected: expected.to_string(),
                actual: actual_sha1.clone(),
            }
        );
    }

    let (resolved_name, resolved_version) = match (name, version) {
        (Some(n), Some(v)) => (n.to_string(), v.to_string()),
        _ => inspect_release_mf(&downloaded_bytes)?,
    };

    let final_path = cache_subdir.join(format!("{resolved_name}-{resolved_version}-{actual_sha1}.tgz"));
    if final_path != download_path {
        std::fs::rename(&download_path, &final_path)
            .context(error::WriteDownloadSnafu { path: final_path.clone() })?;
    }

    unpack_and_parse(&final_path, &resolved_name, &resolved_version, &actual_sha1, opts)
}

fn unpack_and_parse(
    archive_path: &Path,
    name: &str,
    version: &str,
    sha1: &str,
    opts: &LoaderOptions,
) -> Result<Release> {
    let unpack_dir = opts.final_releases_dir.join(format!("{name}-{version}-{}", &sha1[..12.min(sha1.len())]));
    if !unpack_dir.is_dir() {
        archive::unpack_tgz(archive_path, &unpack_dir)?;
    }
    Release::from_directory(&unpack_dir, Some(name), Some(version))
}

/// Downloads `url` to `path`, hashing the stream as it is written so we never
/// have to re-read the file just to compute its SHA1.
fn download_to_file(url: &Url, path: &Path) -> Result<(String, u64)> {
    let response = reqwest::blocking::get(url.clone())
        .context(error::DownloadSnafu { url: url.to_string() })?
        .error_for_status()
        .context(error::DownloadSnafu { url: url.to_string() })?;

    let mut file = std::fs::File::create(path).context(error::WriteDownloadSnafu { path: path.to_path_buf() })?;
    let mut hasher = Sha1::new();
    let mut reader = response;
    let mut buf = [0u8; 64 * 1024];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut buf).context(error::DownloadSnafu { url: url.to_string() })?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
        file.write_all(&buf[..n])
            .context(error::WriteDownloadSnafu { path: path.to_path_buf() })?;
        total += n as u64;
    }
    Ok((hex::encode(hasher.finalize()), total))
}

fn download_temp_name(url: &Url) -> Result<String> {
    let file_name = url
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|s| !s.is_empty())
        .context(error::NoFileNameInUrlSnafu { url: url.to_string() })?;
    Ok(format!(".{file_name}.downloading"))
}

/// Reads just enough of a downloaded archive to learn the release name and
/// version when the caller didn't already know them.
fn inspect_release_mf(archive_bytes: &[u8]) -> Result<(String, String)> {
    use flate2::read::GzDecoder;
    use tar::Archive;

    let mut archive = Archive::new(GzDecoder::new(archive_bytes));
    for entry in archive.entries().map_err(|e| error::Error::Unpack {
        path: PathBuf::from("release.MF"),
        source: e,
    })? {
        let mut entry = entry.map_err(|e| error::Error::Unpack {
            path: PathBuf::from("release.MF"),
            source: e,
        })?;
        let is_release_mf = entry
            .path()
            .ok()
            .map(|p| p.file_name().map(|n| n == "release.MF").unwrap_or(false))
            .unwrap_or(false);
        if !is_release_mf {
            continue;
        }
        let mut contents = String::new();
        entry
            .read_to_string(&mut contents)
            .map_err(|e| error::Error::Unpack { path: PathBuf::from("release.MF"), source: e })?;
        let mf: crate::manifest_mf::ReleaseMf = serde_yaml::from_str(&contents)
            .context(error::MalformedManifestSnafu { path: PathBuf::from("release.MF") })?;
        return Ok((mf.name, mf.version));
    }
    error::UnknownLayoutSnafu { path: PathBuf::from("<downloaded archive>") }.fail()
}
