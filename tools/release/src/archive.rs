//! Small helpers for reading the `.tgz` archives that hold packaged jobs and
//! package sources inside a final release.

use crate::error::{self, Result};
use flate2::read::GzDecoder;
use sha1::{Digest, Sha1};
use snafu::ResultExt;
use std::io::Read;
use std::path::{Path, PathBuf};
use tar::Archive;

/// Reads every regular file out of a gzipped tarball into memory. Used for
/// job archives, which are small (templates, monit, a spec file).
pub(crate) fn read_tgz_entries(path: &Path) -> Result<Vec<(PathBuf, Vec<u8>)>> {
    let bytes = std::fs::read(path).context(error::ReadFileSnafu { path })?;
    let mut archive = Archive::new(GzDecoder::new(bytes.as_slice()));
    let mut entries = Vec::new();
    for entry in archive.entries().context(error::UnpackSnafu { path })? {
        let mut entry = entry.context(error::UnpackSnafu { path })?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let entry_path = entry.path().context(error::UnpackSnafu { path })?.into_owned();
        let mut contents = Vec::new();
        entry
            .read_to_end(&mut contents)
            .context(error::UnpackSnafu { path })?;
        entries.push((entry_path, contents));
    }
    Ok(entries)
}

/// Unpacks a gzipped tarball's full contents onto disk, preserving the
/// sources for a package build. Packages can be large, so this streams
/// straight to the filesystem rather than buffering in memory.
pub(crate) fn unpack_tgz(path: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest).context(error::CreateDirSnafu { path: dest })?;
    let file = std::fs::File::open(path).context(error::ReadFileSnafu { path })?;
    let mut archive = Archive::new(GzDecoder::new(file));
    archive.unpack(dest).context(error::UnpackSnafu { path: dest })?;
    Ok(())
}

/// Copies a dev-layout package directory's files (preserving relative paths
/// and mode bits) into `dest`, mirroring `unpack_tgz`'s effect for a
/// directory source instead of a gzipped tarball.
pub(crate) fn copy_dir_all(source: &Path, dest: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    for entry in walkdir::WalkDir::new(source) {
        let entry = entry.context(error::ReadDirSnafu { path: source })?;
        let relative = entry.path().strip_prefix(source).expect("walkdir entries are rooted at source");
        if relative.as_os_str().is_empty() {
            continue;
        }
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target).context(error::CreateDirSnafu { path: target })?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).context(error::CreateDirSnafu { path: parent.to_path_buf() })?;
            }
            std::fs::copy(entry.path(), &target).context(error::WriteFileSnafu { path: target.clone() })?;
            let mode = entry
                .metadata()
                .context(error::ReadDirSnafu { path: source })?
                .permissions()
                .mode();
            std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode))
                .context(error::WriteFileSnafu { path: target })?;
        }
    }
    Ok(())
}

pub(crate) fn sha1_hex_of_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path).context(error::ReadFileSnafu { path })?;
    let mut hasher = Sha1::new();
    std::io::copy(&mut file, &mut hasher).context(error::ReadFileSnafu { path })?;
    Ok(hex::encode(hasher.finalize()))
}
