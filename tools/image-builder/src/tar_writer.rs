//! Shared helpers for building tar contexts by hand: single files, symlinks,
//! and whole directory trees copied byte-for-byte. Every layer producer in
//! `base_layer`, `packages_layer`, and `role_layer` goes through these so
//! the "no temporary build directory, modes and symlinks preserved" rule
//! (§4.5) is enforced in one place instead of at every call site.

use crate::error::{self, Result};
use snafu::ResultExt;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use walkdir::WalkDir;

/// `templates/bin/` gets 0755, everything else 0644 (§4.5).
pub fn executable_mode_for(destination: &Path) -> u32 {
    if release::Job::is_executable_destination(destination) {
        0o755
    } else {
        0o644
    }
}

pub fn append_bytes<W: Write>(
    builder: &mut tar::Builder<W>,
    path: &str,
    bytes: &[u8],
    mode: u32,
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(path).context(error::TarBuildSnafu)?;
    header.set_size(bytes.len() as u64);
    header.set_mode(mode);
    header.set_cksum();
    builder
        .append(&header, bytes)
        .context(error::TarBuildSnafu)
}

pub fn append_symlink<W: Write>(builder: &mut tar::Builder<W>, path: &str, target: &str) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header.set_path(path).context(error::TarBuildSnafu)?;
    header.set_entry_type(tar::EntryType::Symlink);
    header.set_size(0);
    header.set_mode(0o777);
    header.set_cksum();
    builder
        .append_link(&mut header, path, target)
        .context(error::TarBuildSnafu)
}

pub fn append_dir_marker<W: Write>(builder: &mut tar::Builder<W>, path: &str, mode: u32) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    let dir_path = if path.ends_with('/') { path.to_string() } else { format!("{path}/") };
    header.set_path(&dir_path).context(error::TarBuildSnafu)?;
    header.set_entry_type(tar::EntryType::Directory);
    header.set_size(0);
    header.set_mode(mode);
    header.set_cksum();
    builder
        .append(&header, std::io::empty())
        .context(error::TarBuildSnafu)
}

/// Copies every regular file and symlink under `source_dir` into the archive
/// under `prefix`, preserving symlink targets and the source file's own mode
/// bits (unlike `tar::Builder::append_dir_all`, which we don't use here
/// since it does not let us rewrite the destination prefix per entry).
pub fn append_tree<W: Write>(builder: &mut tar::Builder<W>, prefix: &str, source_dir: &Path) -> Result<()> {
    for entry in WalkDir::new(source_dir).into_iter() {
        let entry = entry.context(error::WalkDirSnafu { path: source_dir.to_path_buf() })?;
        let relative = entry
            .path()
            .strip_prefix(source_dir)
            .expect("walkdir entries are rooted at source_dir");
        if relative.as_os_str().is_empty() {
            continue;
        }
        let dest = format!("{}/{}", prefix.trim_end_matches('/'), relative.display());

        let file_type = entry.file_type();
        if file_type.is_symlink() {
            let target = std::fs::read_link(entry.path())
                .context(error::ReadFileSnafu { path: entry.path().to_path_buf() })?;
            append_symlink(builder, &dest, &target.to_string_lossy())?;
        } else if file_type.is_dir() {
            let mode = entry
                .metadata()
                .context(error::WalkDirSnafu { path: entry.path().to_path_buf() })?
                .permissions()
                .mode();
            append_dir_marker(builder, &dest, mode)?;
        } else {
            let bytes = std::fs::read(entry.path())
                .context(error::ReadFileSnafu { path: entry.path().to_path_buf() })?;
            let mode = entry
                .metadata()
                .context(error::WalkDirSnafu { path: entry.path().to_path_buf() })?
                .permissions()
                .mode();
            append_bytes(builder, &dest, &bytes, mode)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::fs::symlink;

    fn read_back(bytes: Vec<u8>) -> Vec<(String, tar::EntryType, u32)> {
        let mut archive = tar::Archive::new(bytes.as_slice());
        archive
            .entries()
            .unwrap()
            .map(|entry| {
                let entry = entry.unwrap();
                (
                    entry.path().unwrap().to_string_lossy().into_owned(),
                    entry.header().entry_type(),
                    entry.header().mode().unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn append_tree_preserves_symlinks_and_modes() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("templates/bin")).unwrap();
        std::fs::write(dir.path().join("templates/bin/ctl"), b"echo hi").unwrap();
        std::fs::set_permissions(
            dir.path().join("templates/bin/ctl"),
            std::fs::Permissions::from_mode(0o755),
        )
        .unwrap();
        symlink("ctl", dir.path().join("templates/bin/ctl-link")).unwrap();

        let mut bytes = Vec::new();
        {
            let mut builder = tar::Builder::new(&mut bytes);
            append_tree(&mut builder, "packages-src/abc", dir.path()).unwrap();
            builder.finish().unwrap();
        }

        let entries = read_back(bytes);
        let file = entries
            .iter()
            .find(|(path, _, _)| path == "packages-src/abc/templates/bin/ctl")
            .unwrap();
        assert_eq!(file.1, tar::EntryType::Regular);
        assert_eq!(file.2 & 0o777, 0o755);

        let link = entries
            .iter()
            .find(|(path, _, _)| path == "packages-src/abc/templates/bin/ctl-link")
            .unwrap();
        assert_eq!(link.1, tar::EntryType::Symlink);
    }

    #[test]
    fn executable_mode_matches_bin_convention() {
        assert_eq!(executable_mode_for(Path::new("bin/ctl")), 0o755);
        assert_eq!(executable_mode_for(Path::new("config/ctl.conf")), 0o644);
    }
}
