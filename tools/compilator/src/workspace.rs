//! Builds the sandboxed build workspace for one compile job (§4.4 step 5):
//! `<fp>/sources/var/vcap/{packages,source}`, with each dependency's
//! compiled tree copied into `packages/<dep-name>` and the package's own
//! source extracted into `source`.

use crate::error::{self, Result};
use release::Package;
use snafu::ResultExt;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

pub struct Sandbox {
    /// `<build-root>/<fp>/sources`
    pub root: PathBuf,
}

impl Sandbox {
    pub fn vcap_dir(&self) -> PathBuf {
        self.root.join("var/vcap")
    }

    pub fn source_dir(&self) -> PathBuf {
        self.vcap_dir().join("source")
    }

    pub fn compile_script(&self) -> PathBuf {
        self.root.join("compile.sh")
    }
}

/// `dependencies` are `(package-name, compiled-tree-dir)` pairs, already
/// resolved by the caller from the `DoneBroadcasts` table.
pub fn prepare(build_root: &Path, package: &Package, dependencies: &[(String, PathBuf)]) -> Result<Sandbox> {
    let root = build_root.join(package.fingerprint.as_str()).join("sources");
    let vcap = root.join("var/vcap");

    let packages_dir = vcap.join("packages");
    std::fs::create_dir_all(&packages_dir).context(error::CreateDirSnafu { path: packages_dir.clone() })?;

    for (name, compiled_dir) in dependencies {
        let dest = packages_dir.join(name);
        copy_tree(compiled_dir, &dest)
            .context(error::CopyDependencySnafu { dependency: name.clone() })?;
    }

    let source_dir = vcap.join("source");
    std::fs::create_dir_all(&source_dir).context(error::CreateDirSnafu { path: source_dir.clone() })?;
    release::extract_package_source(package, &source_dir)
        .context(error::ExtractSourceSnafu { package: package.name.clone() })?;

    let packaging_script = source_dir.join("packaging");
    snafu::ensure!(packaging_script.is_file(), error::MissingPackagingScriptSnafu { package: package.name.clone() });

    let sandbox = Sandbox { root };
    write_compile_script(&sandbox)?;
    Ok(sandbox)
}

fn write_compile_script(sandbox: &Sandbox) -> Result<()> {
    let script = sandbox.compile_script();
    let contents = "#!/bin/sh\nset -e\nexec /var/vcap/source/packaging\n";
    std::fs::write(&script, contents).context(error::WriteScriptSnafu { path: script.clone() })?;
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755))
        .context(error::WriteScriptSnafu { path: script })?;
    Ok(())
}

fn copy_tree(source: &Path, dest: &Path) -> std::io::Result<()> {
    for entry in walkdir::WalkDir::new(source) {
        let entry = entry.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        let relative = entry.path().strip_prefix(source).expect("walkdir entries are rooted at source");
        if relative.as_os_str().is_empty() {
            continue;
        }
        let target = dest.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else if entry.file_type().is_symlink() {
            let link_target = std::fs::read_link(entry.path())?;
            std::os::unix::fs::symlink(link_target, &target)?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::copy(entry.path(), &target)?;
            let mode = entry
                .metadata()
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?
                .permissions()
                .mode();
            std::fs::set_permissions(&target, std::fs::Permissions::from_mode(mode))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fingerprint::fingerprint_of;

    fn write_package_dir(dir: &Path) -> Package {
        let pkg_dir = dir.join("ruby-2.5-src");
        std::fs::create_dir_all(&pkg_dir).unwrap();
        std::fs::write(pkg_dir.join("packaging"), "#!/bin/sh\ntrue\n").unwrap();
        std::fs::set_permissions(pkg_dir.join("packaging"), std::fs::Permissions::from_mode(0o755)).unwrap();

        Package {
            name: "ruby-2.5".to_string(),
            version: "1".to_string(),
            fingerprint: fingerprint_of(["ruby-2.5"]),
            sha1: "deadbeef".repeat(5),
            dependencies: Vec::new(),
            archive_path: pkg_dir,
        }
    }

    #[test]
    fn prepare_extracts_source_and_writes_compile_script() {
        let dir = tempfile::tempdir().unwrap();
        let package = write_package_dir(dir.path());
        let build_root = dir.path().join("build");

        let sandbox = prepare(&build_root, &package, &[]).unwrap();

        assert!(sandbox.source_dir().join("packaging").is_file());
        assert!(sandbox.compile_script().is_file());
        let mode = std::fs::metadata(sandbox.compile_script()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn prepare_copies_dependency_compiled_trees() {
        let dir = tempfile::tempdir().unwrap();
        let package = write_package_dir(dir.path());
        let dep_compiled = dir.path().join("consul-compiled");
        std::fs::create_dir_all(&dep_compiled).unwrap();
        std::fs::write(dep_compiled.join("bin"), b"consul binary").unwrap();

        let build_root = dir.path().join("build");
        let sandbox = prepare(&build_root, &package, &[("consul".to_string(), dep_compiled)]).unwrap();

        assert!(sandbox.vcap_dir().join("packages/consul/bin").is_file());
    }

    #[test]
    fn prepare_rejects_a_package_missing_a_packaging_script() {
        let dir = tempfile::tempdir().unwrap();
        let pkg_dir = dir.path().join("empty-pkg");
        std::fs::create_dir_all(&pkg_dir).unwrap();
        let package = Package {
            name: "empty".to_string(),
            version: "1".to_string(),
            fingerprint: fingerprint_of(["empty"]),
            sha1: "deadbeef".repeat(5),
            dependencies: Vec::new(),
            archive_path: pkg_dir,
        };

        let build_root = dir.path().join("build");
        let err = prepare(&build_root, &package, &[]).unwrap_err();
        assert!(matches!(err, error::Error::MissingPackagingScript { .. }));
    }
}
