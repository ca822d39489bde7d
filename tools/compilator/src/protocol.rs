//! The per-job compile protocol (§4.4 "Per-job protocol", six steps).

use crate::error::{self, Result};
use crate::isolation::{Isolation, PackagingEnv};
use crate::workspace;
use cache::{BlobStore, LocalCache};
use release::Package;
use snafu::{OptionExt, ResultExt};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use workerpool::{Cancellation, DoneBroadcasts, WaitOutcome};

/// Everything a compile job needs that isn't specific to the one package it
/// is compiling. `Arc`-wrapped so every job spawned onto the pool can hold
/// its own clone without borrowing from `compile_all`'s stack frame.
#[derive(Clone)]
pub struct CompileContext {
    pub cache: Arc<LocalCache>,
    pub blob: Arc<dyn BlobStore>,
    pub isolation: Arc<dyn Isolation>,
    pub build_root: PathBuf,
    pub stemcell_hash: String,
    pub stemcell_name: String,
}

/// Compiles one package. Looks up each name in `package.dependencies` within
/// `all_packages` to find its fingerprint and resolved compiled-tree path.
#[instrument(level = "info", skip(all_packages, broadcasts, cancel, ctx), fields(package = %package.name))]
pub async fn compile_package(
    package: Package,
    all_packages: Arc<Vec<Package>>,
    broadcasts: DoneBroadcasts<String>,
    cancel: Cancellation,
    ctx: CompileContext,
) -> Result<()> {
    let fp = package.fingerprint.as_str().to_string();

    // Step 1: check cancellation before doing any work.
    if cancel.is_cancelled() {
        return Ok(());
    }

    // Step 2: wait on every dependency's done-broadcast.
    let mut dependency_dirs = Vec::with_capacity(package.dependencies.len());
    for dependency_name in &package.dependencies {
        let dependency = all_packages
            .iter()
            .find(|p| &p.name == dependency_name)
            .context(error::UnknownDependencySnafu { package: package.name.clone(), dependency: dependency_name.clone() })?;
        let dep_fp = dependency.fingerprint.as_str().to_string();

        match broadcasts.wait(&dep_fp, &cancel).await {
            WaitOutcome::Ready => {
                dependency_dirs.push((dependency_name.clone(), ctx.cache.compiled_dir(&ctx.stemcell_hash, &dependency.fingerprint)));
            }
            WaitOutcome::Cancelled => return Ok(()),
            WaitOutcome::Failed => {
                cancel.cancel();
                broadcasts.close_failure(&fp);
                return error::DependencyFailedSnafu { package: package.name.clone(), dependency: dependency_name.clone() }.fail();
            }
        }
    }

    // Step 3: local cache.
    if ctx.cache.is_populated(&ctx.stemcell_hash, &package.fingerprint) {
        info!("already compiled, reusing local cache");
        broadcasts.close_success(&fp);
        return Ok(());
    }

    // Step 4: remote blob cache.
    let blob_key = format!("{}/{}.tar", ctx.stemcell_name, fp);
    let temp_dir = ctx.cache.temp_dir(&ctx.stemcell_hash, &package.fingerprint);
    match ctx.blob.get(&blob_key, &temp_dir) {
        Ok(true) => {
            ctx.cache
                .finalize(&ctx.stemcell_hash, &package.fingerprint)
                .context(error::FinalizeCacheSnafu { package: package.name.clone() })?;
            info!("populated from remote blob cache");
            broadcasts.close_success(&fp);
            return Ok(());
        }
        Ok(false) => {}
        Err(source) => {
            warn!(%source, "remote blob cache probe failed, falling back to a full compile");
        }
    }

    // Step 5: sandboxed build.
    if let Err(source) = build(&package, &dependency_dirs, &ctx) {
        cancel.cancel();
        broadcasts.close_failure(&fp);
        return Err(source);
    }

    // Step 6: finalize and optionally upload.
    ctx.cache
        .finalize(&ctx.stemcell_hash, &package.fingerprint)
        .context(error::FinalizeCacheSnafu { package: package.name.clone() })?;
    if let Err(source) = ctx.blob.put(&blob_key, &ctx.cache.compiled_dir(&ctx.stemcell_hash, &package.fingerprint)) {
        warn!(%source, "remote blob cache upload failed, continuing");
    }
    info!("compiled");
    broadcasts.close_success(&fp);
    Ok(())
}

fn build(package: &Package, dependency_dirs: &[(String, PathBuf)], ctx: &CompileContext) -> Result<()> {
    let sandbox = workspace::prepare(&ctx.build_root, package, dependency_dirs)?;
    let install_target = ctx.cache.temp_dir(&ctx.stemcell_hash, &package.fingerprint);
    std::fs::create_dir_all(&install_target)
        .context(error::CreateDirSnafu { path: install_target.clone() })?;

    let env = PackagingEnv {
        compile_target: sandbox.source_dir(),
        install_target,
        package_name: package.name.clone(),
        package_version: package.version.clone(),
    };
    ctx.isolation.run_packaging(&sandbox.root, &sandbox.compile_script(), &env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cache::{LocalCache, NullBlobStore};
    use fingerprint::fingerprint_of;
    use std::path::Path;

    struct FakeIsolation;

    impl Isolation for FakeIsolation {
        fn run_packaging(&self, _sandbox: &Path, _script: &Path, env: &PackagingEnv) -> crate::error::Result<()> {
            std::fs::write(env.install_target.join("bin"), b"compiled").unwrap();
            Ok(())
        }
    }

    fn package_with_source(dir: &Path, name: &str, dependencies: &[&str]) -> Package {
        let src = dir.join(format!("{name}-src"));
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join("packaging"), "#!/bin/sh\ntrue\n").unwrap();
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(src.join("packaging"), std::fs::Permissions::from_mode(0o755)).unwrap();

        Package {
            name: name.to_string(),
            version: "1".to_string(),
            fingerprint: fingerprint_of([name]),
            sha1: "deadbeef".repeat(5),
            dependencies: dependencies.iter().map(|s| s.to_string()).collect(),
            archive_path: src,
        }
    }

    fn context(dir: &Path) -> CompileContext {
        CompileContext {
            cache: Arc::new(LocalCache::new(dir.join("cache"))),
            blob: Arc::new(NullBlobStore),
            isolation: Arc::new(FakeIsolation),
            build_root: dir.join("build"),
            stemcell_hash: "stemcell".to_string(),
            stemcell_name: "stemcell".to_string(),
        }
    }

    #[tokio::test]
    async fn compiles_and_populates_the_local_cache() {
        let dir = tempfile::tempdir().unwrap();
        let package = package_with_source(dir.path(), "consul", &[]);
        let ctx = context(dir.path());
        let broadcasts: DoneBroadcasts<String> = DoneBroadcasts::new();
        let cancel = Cancellation::new();
        let all = Arc::new(vec![package.clone()]);

        compile_package(package.clone(), all, broadcasts.clone(), cancel, ctx.clone()).await.unwrap();

        assert!(ctx.cache.is_populated("stemcell", &package.fingerprint));
    }

    #[tokio::test]
    async fn skips_the_build_when_already_cached() {
        let dir = tempfile::tempdir().unwrap();
        let package = package_with_source(dir.path(), "consul", &[]);
        let ctx = context(dir.path());

        let compiled = ctx.cache.compiled_dir("stemcell", &package.fingerprint);
        std::fs::create_dir_all(&compiled).unwrap();
        std::fs::write(compiled.join("marker"), b"already built").unwrap();

        let broadcasts: DoneBroadcasts<String> = DoneBroadcasts::new();
        let cancel = Cancellation::new();
        let all = Arc::new(vec![package.clone()]);

        compile_package(package, all, broadcasts, cancel, ctx).await.unwrap();
    }

    #[tokio::test]
    async fn dependency_failure_fails_the_dependent_and_cancels() {
        let dir = tempfile::tempdir().unwrap();
        let dep = package_with_source(dir.path(), "go-1.4", &[]);
        let consumer = package_with_source(dir.path(), "consul", &["go-1.4"]);
        let ctx = context(dir.path());
        let broadcasts: DoneBroadcasts<String> = DoneBroadcasts::new();
        let cancel = Cancellation::new();

        broadcasts.close_failure(&dep.fingerprint.as_str().to_string());

        let all = Arc::new(vec![dep, consumer.clone()]);
        let result = compile_package(consumer, all, broadcasts, cancel.clone(), ctx).await;

        assert!(result.is_err());
        assert!(cancel.is_cancelled());
    }
}
