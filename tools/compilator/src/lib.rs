//! Parallel package compilation (§4.4): schedules a release's packages onto
//! a bounded worker pool in dependency-bucket order, compiling each one
//! behind a local content-addressed cache and an optional remote blob cache,
//! with per-package done broadcasts so dependents never start early.

mod error;
mod isolation;
mod protocol;
mod schedule;
mod workspace;

pub use error::{Error, Result};
pub use isolation::{ContainerIsolation, Isolation, NamespaceIsolation, PackagingEnv};
pub use protocol::{compile_package, CompileContext};

use release::Package;
use std::path::Path;
use std::sync::Arc;
use tracing::error;
use workerpool::{Cancellation, DoneBroadcasts, Pool};

pub struct Options<'a> {
    pub concurrency: usize,
    pub cache: Arc<cache::LocalCache>,
    pub blob: Arc<dyn cache::BlobStore>,
    pub isolation: Arc<dyn Isolation>,
    pub build_root: &'a Path,
    pub stemcell_hash: &'a str,
    pub stemcell_name: &'a str,
}

/// Compiles every package in `packages`, returning the first error observed
/// (§4.4 cancellation semantics: later failures are swallowed once the first
/// one has already closed the abort channel).
pub async fn compile_all(packages: Vec<Package>, opts: Options<'_>) -> Result<()> {
    let refs: Vec<&Package> = packages.iter().collect();
    let ordered: Vec<Package> = schedule::order(refs).into_iter().cloned().collect();

    let pool = Pool::new(opts.concurrency.max(1));
    let cancel = Cancellation::new();
    let broadcasts: DoneBroadcasts<String> = DoneBroadcasts::new();
    let all_packages = Arc::new(packages);

    let ctx = protocol::CompileContext {
        cache: opts.cache,
        blob: opts.blob,
        isolation: opts.isolation,
        build_root: opts.build_root.to_path_buf(),
        stemcell_hash: opts.stemcell_hash.to_string(),
        stemcell_name: opts.stemcell_name.to_string(),
    };

    let jobs: Vec<_> = ordered
        .into_iter()
        .map(|package| {
            let all_packages = all_packages.clone();
            let broadcasts = broadcasts.clone();
            let cancel = cancel.clone();
            let ctx = ctx.clone();
            move || async move { protocol::compile_package(package, all_packages, broadcasts, cancel, ctx).await }
        })
        .collect();

    let results = pool.run(jobs, &cancel).await;

    for result in results {
        if let Err(source) = result {
            error!(%source, "compile job failed");
            return Err(source);
        }
    }
    Ok(())
}
