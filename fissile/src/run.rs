//! Wires the crates together: load releases, resolve the role manifest,
//! compile packages, and build the layered image. One end-to-end run, no
//! subcommands -- flag parsing and a real CLI surface are out of scope, so
//! this binary only knows how to do the one thing the engine does (§1, §9).

use crate::config::{BlobCache, Config, IsolationMode, ReleaseSource};
use anyhow::{Context, Result};
use cache::{BlobStore, HttpBlobStore, LocalCache, NullBlobStore};
use compilator::{ContainerIsolation, Isolation, NamespaceIsolation};
use graph_recorder::{Attrs, GraphSink, JsonlGraphSink, NullGraphSink};
use image_builder::{
    plan_packages_layer, plan_role_layer, produce_base_layer, produce_packages_layer,
    produce_role_layer, BaseLayerInputs, DockerCliDaemon, ImageDaemon,
};
use release::{load_releases, LoaderOptions, Package, Release, ReleaseRef};
use role_manifest::{load_and_resolve_file, InstanceGroup, ResolveOptions, RoleManifest};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;
use tracing::{info, instrument};
use url::Url;

pub async fn build(config: Config) -> Result<()> {
    let releases = load_releases_from_config(&config)?;
    let manifest = resolve_role_manifest(&config, &releases)?;
    let recorder = build_graph_recorder(&config)?;
    record_graph(recorder.as_ref(), &releases);

    let all_packages: Vec<Package> = releases.iter().flat_map(|r| r.packages.clone()).collect();
    compile_packages(&config, all_packages).await?;

    build_images(&config, &releases, &manifest)?;
    Ok(())
}

#[instrument(level = "info", skip(config))]
fn load_releases_from_config(config: &Config) -> Result<Vec<Release>> {
    let mut refs = Vec::with_capacity(config.releases.len());
    for source in &config.releases {
        let parsed = match source {
            ReleaseSource::Directory { path } => ReleaseRef::Directory(path.clone()),
            ReleaseSource::Tarball { url, name, version, sha1 } => ReleaseRef::Tarball {
                url: Url::parse(url).with_context(|| format!("invalid release url '{url}'"))?,
                name: name.clone(),
                version: version.clone(),
                sha1: sha1.clone(),
            },
        };
        refs.push(parsed);
    }

    let opts = LoaderOptions {
        cache_dir: config.cache_dir.clone(),
        final_releases_dir: config.build_root.join("releases"),
    };
    let releases = load_releases(&refs, &opts).context("failed to load releases")?;
    info!(count = releases.len(), "loaded releases");
    Ok(releases)
}

fn resolve_role_manifest(config: &Config, releases: &[Release]) -> Result<RoleManifest> {
    let opts = ResolveOptions {
        scripts_root: config.scripts_root.as_deref(),
        allow_missing_scripts: config.scripts_root.is_none(),
    };
    load_and_resolve_file(&config.role_manifest, releases, &opts).map_err(|errors| {
        let rendered = errors.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("\n  - ");
        anyhow::anyhow!("role manifest failed validation:\n  - {rendered}")
    })
}

fn build_graph_recorder(config: &Config) -> Result<Arc<dyn GraphSink>> {
    match &config.graph_output {
        Some(path) => {
            let sink = JsonlGraphSink::create(path)
                .with_context(|| format!("failed to open graph output '{}'", path.display()))?;
            Ok(Arc::new(sink))
        }
        None => Ok(Arc::new(NullGraphSink)),
    }
}

fn record_graph(recorder: &dyn GraphSink, releases: &[Release]) {
    for release in releases {
        let mut release_attrs = Attrs::new();
        release_attrs.insert("version".to_string(), release.version.clone());
        recorder.record_node(&format!("release:{}", release.name), &release_attrs);

        for package in &release.packages {
            let mut attrs = Attrs::new();
            attrs.insert("fingerprint".to_string(), package.fingerprint.as_str().to_string());
            recorder.record_node(&format!("package:{}", package.name), &attrs);
            recorder.record_edge(&format!("release:{}", release.name), &format!("package:{}", package.name), &Attrs::new());
            for dependency in &package.dependencies {
                recorder.record_edge(&format!("package:{}", package.name), &format!("package:{dependency}"), &Attrs::new());
            }
        }

        for job in &release.jobs {
            recorder.record_node(&format!("job:{}", job.name), &Attrs::new());
            recorder.record_edge(&format!("release:{}", release.name), &format!("job:{}", job.name), &Attrs::new());
        }
    }
}

async fn compile_packages(config: &Config, packages: Vec<Package>) -> Result<()> {
    let cache = Arc::new(LocalCache::new(config.cache_dir.clone()));
    let blob = build_blob_store(&config.blob_cache)?;
    let isolation = build_isolation(config)?;

    let opts = compilator::Options {
        concurrency: config.concurrency,
        cache,
        blob,
        isolation,
        build_root: &config.build_root,
        stemcell_hash: &config.stemcell_hash,
        stemcell_name: &config.stemcell_name,
    };
    compilator::compile_all(packages, opts).await.context("package compilation failed")
}

fn build_blob_store(config: &Option<BlobCache>) -> Result<Arc<dyn BlobStore>> {
    match config {
        None => Ok(Arc::new(NullBlobStore)),
        Some(blob) => {
            let url = Url::parse(&blob.url).with_context(|| format!("invalid blob cache url '{}'", blob.url))?;
            Ok(Arc::new(HttpBlobStore::new(env!("CARGO_PKG_VERSION"), url, blob.read, blob.write)))
        }
    }
}

fn build_isolation(config: &Config) -> Result<Arc<dyn Isolation>> {
    match config.isolation {
        IsolationMode::Namespace => {
            Ok(Arc::new(NamespaceIsolation::new().context("unshare not found on PATH")?))
        }
        IsolationMode::Container => {
            let image = config
                .isolation_image
                .as_deref()
                .context("isolation = \"container\" requires isolation-image to be set")?;
            Ok(Arc::new(ContainerIsolation::new(image).context("docker not found on PATH")?))
        }
    }
}

/// The repository portion of a `repo:tag` reference, so generated layer
/// tags land in the same repository as the configured base layer.
fn repo_of(base_layer_tag: &str) -> &str {
    base_layer_tag.split_once(':').map(|(repo, _)| repo).unwrap_or(base_layer_tag)
}

fn build_images(config: &Config, releases: &[Release], manifest: &RoleManifest) -> Result<()> {
    let daemon = DockerCliDaemon::new().context("docker not found on PATH")?;

    let base_tag = &config.base_layer_tag;
    let repo = repo_of(base_tag);
    let base_inputs = BaseLayerInputs {
        stemcell: config.stemcell_name.clone(),
        root_tar: Vec::new(),
        monitrc: include_bytes!("../assets/monitrc").to_vec(),
        run_sh: include_bytes!("../assets/run.sh").to_vec(),
    };
    build_layer(&daemon, base_tag, produce_base_layer(base_inputs))?;

    let all_packages: Vec<&Package> = releases.iter().flat_map(|r| r.packages.iter()).collect();
    let plan = plan_packages_layer(
        &daemon,
        &all_packages,
        &config.cache_dir,
        &config.stemcell_hash,
        base_tag,
        &config.generator_version,
        &BTreeMap::new(),
    )
    .context("failed to plan packages layer")?;
    let packages_tag = format!("{repo}:packages-{}", plan.tag.short(16));
    build_layer(&daemon, &packages_tag, produce_packages_layer(plan))?;

    for group in &manifest.instance_groups {
        build_role_layer(&daemon, releases, group, &packages_tag, repo)?;
    }
    Ok(())
}

fn build_role_layer(
    daemon: &DockerCliDaemon,
    releases: &[Release],
    group: &InstanceGroup,
    packages_layer_tag: &str,
    repo: &str,
) -> Result<()> {
    let plan = plan_role_layer(group, releases, packages_layer_tag)
        .with_context(|| format!("failed to plan role layer for '{}'", group.name))?;
    // Deliberately omits the group name: two groups with identical jobs and
    // run spec should build (and cache) the same layer.
    let tag = format!("{repo}:role-{}", plan.tag.short(16));
    build_layer(daemon, &tag, produce_role_layer(plan))?;
    Ok(())
}

fn build_layer(daemon: &DockerCliDaemon, tag: &str, producer: image_builder::TarProducer) -> Result<()> {
    let mut context = Vec::new();
    producer(&mut context).map_err(anyhow::Error::from)?;
    daemon
        .build_image_from_tar(tag, &mut Cursor::new(context))
        .map_err(anyhow::Error::from)
        .with_context(|| format!("failed to build image '{tag}'"))?;
    info!(%tag, "built image layer");
    Ok(())
}
