//! The `Release` type and the two on-disk layouts it can be parsed from.

use crate::archive;
use crate::error::{self, Result};
use crate::job::{Job, JobSpec, PropertyDefault, TemplateFile};
use crate::manifest_mf::ReleaseMf;
use crate::package::Package;
use fingerprint::{Fingerprint, FingerprintBuilder};
use snafu::{OptionExt, ResultExt};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// A named, versioned collection of packages and jobs. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Release {
    pub name: String,
    pub version: String,
    pub commit_hash: String,
    pub packages: Vec<Package>,
    pub jobs: Vec<Job>,
    pub license: Option<PathBuf>,
    pub notice: Option<PathBuf>,
    /// Provenance only. Per §4.3, this must never influence a package or job
    /// fingerprint -- a dev release and a final release built from the same
    /// sources produce identical fingerprints.
    pub dev: bool,
}

impl Release {
    pub fn job(&self, name: &str) -> Option<&Job> {
        self.jobs.iter().find(|j| j.name == name)
    }

    pub fn package(&self, name: &str) -> Option<&Package> {
        self.packages.iter().find(|p| p.name == name)
    }

    /// Loads a release from an on-disk directory, auto-detecting whether it
    /// is laid out as a final release (`release.MF` plus tarred `jobs/` and
    /// `packages/`) or a dev release (exploded `jobs/<name>/` and
    /// `packages/<name>/` directories, optionally under `dev_releases/`).
    pub fn from_directory(
        dir: &Path,
        name_override: Option<&str>,
        version_override: Option<&str>,
    ) -> Result<Self> {
        let release_mf = dir.join("release.MF");
        let dev_releases = dir.join("dev_releases");
        if release_mf.is_file() && !dev_releases.is_dir() {
            Self::from_final_layout(dir, &release_mf, name_override, version_override)
        } else if dir.join("jobs").is_dir() && dir.join("packages").is_dir() {
            Self::from_dev_layout(dir, name_override, version_override)
        } else {
            error::UnknownLayoutSnafu { path: dir.to_path_buf() }.fail()
        }
    }

    fn from_final_layout(
        dir: &Path,
        release_mf_path: &Path,
        name_override: Option<&str>,
        version_override: Option<&str>,
    ) -> Result<Self> {
        let text = std::fs::read_to_string(release_mf_path)
            .context(error::ReadFileSnafu { path: release_mf_path })?;
        let manifest: ReleaseMf = serde_yaml::from_str(&text)
            .context(error::MalformedManifestSnafu { path: release_mf_path })?;

        let jobs_dir = dir.join("jobs");
        let packages_dir = dir.join("packages");

        let mut packages = Vec::with_capacity(manifest.packages.len());
        for entry in &manifest.packages {
            let archive_path = packages_dir.join(format!("{}.tgz", entry.name));
            snafu::ensure!(
                archive_path.is_file(),
                error::PackageMissingFromArchiveSnafu {
                    release: manifest.name.clone(),
                    package: entry.name.clone(),
                }
            );
            let sha1 = match &entry.sha1 {
                Some(sha1) => sha1.clone(),
                None => archive::sha1_hex_of_file(&archive_path)?,
            };
            let fingerprint = fingerprint_package_archive(&archive_path, &entry.dependencies)?;
            packages.push(Package {
                name: entry.name.clone(),
                version: entry.version.clone().unwrap_or_else(|| manifest.version.clone()),
                fingerprint,
                sha1,
                dependencies: entry.dependencies.clone(),
                archive_path,
            });
        }

        // Dependencies are declared by name in release.MF; verify each resolves
        // to a package within the same release before handing the graph to callers.
        for package in &packages {
            for dependency in &package.dependencies {
                snafu::ensure!(
                    packages.iter().any(|p| &p.name == dependency),
                    error::UnknownPackageDependencySnafu {
                        release: manifest.name.clone(),
                        package: package.name.clone(),
                        dependency: dependency.clone(),
                    }
                );
            }
        }

        let mut jobs = Vec::with_capacity(manifest.jobs.len());
        for entry in &manifest.jobs {
            let archive_path = jobs_dir.join(format!("{}.tgz", entry.name));
            snafu::ensure!(
                archive_path.is_file(),
                error::JobMissingFromArchiveSnafu {
                    release: manifest.name.clone(),
                    job: entry.name.clone(),
                }
            );
            jobs.push(job_from_archive(&manifest.name, &entry.name, &archive_path)?);
        }

        Ok(Release {
            name: name_override.map(str::to_owned).unwrap_or(manifest.name),
            version: version_override.map(str::to_owned).unwrap_or(manifest.version),
            commit_hash: manifest.commit_hash.unwrap_or_default(),
            packages,
            jobs,
            license: existing(dir.join("LICENSE")),
            notice: existing(dir.join("NOTICE")),
            dev: false,
        })
    }

    fn from_dev_layout(
        dir: &Path,
        name_override: Option<&str>,
        version_override: Option<&str>,
    ) -> Result<Self> {
        let name = name_override
            .map(str::to_owned)
            .unwrap_or_else(|| dir.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default());
        let version = version_override.map(str::to_owned).unwrap_or_else(|| "0.0.0-dev".to_string());

        let packages_dir = dir.join("packages");
        let mut packages = Vec::new();
        for entry in std::fs::read_dir(&packages_dir).context(error::ReadDirSnafu { path: &packages_dir })? {
            let entry = entry.context(error::ReadDirSnafu { path: &packages_dir })?;
            if !entry.path().is_dir() {
                continue;
            }
            let pkg_name = entry.file_name().to_string_lossy().into_owned();
            let spec_path = entry.path().join("spec");
            let spec_text = std::fs::read_to_string(&spec_path).context(error::ReadFileSnafu { path: &spec_path })?;
            let spec: PackageSpec = serde_yaml::from_str(&spec_text)
                .context(error::MalformedJobSpecSnafu { release: name.clone(), name: pkg_name.clone() })?;
            let fingerprint = fingerprint_package_dir(&entry.path(), &spec.dependencies)?;
            let sha1 = fingerprint.as_str().to_string();
            packages.push(Package {
                name: pkg_name,
                version: version.clone(),
                fingerprint,
                sha1,
                dependencies: spec.dependencies,
                archive_path: entry.path(),
            });
        }

        for package in &packages {
            for dependency in &package.dependencies {
                snafu::ensure!(
                    packages.iter().any(|p| &p.name == dependency),
                    error::UnknownPackageDependencySnafu {
                        release: name.clone(),
                        package: package.name.clone(),
                        dependency: dependency.clone(),
                    }
                );
            }
        }

        let jobs_dir = dir.join("jobs");
        let mut jobs = Vec::new();
        for entry in std::fs::read_dir(&jobs_dir).context(error::ReadDirSnafu { path: &jobs_dir })? {
            let entry = entry.context(error::ReadDirSnafu { path: &jobs_dir })?;
            if !entry.path().is_dir() {
                continue;
            }
            jobs.push(job_from_directory(&name, &entry.path())?);
        }

        Ok(Release {
            name,
            version,
            commit_hash: String::new(),
            packages,
            jobs,
            license: existing(dir.join("LICENSE")),
            notice: existing(dir.join("NOTICE")),
            dev: true,
        })
    }
}

fn existing(path: PathBuf) -> Option<PathBuf> {
    path.is_file().then_some(path)
}

#[derive(Debug, serde::Deserialize)]
struct PackageSpec {
    #[serde(default)]
    dependencies: Vec<String>,
}

/// Hashes a packaged `.tgz` archive's file contents (sorted by path) and its
/// declared dependency names. The enclosing release's name and version never
/// enter this computation, so the same sources in two releases fingerprint
/// identically (§3, §9).
fn fingerprint_package_archive(archive_path: &Path, dependencies: &[String]) -> Result<Fingerprint> {
    let mut entries = archive::read_tgz_entries(archive_path)?;
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    let mut builder = FingerprintBuilder::new();
    for (path, contents) in &entries {
        builder.update(path.to_string_lossy().as_bytes());
        builder.update(contents);
    }
    let mut deps = dependencies.to_vec();
    deps.sort();
    builder.update_all(deps);
    Ok(builder.finish())
}

fn fingerprint_package_dir(dir: &Path, dependencies: &[String]) -> Result<Fingerprint> {
    let mut paths: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().strip_prefix(dir).unwrap().to_path_buf())
        .collect();
    paths.sort();

    let mut builder = FingerprintBuilder::new();
    for relative in &paths {
        let contents = std::fs::read(dir.join(relative)).context(error::ReadFileSnafu { path: dir.join(relative) })?;
        builder.update(relative.to_string_lossy().as_bytes());
        builder.update(contents);
    }
    let mut deps = dependencies.to_vec();
    deps.sort();
    builder.update_all(deps);
    Ok(builder.finish())
}

fn job_from_archive(release_name: &str, job_name: &str, archive_path: &Path) -> Result<Job> {
    let entries = archive::read_tgz_entries(archive_path)?;
    build_job(release_name, job_name, archive_path.to_path_buf(), entries)
}

fn job_from_directory(release_name: &str, dir: &Path) -> Result<Job> {
    let job_name = dir.file_name().unwrap().to_string_lossy().into_owned();
    let mut entries = Vec::new();
    for entry in walkdir::WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_file() {
            let relative = entry.path().strip_prefix(dir).unwrap().to_path_buf();
            let contents = std::fs::read(entry.path()).context(error::ReadFileSnafu { path: entry.path().to_path_buf() })?;
            entries.push((relative, contents));
        }
    }
    build_job(release_name, &job_name, dir.to_path_buf(), entries)
}

/// Re-reads one template's bytes from a job's backing archive or, for a dev
/// release, its exploded directory. Jobs hold only template source paths,
/// not their contents, so the image builder calls this when it streams a
/// role layer rather than us keeping every job's templates in memory for
/// the run's lifetime.
pub fn read_job_template(job: &Job, template: &TemplateFile) -> Result<Vec<u8>> {
    if job.archive_path.is_dir() {
        let path = job.archive_path.join(&template.source);
        std::fs::read(&path).context(error::ReadFileSnafu { path })
    } else {
        let entries = archive::read_tgz_entries(&job.archive_path)?;
        entries
            .into_iter()
            .find(|(path, _)| path == &template.source)
            .map(|(_, bytes)| bytes)
            .context(error::TemplateMissingFromArchiveSnafu {
                job: job.name.clone(),
                template: template.source.clone(),
            })
    }
}

/// Extracts `package`'s full source tree (its `packaging` script included)
/// into `dest`, from either a final-layout `.tgz` or a dev-layout directory.
pub fn extract_package_source(package: &Package, dest: &Path) -> Result<()> {
    if package.archive_path.is_dir() {
        std::fs::create_dir_all(dest).context(error::CreateDirSnafu { path: dest })?;
        archive::copy_dir_all(&package.archive_path, dest)
    } else {
        archive::unpack_tgz(&package.archive_path, dest)
    }
}

fn build_job(
    release_name: &str,
    job_name: &str,
    archive_path: PathBuf,
    mut entries: Vec<(PathBuf, Vec<u8>)>,
) -> Result<Job> {
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    let spec_bytes = entries
        .iter()
        .find(|(p, _)| p == Path::new("spec") || p == Path::new("job.MF"))
        .map(|(_, bytes)| bytes.clone())
        .context(error::JobMissingFromArchiveSnafu {
            release: release_name.to_string(),
            job: job_name.to_string(),
        })?;
    let spec_text = String::from_utf8_lossy(&spec_bytes).into_owned();
    let spec: JobSpec = serde_yaml::from_str(&spec_text).context(error::MalformedJobSpecSnafu {
        release: release_name.to_string(),
        name: job_name.to_string(),
    })?;

    let monit = entries
        .iter()
        .find(|(p, _)| p == Path::new("monit"))
        .map(|(_, bytes)| String::from_utf8_lossy(bytes).into_owned())
        .unwrap_or_default();

    let (name, templates, packages, requires_privileged_psp, properties, provides, consumes): (
        String,
        Vec<crate::job::TemplateFile>,
        Vec<String>,
        bool,
        BTreeMap<String, PropertyDefault>,
        Vec<crate::job::ProvidedLink>,
        Vec<crate::job::ConsumedLink>,
    ) = spec.into();

    let mut builder = FingerprintBuilder::new();
    for (path, contents) in &entries {
        builder.update(path.to_string_lossy().as_bytes());
        builder.update(contents);
    }
    let fingerprint = builder.finish();

    Ok(Job {
        name,
        fingerprint,
        templates,
        monit,
        properties,
        provides,
        consumes,
        packages,
        requires_privileged_psp,
        archive_path,
    })
}
