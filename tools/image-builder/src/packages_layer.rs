//! The packages layer: dedups the packages an instance-group set needs,
//! asks the image daemon which existing image already carries the most of
//! them (`determineBaseImage`, §4.5, §8 S5), and streams only what's left.

use crate::daemon::ImageDaemon;
use crate::dockerfile::{self, GENERATOR_LABEL};
use crate::error::Result;
use crate::labels;
use crate::layers::{self, TarProducer};
use crate::tar_writer;
use fingerprint::{Fingerprint, FingerprintBuilder};
use release::{Package, Release};
use role_manifest::InstanceGroup;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Unique packages (by fingerprint) required by every job in `groups`,
/// sorted by fingerprint so two resolutions of the same manifest walk them
/// in the same order (§8 invariant 1).
pub fn gather_unique_packages<'a>(groups: &[InstanceGroup], releases: &'a [Release]) -> Vec<&'a Package> {
    let mut by_fingerprint: BTreeMap<String, &'a Package> = BTreeMap::new();
    for group in groups {
        for job_ref in &group.jobs {
            let Some(release) = releases.iter().find(|r| r.name == job_ref.release) else {
                continue;
            };
            for package_name in &job_ref.job.packages {
                if let Some(package) = release.package(package_name) {
                    by_fingerprint.insert(package.fingerprint.as_str().to_string(), package);
                }
            }
        }
    }
    by_fingerprint.into_values().collect()
}

pub struct Plan {
    /// The base image this layer's Dockerfile builds `FROM` -- either an
    /// existing image `determineBaseImage` matched, or `base_layer_tag`.
    pub base_image: String,
    pub dockerfile: Vec<String>,
    /// A content hash over the builder version, the stemcell hash, and
    /// every package's (fingerprint, name, sha1), ordered by fingerprint
    /// (§4.3). Identical package content always yields the same tag,
    /// regardless of which base image `determineBaseImage` happened to
    /// match -- caching which packages are already present in some image
    /// must not change what this layer's identity is.
    pub tag: Fingerprint,
    remaining: Vec<RemainingPackage>,
}

/// Hashes the builder version, stemcell hash, and every package's
/// (fingerprint, name, sha1) ordered by fingerprint, per §4.3.
fn packages_layer_tag(generator_version: &str, stemcell_hash: &str, packages: &[&Package]) -> Fingerprint {
    let mut ordered: Vec<&&Package> = packages.iter().collect();
    ordered.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));

    let mut builder = FingerprintBuilder::new();
    builder.update(generator_version);
    builder.update(stemcell_hash);
    for package in ordered {
        builder.update(package.fingerprint.as_str());
        builder.update(&package.name);
        builder.update(&package.sha1);
    }
    builder.finish()
}

struct RemainingPackage {
    fingerprint: String,
    compiled_dir: PathBuf,
}

/// Queries `daemon` for the best existing base to build on top of, then
/// plans the Dockerfile and tar context for the packages still missing from
/// it. `base_layer_tag` is used both as the candidate-image search prefix
/// and as the fallback `FROM` when no existing image matches.
pub fn plan(
    daemon: &dyn ImageDaemon,
    packages: &[&Package],
    cache_root: &Path,
    stemcell_hash: &str,
    base_layer_tag: &str,
    generator_version: &str,
    user_labels: &BTreeMap<String, String>,
) -> Result<Plan> {
    let fingerprint_labels: BTreeMap<String, String> = packages
        .iter()
        .map(|p| (format!("fingerprint.{}", p.fingerprint), p.name.clone()))
        .collect();
    let mandatory_labels: BTreeMap<String, String> =
        [(GENERATOR_LABEL.to_string(), generator_version.to_string())].into();

    let best = daemon.find_best_image_with_labels(base_layer_tag, &fingerprint_labels, &mandatory_labels)?;

    let (base_image, matched) = match best {
        Some(found) => (found.image, found.matched_labels),
        None => (base_layer_tag.to_string(), BTreeMap::new()),
    };

    let remaining_labels: BTreeMap<String, String> = labels::remaining(&fingerprint_labels, &matched)
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let remaining: Vec<RemainingPackage> = packages
        .iter()
        .filter(|p| remaining_labels.contains_key(&format!("fingerprint.{}", p.fingerprint)))
        .map(|p| RemainingPackage {
            fingerprint: p.fingerprint.as_str().to_string(),
            compiled_dir: p.compiled_dir(cache_root, stemcell_hash),
        })
        .collect();

    let dockerfile = dockerfile::packages_layer_dockerfile(
        &base_image,
        generator_version,
        user_labels,
        &remaining_labels,
    );

    let tag = packages_layer_tag(generator_version, stemcell_hash, packages);

    Ok(Plan { base_image, dockerfile, tag, remaining })
}

pub fn produce(plan: Plan) -> TarProducer {
    Box::new(move |sink| {
        let mut builder = tar::Builder::new(sink);
        layers::write_dockerfile(&mut builder, &plan.dockerfile)?;
        for package in &plan.remaining {
            let prefix = format!("packages-src/{}", package.fingerprint);
            tar_writer::append_tree(&mut builder, &prefix, &package.compiled_dir)?;
        }
        layers::finish(builder)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::daemon::{BestImageMatch, ImageInfo};
    use fingerprint::fingerprint_of;
    use std::io::Read;

    struct FakeDaemon {
        best: Option<BestImageMatch>,
    }

    impl ImageDaemon for FakeDaemon {
        fn find_image(&self, _name: &str) -> Result<Option<ImageInfo>> {
            unimplemented!()
        }

        fn find_best_image_with_labels(
            &self,
            _base: &str,
            _optional_labels: &BTreeMap<String, String>,
            _mandatory_labels: &BTreeMap<String, String>,
        ) -> Result<Option<BestImageMatch>> {
            Ok(self.best.clone())
        }

        fn build_image_from_tar(&self, _name: &str, _tar: &mut dyn Read) -> Result<()> {
            unimplemented!()
        }

        fn remove_image(&self, _name: &str) -> Result<()> {
            unimplemented!()
        }

        fn run_container(&self, _image: &str, _name: &str, _env: &[(String, String)]) -> Result<()> {
            unimplemented!()
        }

        fn remove_container(&self, _name: &str) -> Result<()> {
            unimplemented!()
        }
    }

    fn package(name: &str, dir: &Path) -> Package {
        Package {
            name: name.to_string(),
            version: "1".to_string(),
            fingerprint: fingerprint_of([name]),
            sha1: "deadbeef".repeat(5),
            dependencies: Vec::new(),
            archive_path: dir.join(format!("{name}.tgz")),
        }
    }

    #[test]
    fn plan_streams_only_the_package_missing_from_the_matched_base() {
        let dir = tempfile::tempdir().unwrap();
        let ruby = package("ruby-2.5", dir.path());
        let consul = package("consul", dir.path());

        let matched: BTreeMap<String, String> =
            [(format!("fingerprint.{}", ruby.fingerprint), ruby.name.clone())].into();
        let daemon = FakeDaemon {
            best: Some(BestImageMatch { image: "sha256:base".to_string(), matched_labels: matched }),
        };

        let plan = plan(
            &daemon,
            &[&ruby, &consul],
            dir.path(),
            "stemcell-hash",
            "fissile/base:latest",
            "9.9.9",
            &BTreeMap::new(),
        )
        .unwrap();

        assert_eq!(plan.base_image, "sha256:base");
        assert_eq!(plan.remaining.len(), 1);
        assert_eq!(plan.remaining[0].fingerprint, consul.fingerprint.as_str());
        assert_eq!(plan.dockerfile[0], "FROM sha256:base");
    }

    #[test]
    fn plan_falls_back_to_base_layer_tag_when_nothing_matches() {
        let dir = tempfile::tempdir().unwrap();
        let ruby = package("ruby-2.5", dir.path());
        let daemon = FakeDaemon { best: None };

        let plan = plan(
            &daemon,
            &[&ruby],
            dir.path(),
            "stemcell-hash",
            "fissile/base:latest",
            "9.9.9",
            &BTreeMap::new(),
        )
        .unwrap();

        assert_eq!(plan.base_image, "fissile/base:latest");
        assert_eq!(plan.remaining.len(), 1);
    }

    #[test]
    fn tag_is_independent_of_base_image_match_but_tracks_package_content() {
        let dir = tempfile::tempdir().unwrap();
        let ruby = package("ruby-2.5", dir.path());
        let consul = package("consul", dir.path());

        let matched: BTreeMap<String, String> =
            [(format!("fingerprint.{}", ruby.fingerprint), ruby.name.clone())].into();
        let matching_daemon = FakeDaemon {
            best: Some(BestImageMatch { image: "sha256:base".to_string(), matched_labels: matched }),
        };
        let no_match_daemon = FakeDaemon { best: None };

        let with_match = plan(&matching_daemon, &[&ruby, &consul], dir.path(), "stemcell-hash", "fissile/base:latest", "9.9.9", &BTreeMap::new()).unwrap();
        let without_match = plan(&no_match_daemon, &[&ruby, &consul], dir.path(), "stemcell-hash", "fissile/base:latest", "9.9.9", &BTreeMap::new()).unwrap();
        assert_eq!(with_match.tag, without_match.tag);

        let fewer_packages = plan(&no_match_daemon, &[&ruby], dir.path(), "stemcell-hash", "fissile/base:latest", "9.9.9", &BTreeMap::new()).unwrap();
        assert_ne!(without_match.tag, fewer_packages.tag);

        let other_stemcell = plan(&no_match_daemon, &[&ruby, &consul], dir.path(), "other-stemcell-hash", "fissile/base:latest", "9.9.9", &BTreeMap::new()).unwrap();
        assert_ne!(without_match.tag, other_stemcell.tag);
    }
}
