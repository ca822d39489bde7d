//! The role layer: licenses, package symlinks, job templates, startup
//! scripts, and the generated run-time glue (`run.sh`, `job_config.json`,
//! `env2conf.yml`) for one instance group (§4.5).

use crate::dockerfile;
use crate::error::Result;
use crate::layers::{self, TarProducer};
use crate::packages_layer;
use crate::tar_writer;
use fingerprint::{Fingerprint, FingerprintBuilder};
use release::Release;
use role_manifest::InstanceGroup;
use serde_json::json;
use std::collections::BTreeSet;

struct NamedBytes {
    dest: String,
    bytes: Vec<u8>,
    mode: u32,
}

pub struct Plan {
    dockerfile: Vec<String>,
    licenses: Vec<NamedBytes>,
    symlinks: Vec<(String, String)>,
    job_files: Vec<NamedBytes>,
    startup_scripts: Vec<NamedBytes>,
    run_sh: NamedBytes,
    job_config_json: NamedBytes,
    env2conf_yml: NamedBytes,
    /// A content hash over the packages-layer tag, this group's jobs'
    /// fingerprints (which already cover each job's monit and templates),
    /// and the group's run spec (§4.3). Role-manifest templating choices
    /// that don't change a job's fingerprint leave this tag unchanged.
    pub tag: Fingerprint,
}

/// Hashes the packages-layer tag, the group's job fingerprints (ordered for
/// determinism), and the group's run spec, per §4.3.
fn role_layer_tag(group: &InstanceGroup, packages_layer_tag: &str) -> Fingerprint {
    let mut job_fingerprints: Vec<&str> = group.jobs.iter().map(|j| j.job.fingerprint.as_str()).collect();
    job_fingerprints.sort_unstable();

    let mut builder = FingerprintBuilder::new();
    builder.update(packages_layer_tag);
    builder.update_all(job_fingerprints);
    builder.update(format!("{:?}", group.run));
    builder.finish()
}

pub fn plan(group: &InstanceGroup, releases: &[Release], packages_layer_tag: &str) -> Result<Plan> {
    let dockerfile = dockerfile::role_layer_dockerfile(packages_layer_tag, &group.name);

    let symlinks = packages_layer::gather_unique_packages(std::slice::from_ref(group), releases)
        .into_iter()
        .map(|pkg| {
            (
                format!("var/vcap/packages/{}", pkg.name),
                format!("../packages-src/{}", pkg.fingerprint),
            )
        })
        .collect();

    let mut release_names: BTreeSet<&str> = BTreeSet::new();
    for job_ref in &group.jobs {
        release_names.insert(&job_ref.release);
    }
    let mut licenses = Vec::new();
    for release_name in release_names {
        let Some(release) = releases.iter().find(|r| r.name == release_name) else {
            continue;
        };
        if let Some(license) = &release.license {
            let bytes = std::fs::read(license)
                .map_err(|source| crate::error::Error::ReadFile { path: license.clone(), source })?;
            licenses.push(NamedBytes {
                dest: format!("licenses/{release_name}/LICENSE"),
                bytes,
                mode: 0o644,
            });
        }
        if let Some(notice) = &release.notice {
            let bytes = std::fs::read(notice)
                .map_err(|source| crate::error::Error::ReadFile { path: notice.clone(), source })?;
            licenses.push(NamedBytes {
                dest: format!("licenses/{release_name}/NOTICE"),
                bytes,
                mode: 0o644,
            });
        }
    }

    let mut job_files = Vec::new();
    let mut startup_scripts = Vec::new();
    let mut job_names = Vec::new();
    for job_ref in &group.jobs {
        let job = &job_ref.job;
        job_names.push(job_ref.job_name.clone());

        for template in &job.templates {
            let bytes = release::read_job_template(job, template)?;
            let mode = tar_writer::executable_mode_for(&template.destination);
            job_files.push(NamedBytes {
                dest: format!(
                    "var/vcap/jobs-src/{}/templates/{}",
                    job_ref.job_name,
                    template.destination.display()
                ),
                bytes,
                mode,
            });
        }

        job_files.push(NamedBytes {
            dest: format!("var/vcap/jobs-src/{}/monit", job_ref.job_name),
            bytes: job.monit.clone().into_bytes(),
            mode: 0o644,
        });

        let config_spec = json!({
            "job": { "name": job_ref.job_name },
            "parameters": [],
            "properties": job.properties.keys().collect::<Vec<_>>(),
            "provides": job_ref.provides.iter().map(|p| &p.name).collect::<Vec<_>>(),
            "consumes": job_ref.consumes.iter().map(|c| &c.name).collect::<Vec<_>>(),
        });
        job_files.push(NamedBytes {
            dest: format!("var/vcap/jobs-src/{}/config_spec.json", job_ref.job_name),
            bytes: serde_json::to_vec_pretty(&config_spec).unwrap_or_default(),
            mode: 0o644,
        });

        startup_scripts.push(NamedBytes {
            dest: format!("opt/fissile/startup/{}.sh", job_ref.job_name),
            bytes: format!(
                "#!/bin/sh\nexec /var/vcap/jobs-src/{}/bin/ctl\n",
                job_ref.job_name
            )
            .into_bytes(),
            mode: 0o755,
        });
    }

    let run_sh = NamedBytes {
        dest: "run.sh".to_string(),
        bytes: format!(
            "#!/bin/sh\nset -e\n{}\n",
            job_names
                .iter()
                .map(|name| format!("/opt/fissile/startup/{name}.sh &"))
                .collect::<Vec<_>>()
                .join("\n")
        )
        .into_bytes(),
        mode: 0o755,
    };

    let job_config_json = NamedBytes {
        dest: "job_config.json".to_string(),
        bytes: serde_json::to_vec_pretty(&json!({ "role": group.name, "jobs": job_names })).unwrap_or_default(),
        mode: 0o644,
    };

    let env2conf_yml = NamedBytes {
        dest: "env2conf.yml".to_string(),
        bytes: b"---\nproperties: {}\n".to_vec(),
        mode: 0o644,
    };

    let tag = role_layer_tag(group, packages_layer_tag);

    Ok(Plan {
        dockerfile,
        licenses,
        symlinks,
        job_files,
        startup_scripts,
        run_sh,
        job_config_json,
        env2conf_yml,
        tag,
    })
}

pub fn produce(plan: Plan) -> TarProducer {
    Box::new(move |sink| {
        let mut builder = tar::Builder::new(sink);
        layers::write_dockerfile(&mut builder, &plan.dockerfile)?;
        for entry in plan.licenses.iter().chain(plan.job_files.iter()).chain(plan.startup_scripts.iter()) {
            tar_writer::append_bytes(&mut builder, &entry.dest, &entry.bytes, entry.mode)?;
        }
        for (dest, target) in &plan.symlinks {
            tar_writer::append_symlink(&mut builder, dest, target)?;
        }
        for entry in [&plan.run_sh, &plan.job_config_json, &plan.env2conf_yml] {
            tar_writer::append_bytes(&mut builder, &entry.dest, &entry.bytes, entry.mode)?;
        }
        layers::finish(builder)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fingerprint::fingerprint_of;
    use release::Job;
    use role_manifest::{GroupType, JobReference, RunSpec};
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    fn job(name: &str) -> Job {
        Job {
            name: name.to_string(),
            fingerprint: fingerprint_of([name]),
            templates: Vec::new(),
            monit: String::new(),
            properties: BTreeMap::new(),
            provides: Vec::new(),
            consumes: Vec::new(),
            packages: Vec::new(),
            requires_privileged_psp: false,
            archive_path: PathBuf::new(),
        }
    }

    fn group_with_jobs(jobs: Vec<Job>) -> InstanceGroup {
        InstanceGroup {
            name: "worker".to_string(),
            group_type: GroupType::Bosh,
            jobs: jobs
                .into_iter()
                .map(|job| JobReference {
                    release: "release".to_string(),
                    job_name: job.name.clone(),
                    job,
                    properties: BTreeMap::new(),
                    provides: Vec::new(),
                    consumes: Vec::new(),
                    consumed_by: Vec::new(),
                })
                .collect(),
            run: RunSpec::default(),
            colocated_groups: Vec::new(),
            tags: Vec::new(),
            feature_gate: None,
        }
    }

    #[test]
    fn tag_is_stable_and_tracks_job_fingerprints_and_run_spec() {
        let group_a = group_with_jobs(vec![job("web"), job("worker")]);
        let group_b = group_with_jobs(vec![job("worker"), job("web")]);
        assert_eq!(
            role_layer_tag(&group_a, "packages-tag"),
            role_layer_tag(&group_b, "packages-tag"),
            "job order must not affect the tag"
        );

        let different_packages_tag = role_layer_tag(&group_a, "other-packages-tag");
        assert_ne!(role_layer_tag(&group_a, "packages-tag"), different_packages_tag);

        let group_extra_job = group_with_jobs(vec![job("web"), job("worker"), job("sidecar")]);
        assert_ne!(
            role_layer_tag(&group_a, "packages-tag"),
            role_layer_tag(&group_extra_job, "packages-tag")
        );

        let mut group_diff_run = group_with_jobs(vec![job("web"), job("worker")]);
        group_diff_run.run.service_account = Some("custom".to_string());
        assert_ne!(
            role_layer_tag(&group_a, "packages-tag"),
            role_layer_tag(&group_diff_run, "packages-tag")
        );
    }
}
