//! Dockerfile line generation. Line order is part of the contract for the
//! packages layer (§8 S6): `FROM`, then the single `ADD`, then the
//! generator-version `LABEL`, in that exact order, before any user or
//! package-fingerprint labels.

use std::collections::BTreeMap;

pub const PACKAGES_SRC_DEST: &str = "/var/vcap/packages-src/";
pub const GENERATOR_LABEL: &str = "version.generator.fissile";

pub fn base_layer_dockerfile(stemcell: &str) -> Vec<String> {
    vec![
        format!("FROM {stemcell}"),
        "ADD root-tar /".to_string(),
        "ADD monitrc /etc/monit.d/monitrc".to_string(),
        "ADD run.sh /opt/fissile/run.sh".to_string(),
    ]
}

/// `user_labels` and `fingerprint_labels` are both iterated in key order (an
/// ordered map, e.g. `BTreeMap`), so two calls with the same inputs emit
/// byte-equal Dockerfiles.
pub fn packages_layer_dockerfile(
    base_image: &str,
    generator_version: &str,
    user_labels: &BTreeMap<String, String>,
    fingerprint_labels: &BTreeMap<String, String>,
) -> Vec<String> {
    let mut lines = vec![
        format!("FROM {base_image}"),
        format!("ADD packages-src {PACKAGES_SRC_DEST}"),
        format!("LABEL {GENERATOR_LABEL}={generator_version}"),
    ];
    for (key, value) in user_labels {
        lines.push(format!("LABEL \"{key}\"=\"{value}\""));
    }
    for (key, value) in fingerprint_labels {
        lines.push(format!("LABEL \"{key}\"=\"{value}\""));
    }
    lines
}

pub fn role_layer_dockerfile(packages_layer_tag: &str, role_name: &str) -> Vec<String> {
    vec![
        format!("FROM {packages_layer_tag}"),
        "ADD licenses /opt/fissile/share/doc/".to_string(),
        "ADD jobs-src /var/vcap/jobs-src/".to_string(),
        "ADD startup /opt/fissile/startup/".to_string(),
        "ADD run.sh /opt/fissile/run.sh".to_string(),
        "ADD job_config.json /opt/fissile/job_config.json".to_string(),
        "ADD env2conf.yml /opt/fissile/env2conf.yml".to_string(),
        format!("LABEL \"role\"=\"{role_name}\""),
        "CMD [\"/opt/fissile/run.sh\"]".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packages_dockerfile_with_no_packages_matches_contract() {
        let user_labels: BTreeMap<String, String> = [
            ("publisher".to_string(), "acme".to_string()),
            ("version.cap".to_string(), "1.2.3".to_string()),
        ]
        .into();
        let lines = packages_layer_dockerfile("base:latest", "9.9.9", &user_labels, &BTreeMap::new());

        assert_eq!(lines[0], "FROM base:latest");
        assert_eq!(lines[1], "ADD packages-src /var/vcap/packages-src/");
        assert_eq!(lines[2], "LABEL version.generator.fissile=9.9.9");
        assert_eq!(lines[3], "LABEL \"publisher\"=\"acme\"");
        assert_eq!(lines[4], "LABEL \"version.cap\"=\"1.2.3\"");
        assert_eq!(lines.len(), 5);
    }
}
