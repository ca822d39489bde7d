//! Dependency-bucket scheduling (§4.4): packages are handed to the worker
//! pool grouped by `|dependencies|`, ascending, with known-slow `ruby-2.*`
//! packages pulled to the front of the depth-0 bucket.

use release::Package;

const SLOW_PACKAGE_PREFIX: &str = "ruby-2.";

/// Orders `packages` for the producer: fewer direct dependencies first, and
/// within the zero-dependency bucket, `ruby-2.*` packages before everything
/// else. Ties otherwise preserve input order (stable sort), so two runs over
/// the same package set schedule identically.
pub fn order(packages: Vec<&Package>) -> Vec<&Package> {
    let mut ordered = workerpool::order_by_depth(packages, |p| p.dependencies.len());

    let zero_bucket_end = ordered
        .iter()
        .position(|p| !p.dependencies.is_empty())
        .unwrap_or(ordered.len());
    ordered[..zero_bucket_end].sort_by_key(|p| !p.name.starts_with(SLOW_PACKAGE_PREFIX));

    ordered
}

#[cfg(test)]
mod tests {
    use super::*;
    use fingerprint::fingerprint_of;
    use std::path::PathBuf;

    fn package(name: &str, dependencies: &[&str]) -> Package {
        Package {
            name: name.to_string(),
            version: "1".to_string(),
            fingerprint: fingerprint_of([name]),
            sha1: "deadbeef".repeat(5),
            dependencies: dependencies.iter().map(|s| s.to_string()).collect(),
            archive_path: PathBuf::from(name),
        }
    }

    #[test]
    fn fewer_dependencies_run_first() {
        let consul = package("consul", &["go-1.4"]);
        let go = package("go-1.4", &[]);
        let ordered = order(vec![&consul, &go]);
        assert_eq!(ordered.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(), vec!["go-1.4", "consul"]);
    }

    #[test]
    fn ruby_packages_move_to_the_front_of_the_zero_bucket() {
        let go = package("go-1.4", &[]);
        let ruby = package("ruby-2.5", &[]);
        let consul = package("consul", &["go-1.4"]);
        let ordered = order(vec![&go, &consul, &ruby]);
        assert_eq!(
            ordered.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            vec!["ruby-2.5", "go-1.4", "consul"]
        );
    }
}
