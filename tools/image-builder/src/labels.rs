//! Pure label-matching logic behind `determineBaseImage` (§4.5, §8 S5),
//! split out from [`crate::daemon`] so it is testable without a real
//! container daemon.

use crate::daemon::{BestImageMatch, ImageInfo};
use std::collections::BTreeMap;

/// Picks the candidate that satisfies every `mandatory_labels` entry
/// (key and value) and matches the largest subset of `optional_labels`.
/// Ties break on image ID so the choice is deterministic across runs.
pub fn best_match(
    candidates: &[ImageInfo],
    optional_labels: &BTreeMap<String, String>,
    mandatory_labels: &BTreeMap<String, String>,
) -> Option<BestImageMatch> {
    let mut best: Option<BestImageMatch> = None;

    for candidate in candidates {
        let satisfies_mandatory = mandatory_labels
            .iter()
            .all(|(k, v)| candidate.labels.get(k) == Some(v));
        if !satisfies_mandatory {
            continue;
        }

        let matched_labels: BTreeMap<String, String> = optional_labels
            .iter()
            .filter(|(k, v)| candidate.labels.get(*k) == Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let is_better = match &best {
            None => true,
            Some(current) => {
                matched_labels.len() > current.matched_labels.len()
                    || (matched_labels.len() == current.matched_labels.len()
                        && candidate.id < current.image)
            }
        };
        if is_better {
            best = Some(BestImageMatch { image: candidate.id.clone(), matched_labels });
        }
    }

    best
}

/// Labels present in `optional_labels` but absent from `matched`, i.e. the
/// packages that must still be added on top of the chosen base image.
pub fn remaining<'a>(
    optional_labels: &'a BTreeMap<String, String>,
    matched: &BTreeMap<String, String>,
) -> BTreeMap<&'a str, &'a str> {
    optional_labels
        .iter()
        .filter(|(k, v)| matched.get(k.as_str()) != Some(*v))
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(id: &str, labels: &[(&str, &str)]) -> ImageInfo {
        ImageInfo {
            id: id.to_string(),
            labels: labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        }
    }

    #[test]
    fn picks_image_matching_all_but_one_package_label() {
        let candidates = vec![image(
            "sha256:base",
            &[
                ("version.generator.fissile", "1.0.0"),
                ("fingerprint.aaa", "ruby-2.5"),
                ("fingerprint.bbb", "go-1.4"),
            ],
        )];
        let mandatory: BTreeMap<String, String> =
            [("version.generator.fissile".to_string(), "1.0.0".to_string())].into();
        let optional: BTreeMap<String, String> = [
            ("fingerprint.aaa".to_string(), "ruby-2.5".to_string()),
            ("fingerprint.bbb".to_string(), "go-1.4".to_string()),
            ("fingerprint.ccc".to_string(), "consul".to_string()),
        ]
        .into();

        let result = best_match(&candidates, &optional, &mandatory).unwrap();
        assert_eq!(result.image, "sha256:base");
        assert_eq!(result.matched_labels.len(), 2);

        let left = remaining(&optional, &result.matched_labels);
        assert_eq!(left.len(), 1);
        assert_eq!(left.get("fingerprint.ccc"), Some(&"consul"));
    }

    #[test]
    fn candidate_missing_a_mandatory_label_is_excluded() {
        let candidates = vec![image("sha256:stale", &[("fingerprint.aaa", "ruby-2.5")])];
        let mandatory: BTreeMap<String, String> =
            [("version.generator.fissile".to_string(), "1.0.0".to_string())].into();
        assert!(best_match(&candidates, &BTreeMap::new(), &mandatory).is_none());
    }

    #[test]
    fn ties_break_on_lexicographically_smaller_id() {
        let candidates = vec![image("sha256:zzz", &[]), image("sha256:aaa", &[])];
        let result = best_match(&candidates, &BTreeMap::new(), &BTreeMap::new()).unwrap();
        assert_eq!(result.image, "sha256:aaa");
    }
}
