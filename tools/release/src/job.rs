//! The `Job` type and the pieces of a BOSH job spec we care about: templates,
//! properties, and provided/consumed links.

use fingerprint::Fingerprint;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// A runnable template set belonging to exactly one [`crate::Release`].
///
/// `fingerprint` is independent of the enclosing release: the same job
/// contents (spec + monit + templates) yield the same fingerprint no matter
/// which release happens to bundle them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub name: String,
    pub fingerprint: Fingerprint,
    pub templates: Vec<TemplateFile>,
    pub monit: String,
    pub properties: BTreeMap<String, PropertyDefault>,
    pub provides: Vec<ProvidedLink>,
    pub consumes: Vec<ConsumedLink>,
    /// Names of packages (from the same release) this job's templates and
    /// monit script expect to find installed under `/var/vcap/packages/`.
    pub packages: Vec<String>,
    /// Whether this job needs to run under a privileged pod-security-policy.
    /// Not a stock BOSH job-spec field; a release author declares it under
    /// `privileged: true` in the job spec the same way `packages` is declared.
    pub requires_privileged_psp: bool,
    /// Where the job's packaged archive (or, for a dev release, its exploded
    /// directory) lives on disk, so template bytes can be re-read when the
    /// image builder streams a role layer without us holding every job's
    /// templates in memory for the lifetime of the run.
    pub archive_path: PathBuf,
}

impl Job {
    /// Templates rooted at `bin/` in the destination get mode 0755 when
    /// streamed into a role layer; everything else gets 0644 (§4.5).
    pub fn is_executable_destination(destination: &std::path::Path) -> bool {
        destination
            .components()
            .next()
            .map(|c| c.as_os_str() == "bin")
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateFile {
    pub source: PathBuf,
    pub destination: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyDefault {
    pub default: Option<serde_yaml::Value>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvidedLink {
    pub name: String,
    pub link_type: String,
    /// Names of job properties exported to consumers of this link.
    pub properties: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedLink {
    pub name: String,
    pub link_type: String,
    pub optional: bool,
}

/// Raw shape of a job's `spec` file (a.k.a. `job.MF` inside a packaged job
/// tarball), before we turn it into a [`Job`].
#[derive(Debug, Deserialize)]
pub(crate) struct JobSpec {
    pub name: String,
    #[serde(default)]
    pub templates: BTreeMap<String, PathBuf>,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub privileged: bool,
    #[serde(default)]
    pub properties: BTreeMap<String, RawProperty>,
    #[serde(default)]
    pub provides: Vec<RawProvides>,
    #[serde(default)]
    pub consumes: Vec<RawConsumes>,
}

#[derive(Debug, Deserialize, Default)]
pub(crate) struct RawProperty {
    #[serde(default)]
    pub default: Option<serde_yaml::Value>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawProvides {
    pub name: String,
    #[serde(rename = "type")]
    pub link_type: String,
    #[serde(default)]
    pub properties: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawConsumes {
    pub name: String,
    #[serde(rename = "type")]
    pub link_type: String,
    #[serde(default)]
    pub optional: bool,
}

impl From<JobSpec> for (String, Vec<TemplateFile>, Vec<String>, bool, BTreeMap<String, PropertyDefault>, Vec<ProvidedLink>, Vec<ConsumedLink>) {
    fn from(spec: JobSpec) -> Self {
        let templates = spec
            .templates
            .into_iter()
            .map(|(source, destination)| TemplateFile {
                source: PathBuf::from(source),
                destination,
            })
            .collect();
        let properties = spec
            .properties
            .into_iter()
            .map(|(name, raw)| {
                (
                    name,
                    PropertyDefault {
                        default: raw.default,
                        description: raw.description,
                    },
                )
            })
            .collect();
        let provides = spec
            .provides
            .into_iter()
            .map(|p| ProvidedLink {
                name: p.name,
                link_type: p.link_type,
                properties: p.properties,
            })
            .collect();
        let consumes = spec
            .consumes
            .into_iter()
            .map(|c| ConsumedLink {
                name: c.name,
                link_type: c.link_type,
                optional: c.optional,
            })
            .collect();
        (spec.name, templates, spec.packages, spec.privileged, properties, provides, consumes)
    }
}
