use snafu::Snafu;
use std::path::PathBuf;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("failed to download release archive from '{url}': {source}"))]
    Download { url: String, source: reqwest::Error },

    #[snafu(display("failed to read downloaded release archive at '{}': {source}", path.display()))]
    ReadDownload { path: PathBuf, source: std::io::Error },

    #[snafu(display("failed to write release archive to '{}': {source}", path.display()))]
    WriteDownload { path: PathBuf, source: std::io::Error },

    #[snafu(display(
        "hash mismatch for release archive '{}': expected {expected}, got {actual}",
        path.display()
    ))]
    HashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[snafu(display("failed to create directory '{}': {source}", path.display()))]
    CreateDir { path: PathBuf, source: std::io::Error },

    #[snafu(display("failed to unpack archive into '{}': {source}", path.display()))]
    Unpack { path: PathBuf, source: std::io::Error },

    #[snafu(display("failed to read directory '{}': {source}", path.display()))]
    ReadDir { path: PathBuf, source: std::io::Error },

    #[snafu(display("failed to read file '{}': {source}", path.display()))]
    ReadFile { path: PathBuf, source: std::io::Error },

    #[snafu(display("malformed release.MF at '{}': {source}", path.display()))]
    MalformedManifest {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[snafu(display("malformed job spec '{name}' in release '{release}': {source}"))]
    MalformedJobSpec {
        release: String,
        name: String,
        source: serde_yaml::Error,
    },

    #[snafu(display("'{}' has neither a release.MF nor a dev_releases/ directory, not a release", path.display()))]
    UnknownLayout { path: PathBuf },

    #[snafu(display("duplicate release name '{name}'"))]
    DuplicateReleaseName { name: String },

    #[snafu(display("release '{release}' references job '{job}' but it was not found in the archive"))]
    JobMissingFromArchive { release: String, job: String },

    #[snafu(display(
        "release '{release}' references package '{package}' but it was not found in the archive"
    ))]
    PackageMissingFromArchive { release: String, package: String },

    #[snafu(display("package '{package}' in release '{release}' depends on unknown package '{dependency}'"))]
    UnknownPackageDependency {
        release: String,
        package: String,
        dependency: String,
    },

    #[snafu(display("could not determine a file name from URL '{url}'"))]
    NoFileNameInUrl { url: String },

    #[snafu(display("job '{job}' has no template source '{}' in its archive", template.display()))]
    TemplateMissingFromArchive { job: String, template: PathBuf },

    #[snafu(display("failed to write file '{}': {source}", path.display()))]
    WriteFile { path: PathBuf, source: std::io::Error },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
