use snafu::Snafu;
use std::path::PathBuf;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("package '{package}' depends on unscheduled package '{dependency}'"))]
    UnknownDependency { package: String, dependency: String },

    #[snafu(display("dependency '{dependency}' of package '{package}' failed to compile"))]
    DependencyFailed { package: String, dependency: String },

    #[snafu(display("failed to extract source for package '{package}': {source}"))]
    ExtractSource { package: String, source: release::Error },

    #[snafu(display("failed to create directory '{}': {source}", path.display()))]
    CreateDir { path: PathBuf, source: std::io::Error },

    #[snafu(display("failed to copy compiled tree for dependency '{dependency}' into sandbox: {source}"))]
    CopyDependency { dependency: String, source: std::io::Error },

    #[snafu(display("package '{package}' has no 'packaging' script in its source"))]
    MissingPackagingScript { package: String },

    #[snafu(display("failed to write compile script to '{}': {source}", path.display()))]
    WriteScript { path: PathBuf, source: std::io::Error },

    #[snafu(display("could not locate '{command}' on PATH: {source}"))]
    ToolNotFound { command: String, source: which::Error },

    #[snafu(display("failed to start isolated build for package '{package}': {source}"))]
    SpawnIsolation { package: String, source: std::io::Error },

    #[snafu(display("packaging script for '{package}' exited with status {status}"))]
    PackagingFailed { package: String, status: std::process::ExitStatus },

    #[snafu(display("failed to finalize local cache entry for package '{package}': {source}"))]
    FinalizeCache { package: String, source: std::io::Error },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
