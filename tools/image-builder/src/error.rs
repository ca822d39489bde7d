use snafu::Snafu;
use std::path::PathBuf;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("docker binary not found on PATH: {source}"))]
    DockerNotFound { source: which::Error },

    #[snafu(display("failed to start 'docker {args}': {source}"))]
    CommandStart { args: String, source: std::io::Error },

    #[snafu(display("'docker {args}' failed"))]
    CommandFailed { args: String },

    #[snafu(display("failed to parse docker output as JSON: {source}"))]
    OutputParse { source: serde_json::Error },

    #[snafu(display("failed to build tar context: {source}"))]
    TarBuild { source: std::io::Error },

    #[snafu(display("failed to read file '{}' for tar context: {source}", path.display()))]
    ReadFile { path: PathBuf, source: std::io::Error },

    #[snafu(display("failed to walk directory '{}': {source}", path.display()))]
    WalkDir { path: PathBuf, source: walkdir::Error },

    #[snafu(display("package '{name}' has no compiled tree at '{}'", dir.display()))]
    MissingCompiledTree { name: String, dir: PathBuf },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
