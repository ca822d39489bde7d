use snafu::Snafu;
use std::path::PathBuf;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("failed to request blob '{key}' from '{url}': {source}"))]
    Request { key: String, url: String, source: reqwest::Error },

    #[snafu(display("blob store returned status {status} for '{key}'"))]
    BadStatus { key: String, status: reqwest::StatusCode },

    #[snafu(display("failed to write temporary blob file '{}': {source}", path.display()))]
    WriteTemp { path: PathBuf, source: std::io::Error },

    #[snafu(display("failed to unpack blob '{key}' into '{}': {source}", dest.display()))]
    Unpack { key: String, dest: PathBuf, source: std::io::Error },

    #[snafu(display("failed to create tar archive of '{}': {source}", source_dir.display()))]
    Archive { source_dir: PathBuf, source: std::io::Error },

    #[snafu(display("failed to upload blob '{key}' to '{url}': {source}"))]
    Upload { key: String, url: String, source: reqwest::Error },

    #[snafu(display("failed to create directory '{}': {source}", path.display()))]
    CreateDir { path: PathBuf, source: std::io::Error },
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
