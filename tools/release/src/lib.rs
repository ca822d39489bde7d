//! Loads BOSH releases (final or dev layout, local or downloaded) into a
//! typed in-memory model with content-addressed package and job fingerprints.

mod archive;
mod error;
mod job;
mod loader;
mod manifest_mf;
mod package;
mod release;

pub use error::{Error, Result};
pub use job::{ConsumedLink, Job, PropertyDefault, ProvidedLink, TemplateFile};
pub use loader::{load_releases, LoaderOptions, ReleaseRef};
pub use package::Package;
pub use release::{extract_package_source, read_job_template, Release};
