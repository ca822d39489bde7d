//! The `ImageDaemon` abstraction (§6) and a `docker`-CLI-backed
//! implementation: shells out with retry on known-flaky BuildKit errors,
//! and reads labels back off a candidate image via `docker image inspect
//! --format '{{ json .Config }}'`.
//!
//! A build here is fed a tar stream over stdin (`docker build -`) rather
//! than a context directory, so no build directory is ever materialized on
//! disk (§4.5).

use crate::error::{self, Result};
use duct::cmd;
use lazy_static::lazy_static;
use regex::Regex;
use snafu::ResultExt;
use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use tracing::{debug, instrument, warn};

lazy_static! {
    /// https://github.com/moby/buildkit/issues/1090 -- a known-flaky
    /// failure during parallel `docker build` runs, worth one retry.
    static ref BUILDKIT_FRONTEND_ERROR: Regex = Regex::new(concat!(
        r#"failed to solve with frontend dockerfile.v0: "#,
        r#"failed to solve with frontend gateway.v0: "#,
        r#"frontend grpc server closed unexpectedly"#,
    ))
    .unwrap();
}

const BUILD_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone)]
pub struct ImageInfo {
    pub id: String,
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct BestImageMatch {
    pub image: String,
    pub matched_labels: BTreeMap<String, String>,
}

/// Capabilities consumed from a container daemon (§6). Object-safe so the
/// compilator and image-builder core can run against a fake in tests.
pub trait ImageDaemon: Send + Sync {
    fn find_image(&self, name: &str) -> Result<Option<ImageInfo>>;

    fn find_best_image_with_labels(
        &self,
        base: &str,
        optional_labels: &BTreeMap<String, String>,
        mandatory_labels: &BTreeMap<String, String>,
    ) -> Result<Option<BestImageMatch>>;

    fn has_image(&self, name: &str) -> Result<bool> {
        Ok(self.find_image(name)?.is_some())
    }

    /// Builds `name` from a tar stream read to completion from `tar`.
    fn build_image_from_tar(&self, name: &str, tar: &mut dyn Read) -> Result<()>;

    fn remove_image(&self, name: &str) -> Result<()>;

    /// Starts a detached container for compile-in-container isolation.
    fn run_container(&self, image: &str, name: &str, env: &[(String, String)]) -> Result<()>;

    fn remove_container(&self, name: &str) -> Result<()>;
}

pub struct DockerCliDaemon {
    docker: PathBuf,
}

impl DockerCliDaemon {
    pub fn new() -> Result<Self> {
        let docker = which::which("docker").context(error::DockerNotFoundSnafu)?;
        Ok(Self { docker })
    }

    fn docker_cmd(&self, args: &[&str]) -> duct::Expression {
        cmd(self.docker.as_path(), args)
    }

    #[instrument(level = "debug", skip(self), fields(args = %args.join(" ")))]
    fn run_captured(&self, args: &[&str]) -> Result<Vec<u8>> {
        let output = self
            .docker_cmd(args)
            .stderr_to_stdout()
            .stdout_capture()
            .unchecked()
            .run()
            .context(error::CommandStartSnafu { args: args.join(" ") })?;
        if !output.status.success() {
            debug!(output = %String::from_utf8_lossy(&output.stdout), "docker command failed");
            return error::CommandFailedSnafu { args: args.join(" ") }.fail();
        }
        Ok(output.stdout)
    }

    fn inspect_labels(&self, reference: &str) -> Result<Option<ImageInfo>> {
        let args = ["image", "inspect", reference, "--format", "{{json .}}"];
        let output = match self.run_captured(&args) {
            Ok(bytes) => bytes,
            Err(_) => return Ok(None),
        };

        #[derive(serde::Deserialize)]
        struct Inspect {
            #[serde(rename = "Id")]
            id: String,
            #[serde(rename = "Config")]
            config: InspectConfig,
        }
        #[derive(serde::Deserialize)]
        struct InspectConfig {
            #[serde(rename = "Labels", default)]
            labels: Option<BTreeMap<String, String>>,
        }

        let parsed: Inspect =
            serde_json::from_slice(&output).context(error::OutputParseSnafu)?;
        Ok(Some(ImageInfo {
            id: parsed.id,
            labels: parsed.config.labels.unwrap_or_default(),
        }))
    }

    fn candidate_images(&self, base: &str) -> Result<Vec<String>> {
        let reference_filter = format!("reference={base}*");
        let args = ["images", "--filter", &reference_filter, "--format", "{{.ID}}"];
        let output = self.run_captured(&args)?;
        Ok(String::from_utf8_lossy(&output)
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }
}

impl ImageDaemon for DockerCliDaemon {
    #[instrument(level = "debug", skip(self))]
    fn find_image(&self, name: &str) -> Result<Option<ImageInfo>> {
        self.inspect_labels(name)
    }

    #[instrument(level = "debug", skip(self, optional_labels, mandatory_labels))]
    fn find_best_image_with_labels(
        &self,
        base: &str,
        optional_labels: &BTreeMap<String, String>,
        mandatory_labels: &BTreeMap<String, String>,
    ) -> Result<Option<BestImageMatch>> {
        let mut candidates = Vec::new();
        for id in self.candidate_images(base)? {
            if let Some(info) = self.inspect_labels(&id)? {
                candidates.push(info);
            }
        }
        Ok(crate::labels::best_match(&candidates, optional_labels, mandatory_labels))
    }

    #[instrument(level = "debug", skip(self, tar))]
    fn build_image_from_tar(&self, name: &str, tar: &mut dyn Read) -> Result<()> {
        let mut context = Vec::new();
        tar.read_to_end(&mut context).context(error::TarBuildSnafu)?;

        let args = ["build", "--tag", name, "-"];
        let mut attempt = 1;
        loop {
            let output = self
                .docker_cmd(&args)
                .stdin_bytes(context.clone())
                .stderr_to_stdout()
                .stdout_capture()
                .unchecked()
                .run()
                .context(error::CommandStartSnafu { args: args.join(" ") })?;

            if output.status.success() {
                return Ok(());
            }

            let stdout = String::from_utf8_lossy(&output.stdout);
            let retryable = BUILDKIT_FRONTEND_ERROR.is_match(&stdout);
            if retryable && attempt < BUILD_MAX_ATTEMPTS {
                warn!(%name, attempt, "transient docker build failure, retrying");
                attempt += 1;
                continue;
            }

            debug!(output = %stdout, "docker build failed");
            return error::CommandFailedSnafu { args: args.join(" ") }.fail();
        }
    }

    #[instrument(level = "debug", skip(self))]
    fn remove_image(&self, name: &str) -> Result<()> {
        self.run_captured(&["rmi", "--force", name]).map(|_| ())
    }

    #[instrument(level = "debug", skip(self, env))]
    fn run_container(&self, image: &str, name: &str, env: &[(String, String)]) -> Result<()> {
        let mut args = vec!["run".to_string(), "--detach".to_string(), "--name".to_string(), name.to_string()];
        for (key, value) in env {
            args.push("--env".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(image.to_string());
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        self.run_captured(&arg_refs).map(|_| ())
    }

    #[instrument(level = "debug", skip(self))]
    fn remove_container(&self, name: &str) -> Result<()> {
        self.run_captured(&["rm", "--force", name]).map(|_| ())
    }
}
