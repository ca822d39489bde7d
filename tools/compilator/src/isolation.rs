//! The two isolation modes a compile step can run under (§4.4): delegate to
//! a container daemon, or run inside a private Linux namespace. Both expose
//! the same four environment variables to the `packaging` script.

use crate::error::{self, Result};
use duct::cmd;
use snafu::ResultExt;
use std::path::{Path, PathBuf};
use tracing::instrument;

pub struct PackagingEnv {
    pub compile_target: PathBuf,
    pub install_target: PathBuf,
    pub package_name: String,
    pub package_version: String,
}

impl PackagingEnv {
    fn as_pairs(&self) -> Vec<(String, String)> {
        vec![
            ("BOSH_COMPILE_TARGET".to_string(), self.compile_target.display().to_string()),
            ("BOSH_INSTALL_TARGET".to_string(), self.install_target.display().to_string()),
            ("BOSH_PACKAGE_NAME".to_string(), self.package_name.clone()),
            ("BOSH_PACKAGE_VERSION".to_string(), self.package_version.clone()),
        ]
    }
}

/// Runs a sandbox's `compile.sh` to completion with `env` set, however the
/// implementation chooses to isolate it.
pub trait Isolation: Send + Sync {
    fn run_packaging(&self, sandbox: &Path, script: &Path, env: &PackagingEnv) -> Result<()>;
}

/// Delegates to the container daemon: bind-mounts the sandbox and runs the
/// compile script inside a throwaway container. Shells out directly (rather
/// than going through `image_builder::ImageDaemon::run_container`, which
/// starts a detached, long-lived container -- not a run-to-completion one).
pub struct ContainerIsolation {
    docker: PathBuf,
    image: String,
}

impl ContainerIsolation {
    pub fn new(image: impl Into<String>) -> Result<Self> {
        let docker = which::which("docker").context(error::ToolNotFoundSnafu { command: "docker" })?;
        Ok(Self { docker, image: image.into() })
    }
}

impl Isolation for ContainerIsolation {
    #[instrument(level = "debug", skip(self, env), fields(package = %env.package_name))]
    fn run_packaging(&self, sandbox: &Path, script: &Path, env: &PackagingEnv) -> Result<()> {
        let mount = format!("{}:/var/vcap/sandbox", sandbox.display());
        let script_in_container = format!("/var/vcap/sandbox/{}", script.strip_prefix(sandbox).unwrap_or(script).display());

        let mut args: Vec<String> = vec![
            "run".to_string(),
            "--rm".to_string(),
            "--volume".to_string(),
            mount,
        ];
        for (key, value) in env.as_pairs() {
            args.push("--env".to_string());
            args.push(format!("{key}={value}"));
        }
        args.push(self.image.clone());
        args.push(script_in_container);

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let output = cmd(self.docker.as_path(), &arg_refs)
            .stderr_to_stdout()
            .stdout_capture()
            .unchecked()
            .run()
            .context(error::SpawnIsolationSnafu { package: env.package_name.clone() })?;

        if !output.status.success() {
            return error::PackagingFailedSnafu { package: env.package_name.clone(), status: output.status }.fail();
        }
        Ok(())
    }
}

/// Runs the compile script inside a private mount/UTS/PID namespace via the
/// `unshare` CLI, with UID remapped to root inside the namespace. Dependency
/// and source trees are already physically copied into the sandbox by
/// `workspace::prepare`, so no bind-mounts are needed here -- the namespace
/// exists to keep the build from seeing (or touching) the host filesystem.
pub struct NamespaceIsolation {
    unshare: PathBuf,
}

impl NamespaceIsolation {
    pub fn new() -> Result<Self> {
        let unshare = which::which("unshare").context(error::ToolNotFoundSnafu { command: "unshare" })?;
        Ok(Self { unshare })
    }
}

impl Isolation for NamespaceIsolation {
    #[instrument(level = "debug", skip(self, env), fields(package = %env.package_name))]
    fn run_packaging(&self, sandbox: &Path, script: &Path, env: &PackagingEnv) -> Result<()> {
        let args = [
            "--mount",
            "--uts",
            "--pid",
            "--fork",
            "--map-root-user",
            script.to_str().expect("sandbox paths are UTF-8"),
        ];

        let mut expression = cmd(self.unshare.as_path(), args).dir(sandbox).stderr_to_stdout().stdout_capture().unchecked();
        for (key, value) in env.as_pairs() {
            expression = expression.env(key, value);
        }

        let output = expression
            .run()
            .context(error::SpawnIsolationSnafu { package: env.package_name.clone() })?;

        if !output.status.success() {
            return error::PackagingFailedSnafu { package: env.package_name.clone(), status: output.status }.fail();
        }
        Ok(())
    }
}
