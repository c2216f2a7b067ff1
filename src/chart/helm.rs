//! # Helm CLI driver
//!
//! [`HelmDriver`] implementation that shells out to the `helm` binary.
//!
//! Values are piped to helm on stdin (`--values -`) so they never touch disk.
//! When an owner is set, helm runs this operator binary as a post-renderer
//! (`mesh-operator post-render --owner <json>`) to stamp ownership on every
//! rendered object.

use super::{ChartError, ChartRequest, HelmDriver, Release, ReleaseStatus, UninstallOutcome};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Substring helm prints when a release does not exist
const RELEASE_NOT_FOUND: &str = "release: not found";

#[derive(Debug, Clone)]
pub struct HelmCli {
    binary: PathBuf,
    post_renderer: Option<PathBuf>,
}

/// Subset of `helm status -o json` / `helm install -o json`
#[derive(Debug, Deserialize)]
struct HelmReleaseOutput {
    name: String,
    #[serde(default)]
    namespace: String,
    version: u32,
    info: HelmReleaseInfo,
}

#[derive(Debug, Deserialize)]
struct HelmReleaseInfo {
    status: String,
}

impl From<HelmReleaseOutput> for Release {
    fn from(output: HelmReleaseOutput) -> Self {
        Release {
            name: output.name,
            namespace: output.namespace,
            status: output
                .info
                .status
                .parse()
                .unwrap_or(ReleaseStatus::Unknown),
            version: output.version,
        }
    }
}

/// Outcome of one helm invocation
struct HelmOutput {
    success: bool,
    stdout: String,
    stderr: String,
}

impl HelmCli {
    /// Locate helm: an explicit path wins, otherwise search `PATH`.
    ///
    /// # Errors
    ///
    /// Returns [`ChartError::HelmNotFound`] when no helm binary can be found.
    pub fn new(binary_override: Option<&str>) -> Result<Self, ChartError> {
        let binary = match binary_override.filter(|b| !b.is_empty()) {
            Some(path) => which::which(path)
                .map_err(|e| ChartError::HelmNotFound(format!("{path}: {e}")))?,
            None => which::which("helm").map_err(|e| ChartError::HelmNotFound(e.to_string()))?,
        };
        Ok(Self {
            binary,
            post_renderer: None,
        })
    }

    /// Run `executable post-render --owner <json>` on every rendered manifest.
    #[must_use]
    pub fn with_post_renderer(mut self, executable: PathBuf) -> Self {
        self.post_renderer = Some(executable);
        self
    }

    async fn run(&self, args: &[String], stdin: Option<String>) -> Result<HelmOutput, ChartError> {
        debug!(binary = %self.binary.display(), ?args, "Running helm");

        let mut cmd = tokio::process::Command::new(&self.binary);
        cmd.args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn()?;
        if let Some(input) = stdin {
            if let Some(mut pipe) = child.stdin.take() {
                pipe.write_all(input.as_bytes()).await?;
                pipe.shutdown().await?;
            }
        }
        let output = child.wait_with_output().await?;

        Ok(HelmOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }

    async fn run_checked(
        &self,
        command: &str,
        args: &[String],
        stdin: Option<String>,
    ) -> Result<String, ChartError> {
        let output = self.run(args, stdin).await?;
        if !output.success {
            return Err(ChartError::Command {
                command: command.to_string(),
                stderr: output.stderr,
            });
        }
        Ok(output.stdout)
    }

    fn release_args(&self, command: &str, request: &ChartRequest) -> Result<Vec<String>, ChartError> {
        ensure_chart_dir(&request.chart_dir)?;

        let mut args = vec![
            command.to_string(),
            request.release.clone(),
            request.chart_dir.display().to_string(),
            "--namespace".to_string(),
            request.namespace.clone(),
            "--values".to_string(),
            "-".to_string(),
            "--output".to_string(),
            "json".to_string(),
        ];
        if let (Some(renderer), Some(owner)) = (&self.post_renderer, &request.owner) {
            args.push("--post-renderer".to_string());
            args.push(renderer.display().to_string());
            for arg in ["post-render".to_string(), "--owner".to_string(), serde_json::to_string(owner)?] {
                args.push("--post-renderer-args".to_string());
                args.push(arg);
            }
        }
        Ok(args)
    }
}

fn ensure_chart_dir(chart_dir: &Path) -> Result<(), ChartError> {
    if chart_dir.is_dir() {
        Ok(())
    } else {
        Err(ChartError::ChartNotFound(chart_dir.to_path_buf()))
    }
}

fn parse_release(stdout: &str) -> Result<Release, ChartError> {
    let output: HelmReleaseOutput = serde_json::from_str(stdout)?;
    Ok(output.into())
}

#[async_trait]
impl HelmDriver for HelmCli {
    async fn status(&self, release: &str, namespace: &str) -> Result<Option<Release>, ChartError> {
        let args = vec![
            "status".to_string(),
            release.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
            "--output".to_string(),
            "json".to_string(),
        ];
        let output = self.run(&args, None).await?;
        if !output.success {
            if output.stderr.contains(RELEASE_NOT_FOUND) {
                return Ok(None);
            }
            return Err(ChartError::Command {
                command: "status".to_string(),
                stderr: output.stderr,
            });
        }
        parse_release(&output.stdout).map(Some)
    }

    async fn install(&self, request: &ChartRequest) -> Result<Release, ChartError> {
        let mut args = self.release_args("install", request)?;
        args.push("--create-namespace".to_string());
        let stdout = self
            .run_checked("install", &args, Some(request.values.to_yaml()?))
            .await?;
        parse_release(&stdout)
    }

    async fn upgrade(&self, request: &ChartRequest) -> Result<Release, ChartError> {
        let mut args = self.release_args("upgrade", request)?;
        args.extend(["--history-max", "1", "--skip-crds"].map(String::from));
        let stdout = self
            .run_checked("upgrade", &args, Some(request.values.to_yaml()?))
            .await?;
        parse_release(&stdout)
    }

    async fn rollback(&self, release: &str, namespace: &str) -> Result<(), ChartError> {
        let args = vec![
            "rollback".to_string(),
            release.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
            "--history-max".to_string(),
            "1".to_string(),
        ];
        self.run_checked("rollback", &args, None).await?;
        Ok(())
    }

    async fn uninstall(
        &self,
        release: &str,
        namespace: &str,
    ) -> Result<UninstallOutcome, ChartError> {
        let args = vec![
            "uninstall".to_string(),
            release.to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
        ];
        let output = self.run(&args, None).await?;
        if output.success {
            Ok(UninstallOutcome::Uninstalled)
        } else if output.stderr.contains(RELEASE_NOT_FOUND) {
            Ok(UninstallOutcome::NotFound)
        } else {
            Err(ChartError::Command {
                command: "uninstall".to_string(),
                stderr: output.stderr,
            })
        }
    }
}
