//! # Helm
//!
//! Installs and uninstalls Helm releases in managed clusters through the
//! `helm` CLI. The kubeconfig and values are handed over in temporary files
//! removed as soon as the command returns.

use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::controller::error::AddOnError;
use crate::crd::HelmChart;

#[derive(Debug, Clone)]
pub struct HelmRunner {
    binary: String,
}

impl HelmRunner {
    #[must_use]
    pub fn new(binary: &str) -> Self {
        Self {
            binary: binary.to_string(),
        }
    }

    fn resolve_binary(&self) -> Result<PathBuf, AddOnError> {
        which::which(&self.binary).map_err(|e| {
            AddOnError::DeployFatal(format!("{} binary not found in PATH: {e}", self.binary))
        })
    }

    /// `helm upgrade --install`
    ///
    /// # Errors
    ///
    /// Returns the truncated stderr of helm when the command fails.
    pub async fn upgrade_install(
        &self,
        kubeconfig: &[u8],
        chart: &HelmChart,
        values: Option<&str>,
    ) -> Result<(), AddOnError> {
        let kubeconfig_file = write_temp(kubeconfig)?;
        let values_file = values.map(|v| write_temp(v.as_bytes())).transpose()?;

        let mut args: Vec<String> = vec![
            "upgrade".into(),
            "--install".into(),
            chart.release_name.clone(),
            chart.chart_name.clone(),
            "--repo".into(),
            chart.repository_url.clone(),
            "--version".into(),
            chart.chart_version.clone(),
            "--namespace".into(),
            chart.release_namespace.clone(),
            "--create-namespace".into(),
            "--kubeconfig".into(),
            kubeconfig_file.path().display().to_string(),
        ];
        if let Some(file) = &values_file {
            args.push("--values".into());
            args.push(file.path().display().to_string());
        }
        self.run(&args).await
    }

    /// `helm uninstall`; a release that does not exist is not an error
    ///
    /// # Errors
    ///
    /// Returns the truncated stderr of helm when the command fails.
    pub async fn uninstall(
        &self,
        kubeconfig: &[u8],
        release_namespace: &str,
        release_name: &str,
    ) -> Result<(), AddOnError> {
        let kubeconfig_file = write_temp(kubeconfig)?;
        let args: Vec<String> = vec![
            "uninstall".into(),
            release_name.to_string(),
            "--namespace".into(),
            release_namespace.to_string(),
            "--ignore-not-found".into(),
            "--kubeconfig".into(),
            kubeconfig_file.path().display().to_string(),
        ];
        self.run(&args).await
    }

    async fn run(&self, args: &[String]) -> Result<(), AddOnError> {
        let binary = self.resolve_binary()?;
        debug!("Running {:?} {}", binary, args.first().map_or("", String::as_str));

        let output = tokio::process::Command::new(binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| AddOnError::DeployFatal(format!("failed to spawn helm: {e}")))?;

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = if stderr.len() > 300 {
            format!("{}... (truncated)", stderr.chars().take(300).collect::<String>())
        } else {
            stderr.trim().to_string()
        };
        Err(AddOnError::DeployFatal(format!(
            "helm {} failed (exit code: {}): {message}",
            args.first().map_or("", String::as_str),
            output.status.code().unwrap_or(-1)
        )))
    }
}

fn write_temp(content: &[u8]) -> Result<NamedTempFile, AddOnError> {
    let mut file = NamedTempFile::new()
        .map_err(|e| AddOnError::DeployFatal(format!("failed to create temp file: {e}")))?;
    file.write_all(content)
        .and_then(|()| file.flush())
        .map_err(|e| AddOnError::DeployFatal(format!("failed to write temp file: {e}")))?;
    Ok(file)
}
