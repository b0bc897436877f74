use std::fmt;
use std::path::Path;
use std::process::Command;

use serde_json::Value;

// All main errors that can happen from helm invocations

// New failure error type
#[derive(Debug)]
struct HError {
    inner: Context<HErrKind>,
}
// its associated enum
#[derive(Clone, Eq, PartialEq, Debug, Fail)]
pub enum HErrKind {
    #[fail(display = "helm upgrade of '{}' failed", _0)]
    UpgradeFailure(String),

    #[fail(display = "helm uninstall of '{}' failed", _0)]
    UninstallFailure(String),

    #[fail(display = "helm status of '{}' failed", _0)]
    StatusFailure(String),

    #[fail(display = "chart directory '{}' does not exist", _0)]
    MissingChart(String),
}
use failure::{Context, Backtrace, Fail};

// boilerplate error wrapping (might go away)
impl Fail for HError {
    fn cause(&self) -> Option<&dyn Fail> { self.inner.cause() }
    fn backtrace(&self) -> Option<&Backtrace> { self.inner.backtrace() }
}
impl fmt::Display for HError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(&self.inner, f)
    }
}
impl From<HErrKind> for HError {
    fn from(kind: HErrKind) -> HError {
        HError { inner: Context::new(kind) }
    }
}
impl From<Context<HErrKind>> for HError {
    fn from(inner: Context<HErrKind>) -> HError {
        HError { inner }
    }
}
pub type Result<T> = std::result::Result<T, failure::Error>;

// binary expected to be present on the operator machine
const HELM_BIN: &str = "helm";

/// A helm invoker pinned to one kube context.
pub struct Helm {
    context: String,
}

impl Helm {
    pub fn new(context: &str) -> Helm {
        Helm {
            context: context.to_string(),
        }
    }

    fn run(&self, args: &[String]) -> Result<String> {
        debug!("helm {}", args.join(" "));
        let output = Command::new(HELM_BIN)
            .arg("--kube-context")
            .arg(&self.context)
            .args(args)
            .output()
            .map_err(|e| format_err!("failed to invoke {}: {}", HELM_BIN, e))?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            bail!("helm {} failed: {}", args.first().map(|s| s.as_str()).unwrap_or(""), stderr.trim());
        }
        Ok(stdout)
    }

    /// `helm upgrade --install` with values files and inline overrides.
    ///
    /// Local chart paths are checked before shelling out; registry charts
    /// (`repo/chart`) pass through.
    pub fn upgrade_install(
        &self,
        namespace: &str,
        release: &str,
        chart: &str,
        version: Option<&str>,
        values_files: &[String],
        sets: &[(String, String)],
    ) -> Result<()> {
        if chart.contains('/') && Path::new(chart).is_absolute() && !Path::new(chart).exists() {
            return Err(HErrKind::MissingChart(chart.to_string()).into());
        }
        let mut args = vec![
            "upgrade".to_string(),
            "--install".to_string(),
            "--create-namespace".to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
            release.to_string(),
            chart.to_string(),
        ];
        if let Some(v) = version {
            args.push("--version".to_string());
            args.push(v.to_string());
        }
        for file in values_files {
            args.push("-f".to_string());
            args.push(file.clone());
        }
        for (key, value) in sets {
            args.push("--set".to_string());
            args.push(format!("{}={}", key, value));
        }
        self.run(&args)
            .map(|_| ())
            .map_err(|e| failure::Error::from(e.context(HErrKind::UpgradeFailure(release.to_string()))))
    }

    /// `helm uninstall`; a missing release is not an error.
    pub fn uninstall(&self, namespace: &str, release: &str) -> Result<()> {
        let args = vec![
            "uninstall".to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
            release.to_string(),
        ];
        match self.run(&args) {
            Ok(_) => Ok(()),
            Err(e) => {
                if e.to_string().contains("not found") {
                    debug!("release {} already gone", release);
                    Ok(())
                } else {
                    Err(failure::Error::from(
                        e.context(HErrKind::UninstallFailure(release.to_string())),
                    ))
                }
            }
        }
    }

    /// `helm status -o json`; `None` when the release does not exist.
    pub fn status(&self, namespace: &str, release: &str) -> Result<Option<Value>> {
        let args = vec![
            "status".to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
            release.to_string(),
            "-o".to_string(),
            "json".to_string(),
        ];
        match self.run(&args) {
            Ok(out) => {
                let value: Value = serde_json::from_str(&out).map_err(|e| {
                    failure::Error::from(HErrKind::StatusFailure(release.to_string()))
                        .context(e.to_string())
                })?;
                Ok(Some(value))
            }
            Err(e) => {
                if e.to_string().contains("not found") {
                    Ok(None)
                } else {
                    Err(failure::Error::from(
                        e.context(HErrKind::StatusFailure(release.to_string())),
                    ))
                }
            }
        }
    }

    /// Whether a release is currently installed.
    pub fn is_installed(&self, namespace: &str, release: &str) -> Result<bool> {
        Ok(self.status(namespace, release)?.is_some())
    }

    /// Release names installed in a namespace.
    pub fn list(&self, namespace: &str) -> Result<Vec<String>> {
        let args = vec![
            "list".to_string(),
            "--namespace".to_string(),
            namespace.to_string(),
            "-o".to_string(),
            "json".to_string(),
        ];
        let out = self.run(&args)?;
        let value: Value = serde_json::from_str(&out)?;
        let mut releases = Vec::new();
        if let Value::Array(items) = value {
            for item in items {
                if let Some(name) = item["name"].as_str() {
                    releases.push(name.to_string());
                }
            }
        }
        Ok(releases)
    }

    /// Register a chart repository and refresh the index.
    pub fn repo_add(&self, name: &str, url: &str) -> Result<()> {
        self.run(&[
            "repo".to_string(),
            "add".to_string(),
            "--force-update".to_string(),
            name.to_string(),
            url.to_string(),
        ])?;
        self.run(&["repo".to_string(), "update".to_string()])
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_local_chart_is_rejected() {
        let helm = Helm::new("kind-test");
        let err = helm
            .upgrade_install(
                "solo-e2e",
                "solo-deployment",
                "/definitely/not/a/chart",
                None,
                &[],
                &[],
            )
            .unwrap_err();
        let chain: Vec<String> = err.iter_chain().map(|c| c.to_string()).collect();
        assert!(chain.iter().any(|c| c.contains("does not exist")));
    }
}
