//! Driver for the `pulumi` binary.

use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{error, info, warn};

use ark_core::backend::{ChangeSummary, EventSender};

static SUMMARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:[+~-]\s+)?(\d+)\s+(created|updated|deleted|unchanged)\b").unwrap()
});

/// Thin wrapper around the `pulumi` CLI. Every call runs
/// non-interactively; long-running operations stream their output
/// line by line.
pub struct PulumiCli {
    /// Path to the pulumi binary
    pulumi_bin: String,
}

impl Default for PulumiCli {
    fn default() -> Self {
        Self::new()
    }
}

impl PulumiCli {
    pub fn new() -> Self {
        let pulumi_bin = std::env::var("PULUMI_BIN").unwrap_or_else(|_| "pulumi".to_string());
        Self { pulumi_bin }
    }

    /// Create the stack if needed and make it the selected one.
    pub async fn stack_select_or_create(
        &self,
        stack: &str,
        cwd: &Path,
    ) -> Result<String, PulumiError> {
        info!(stack, dir = %cwd.display(), "selecting stack");
        self.run_capture(&["stack", "select", stack, "--create"], Some(cwd))
            .await
    }

    /// Install a resource plugin at a pinned version. Reinstalling an
    /// already-present version is a no-op for the CLI.
    pub async fn plugin_install(&self, name: &str, version: &str) -> Result<String, PulumiError> {
        info!(plugin = %format!("{name}@{version}"), "installing plugin");
        self.run_capture(&["plugin", "install", "resource", name, version], None)
            .await
    }

    pub async fn config_set(
        &self,
        stack: &str,
        cwd: &Path,
        key: &str,
        value: &str,
        secret: bool,
    ) -> Result<(), PulumiError> {
        let mut args = vec!["config", "set", key, value, "--stack", stack];
        if secret {
            args.push("--secret");
        }
        self.run_capture(&args, Some(cwd)).await?;
        Ok(())
    }

    /// Run `pulumi refresh`, streaming output lines as they occur.
    /// Returns the full transcript.
    pub async fn refresh(
        &self,
        stack: &str,
        cwd: &Path,
        events: EventSender,
    ) -> Result<String, PulumiError> {
        info!(stack, "running pulumi refresh");
        self.run_streaming(&["refresh", "--yes", "--stack", stack], cwd, events)
            .await
    }

    /// Run `pulumi up`, streaming output lines as they occur.
    pub async fn up(
        &self,
        stack: &str,
        cwd: &Path,
        events: EventSender,
    ) -> Result<String, PulumiError> {
        info!(stack, "running pulumi up");
        self.run_streaming(
            &["up", "--yes", "--skip-preview", "--stack", stack],
            cwd,
            events,
        )
        .await
    }

    /// Run `pulumi destroy`, streaming output lines as they occur.
    pub async fn destroy(
        &self,
        stack: &str,
        cwd: &Path,
        events: EventSender,
    ) -> Result<String, PulumiError> {
        info!(stack, "running pulumi destroy");
        self.run_streaming(&["destroy", "--yes", "--stack", stack], cwd, events)
            .await
    }

    /// Read the stack's exported outputs as JSON.
    pub async fn stack_outputs(
        &self,
        stack: &str,
        cwd: &Path,
    ) -> Result<HashMap<String, Value>, PulumiError> {
        let output = Command::new(&self.pulumi_bin)
            .args([
                "stack",
                "output",
                "--json",
                "--show-secrets",
                "--stack",
                stack,
                "--non-interactive",
            ])
            .current_dir(cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            return Err(PulumiError::CommandFailed {
                command: "pulumi stack output".to_string(),
                output: stderr,
            });
        }

        serde_json::from_slice(&output.stdout).map_err(|e| PulumiError::ParseFailed(e.to_string()))
    }

    /// Run a short command to completion, returning combined output.
    async fn run_capture(&self, args: &[&str], cwd: Option<&Path>) -> Result<String, PulumiError> {
        let mut command = Command::new(&self.pulumi_bin);
        command
            .args(args)
            .arg("--non-interactive")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }

        let output = command.output().await?;
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let combined = format!("{}\n{}", stdout, stderr);

        if !output.status.success() {
            error!(output = %combined, "pulumi command failed");
            return Err(PulumiError::CommandFailed {
                command: command_label(&self.pulumi_bin, args),
                output: combined,
            });
        }

        Ok(combined)
    }

    /// Run a long command, forwarding each output line to `events`
    /// as it arrives. Returns the full transcript.
    async fn run_streaming(
        &self,
        args: &[&str],
        cwd: &Path,
        events: EventSender,
    ) -> Result<String, PulumiError> {
        let mut child = Command::new(&self.pulumi_bin)
            .args(args)
            .arg("--non-interactive")
            .current_dir(cwd)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (Some(stdout), Some(stderr)) = (stdout, stderr) else {
            return Err(PulumiError::ParseFailed(
                "child process is missing stdio pipes".to_string(),
            ));
        };

        let mut stdout_reader = BufReader::new(stdout).lines();
        let mut stderr_reader = BufReader::new(stderr).lines();

        let mut output_lines = Vec::new();

        loop {
            tokio::select! {
                line = stdout_reader.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            if let Some(ref tx) = events {
                                let _ = tx.send(line.clone()).await;
                            }
                            output_lines.push(line);
                        }
                        Ok(None) => break,
                        Err(e) => {
                            warn!(error = %e, "error reading stdout");
                            break;
                        }
                    }
                }
                line = stderr_reader.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            if let Some(ref tx) = events {
                                let _ = tx.send(line.clone()).await;
                            }
                            output_lines.push(line);
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(error = %e, "error reading stderr");
                        }
                    }
                }
            }
        }

        let status = child.wait().await?;
        let output = output_lines.join("\n");

        if !status.success() {
            error!(output = %output, "pulumi command failed");
            return Err(PulumiError::CommandFailed {
                command: command_label(&self.pulumi_bin, args),
                output,
            });
        }

        Ok(output)
    }
}

fn command_label(bin: &str, args: &[&str]) -> String {
    let verb: Vec<&str> = args
        .iter()
        .take_while(|a| !a.starts_with('-'))
        .take(2)
        .copied()
        .collect();
    format!("{} {}", bin, verb.join(" "))
}

/// Parse the `Resources:` summary section of pulumi output into
/// change counts. A missing section yields zeros.
pub fn parse_change_summary(output: &str) -> ChangeSummary {
    let mut summary = ChangeSummary::default();

    for line in output.lines() {
        if let Some(caps) = SUMMARY_RE.captures(line) {
            let count: u64 = caps[1].parse().unwrap_or(0);
            match &caps[2] {
                "created" => summary.created = count,
                "updated" => summary.updated = count,
                "deleted" => summary.deleted = count,
                "unchanged" => summary.unchanged = count,
                _ => {}
            }
        }
    }

    summary
}

/// Pulumi CLI errors.
#[derive(Debug, thiserror::Error)]
pub enum PulumiError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{command} failed: {output}")]
    CommandFailed { command: String, output: String },

    #[error("failed to parse pulumi output: {0}")]
    ParseFailed(String),
}
