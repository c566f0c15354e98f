//! Remote program sources: clone a git repository into a fresh,
//! process-unique directory.

use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{error, info};
use uuid::Uuid;

use ark_core::backend::EventSender;
use ark_core::params::RemoteSource;

/// Materializes remote program sources on the local filesystem.
pub struct SourceFetcher {
    git_bin: String,
    temp_root: PathBuf,
}

impl Default for SourceFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceFetcher {
    pub fn new() -> Self {
        Self {
            git_bin: "git".to_string(),
            temp_root: std::env::temp_dir(),
        }
    }

    pub fn with_temp_root(mut self, root: PathBuf) -> Self {
        self.temp_root = root;
        self
    }

    /// Shallow-clone `remote` and return the program directory.
    ///
    /// Failures are returned to the caller; a partially written clone
    /// directory is left in place for inspection.
    pub async fn fetch(
        &self,
        remote: &RemoteSource,
        events: &EventSender,
    ) -> Result<PathBuf, FetchError> {
        let dest = self
            .temp_root
            .join(format!("ark-remote-{}", Uuid::new_v4().simple()));
        tokio::fs::create_dir_all(&dest).await?;

        info!(url = %remote.url, dest = %dest.display(), "cloning remote source");
        if let Some(tx) = events {
            let _ = tx.send(format!("cloning {}", remote.url)).await;
        }

        let args = clone_args(remote, &dest);
        let output = Command::new(&self.git_bin)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).to_string();
            error!(url = %remote.url, "git clone failed");
            return Err(FetchError::CloneFailed(stderr));
        }

        if let Some(tx) = events {
            let _ = tx.send(format!("cloned into {}", dest.display())).await;
        }

        let dir = match &remote.sub_path {
            Some(sub) => dest.join(sub),
            None => dest,
        };
        if !dir.is_dir() {
            return Err(FetchError::MissingSubPath(dir));
        }

        Ok(dir)
    }
}

fn clone_args(remote: &RemoteSource, dest: &std::path::Path) -> Vec<String> {
    let mut args = vec![
        "clone".to_string(),
        "--depth".to_string(),
        "1".to_string(),
        "--single-branch".to_string(),
    ];
    if let Some(branch) = &remote.branch {
        args.push("--branch".to_string());
        args.push(branch.clone());
    }
    args.push(remote.url.to_string());
    args.push(dest.to_string_lossy().to_string());
    args
}

/// Remote source errors.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("git clone failed: {0}")]
    CloneFailed(String),

    #[error("program directory {} does not exist in the cloned repository", .0.display())]
    MissingSubPath(PathBuf),
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn remote(branch: Option<&str>) -> RemoteSource {
        RemoteSource {
            url: Url::parse("https://github.com/acme/infra.git").unwrap(),
            sub_path: None,
            branch: branch.map(String::from),
        }
    }

    #[test]
    fn test_clone_args_are_shallow() {
        let args = clone_args(&remote(None), std::path::Path::new("/tmp/ark-remote-x"));
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        assert_eq!(
            args,
            vec![
                "clone",
                "--depth",
                "1",
                "--single-branch",
                "https://github.com/acme/infra.git",
                "/tmp/ark-remote-x",
            ]
        );
    }

    #[test]
    fn test_clone_args_include_branch() {
        let args = clone_args(&remote(Some("release")), std::path::Path::new("/tmp/d"));
        assert!(args.windows(2).any(|w| w == ["--branch", "release"]));
    }
}
