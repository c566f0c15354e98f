//! Pulumi project descriptors.

use std::path::{Path, PathBuf};
use tracing::info;

/// Minimal project descriptor synthesized for program sources that do
/// not carry a `Pulumi.yaml` of their own (typically freshly cloned
/// repositories holding only program code).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSettings {
    pub name: String,
    /// Runtime identifier recorded in the descriptor.
    pub runtime: String,
    /// Program entry point, when it is not the project directory.
    pub main: Option<String>,
}

impl ProjectSettings {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            runtime: "yaml".to_string(),
            main: None,
        }
    }

    pub fn with_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = runtime.into();
        self
    }

    pub fn with_main(mut self, main: impl Into<String>) -> Self {
        self.main = Some(main.into());
        self
    }

    pub fn file_path(dir: &Path) -> PathBuf {
        dir.join("Pulumi.yaml")
    }

    pub fn exists_in(dir: &Path) -> bool {
        Self::file_path(dir).is_file()
    }

    /// Write the descriptor unless the directory already carries one.
    /// Returns whether a file was written.
    pub fn write_if_absent(&self, dir: &Path) -> std::io::Result<bool> {
        let path = Self::file_path(dir);
        if path.exists() {
            return Ok(false);
        }

        let mut contents = format!("name: {}\nruntime: {}\n", self.name, self.runtime);
        if let Some(main) = &self.main {
            contents.push_str(&format!("main: {main}\n"));
        }
        std::fs::write(&path, contents)?;

        info!(path = %path.display(), "wrote project descriptor");
        Ok(true)
    }
}
