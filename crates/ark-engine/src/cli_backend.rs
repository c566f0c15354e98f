//! Stack engine backed by the `pulumi` CLI for filesystem program
//! sources.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

use ark_core::backend::{ChangeSummary, EventSender, StackBackend, StackHandle, UpResult};
use ark_core::params::{ConfigPair, PluginRef, ProgramSource, RunParams};
use ark_core::{Error, Result};

use crate::fetcher::SourceFetcher;
use crate::project::ProjectSettings;
use crate::pulumi::{PulumiCli, parse_change_summary};

/// Runs stacks whose program lives in a directory: a local path, or
/// a git repository cloned at run time. Inline programs are rejected;
/// they run on the in-process engine.
pub struct CliBackend {
    cli: PulumiCli,
    fetcher: SourceFetcher,
    /// Runtime identifier for synthesized project descriptors.
    runtime: String,
}

impl Default for CliBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CliBackend {
    pub fn new() -> Self {
        Self {
            cli: PulumiCli::new(),
            fetcher: SourceFetcher::new(),
            runtime: "yaml".to_string(),
        }
    }

    pub fn with_runtime(mut self, runtime: impl Into<String>) -> Self {
        self.runtime = runtime.into();
        self
    }

    fn workdir(stack: &StackHandle) -> Result<&Path> {
        stack
            .workdir
            .as_deref()
            .ok_or_else(|| Error::Internal("stack handle is missing a working directory".into()))
    }
}

#[async_trait]
impl StackBackend for CliBackend {
    fn name(&self) -> &'static str {
        "pulumi-cli"
    }

    async fn upsert_stack(&self, params: &RunParams, events: EventSender) -> Result<StackHandle> {
        let workdir = match &params.source {
            ProgramSource::Local(path) => {
                if !path.is_dir() {
                    return Err(Error::StackResolve(format!(
                        "program directory {} does not exist",
                        path.display()
                    )));
                }
                path.clone()
            }
            ProgramSource::Remote(remote) => self
                .fetcher
                .fetch(remote, &events)
                .await
                .map_err(|e| Error::Fetch(e.to_string()))?,
            ProgramSource::Inline(_) => {
                return Err(Error::Unsupported(
                    "inline programs run on the in-process engine".into(),
                ));
            }
        };

        let settings = ProjectSettings::new(&params.project).with_runtime(&self.runtime);
        let wrote = settings
            .write_if_absent(&workdir)
            .map_err(|e| Error::StackResolve(format!("cannot write project descriptor: {e}")))?;
        if wrote {
            debug!(project = %params.project, "synthesized project descriptor");
        }

        let qualified_name = params.fully_qualified_stack();
        self.cli
            .stack_select_or_create(&qualified_name, &workdir)
            .await
            .map_err(|e| Error::StackResolve(e.to_string()))?;

        Ok(StackHandle {
            project: params.project.clone(),
            stack: params.stack.clone(),
            qualified_name,
            workdir: Some(workdir),
        })
    }

    async fn install_plugin(&self, _stack: &StackHandle, plugin: &PluginRef) -> Result<()> {
        self.cli
            .plugin_install(&plugin.name, &plugin.version)
            .await
            .map(|_| ())
            .map_err(|e| Error::PluginInstall {
                plugin: plugin.to_string(),
                reason: e.to_string(),
            })
    }

    async fn set_config(&self, stack: &StackHandle, pair: &ConfigPair) -> Result<()> {
        let dir = Self::workdir(stack)?;
        self.cli
            .config_set(
                &stack.qualified_name,
                dir,
                &pair.key,
                &pair.value.value,
                pair.value.secret,
            )
            .await
            .map_err(|e| Error::ConfigSet {
                key: pair.key.clone(),
                reason: e.to_string(),
            })
    }

    async fn refresh(&self, stack: &StackHandle, events: EventSender) -> Result<ChangeSummary> {
        let dir = Self::workdir(stack)?;
        let transcript = self
            .cli
            .refresh(&stack.qualified_name, dir, events)
            .await
            .map_err(|e| Error::Refresh(e.to_string()))?;
        Ok(parse_change_summary(&transcript))
    }

    async fn up(&self, stack: &StackHandle, events: EventSender) -> Result<UpResult> {
        let dir = Self::workdir(stack)?;
        let transcript = self
            .cli
            .up(&stack.qualified_name, dir, events)
            .await
            .map_err(|e| Error::Up(e.to_string()))?;
        let outputs = self
            .cli
            .stack_outputs(&stack.qualified_name, dir)
            .await
            .map_err(|e| Error::Up(e.to_string()))?;

        Ok(UpResult {
            summary: parse_change_summary(&transcript),
            outputs,
        })
    }

    async fn destroy(&self, stack: &StackHandle, events: EventSender) -> Result<ChangeSummary> {
        let dir = Self::workdir(stack)?;
        let transcript = self
            .cli
            .destroy(&stack.qualified_name, dir, events)
            .await
            .map_err(|e| Error::Destroy(e.to_string()))?;
        Ok(parse_change_summary(&transcript))
    }

    async fn outputs(&self, stack: &StackHandle) -> Result<HashMap<String, Value>> {
        let dir = Self::workdir(stack)?;
        self.cli
            .stack_outputs(&stack.qualified_name, dir)
            .await
            .map_err(|e| Error::Internal(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    struct NoopProgram;

    #[async_trait]
    impl ark_core::program::Program for NoopProgram {
        async fn define(&self, _ctx: &mut ark_core::program::ResourceContext) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_inline_sources_are_rejected() {
        let backend = CliBackend::new();
        let params = RunParams::new("p", "dev", ProgramSource::Inline(Arc::new(NoopProgram)));

        let result = backend.upsert_stack(&params, None).await;
        assert!(matches!(result, Err(Error::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_missing_local_directory_fails_resolution() {
        let backend = CliBackend::new();
        let params = RunParams::new(
            "p",
            "dev",
            ProgramSource::Local("/definitely/not/here".into()),
        );

        let result = backend.upsert_stack(&params, None).await;
        assert!(matches!(result, Err(Error::StackResolve(_))));
    }
}
