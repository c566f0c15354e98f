//! The orchestration sequence for one stack run.

use chrono::Utc;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use ark_core::Result;
use ark_core::backend::{RunOutcome, StackBackend};
use ark_core::params::{RunMode, RunParams};
use ark_core::sink::ProgressSinks;

/// Drives a full run against a stack engine.
///
/// Every operation is strictly sequential: create/select → plugins →
/// config → refresh → up|destroy. Errors are returned to the caller;
/// the runner never retries and never exits the process.
pub struct Runner {
    backend: Arc<dyn StackBackend>,
}

impl Runner {
    pub fn new(backend: Arc<dyn StackBackend>) -> Self {
        Self { backend }
    }

    /// Execute one run. The secondary progress sink is closed exactly
    /// once, whether the run succeeds or fails at any stage.
    pub async fn run(&self, params: &RunParams, mut sinks: ProgressSinks) -> Result<RunOutcome> {
        let result = self.run_inner(params, &mut sinks).await;
        if sinks.close() {
            debug!("closed secondary progress sink");
        }
        result
    }

    async fn run_inner(
        &self,
        params: &RunParams,
        sinks: &mut ProgressSinks,
    ) -> Result<RunOutcome> {
        let started_at = Utc::now();
        let mode = params.mode();
        info!(
            engine = self.backend.name(),
            stack = %params.fully_qualified_stack(),
            %mode,
            "starting stack run"
        );

        let (tx, rx) = mpsc::channel(64);
        let stack = forward_events(self.backend.upsert_stack(params, Some(tx)), rx, sinks).await?;
        sinks.write_line(&format!("created/selected stack {}", stack.qualified_name));

        for plugin in &params.plugins {
            info!(plugin = %plugin, "installing plugin");
            sinks.write_line(&format!("installing plugin {plugin}"));
            self.backend.install_plugin(&stack, plugin).await?;
        }

        // Fail-fast: the first bad key aborts the remaining entries.
        for pair in &params.config {
            debug!(key = %pair.key, "setting config");
            self.backend.set_config(&stack, pair).await?;
        }
        if !params.config.is_empty() {
            sinks.write_line("configuration applied");
        }

        sinks.write_line("refreshing stack");
        let (tx, rx) = mpsc::channel(64);
        let refresh = forward_events(self.backend.refresh(&stack, Some(tx)), rx, sinks).await?;
        info!(
            unchanged = refresh.unchanged,
            updated = refresh.updated,
            deleted = refresh.deleted,
            "refresh succeeded"
        );
        sinks.write_line("refresh succeeded");

        let (summary, outputs) = match mode {
            RunMode::Destroy => {
                sinks.write_line("destroying stack");
                let (tx, rx) = mpsc::channel(64);
                let summary =
                    forward_events(self.backend.destroy(&stack, Some(tx)), rx, sinks).await?;
                sinks.write_line("destroy succeeded");
                (summary, HashMap::new())
            }
            RunMode::Up => {
                sinks.write_line("updating stack");
                let (tx, rx) = mpsc::channel(64);
                let result = forward_events(self.backend.up(&stack, Some(tx)), rx, sinks).await?;
                sinks.write_line("update succeeded");
                (result.summary, result.outputs)
            }
        };

        info!(
            created = summary.created,
            deleted = summary.deleted,
            "stack run finished"
        );
        Ok(RunOutcome {
            mode,
            summary,
            outputs,
            started_at,
            finished_at: Utc::now(),
        })
    }
}

/// Await `op` while copying progress lines from `rx` to the sinks as
/// they arrive. Lines still buffered when the operation completes are
/// drained before returning.
async fn forward_events<T, F>(
    op: F,
    mut rx: mpsc::Receiver<String>,
    sinks: &mut ProgressSinks,
) -> T
where
    F: Future<Output = T>,
{
    tokio::pin!(op);
    let mut open = true;
    loop {
        tokio::select! {
            result = &mut op => {
                while let Ok(line) = rx.try_recv() {
                    sinks.write_line(&line);
                }
                return result;
            }
            line = rx.recv(), if open => match line {
                Some(line) => sinks.write_line(&line),
                None => open = false,
            }
        }
    }
}
