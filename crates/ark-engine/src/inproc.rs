//! In-process stack engine for inline programs.
//!
//! Keeps per-stack records (plugins, config, resources, outputs) in
//! memory and evaluates the stack's program against a pluggable
//! [`ResourceProvider`]. Each up re-evaluates the whole program and
//! replaces the record; there is no diffing against previous state.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use ark_core::backend::{ChangeSummary, EventSender, StackBackend, StackHandle, UpResult};
use ark_core::params::{ConfigPair, ConfigValue, PluginRef, ProgramSource, RunParams};
use ark_core::program::{Deployment, Program};
use ark_core::provider::{ResourceProvider, ResourceState};
use ark_core::{Error, Result};

#[derive(Default)]
struct StackRecord {
    program: Option<Arc<dyn Program>>,
    plugins: Vec<PluginRef>,
    config: HashMap<String, ConfigValue>,
    resources: Vec<ResourceState>,
    outputs: HashMap<String, Value>,
}

/// Engine that runs inline programs against a resource provider.
///
/// Stack operations are strictly sequential within a run; the record
/// lock serializes access across runs sharing the engine.
pub struct InProcessBackend {
    provider: Arc<dyn ResourceProvider>,
    stacks: Mutex<HashMap<String, StackRecord>>,
}

impl InProcessBackend {
    pub fn new(provider: Arc<dyn ResourceProvider>) -> Self {
        Self {
            provider,
            stacks: Mutex::new(HashMap::new()),
        }
    }

    /// Plugins recorded for a stack, in install order.
    pub async fn installed_plugins(&self, stack: &StackHandle) -> Result<Vec<PluginRef>> {
        let mut stacks = self.stacks.lock().await;
        Ok(Self::record(&mut stacks, stack)?.plugins.clone())
    }

    /// Number of resources the stack currently manages.
    pub async fn resource_count(&self, stack: &StackHandle) -> Result<usize> {
        let mut stacks = self.stacks.lock().await;
        Ok(Self::record(&mut stacks, stack)?.resources.len())
    }

    fn record<'a>(
        stacks: &'a mut HashMap<String, StackRecord>,
        stack: &StackHandle,
    ) -> Result<&'a mut StackRecord> {
        stacks.get_mut(&stack.qualified_name).ok_or_else(|| {
            Error::StackResolve(format!("stack {} is not initialized", stack.qualified_name))
        })
    }
}

#[async_trait]
impl StackBackend for InProcessBackend {
    fn name(&self) -> &'static str {
        "in-process"
    }

    async fn upsert_stack(&self, params: &RunParams, _events: EventSender) -> Result<StackHandle> {
        let program = match &params.source {
            ProgramSource::Inline(program) => program.clone(),
            _ => {
                return Err(Error::Unsupported(
                    "filesystem sources require the pulumi CLI engine".into(),
                ));
            }
        };

        let qualified_name = params.fully_qualified_stack();
        let mut stacks = self.stacks.lock().await;
        let record = stacks.entry(qualified_name.clone()).or_default();
        record.program = Some(program);

        info!(stack = %qualified_name, "created/selected stack");
        Ok(StackHandle {
            project: params.project.clone(),
            stack: params.stack.clone(),
            qualified_name,
            workdir: None,
        })
    }

    async fn install_plugin(&self, stack: &StackHandle, plugin: &PluginRef) -> Result<()> {
        let mut stacks = self.stacks.lock().await;
        let record = Self::record(&mut stacks, stack)?;
        if !record.plugins.contains(plugin) {
            record.plugins.push(plugin.clone());
        }
        debug!(plugin = %plugin, "plugin recorded");
        Ok(())
    }

    async fn set_config(&self, stack: &StackHandle, pair: &ConfigPair) -> Result<()> {
        let mut stacks = self.stacks.lock().await;
        let record = Self::record(&mut stacks, stack)?;
        record.config.insert(pair.key.clone(), pair.value.clone());
        debug!(key = %pair.key, "config recorded");
        Ok(())
    }

    async fn refresh(&self, stack: &StackHandle, events: EventSender) -> Result<ChangeSummary> {
        let mut stacks = self.stacks.lock().await;
        let record = Self::record(&mut stacks, stack)?;

        let mut summary = ChangeSummary::default();
        let mut refreshed = Vec::with_capacity(record.resources.len());
        for state in &record.resources {
            match self
                .provider
                .read(state)
                .await
                .map_err(|e| Error::Refresh(e.to_string()))?
            {
                Some(live) => {
                    if live == *state {
                        summary.unchanged += 1;
                    } else {
                        summary.updated += 1;
                    }
                    refreshed.push(live);
                }
                None => {
                    summary.deleted += 1;
                    if let Some(tx) = &events {
                        let _ = tx.send(format!("-  dropped {} (gone)", state.name)).await;
                    }
                }
            }
        }
        record.resources = refreshed;

        Ok(summary)
    }

    async fn up(&self, stack: &StackHandle, events: EventSender) -> Result<UpResult> {
        let mut stacks = self.stacks.lock().await;
        let record = Self::record(&mut stacks, stack)?;
        let program = record
            .program
            .clone()
            .ok_or_else(|| Error::Internal("stack record has no program".into()))?;

        let eval = Deployment::evaluate(
            program.as_ref(),
            self.provider.clone(),
            &stack.qualified_name,
            events,
        )
        .await?;

        let summary = ChangeSummary {
            created: eval.resources.len() as u64,
            ..Default::default()
        };
        record.resources = eval.resources;
        record.outputs = eval.outputs.clone();

        Ok(UpResult {
            summary,
            outputs: eval.outputs,
        })
    }

    async fn destroy(&self, stack: &StackHandle, events: EventSender) -> Result<ChangeSummary> {
        let mut stacks = self.stacks.lock().await;
        let record = Self::record(&mut stacks, stack)?;

        let mut summary = ChangeSummary::default();
        // Reverse creation order; resources deleted before a failure
        // stay deleted.
        while let Some(state) = record.resources.pop() {
            if let Err(e) = self.provider.delete(&state).await {
                record.resources.push(state);
                return Err(Error::Destroy(e.to_string()));
            }
            summary.deleted += 1;
            if let Some(tx) = &events {
                let _ = tx.send(format!("-  deleted {} ({})", state.name, state.token)).await;
            }
        }
        record.outputs.clear();

        Ok(summary)
    }

    async fn outputs(&self, stack: &StackHandle) -> Result<HashMap<String, Value>> {
        let mut stacks = self.stacks.lock().await;
        Ok(Self::record(&mut stacks, stack)?.outputs.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimProvider;
    use ark_core::program::{ResourceContext, ResourceInputs};

    struct GroupAndAccount;

    #[async_trait]
    impl Program for GroupAndAccount {
        async fn define(&self, ctx: &mut ResourceContext) -> Result<()> {
            let group = ctx.register(
                "azure-native:resources:ResourceGroup",
                "resourceGroup",
                ResourceInputs::new(),
            );
            let account = ctx.register(
                "azure-native:storage:StorageAccount",
                "sa",
                ResourceInputs::new().with("resourceGroupName", &group.name),
            );
            ctx.export("accountName", account.name.map(Value::String));
            Ok(())
        }
    }

    async fn selected_stack(backend: &InProcessBackend) -> StackHandle {
        let params = RunParams::new("helloazure", "dev", ProgramSource::Inline(Arc::new(GroupAndAccount)));
        backend.upsert_stack(&params, None).await.unwrap()
    }

    #[tokio::test]
    async fn test_up_records_resources_and_outputs() {
        let backend = InProcessBackend::new(Arc::new(SimProvider::new()));
        let stack = selected_stack(&backend).await;

        let result = backend.up(&stack, None).await.unwrap();

        assert_eq!(result.summary.created, 2);
        assert!(result.outputs.contains_key("accountName"));
        assert_eq!(backend.resource_count(&stack).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_refresh_reports_unchanged_resources() {
        let backend = InProcessBackend::new(Arc::new(SimProvider::new()));
        let stack = selected_stack(&backend).await;
        backend.up(&stack, None).await.unwrap();

        let summary = backend.refresh(&stack, None).await.unwrap();
        assert_eq!(summary.unchanged, 2);
        assert_eq!(summary.deleted, 0);
    }

    #[tokio::test]
    async fn test_destroy_clears_resources_but_keeps_the_stack() {
        let provider = Arc::new(SimProvider::new());
        let backend = InProcessBackend::new(provider.clone());
        let stack = selected_stack(&backend).await;
        backend.up(&stack, None).await.unwrap();

        let summary = backend.destroy(&stack, None).await.unwrap();

        assert_eq!(summary.deleted, 2);
        assert_eq!(backend.resource_count(&stack).await.unwrap(), 0);
        assert_eq!(provider.resource_count().await, 0);
        // Stack identity survives the teardown.
        assert!(backend.outputs(&stack).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_plugin_install_is_idempotent() {
        let backend = InProcessBackend::new(Arc::new(SimProvider::new()));
        let stack = selected_stack(&backend).await;
        let plugin = PluginRef::new("azure-native", "v1.64.1");

        backend.install_plugin(&stack, &plugin).await.unwrap();
        backend.install_plugin(&stack, &plugin).await.unwrap();

        assert_eq!(backend.installed_plugins(&stack).await.unwrap(), vec![plugin]);
    }

    #[tokio::test]
    async fn test_operations_require_a_selected_stack() {
        let backend = InProcessBackend::new(Arc::new(SimProvider::new()));
        let stack = StackHandle {
            project: "p".into(),
            stack: "ghost".into(),
            qualified_name: "ghost".into(),
            workdir: None,
        };

        let result = backend.up(&stack, None).await;
        assert!(matches!(result, Err(Error::StackResolve(_))));
    }

    #[tokio::test]
    async fn test_config_is_recorded_per_key() {
        let backend = InProcessBackend::new(Arc::new(SimProvider::new()));
        let stack = selected_stack(&backend).await;

        backend
            .set_config(&stack, &ConfigPair::new("azure-native:location", "EastAsia"))
            .await
            .unwrap();
        backend
            .set_config(&stack, &ConfigPair::new("azure-native:location", "WestUS"))
            .await
            .unwrap();

        // Last writer wins; setting a key twice is not an error.
        let up = backend.up(&stack, None).await.unwrap();
        assert_eq!(up.summary.created, 2);
    }
}
