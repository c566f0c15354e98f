//! Built-in sample program: an Azure resource group holding a
//! storage account, exporting the account's primary access key.

use async_trait::async_trait;
use serde_json::{Value, json};

use ark_core::Result;
use ark_core::error::Error;
use ark_core::output::Output;
use ark_core::program::{Program, ResourceContext, ResourceInputs};

const RESOURCE_GROUP: &str = "azure-native:resources:ResourceGroup";
const STORAGE_ACCOUNT: &str = "azure-native:storage:StorageAccount";
const LIST_STORAGE_ACCOUNT_KEYS: &str = "azure-native:storage:listStorageAccountKeys";

pub struct StorageAccountProgram;

#[async_trait]
impl Program for StorageAccountProgram {
    async fn define(&self, ctx: &mut ResourceContext) -> Result<()> {
        let group = ctx.register(RESOURCE_GROUP, "resourceGroup", ResourceInputs::new());

        let account = ctx.register(
            STORAGE_ACCOUNT,
            "sa",
            ResourceInputs::new()
                .with("resourceGroupName", &group.name)
                .with("accessTier", "Hot")
                .with("sku", json!({ "name": "Standard_LRS" }))
                .with("kind", "StorageV2"),
        );

        // The key listing needs both physical names, so it runs as a
        // continuation once they have resolved.
        let invoker = ctx.invoker();
        let primary_key =
            Output::all(vec![group.name.clone(), account.name.clone()]).apply(move |names| {
                async move {
                    let (group_name, account_name) = (names[0].clone(), names[1].clone());
                    let listing = invoker
                        .invoke(
                            LIST_STORAGE_ACCOUNT_KEYS,
                            json!({
                                "resourceGroupName": group_name,
                                "accountName": account_name,
                            }),
                        )
                        .await?;
                    let key = listing["keys"][0]["value"].as_str().ok_or_else(|| {
                        Error::Program("storage key listing returned no keys".to_string())
                    })?;
                    Ok(Value::String(key.to_string()))
                }
            });
        ctx.export("primaryStorageKey", primary_key);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use ark_core::params::{ConfigPair, PluginRef, ProgramSource, RunMode, RunParams};
    use ark_core::sink::ProgressSinks;
    use ark_engine::{InProcessBackend, SimProvider};
    use ark_runner::Runner;

    fn sample_params() -> RunParams {
        RunParams::new(
            "helloazure",
            "dev",
            ProgramSource::Inline(Arc::new(StorageAccountProgram)),
        )
        .with_plugin(PluginRef::new("azure-native", "v1.64.1"))
        .with_config(ConfigPair::new("azure-native:location", "EastAsia"))
    }

    #[tokio::test]
    async fn test_apply_run_exports_primary_storage_key() {
        let backend = Arc::new(InProcessBackend::new(Arc::new(SimProvider::new())));
        let runner = Runner::new(backend.clone());

        let outcome = runner
            .run(&sample_params(), ProgressSinks::quiet())
            .await
            .unwrap();

        assert_eq!(outcome.mode, RunMode::Up);
        assert_eq!(outcome.summary.created, 2);
        let key = outcome.outputs["primaryStorageKey"].as_str().unwrap();
        assert!(key.starts_with("sim-sa"));
        assert!(key.ends_with("-key1"));
    }

    #[tokio::test]
    async fn test_destroy_run_removes_all_managed_resources() {
        let provider = Arc::new(SimProvider::new());
        let backend = Arc::new(InProcessBackend::new(provider.clone()));
        let runner = Runner::new(backend.clone());

        runner
            .run(&sample_params(), ProgressSinks::quiet())
            .await
            .unwrap();
        assert_eq!(provider.resource_count().await, 2);

        let outcome = runner
            .run(&sample_params().with_destroy(true), ProgressSinks::quiet())
            .await
            .unwrap();

        assert_eq!(outcome.mode, RunMode::Destroy);
        assert_eq!(outcome.summary.deleted, 2);
        assert_eq!(provider.resource_count().await, 0);
    }
}
