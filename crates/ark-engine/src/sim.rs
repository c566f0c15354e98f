//! Simulated resource provider for development runs and tests.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use ark_core::provider::{RegisterRequest, ResourceProvider, ResourceState};
use ark_core::{Error, Result};

/// Deterministic in-memory provider: no cloud calls, physical names
/// derived from logical names, storage key listings served from the
/// account name. Useful for dry-running programs and for tests.
pub struct SimProvider {
    resources: Mutex<HashMap<String, ResourceState>>,
}

impl Default for SimProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl SimProvider {
    pub fn new() -> Self {
        Self {
            resources: Mutex::new(HashMap::new()),
        }
    }

    /// Number of resources the provider currently holds.
    pub async fn resource_count(&self) -> usize {
        self.resources.lock().await.len()
    }

    fn physical_name(logical: &str) -> String {
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}{}", logical, &suffix[..8])
    }
}

#[async_trait]
impl ResourceProvider for SimProvider {
    fn name(&self) -> &'static str {
        "sim"
    }

    async fn create(&self, request: RegisterRequest) -> Result<ResourceState> {
        let physical = Self::physical_name(&request.name);
        let mut outputs = request.inputs.clone();
        outputs.insert("name".to_string(), Value::String(physical.clone()));

        let state = ResourceState {
            urn: format!(
                "urn:ark:{}::{}::{}",
                request.stack, request.token, request.name
            ),
            id: format!("/sim/{}/{}", request.token, physical),
            token: request.token,
            name: physical,
            outputs,
        };

        self.resources
            .lock()
            .await
            .insert(state.urn.clone(), state.clone());
        Ok(state)
    }

    async fn read(&self, state: &ResourceState) -> Result<Option<ResourceState>> {
        Ok(self.resources.lock().await.get(&state.urn).cloned())
    }

    async fn delete(&self, state: &ResourceState) -> Result<()> {
        self.resources.lock().await.remove(&state.urn);
        Ok(())
    }

    async fn invoke(&self, token: &str, args: Value) -> Result<Value> {
        // The one function the simulation understands is the storage
        // key listing used by the sample program.
        if token.ends_with("listStorageAccountKeys") {
            let account = args
                .get("accountName")
                .and_then(Value::as_str)
                .unwrap_or("account");
            return Ok(json!({
                "keys": [
                    { "keyName": "key1", "value": format!("sim-{account}-key1") },
                    { "keyName": "key2", "value": format!("sim-{account}-key2") },
                ]
            }));
        }

        Err(Error::Provider(format!("unknown function {token}")))
    }
}
