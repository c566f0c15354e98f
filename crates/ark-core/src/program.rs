//! Inline program model and its deployment evaluation.
//!
//! A [`Program`] declares resources against a [`ResourceContext`].
//! Registration returns immediately; the provider call runs
//! concurrently and the returned handle's outputs resolve when the
//! provider reports back. Derived values (an access key that needs
//! two physical names, say) are expressed with [`Output::apply`] and
//! published through [`ResourceContext::export`].

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::backend::EventSender;
use crate::output::Output;
use crate::provider::{RegisterRequest, ResourceProvider, ResourceState};
use crate::{Error, Result};

/// An in-process declarative infrastructure definition.
#[async_trait]
pub trait Program: Send + Sync {
    /// Declare resources and exports.
    async fn define(&self, ctx: &mut ResourceContext) -> Result<()>;
}

/// A resource input: either a literal or a value still resolving.
#[derive(Clone)]
pub enum Input {
    Literal(Value),
    Deferred(Output<Value>),
}

impl Input {
    async fn resolve(self) -> Result<Value> {
        match self {
            Input::Literal(value) => Ok(value),
            Input::Deferred(output) => output.get().await,
        }
    }
}

impl From<Value> for Input {
    fn from(value: Value) -> Self {
        Input::Literal(value)
    }
}

impl From<&str> for Input {
    fn from(value: &str) -> Self {
        Input::Literal(Value::String(value.to_string()))
    }
}

impl From<String> for Input {
    fn from(value: String) -> Self {
        Input::Literal(Value::String(value))
    }
}

impl From<Output<Value>> for Input {
    fn from(output: Output<Value>) -> Self {
        Input::Deferred(output)
    }
}

impl From<&Output<Value>> for Input {
    fn from(output: &Output<Value>) -> Self {
        Input::Deferred(output.clone())
    }
}

impl From<&Output<String>> for Input {
    fn from(output: &Output<String>) -> Self {
        Input::Deferred(output.map(Value::String))
    }
}

/// Named inputs for one resource registration.
#[derive(Default, Clone)]
pub struct ResourceInputs(HashMap<String, Input>);

impl ResourceInputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, input: impl Into<Input>) -> Self {
        self.0.insert(key.into(), input.into());
        self
    }
}

/// Handle to a registered resource. Outputs resolve once the
/// provider reports the created state.
#[derive(Clone)]
pub struct ResourceHandle {
    pub urn: Output<String>,
    /// Physical resource id.
    pub id: Output<String>,
    /// Physical, provider-assigned name.
    pub name: Output<String>,
    state: Output<ResourceState>,
}

impl ResourceHandle {
    fn new(state: Output<ResourceState>) -> Self {
        Self {
            urn: state.map(|s| s.urn),
            id: state.map(|s| s.id),
            name: state.map(|s| s.name),
            state,
        }
    }

    /// A named output property of the resource.
    pub fn output(&self, key: &str) -> Output<Value> {
        let key = key.to_string();
        self.state.apply(move |state| async move {
            state
                .outputs
                .get(&key)
                .cloned()
                .ok_or_else(|| Error::Program(format!("resource output {key} is not set")))
        })
    }
}

/// Cheap handle for provider function calls from continuations.
#[derive(Clone)]
pub struct Invoker {
    provider: Arc<dyn ResourceProvider>,
}

impl Invoker {
    /// Call a provider function.
    pub async fn invoke(&self, token: &str, args: Value) -> Result<Value> {
        self.provider.invoke(token, args).await
    }
}

/// Registration surface handed to [`Program::define`].
pub struct ResourceContext {
    provider: Arc<dyn ResourceProvider>,
    stack: String,
    tasks: Vec<JoinHandle<Result<ResourceState>>>,
    exports: Vec<(String, Output<Value>)>,
}

impl ResourceContext {
    pub fn new(provider: Arc<dyn ResourceProvider>, stack: impl Into<String>) -> Self {
        Self {
            provider,
            stack: stack.into(),
            tasks: Vec::new(),
            exports: Vec::new(),
        }
    }

    /// Fully qualified name of the stack being deployed.
    pub fn stack(&self) -> &str {
        &self.stack
    }

    /// Register a resource. The provider create call is spawned and
    /// the handle's outputs resolve when it completes.
    pub fn register(&mut self, token: &str, name: &str, inputs: ResourceInputs) -> ResourceHandle {
        debug!(token, name, "registering resource");
        let provider = self.provider.clone();
        let request = RegisterRequest {
            token: token.to_string(),
            name: name.to_string(),
            stack: self.stack.clone(),
            inputs: HashMap::new(),
        };
        let (resolver, state) = Output::<ResourceState>::pending();

        let task = tokio::spawn(async move {
            let mut request = request;
            for (key, input) in inputs.0 {
                request.inputs.insert(key, input.resolve().await?);
            }
            match provider.create(request).await {
                Ok(state) => {
                    resolver.resolve(state.clone());
                    Ok(state)
                }
                Err(e) => {
                    resolver.fail(e.clone());
                    Err(e)
                }
            }
        });
        self.tasks.push(task);
        ResourceHandle::new(state)
    }

    /// Call a provider function.
    pub async fn invoke(&self, token: &str, args: Value) -> Result<Value> {
        self.provider.invoke(token, args).await
    }

    /// A clone-able invoke handle for use inside continuations.
    pub fn invoker(&self) -> Invoker {
        Invoker {
            provider: self.provider.clone(),
        }
    }

    /// Publish a named stack output.
    pub fn export(&mut self, name: impl Into<String>, value: Output<Value>) {
        self.exports.push((name.into(), value));
    }
}

/// Result of evaluating a program against a provider.
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    /// Created resources, in registration order.
    pub resources: Vec<ResourceState>,
    pub outputs: HashMap<String, Value>,
}

/// Evaluates inline programs.
pub struct Deployment;

impl Deployment {
    /// Run `program` against `provider` for the named stack.
    ///
    /// Awaits every registered resource in registration order (the
    /// first failure aborts) and then every exported output, so a
    /// failing continuation fails the evaluation.
    pub async fn evaluate(
        program: &dyn Program,
        provider: Arc<dyn ResourceProvider>,
        stack: &str,
        events: EventSender,
    ) -> Result<Evaluation> {
        let mut ctx = ResourceContext::new(provider, stack);
        program.define(&mut ctx).await?;
        let ResourceContext { tasks, exports, .. } = ctx;

        let mut resources = Vec::with_capacity(tasks.len());
        for task in tasks {
            let state = task
                .await
                .map_err(|e| Error::Internal(format!("resource task failed: {e}")))??;
            if let Some(tx) = &events {
                let _ = tx
                    .send(format!("+  created {} ({})", state.name, state.token))
                    .await;
            }
            resources.push(state);
        }

        let mut outputs = HashMap::with_capacity(exports.len());
        for (name, output) in exports {
            let value = output.get().await?;
            if let Some(tx) = &events {
                let _ = tx.send(format!("   exported {name}")).await;
            }
            outputs.insert(name, value);
        }

        Ok(Evaluation { resources, outputs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Mutex;

    /// Provider that derives physical names from logical names and
    /// records every create.
    struct EchoProvider {
        created: Mutex<Vec<String>>,
        fail_on: Option<String>,
    }

    impl EchoProvider {
        fn new() -> Self {
            Self {
                created: Mutex::new(Vec::new()),
                fail_on: None,
            }
        }

        fn failing_on(name: &str) -> Self {
            Self {
                created: Mutex::new(Vec::new()),
                fail_on: Some(name.to_string()),
            }
        }
    }

    #[async_trait]
    impl ResourceProvider for EchoProvider {
        fn name(&self) -> &'static str {
            "echo"
        }

        async fn create(&self, request: RegisterRequest) -> Result<ResourceState> {
            if self.fail_on.as_deref() == Some(request.name.as_str()) {
                return Err(Error::Provider(format!("cannot create {}", request.name)));
            }
            self.created.lock().unwrap().push(request.name.clone());
            Ok(ResourceState {
                urn: format!("urn:{}::{}::{}", request.stack, request.token, request.name),
                id: format!("/echo/{}", request.name),
                token: request.token,
                name: format!("{}-phys", request.name),
                outputs: request.inputs,
            })
        }

        async fn read(&self, state: &ResourceState) -> Result<Option<ResourceState>> {
            Ok(Some(state.clone()))
        }

        async fn delete(&self, _state: &ResourceState) -> Result<()> {
            Ok(())
        }

        async fn invoke(&self, token: &str, args: Value) -> Result<Value> {
            Ok(json!({ "token": token, "args": args }))
        }
    }

    struct TwoResourceProgram;

    #[async_trait]
    impl Program for TwoResourceProgram {
        async fn define(&self, ctx: &mut ResourceContext) -> Result<()> {
            let group = ctx.register("test:group", "rg", ResourceInputs::new());
            let account = ctx.register(
                "test:account",
                "sa",
                ResourceInputs::new().with("groupName", &group.name),
            );
            ctx.export("accountName", account.name.map(Value::String));
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_evaluate_collects_resources_in_order() {
        let provider = Arc::new(EchoProvider::new());
        let eval = Deployment::evaluate(&TwoResourceProgram, provider.clone(), "dev", None)
            .await
            .unwrap();

        assert_eq!(eval.resources.len(), 2);
        assert_eq!(eval.resources[0].name, "rg-phys");
        assert_eq!(eval.resources[1].name, "sa-phys");
        // The account's deferred input forces creation to follow the
        // group's.
        assert_eq!(*provider.created.lock().unwrap(), vec!["rg", "sa"]);
    }

    #[tokio::test]
    async fn test_deferred_input_receives_upstream_physical_name() {
        let provider = Arc::new(EchoProvider::new());
        let eval = Deployment::evaluate(&TwoResourceProgram, provider, "dev", None)
            .await
            .unwrap();

        assert_eq!(eval.resources[1].outputs["groupName"], json!("rg-phys"));
    }

    #[tokio::test]
    async fn test_exports_are_published() {
        let provider = Arc::new(EchoProvider::new());
        let eval = Deployment::evaluate(&TwoResourceProgram, provider, "dev", None)
            .await
            .unwrap();

        assert_eq!(eval.outputs["accountName"], json!("sa-phys"));
    }

    #[tokio::test]
    async fn test_create_failure_fails_evaluation() {
        let provider = Arc::new(EchoProvider::failing_on("sa"));
        let result = Deployment::evaluate(&TwoResourceProgram, provider, "dev", None).await;
        assert!(result.is_err());
    }

    struct FailingContinuationProgram;

    #[async_trait]
    impl Program for FailingContinuationProgram {
        async fn define(&self, ctx: &mut ResourceContext) -> Result<()> {
            let group = ctx.register("test:group", "rg", ResourceInputs::new());
            let derived = group
                .name
                .apply(|_| async move { Err::<Value, _>(Error::Program("lookup failed".into())) });
            ctx.export("derived", derived);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_failing_continuation_fails_evaluation() {
        let provider = Arc::new(EchoProvider::new());
        let result = Deployment::evaluate(&FailingContinuationProgram, provider, "dev", None).await;
        assert!(matches!(result, Err(Error::Program(_))));
    }

    struct InvokeProgram;

    #[async_trait]
    impl Program for InvokeProgram {
        async fn define(&self, ctx: &mut ResourceContext) -> Result<()> {
            let group = ctx.register("test:group", "rg", ResourceInputs::new());
            let invoker = ctx.invoker();
            let derived = group.name.apply(move |name| async move {
                invoker.invoke("test:listKeys", json!({ "name": name })).await
            });
            ctx.export("keys", derived);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_continuation_can_invoke_provider_functions() {
        let provider = Arc::new(EchoProvider::new());
        let eval = Deployment::evaluate(&InvokeProgram, provider, "dev", None)
            .await
            .unwrap();

        assert_eq!(eval.outputs["keys"]["token"], json!("test:listKeys"));
        assert_eq!(eval.outputs["keys"]["args"]["name"], json!("rg-phys"));
    }

    #[tokio::test]
    async fn test_progress_events_are_streamed() {
        let provider = Arc::new(EchoProvider::new());
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        Deployment::evaluate(&TwoResourceProgram, provider, "dev", Some(tx))
            .await
            .unwrap();

        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        assert!(lines.iter().any(|l| l.contains("created rg-phys")));
        assert!(lines.iter().any(|l| l.contains("exported accountName")));
    }
}
