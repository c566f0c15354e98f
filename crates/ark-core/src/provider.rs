//! Resource provider seam for in-process program execution.
//!
//! A provider is the vendor-specific piece that actually creates,
//! reads, and deletes cloud resources and serves provider function
//! calls. Everything above it (program evaluation, stack records,
//! orchestration) is provider-agnostic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::Result;

/// Inputs for creating one resource.
#[derive(Debug, Clone)]
pub struct RegisterRequest {
    /// Provider type token, e.g. `azure-native:resources:ResourceGroup`.
    pub token: String,
    /// Logical resource name within the program.
    pub name: String,
    /// Fully qualified name of the stack the resource belongs to.
    pub stack: String,
    pub inputs: HashMap<String, Value>,
}

/// Recorded state of one managed resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    pub urn: String,
    /// Physical resource id assigned by the provider.
    pub id: String,
    pub token: String,
    /// Physical, provider-assigned name.
    pub name: String,
    pub outputs: HashMap<String, Value>,
}

/// Creates, reads, and deletes resources and serves invokes.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Create a resource and return its recorded state.
    async fn create(&self, request: RegisterRequest) -> Result<ResourceState>;

    /// Read live state; `None` means the resource no longer exists.
    async fn read(&self, state: &ResourceState) -> Result<Option<ResourceState>>;

    /// Delete a resource.
    async fn delete(&self, state: &ResourceState) -> Result<()>;

    /// Call a provider function, e.g. a storage key listing.
    async fn invoke(&self, token: &str, args: Value) -> Result<Value>;
}
