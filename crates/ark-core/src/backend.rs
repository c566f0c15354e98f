//! The engine seam: stack lifecycle operations a run is orchestrated
//! over.
//!
//! Implementations own all persistent stack state. The orchestration
//! layer threads an explicit [`StackHandle`] through every call so
//! tests can substitute a recording fake.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::mpsc;

use crate::Result;
use crate::params::{ConfigPair, PluginRef, RunMode, RunParams};

/// Progress lines are streamed to this channel as they occur, not
/// buffered to completion.
pub type EventSender = Option<mpsc::Sender<String>>;

/// Identity of a created-or-selected stack, threaded through every
/// operation. The handle survives a destroy; only the managed
/// resources are torn down.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackHandle {
    pub project: String,
    pub stack: String,
    /// `org/project/stack` when an organization is set, the bare
    /// stack name otherwise.
    pub qualified_name: String,
    /// Local project directory, for engines that need one.
    pub workdir: Option<PathBuf>,
}

/// Resource counts reported by a refresh, up, or destroy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub created: u64,
    pub updated: u64,
    pub deleted: u64,
    pub unchanged: u64,
}

/// Result of an up operation.
#[derive(Debug, Clone, Default)]
pub struct UpResult {
    pub summary: ChangeSummary,
    /// The stack's exported outputs after the update.
    pub outputs: HashMap<String, Value>,
}

/// Terminal report for a whole run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub mode: RunMode,
    pub summary: ChangeSummary,
    pub outputs: HashMap<String, Value>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Trait for stack engines.
#[async_trait]
pub trait StackBackend: Send + Sync {
    /// Name of this engine.
    fn name(&self) -> &'static str;

    /// Create the stack if it does not exist, select it otherwise.
    /// Remote sources are fetched here; fetch progress goes to
    /// `events`.
    async fn upsert_stack(&self, params: &RunParams, events: EventSender) -> Result<StackHandle>;

    /// Install one provider plugin into the stack's workspace.
    /// Idempotent per (name, version).
    async fn install_plugin(&self, stack: &StackHandle, plugin: &PluginRef) -> Result<()>;

    /// Set one configuration value on the stack.
    async fn set_config(&self, stack: &StackHandle, pair: &ConfigPair) -> Result<()>;

    /// Reconcile recorded resource state with live state.
    async fn refresh(&self, stack: &StackHandle, events: EventSender) -> Result<ChangeSummary>;

    /// Provision or update resources toward the declared state.
    async fn up(&self, stack: &StackHandle, events: EventSender) -> Result<UpResult>;

    /// Tear down every resource the stack currently manages.
    async fn destroy(&self, stack: &StackHandle, events: EventSender) -> Result<ChangeSummary>;

    /// Read the stack's recorded outputs.
    async fn outputs(&self, stack: &StackHandle) -> Result<HashMap<String, Value>>;
}
