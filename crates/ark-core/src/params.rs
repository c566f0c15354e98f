//! Run parameters: the immutable bundle describing one stack run.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use url::Url;

use crate::program::Program;

/// A provider plugin pinned to a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Display)]
#[display("{name}@{version}")]
pub struct PluginRef {
    pub name: String,
    pub version: String,
}

impl PluginRef {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

/// A configuration value, optionally marked secret so engines can
/// store it encrypted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigValue {
    pub value: String,
    pub secret: bool,
}

impl ConfigValue {
    pub fn plain(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            secret: false,
        }
    }

    pub fn secret(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            secret: true,
        }
    }
}

/// One configuration entry applied to the stack before execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigPair {
    pub key: String,
    pub value: ConfigValue,
}

impl ConfigPair {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: ConfigValue::plain(value),
        }
    }
}

/// A program hosted in a git repository, resolved to a local
/// directory at run time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSource {
    pub url: Url,
    /// Directory of the program within the repository.
    pub sub_path: Option<PathBuf>,
    pub branch: Option<String>,
}

impl RemoteSource {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            sub_path: None,
            branch: None,
        }
    }
}

/// Where the declarative program comes from.
#[derive(Clone)]
pub enum ProgramSource {
    /// An in-process program definition.
    Inline(Arc<dyn Program>),
    /// A project directory on the local filesystem.
    Local(PathBuf),
    /// A git repository cloned at run time.
    Remote(RemoteSource),
}

impl std::fmt::Debug for ProgramSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProgramSource::Inline(_) => write!(f, "Inline"),
            ProgramSource::Local(path) => write!(f, "Local({})", path.display()),
            ProgramSource::Remote(remote) => write!(f, "Remote({})", remote.url),
        }
    }
}

/// Whether a run provisions or tears down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    Up,
    Destroy,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Up => write!(f, "up"),
            RunMode::Destroy => write!(f, "destroy"),
        }
    }
}

/// Parameters for a single stack run. Constructed once per
/// invocation and not mutated afterwards.
#[derive(Debug, Clone)]
pub struct RunParams {
    /// Organization that owns the stack, if any.
    pub org: Option<String>,
    pub project: String,
    pub stack: String,
    /// False to create/update the stack, true to tear it down.
    pub destroy: bool,
    /// Provider plugins the program requires, installed in order.
    pub plugins: Vec<PluginRef>,
    /// Configuration applied in order before execution.
    pub config: Vec<ConfigPair>,
    pub source: ProgramSource,
}

impl RunParams {
    pub fn new(
        project: impl Into<String>,
        stack: impl Into<String>,
        source: ProgramSource,
    ) -> Self {
        Self {
            org: None,
            project: project.into(),
            stack: stack.into(),
            destroy: false,
            plugins: Vec::new(),
            config: Vec::new(),
            source,
        }
    }

    pub fn with_org(mut self, org: impl Into<String>) -> Self {
        self.org = Some(org.into());
        self
    }

    pub fn with_destroy(mut self, destroy: bool) -> Self {
        self.destroy = destroy;
        self
    }

    pub fn with_plugin(mut self, plugin: PluginRef) -> Self {
        self.plugins.push(plugin);
        self
    }

    pub fn with_config(mut self, pair: ConfigPair) -> Self {
        self.config.push(pair);
        self
    }

    pub fn mode(&self) -> RunMode {
        if self.destroy {
            RunMode::Destroy
        } else {
            RunMode::Up
        }
    }

    /// `org/project/stack` when an organization is set, the bare
    /// stack name otherwise.
    pub fn fully_qualified_stack(&self) -> String {
        match &self.org {
            Some(org) => format!("{}/{}/{}", org, self.project, self.stack),
            None => self.stack.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plugin_display() {
        let plugin = PluginRef::new("azure-native", "v1.64.1");
        assert_eq!(plugin.to_string(), "azure-native@v1.64.1");
    }

    #[test]
    fn test_qualified_stack_name_with_org() {
        let params = RunParams::new("helloazure", "dev", ProgramSource::Local("proj".into()))
            .with_org("acme");
        assert_eq!(params.fully_qualified_stack(), "acme/helloazure/dev");
    }

    #[test]
    fn test_qualified_stack_name_without_org() {
        let params = RunParams::new("helloazure", "dev", ProgramSource::Local("proj".into()));
        assert_eq!(params.fully_qualified_stack(), "dev");
    }

    #[test]
    fn test_mode_follows_destroy_flag() {
        let params = RunParams::new("p", "s", ProgramSource::Local("d".into()));
        assert_eq!(params.mode(), RunMode::Up);
        assert_eq!(params.with_destroy(true).mode(), RunMode::Destroy);
    }
}
