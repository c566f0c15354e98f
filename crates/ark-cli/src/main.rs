//! Ark CLI: create, refresh, update, or destroy a Pulumi stack.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

use ark_core::backend::StackBackend;
use ark_core::params::{ConfigPair, PluginRef, ProgramSource, RemoteSource, RunParams};
use ark_core::sink::ProgressSinks;
use ark_engine::{CliBackend, InProcessBackend, SimProvider};
use ark_runner::Runner;

mod sample;

#[derive(Parser)]
#[command(name = "ark")]
#[command(about = "Drive a Pulumi stack run", long_about = None)]
struct Cli {
    /// Run mode: pass "destroy" (any case) to tear the stack down;
    /// anything else updates it.
    mode: Option<String>,

    /// Organization that owns the stack
    #[arg(long, env = "ARK_ORG")]
    org: Option<String>,

    /// Project name
    #[arg(long, env = "ARK_PROJECT", default_value = "helloazure")]
    project: String,

    /// Stack name
    #[arg(long, env = "ARK_STACK", default_value = "dev")]
    stack: String,

    /// Region applied as azure-native:location
    #[arg(long, default_value = "EastAsia")]
    region: String,

    /// Provider plugin to install, as name@version (repeatable)
    #[arg(long = "plugin", value_parser = parse_plugin, default_value = "azure-native@v1.64.1")]
    plugins: Vec<PluginRef>,

    /// Git URL of a program to deploy instead of the built-in sample
    #[arg(long)]
    source: Option<Url>,

    /// Directory of the program within the cloned repository
    #[arg(long, requires = "source")]
    source_path: Option<PathBuf>,

    /// Branch to clone
    #[arg(long, requires = "source")]
    branch: Option<String>,

    /// Local program directory to deploy instead of the built-in sample
    #[arg(long, conflicts_with = "source")]
    dir: Option<PathBuf>,

    /// File receiving a copy of all progress output
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn parse_plugin(s: &str) -> std::result::Result<PluginRef, String> {
    match s.split_once('@') {
        Some((name, version)) if !name.is_empty() && !version.is_empty() => {
            Ok(PluginRef::new(name, version))
        }
        _ => Err(format!("expected name@version, got {s:?}")),
    }
}

/// The literal token "destroy", in any case, selects teardown.
fn is_destroy(mode: Option<&str>) -> bool {
    mode.is_some_and(|m| m.eq_ignore_ascii_case("destroy"))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let destroy = is_destroy(cli.mode.as_deref());

    let source = if let Some(url) = cli.source {
        ProgramSource::Remote(RemoteSource {
            url,
            sub_path: cli.source_path,
            branch: cli.branch,
        })
    } else if let Some(dir) = cli.dir {
        ProgramSource::Local(dir)
    } else {
        ProgramSource::Inline(Arc::new(sample::StorageAccountProgram))
    };

    // Filesystem sources run on the real pulumi CLI; the inline
    // sample runs on the in-process engine with the simulated
    // provider.
    let backend: Arc<dyn StackBackend> = match &source {
        ProgramSource::Inline(_) => Arc::new(InProcessBackend::new(Arc::new(SimProvider::new()))),
        _ => Arc::new(CliBackend::new()),
    };

    let mut params = RunParams::new(&cli.project, &cli.stack, source)
        .with_destroy(destroy)
        .with_config(ConfigPair::new("azure-native:location", &cli.region));
    if let Some(org) = cli.org {
        params = params.with_org(org);
    }
    for plugin in cli.plugins {
        params = params.with_plugin(plugin);
    }

    let mut sinks = ProgressSinks::console();
    if let Some(path) = &cli.log_file {
        let file = std::fs::File::create(path)?;
        sinks = sinks.with_secondary(Box::new(file));
    }

    let runner = Runner::new(backend);
    let outcome = runner.run(&params, sinks).await?;

    info!(
        mode = %outcome.mode,
        created = outcome.summary.created,
        deleted = outcome.summary.deleted,
        "run finished"
    );

    let mut names: Vec<&String> = outcome.outputs.keys().collect();
    names.sort();
    for name in names {
        println!("{name}: {}", outcome.outputs[name]);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destroy_token_is_case_insensitive() {
        for token in ["destroy", "Destroy", "DESTROY", "dEsTrOy"] {
            assert!(is_destroy(Some(token)));
        }
    }

    #[test]
    fn test_other_tokens_select_apply_mode() {
        assert!(!is_destroy(Some("up")));
        assert!(!is_destroy(Some("")));
        assert!(!is_destroy(None));
    }

    #[test]
    fn test_plugin_argument_parsing() {
        let plugin = parse_plugin("azure-native@v1.64.1").unwrap();
        assert_eq!(plugin, PluginRef::new("azure-native", "v1.64.1"));

        assert!(parse_plugin("azure-native").is_err());
        assert!(parse_plugin("@v1.0.0").is_err());
        assert!(parse_plugin("azure-native@").is_err());
    }

    #[test]
    fn test_cli_parses_defaults() {
        let cli = Cli::parse_from(["ark"]);
        assert!(cli.mode.is_none());
        assert_eq!(cli.project, "helloazure");
        assert_eq!(cli.stack, "dev");
        assert_eq!(cli.region, "EastAsia");
        assert_eq!(cli.plugins, vec![PluginRef::new("azure-native", "v1.64.1")]);
    }

    #[test]
    fn test_cli_accepts_positional_mode() {
        let cli = Cli::parse_from(["ark", "destroy"]);
        assert!(is_destroy(cli.mode.as_deref()));
    }
}
