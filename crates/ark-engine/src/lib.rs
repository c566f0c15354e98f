//! Stack engine implementations for Ark.
//!
//! Two engines sit behind the `StackBackend` seam:
//! - [`CliBackend`] drives the `pulumi` binary for program sources
//!   that live on the filesystem (local directories and cloned git
//!   repositories).
//! - [`InProcessBackend`] evaluates inline Rust programs against a
//!   pluggable [`ark_core::provider::ResourceProvider`].
//!
//! [`SimProvider`] is a deterministic provider for development runs
//! and tests.

pub mod cli_backend;
pub mod fetcher;
pub mod inproc;
pub mod project;
pub mod pulumi;
pub mod sim;

pub use cli_backend::CliBackend;
pub use fetcher::SourceFetcher;
pub use inproc::InProcessBackend;
pub use project::ProjectSettings;
pub use pulumi::PulumiCli;
pub use sim::SimProvider;
