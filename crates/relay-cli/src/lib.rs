//! Command-line flags for the relay bridge.
//!
//! [`Cli`] carries every flag with a `RELAY_*` environment fallback;
//! [`Cli::validate`] rejects inconsistent settings before the builders in
//! [`cli_config`] turn them into library configs.

pub mod cli_args;
pub mod cli_config;

pub use cli_args::Cli;
pub use cli_config::{
    parse_member_entry, parse_project_entry, ClassifierSettings, ExecutorSettings,
};
