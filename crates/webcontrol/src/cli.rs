//! Command-line interface handling for the sandbox host.
//!
//! This module provides command-line argument parsing using the `clap`
//! crate. Every option overrides the matching configuration file setting.

use clap::{Arg, ArgMatches, Command};
use std::path::PathBuf;

const DEFAULT_CONFIG: &str = "webcontrol.toml";

/// Command line arguments parsed from user input.
#[derive(Debug, Clone)]
pub struct CliArgs {
    /// Path to the configuration file
    pub config_path: PathBuf,
    /// Optional override for bind address
    pub bind_address: Option<String>,
    /// Optional override for the static document directory
    pub doc_root: Option<String>,
    /// Optional override for log level
    pub log_level: Option<String>,
    /// Whether to force JSON log output
    pub json_logs: bool,
}

impl CliArgs {
    /// Parses the process arguments.
    pub fn parse() -> Self {
        Self::from_matches(&command().get_matches())
    }

    fn from_matches(matches: &ArgMatches) -> Self {
        Self {
            config_path: matches
                .get_one::<String>("config")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG)),
            bind_address: matches.get_one::<String>("bind").cloned(),
            doc_root: matches.get_one::<String>("doc-root").cloned(),
            log_level: matches.get_one::<String>("log-level").cloned(),
            json_logs: matches.get_flag("json-logs"),
        }
    }
}

fn command() -> Command {
    Command::new("webcontrol")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Sandbox host serving the web control console")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value(DEFAULT_CONFIG),
        )
        .arg(
            Arg::new("bind")
                .short('b')
                .long("bind")
                .value_name("ADDRESS")
                .help("Bind address (e.g., 0.0.0.0:8082)"),
        )
        .arg(
            Arg::new("doc-root")
                .short('d')
                .long("doc-root")
                .value_name("DIR")
                .help("Directory the web console is served from"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("json-logs")
                .long("json-logs")
                .help("Output logs in JSON format")
                .action(clap::ArgAction::SetTrue),
        )
}
