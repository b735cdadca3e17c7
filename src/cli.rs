//! Command-line interface

use std::path::PathBuf;

use clap::Parser;

/// TMI authentication and authorization service
#[derive(Parser, Debug)]
#[command(name = "tmi-auth", version, about)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, env = "TMI_AUTH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Override the configured listen port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Override the configured listen host
    #[arg(long)]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "TMI_AUTH_LOG_LEVEL")]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "TMI_AUTH_LOG_FORMAT")]
    pub log_format: Option<String>,
}
