//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use serde_json::{Map, Value as Json};
use std::path::PathBuf;

/// promptd - validate, render and hot-reload prompt specifications
#[derive(Parser)]
#[command(
    name = "promptd",
    about = "Validating, sandboxed, hot-reloading prompt specification pipeline",
    version = env!("CARGO_PKG_VERSION"),
    after_help = "Logs are written to: ~/.local/share/promptd/logs/promptd.log"
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Subcommand)]
pub enum Command {
    /// Scan the configured roots and build the index
    Discover {
        /// Scan these directories instead of the configured roots
        #[arg(value_name = "DIR")]
        paths: Vec<PathBuf>,
    },

    /// Run every validation layer against one specification file
    Validate {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },

    /// Validate one specification and write its artifact to the cache
    Generate {
        #[arg(value_name = "PATH")]
        path: PathBuf,
    },

    /// Scan, then reprocess specifications as they change on disk
    Watch,

    /// List indexed specifications and their status
    List,

    /// Render a specification with the given parameters
    Render {
        /// Specification identifier
        id: String,

        /// Parameter value (repeatable)
        #[arg(short, long = "param", value_name = "KEY=VALUE", value_parser = parse_param)]
        params: Vec<(String, Json)>,
    },
}

/// Output format for command reports
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Parse `key=value`; the value is read as a YAML scalar so `3` and `true` keep their types
pub fn parse_param(s: &str) -> Result<(String, Json), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("Invalid parameter '{}': expected KEY=VALUE", s))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("Invalid parameter '{}': empty key", s));
    }
    let value = match serde_yaml::from_str::<Json>(raw) {
        Ok(Json::Null) if !raw.trim().eq_ignore_ascii_case("null") => Json::String(raw.to_string()),
        Ok(v @ (Json::String(_) | Json::Number(_) | Json::Bool(_) | Json::Null | Json::Array(_))) => v,
        _ => Json::String(raw.to_string()),
    };
    Ok((key.to_string(), value))
}

/// Collect repeated `--param` values; later occurrences win
pub fn params_to_map(params: Vec<(String, Json)>) -> Map<String, Json> {
    params.into_iter().collect()
}
