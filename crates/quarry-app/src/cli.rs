//! CLI argument definitions for the quarry binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;

/// Quarry: turn community conversations into clustered product insights.
#[derive(Parser, Debug)]
#[command(name = "quarry", version, about)]
pub struct CliArgs {
    /// Path to the TOML configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// JSON array of conversation records. Reads stdin when omitted or "-".
    #[arg(short = 'i', long = "input")]
    pub input: Option<PathBuf>,

    /// Where to write the JSON run report. Writes stdout when omitted or "-".
    #[arg(short = 'o', long = "output")]
    pub output: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Override `embedding.backend`.
    #[arg(long = "embedding-backend")]
    pub embedding_backend: Option<String>,

    /// Override `synthesis.backend`.
    #[arg(long = "synthesis-backend")]
    pub synthesis_backend: Option<String>,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > QUARRY_CONFIG env var. `None` means run on
    /// defaults.
    pub fn resolve_config_path(&self) -> Option<PathBuf> {
        if let Some(ref p) = self.config {
            return Some(p.clone());
        }
        std::env::var("QUARRY_CONFIG").ok().map(PathBuf::from)
    }

    pub fn input_path(&self) -> Option<&PathBuf> {
        self.input.as_ref().filter(|p| p.as_os_str() != "-")
    }

    pub fn output_path(&self) -> Option<&PathBuf> {
        self.output.as_ref().filter(|p| p.as_os_str() != "-")
    }

    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }
}
