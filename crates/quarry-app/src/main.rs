//! Quarry binary - composition root.
//!
//! 1. Load configuration from TOML
//! 2. Read conversation records as JSON
//! 3. Resolve backends from the built-in registry
//! 4. Run the pipeline, cancelling on Ctrl-C
//! 5. Write the run report as JSON

mod cli;

use std::io::{Read, Write};
use std::process::ExitCode;

use clap::Parser;
use quarry_backend::BackendRegistry;
use quarry_core::logging::init_tracing;
use quarry_core::{CancellationToken, ConversationRecord, PipelineConfig, QuarryError};
use quarry_pipeline::{Pipeline, PipelineError};

use cli::CliArgs;

type BoxError = Box<dyn std::error::Error>;

/// A config file that cannot be read or parsed is a configuration error.
fn load_config(args: &CliArgs) -> Result<PipelineConfig, PipelineError> {
    let mut config = match args.resolve_config_path() {
        Some(path) => PipelineConfig::load(&path).map_err(|e| {
            PipelineError::Config(QuarryError::Config(format!(
                "failed to load {}: {e}",
                path.display()
            )))
        })?,
        None => PipelineConfig::default(),
    };
    if let Some(ref backend) = args.embedding_backend {
        config.embedding.backend = backend.clone();
    }
    if let Some(ref backend) = args.synthesis_backend {
        config.synthesis.backend = backend.clone();
    }
    Ok(config)
}

fn read_records(args: &CliArgs) -> Result<Vec<ConversationRecord>, BoxError> {
    let content = match args.input_path() {
        Some(path) => std::fs::read_to_string(path)
            .map_err(|e| format!("failed to read {}: {e}", path.display()))?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    Ok(serde_json::from_str(&content)?)
}

fn write_report(args: &CliArgs, json: &str) -> Result<(), BoxError> {
    match args.output_path() {
        Some(path) => std::fs::write(path, json)?,
        None => {
            let mut out = std::io::stdout().lock();
            out.write_all(json.as_bytes())?;
            out.write_all(b"\n")?;
        }
    }
    Ok(())
}

async fn run(args: CliArgs) -> Result<(), BoxError> {
    let config = load_config(&args)?;
    init_tracing(&args.resolve_log_level(&config.general.log_level));
    tracing::info!(
        path = ?args.resolve_config_path(),
        embedding = %config.embedding.backend,
        synthesis = %config.synthesis.backend,
        "Configuration loaded"
    );

    let records = read_records(&args)?;
    tracing::info!(records = records.len(), "Records loaded");

    let pipeline = Pipeline::from_config(config, &BackendRegistry::with_builtins())?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling run");
            on_signal.cancel();
        }
    });

    let run = pipeline.run(&records, &cancel).await?;
    let json = serde_json::to_string_pretty(&run.into_report())?;
    write_report(&args, &json)?;
    Ok(())
}

/// 2 for configuration errors, 1 for anything else.
fn exit_status(err: &BoxError) -> u8 {
    match err.downcast_ref::<PipelineError>() {
        Some(PipelineError::Config(_)) => 2,
        Some(err) => {
            if let Some(partial) = err.partial() {
                eprintln!(
                    "quarry: run {} stopped after {} embeddings and {} insights",
                    partial.run_id,
                    partial.embeddings.len(),
                    partial.insights.len()
                );
            }
            1
        }
        None => 1,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("quarry: {e}");
            ExitCode::from(exit_status(&e))
        }
    }
}
