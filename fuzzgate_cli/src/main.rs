mod engine;

use anyhow::Context;
use clap::Parser;
use fuzzgate_cli::demo;
use fuzzgate_core::diagnostics::FINDING_HEADER;
use fuzzgate_core::{
    Diagnostics, FuzzTargetRunner, GENERIC_ERROR_EXIT_CODE, HarnessConfig, InvocationMode,
    LIBFUZZER_ERROR_EXIT_CODE, ReproducerArtifact,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::engine::StandaloneEngine;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Cli {
    #[clap(short, long, value_parser)]
    config_file: Option<PathBuf>,
    /// Stop after this many distinct findings.
    #[clap(short, long)]
    keep_going: Option<u64>,
    #[clap(long)]
    no_dedup: bool,
    #[clap(long, value_parser)]
    reproducer_path: Option<PathBuf>,
    /// Fuzz the provider-mode demo target instead of the bytes-mode one.
    #[clap(long)]
    provider: bool,
    /// Replay a `Crash_<hash>.rs` reproducer instead of running inputs.
    #[clap(long, value_parser, value_name = "ARTIFACT")]
    reproduce: Option<PathBuf>,
    #[clap(long, default_value = "./")]
    artifact_prefix: String,
    /// Input files, or directories of input files.
    #[clap(value_parser)]
    inputs: Vec<PathBuf>,
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

fn load_config(cli: &Cli) -> anyhow::Result<HarnessConfig> {
    let mut config = match &cli.config_file {
        Some(config_path) => {
            info!("Loading configuration from specified path: {config_path:?}");
            HarnessConfig::load_from_file(config_path)?
        }
        None => {
            let default_config_path = PathBuf::from("config.toml");
            if default_config_path.exists() {
                info!("No config file specified via CLI, loading default: {default_config_path:?}");
                HarnessConfig::load_from_file(&default_config_path)?
            } else {
                info!("No config file specified and default 'config.toml' not found, using built-in defaults.");
                HarnessConfig::default()
            }
        }
    };

    if let Some(keep_going) = cli.keep_going {
        config.keep_going = keep_going;
    }
    if cli.no_dedup {
        config.dedup = false;
    }
    if let Some(path) = &cli.reproducer_path {
        config.reproducer_path = path.clone();
    }
    config.validate()?;
    Ok(config)
}

fn collect_inputs(paths: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    let mut inputs = Vec::new();
    for path in paths {
        if path.is_dir() {
            let mut entries = Vec::new();
            for entry in std::fs::read_dir(path)
                .with_context(|| format!("reading input directory {path:?}"))?
            {
                let file_path = entry?.path();
                if file_path.is_file() {
                    entries.push(file_path);
                }
            }
            entries.sort();
            inputs.extend(entries);
        } else {
            inputs.push(path.clone());
        }
    }
    Ok(inputs)
}

fn reproduce(path: &Path) -> anyhow::Result<ExitCode> {
    let artifact = ReproducerArtifact::read_from(path)?;
    let target = demo::target(artifact.mode)?;
    info!(artifact = ?path, fuzz_target = %artifact.target, "Replaying reproducer");
    match artifact.replay(&target)? {
        Some(finding) => {
            let mut diagnostics = Diagnostics::stdio();
            diagnostics.finding(FINDING_HEADER, &finding);
            diagnostics.flush();
            Ok(exit_code(LIBFUZZER_ERROR_EXIT_CODE))
        }
        None => {
            info!("Reproducer ran without a finding");
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    if let Some(path) = &cli.reproduce {
        return reproduce(path);
    }

    let config = load_config(&cli)?;
    info!("Effective configuration: {config:#?}");

    let mode = if cli.provider {
        InvocationMode::Provider
    } else {
        InvocationMode::Bytes
    };
    let target = demo::target(mode)?;
    let engine = StandaloneEngine::new(cli.artifact_prefix.clone());
    let mut runner = match FuzzTargetRunner::builder(target, config, engine)
        .coverage(demo::coverage().clone())
        .build()
    {
        Ok(runner) => runner,
        Err(e) => {
            error!("{e}");
            return Ok(exit_code(e.exit_code()));
        }
    };

    let inputs = collect_inputs(&cli.inputs)?;
    info!("Running {} inputs", inputs.len());
    for path in &inputs {
        let data = std::fs::read(path).with_context(|| format!("reading input {path:?}"))?;
        info!("Running: {}", path.display());
        runner.engine_mut().set_current(&data);
        runner.run_one(&data);
    }
    info!("Executed {} inputs, {} distinct findings", inputs.len(), runner.distinct_findings());
    drop(runner);
    Ok(ExitCode::SUCCESS)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("FUZZGATE_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("ERROR: {e:#}");
            exit_code(GENERIC_ERROR_EXIT_CODE)
        }
    }
}
