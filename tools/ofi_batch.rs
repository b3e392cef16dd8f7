//! OFI Batch Tool
//!
//! Runs the OFI aggregation and signal evaluation over a universe and date
//! range, then writes the output tables.
//!
//! # Usage
//!
//! ```bash
//! # Full run
//! cargo run --release --bin ofi_batch -- run --config configs/ofi.toml --universe configs/universe.json
//!
//! # Override output directory and threads, also write panel.npy
//! cargo run --release --bin ofi_batch -- run -c configs/ofi.toml -u configs/universe.json \
//!     --out outputs/ofi_2024q1 --threads 8 --panel
//!
//! # Write a sample configuration
//! cargo run --release --bin ofi_batch -- generate-config configs/ofi.toml
//! ```
//!
//! Exit code is 0 whenever the run completes, including runs where some
//! partitions failed (they are listed in `failures.csv`). Configuration
//! errors exit with 2, output write errors with 1.

use clap::{Parser, Subcommand};
use ofi_signal::batch::{BatchOrchestrator, ConsoleProgress};
use ofi_signal::config::{DataConfig, DateRangeConfig, PipelineConfig, Universe};
use ofi_signal::export::OutputWriter;
use ofi_signal::features::SessionWindow;
use ofi_signal::PipelineError;
use std::path::PathBuf;
use std::process::ExitCode;

/// Order-flow-imbalance batch aggregation and evaluation
#[derive(Parser, Debug)]
#[command(name = "ofi_batch")]
#[command(about = "Aggregate tick OFI into buckets and evaluate it against forward returns")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the pipeline over the configured grid
    Run {
        /// Pipeline configuration (TOML or JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Universe file (JSON list / {"universe": [...]}, or TOML)
        #[arg(short, long)]
        universe: PathBuf,

        /// Output directory (overrides data.output_dir)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Worker threads (overrides batch.num_threads)
        #[arg(short, long)]
        threads: Option<usize>,

        /// Also write panel.npy and panel_keys.csv
        #[arg(long)]
        panel: bool,

        /// Print one line per partition
        #[arg(short, long)]
        verbose: bool,
    },

    /// Write a sample configuration file
    GenerateConfig {
        /// Destination path
        path: PathBuf,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            config,
            universe,
            out,
            threads,
            panel,
            verbose,
        } => run(config, universe, out, threads, panel, verbose),
        Commands::GenerateConfig { path } => generate_sample_config(path),
    }
}

fn run(
    config_path: PathBuf,
    universe_path: PathBuf,
    out: Option<PathBuf>,
    threads: Option<usize>,
    panel: bool,
    verbose: bool,
) -> ExitCode {
    let mut config = match PipelineConfig::load(&config_path) {
        Ok(c) => c,
        Err(e) => return config_error(&e),
    };
    if let Some(dir) = out {
        config.data.output_dir = dir;
    }
    if let Some(n) = threads {
        config.batch = config.batch.with_threads(n);
    }
    config.data.write_panel |= panel;

    let universe = match Universe::load(&universe_path) {
        Ok(u) => u,
        Err(e) => return config_error(&e),
    };
    log::info!(
        "config {}, universe {} ({} symbols)",
        config_path.display(),
        universe_path.display(),
        universe.len()
    );

    let progress = if verbose {
        ConsoleProgress::new().verbose()
    } else {
        ConsoleProgress::new()
    };
    let orchestrator =
        BatchOrchestrator::new(config.clone(), universe).with_progress_callback(Box::new(progress));

    let output = match orchestrator.run() {
        Ok(o) => o,
        Err(e) if e.is_fatal_to_run() => return config_error(&e),
        Err(e) => {
            log::error!("run failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    let writer = OutputWriter::new(&config.data.output_dir);
    match writer.write_all(&output, &config, config.data.write_panel) {
        Ok(files) => {
            for f in files {
                log::info!("  {}", f.display());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("failed to write outputs: {e}");
            ExitCode::FAILURE
        }
    }
}

fn config_error(err: &PipelineError) -> ExitCode {
    log::error!("{err}");
    ExitCode::from(2)
}

fn generate_sample_config(path: PathBuf) -> ExitCode {
    let mut config = PipelineConfig::new(
        DataConfig::new("data/processed/ticks", "outputs/ofi"),
        DateRangeConfig::from_range("2024-01-02", "2024-03-29")
            .with_exclusions(vec!["2024-02-09".to_string(), "2024-02-12".to_string()]),
    );
    config.aggregation = config.aggregation.with_sessions(SessionWindow::cn_equity());

    match config.save_toml(&path) {
        Ok(()) => {
            println!("Sample configuration written to {}", path.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error writing {}: {e}", path.display());
            ExitCode::FAILURE
        }
    }
}
