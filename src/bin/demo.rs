//! # mzFlow Demo
//!
//! Drives the task engine with a synthetic LC-MS-like workload: imports a
//! few mock raw files, then runs a "normalization" batch over them on the
//! worker pool, with every output stamped into a provenance lineage.
//!
//! ## Usage
//!
//! ```bash
//! # Four files, default worker count
//! mzflow-demo run
//!
//! # Bigger batch, two workers, settings from a config file
//! mzflow-demo run --files 16 --config mzflow.toml -v
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use mzflow::collection::{DataCollection, Row};
use mzflow::config::EngineConfig;
use mzflow::module::ModuleCall;
use mzflow::project::{OriginalHandling, Project};
use mzflow::provenance::{Lineage, ModuleId, ParameterSnapshot};
use mzflow::scheduler::TaskScheduler;
use mzflow::task::{TaskOutput, TaskStatus};

/// mzFlow - Task Execution and Provenance Core Demo
#[derive(Parser)]
#[command(name = "mzflow-demo")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbosity level (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a synthetic normalization batch through the scheduler
    Run {
        /// Number of mock raw files to process
        #[arg(short, long, default_value = "4")]
        files: usize,

        /// Scans per mock raw file
        #[arg(short, long, default_value = "256")]
        scans: usize,

        /// Worker count (overrides config file)
        #[arg(short = 'w', long)]
        workers: Option<usize>,

        /// Optional mzflow.toml config file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match cli.command {
        Commands::Run {
            files,
            scans,
            workers,
            config,
        } => run_batch(files, scans, workers, config),
    }
}

fn run_batch(
    files: usize,
    scans: usize,
    workers: Option<usize>,
    config_path: Option<PathBuf>,
) -> Result<()> {
    let config = match config_path {
        Some(path) => EngineConfig::from_file(&path)?,
        None => EngineConfig::default(),
    };
    let mut scheduler_config = config.scheduler_config();
    if let Some(workers) = workers {
        scheduler_config.num_workers = workers;
    }

    let project = Arc::new(Project::new());
    for index in 0..files {
        project.add(mock_raw_file(index, scans));
    }
    info!("imported {} mock raw files", project.len());

    let call = ModuleCall::with_arena(
        ModuleId::new("normalize_intensity", "Intensity normalizer"),
        ParameterSnapshot::new()
            .with("factor", 0.5)
            .with("scans_per_file", scans),
        config.arena_backing(),
    )
    .context("Failed to allocate batch storage arena")?;

    let scheduler = TaskScheduler::new(scheduler_config)?;

    let inputs = project.collections();
    let mut handles = Vec::with_capacity(inputs.len());
    for input in inputs {
        let description = format!("Normalizing intensities in {}", input.name());
        let output_name = format!("{} normalized", input.name());
        let task = call.create_task(
            description,
            Some(Arc::clone(&input)),
            Arc::clone(&project),
            OriginalHandling::KeepOriginal,
            Box::new(move |ctx| {
                let input = ctx.input()?;
                ctx.progress.set_total(input.len());
                let mut rows = Vec::with_capacity(input.len());
                for row in ctx.cancel.checked(input.rows(), 64) {
                    let row = row?;
                    let values = input.row_values(row)?;
                    let scaled: Vec<f64> = values.iter().map(|v| v * 0.5).collect();
                    // Large result arrays go into the shared batch arena.
                    let slice = ctx.store_doubles(&scaled)?;
                    rows.push(Row::stored(row.id, slice));
                    ctx.progress.advance(1);
                }
                Ok(TaskOutput::new(output_name, rows))
            }),
        );
        handles.push(scheduler.submit(task)?);
    }

    scheduler.shutdown();

    let mut finished = 0usize;
    for handle in &handles {
        match handle.status() {
            TaskStatus::Finished => finished += 1,
            status => println!(
                "task \"{}\" ended {status}{}",
                handle.description(),
                handle
                    .error_message()
                    .map(|m| format!(": {m}"))
                    .unwrap_or_default()
            ),
        }
    }

    println!("Batch complete: {finished}/{} tasks finished", handles.len());
    println!("Project now holds {} collections:", project.len());
    for name in project.collection_names() {
        let collection = project
            .get_by_name(&name)
            .context("collection disappeared mid-listing")?;
        println!(
            "  {name} ({} rows, {} lineage records)",
            collection.len(),
            collection.lineage().len()
        );
        if let Some(record) = collection.lineage().last() {
            println!(
                "    last step: {} at {}",
                record.module, record.call_date
            );
        }
    }

    if let Some(arena) = call.arena() {
        println!(
            "Shared arena: {} bytes, {} references",
            arena.len_bytes().unwrap_or(0),
            arena.refcount()
        );
    }

    Ok(())
}

fn mock_raw_file(index: usize, scans: usize) -> DataCollection {
    let rows = (0..scans)
        .map(|scan| {
            // Simple synthetic spectrum: a handful of peaks per scan.
            let base = 100.0 + scan as f64 * 0.01;
            Row::inline(scan as u64, vec![base, base * 2.0, base * 3.0])
        })
        .collect();
    DataCollection::new(format!("mock_run{index:02}"), rows, Lineage::empty(), None)
}
