//! Wavefront command-line interface.
//!
//! Run the recurrence from flags or a TOML job file:
//! ```sh
//! wavefront run --size 1024 --workers 8 --schedule on-demand
//! wavefront run job.toml --mode benchmark --validate
//! wavefront validate job.toml
//! wavefront backends
//! ```

mod config;
mod runner;

use std::io::Write;
use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use config::{
    BackendChoice, JobConfig, OutputMode, ScheduleChoice, SizingChoice, SyncChoice, TopologyChoice,
};

#[derive(Parser)]
#[command(name = "wavefront")]
#[command(about = "Wavefront: diagonal-barrier upper-triangular recurrence")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute the matrix, from flags and/or a TOML job file.
    Run(RunArgs),
    /// Validate a job file without running it.
    Validate {
        /// Path to the job configuration file.
        config: PathBuf,
    },
    /// List the engines compiled into this binary.
    Backends,
}

/// Flags for `run`; each one overrides the job file.
#[derive(Args)]
struct RunArgs {
    /// Optional job configuration file.
    config: Option<PathBuf>,
    /// Matrix size N.
    #[arg(short = 'n', long)]
    size: Option<usize>,
    /// Number of workers W.
    #[arg(short, long)]
    workers: Option<usize>,
    #[arg(short, long, value_enum)]
    backend: Option<BackendChoice>,
    #[arg(long, value_enum)]
    schedule: Option<ScheduleChoice>,
    /// Rows per chunk.
    #[arg(long)]
    chunk_size: Option<usize>,
    #[arg(long, value_enum)]
    chunk_sizing: Option<SizingChoice>,
    #[arg(long, value_enum)]
    topology: Option<TopologyChoice>,
    #[arg(long, value_enum)]
    sync: Option<SyncChoice>,
    #[arg(short, long, value_enum)]
    mode: Option<OutputMode>,
    /// Compare the corner value against the sequential reference.
    #[arg(long)]
    validate: bool,
    /// Write a JSON run summary to this path.
    #[arg(long)]
    json: Option<PathBuf>,
}

impl RunArgs {
    fn job(&self) -> anyhow::Result<JobConfig> {
        let mut job = match &self.config {
            Some(path) => config::load_config(path)?,
            None => JobConfig::default(),
        };
        if let Some(size) = self.size {
            job.matrix.size = size;
        }
        if self.workers.is_some() {
            job.engine.workers = self.workers;
        }
        if let Some(backend) = self.backend {
            job.engine.backend = backend;
        }
        if let Some(schedule) = self.schedule {
            job.engine.schedule = schedule;
        }
        if self.chunk_size.is_some() {
            job.engine.chunk_size = self.chunk_size;
        }
        if let Some(sizing) = self.chunk_sizing {
            job.engine.chunk_sizing = sizing;
        }
        if let Some(topology) = self.topology {
            job.engine.topology = topology;
        }
        if let Some(sync) = self.sync {
            job.engine.sync = sync;
        }
        if let Some(mode) = self.mode {
            job.output.mode = mode;
        }
        job.output.validate |= self.validate;
        if let Some(json) = &self.json {
            job.output.json = Some(json.display().to_string());
        }
        Ok(job)
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            let job = args.job()?;
            let output = runner::run_job(&job)?;

            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            runner::write_output(&mut out, &output, job.output.mode)?;
            out.flush()?;

            if let Some(path) = &job.output.json {
                runner::write_summary_json(&output.summary, std::path::Path::new(path))?;
            }
            Ok(())
        }
        Commands::Validate { config } => {
            let job = config::load_config(&config)?;
            job.validate()?;
            println!("Configuration is valid: {}", config.display());
            Ok(())
        }
        Commands::Backends => {
            println!("Available engines:");
            println!();
            for kind in wavefront_compute::available_backends() {
                let summary = match kind {
                    wavefront_compute::BackendType::Farm => {
                        "dispatcher + worker threads, static or on-demand, optional collector"
                    }
                    wavefront_compute::BackendType::ParallelFor => {
                        "one Rayon parallel loop per diagonal"
                    }
                    wavefront_compute::BackendType::Distributed => {
                        "message-passing ranks with private replicas"
                    }
                };
                println!("  {:<13} {}", kind.name(), summary);
            }
            Ok(())
        }
    }
}
