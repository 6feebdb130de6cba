//! Job runner: seeds the matrix, drives the chosen engine, reports results.

use std::io::Write;
use std::path::Path;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use log::info;
use serde::Serialize;

use wavefront_compute::{BackendType, RunReport};
use wavefront_core::reference::reference_corner;
use wavefront_core::WavefrontMatrix;

use crate::config::{JobConfig, OutputMode};

/// Relative tolerance for `--validate`.
const VALIDATION_TOLERANCE: f64 = 1e-9;

/// What a finished run reports, and what `output.json` contains.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub size: usize,
    pub backend: BackendType,
    pub engine: String,
    pub workers: usize,
    pub schedule: String,
    pub corner: f64,
    pub diagonals: usize,
    pub chunks: usize,
    pub feedback: usize,
    pub elapsed_seconds: f64,
    /// `Some(true)` when the corner matched the sequential reference.
    pub validated: Option<bool>,
}

/// The computed matrix plus its summary.
pub struct RunOutput {
    pub matrix: WavefrontMatrix,
    pub summary: RunSummary,
}

/// Run a job end to end. Fails on any engine error and, when validation is
/// requested, on a corner value that disagrees with the reference.
pub fn run_job(job: &JobConfig) -> Result<RunOutput> {
    job.validate()?;
    let size = job.matrix.size;
    let kind = job.engine.backend.backend_type();
    let config = job.engine.engine_config();

    let mut matrix = WavefrontMatrix::with_reference_seed(size)?;
    let start = Instant::now();
    let report = wavefront_compute::run(&mut matrix, kind, config)?;
    let elapsed = start.elapsed().as_secs_f64();
    info!("engine: {} ({:.6} s)", report.engine, elapsed);

    let corner = matrix.corner();
    let validated = if job.output.validate {
        check_corner(size, corner)?;
        Some(true)
    } else {
        None
    };

    Ok(RunOutput {
        summary: summarise(&report, corner, elapsed, validated),
        matrix,
    })
}

fn summarise(
    report: &RunReport,
    corner: f64,
    elapsed_seconds: f64,
    validated: Option<bool>,
) -> RunSummary {
    RunSummary {
        size: report.size,
        backend: report.backend,
        engine: report.engine.clone(),
        workers: report.workers,
        schedule: report.schedule.clone(),
        corner,
        diagonals: report.stats.diagonals_completed,
        chunks: report.stats.chunks_dispatched,
        feedback: report.stats.feedback_received,
        elapsed_seconds,
        validated,
    }
}

/// Compare `corner` with the sequential reference for an N×N matrix.
pub fn check_corner(size: usize, corner: f64) -> Result<()> {
    let expected = reference_corner(size).context("reference run failed")?;
    let scale = expected.abs().max(corner.abs());
    if (corner - expected).abs() > VALIDATION_TOLERANCE * scale {
        bail!(
            "validation failed: corner {:.12e} differs from reference {:.12e}",
            corner,
            expected
        );
    }
    info!("validation passed: corner {:.12e}", corner);
    Ok(())
}

/// Print the result in the requested mode.
pub fn write_output<W: Write>(out: &mut W, output: &RunOutput, mode: OutputMode) -> Result<()> {
    match mode {
        OutputMode::Corner => writeln!(out, "{:.6}", output.summary.corner)?,
        OutputMode::Matrix => {
            for row in output.matrix.as_array().rows() {
                for value in row {
                    write!(out, "{:.6} ", value)?;
                }
                writeln!(out)?;
            }
        }
        OutputMode::Benchmark => {
            writeln!(out, "{:.6}", output.summary.elapsed_seconds)?;
            writeln!(out, "corner: {:.6}", output.summary.corner)?;
        }
    }
    Ok(())
}

/// Write the run summary as pretty-printed JSON.
pub fn write_summary_json(summary: &RunSummary, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let json = serde_json::to_string_pretty(summary).context("cannot serialise run summary")?;
    std::fs::write(path, json).with_context(|| format!("cannot write {}", path.display()))?;
    info!("summary written to {}", path.display());
    Ok(())
}
