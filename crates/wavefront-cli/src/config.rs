//! TOML configuration deserialisation for wavefront jobs.
//!
//! Every section and key is optional; missing values fall back to the
//! defaults below. Command-line flags are applied on top afterwards.

use std::path::Path;

use anyhow::{bail, Context};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use wavefront_compute::{BackendType, EngineConfig, SyncMode, Topology};
use wavefront_core::{ChunkSizing, Schedule};

/// Top-level job configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobConfig {
    #[serde(default)]
    pub matrix: MatrixConfig,
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub output: OutputConfig,
}

/// `[matrix]`
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatrixConfig {
    /// Side length N of the square matrix (default: 512).
    #[serde(default = "default_size")]
    pub size: usize,
}

impl Default for MatrixConfig {
    fn default() -> Self {
        Self {
            size: default_size(),
        }
    }
}

fn default_size() -> usize {
    512
}

/// `[engine]`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EngineSection {
    pub backend: BackendChoice,
    /// Worker count. Default: available parallelism.
    pub workers: Option<usize>,
    pub schedule: ScheduleChoice,
    /// Rows per chunk. For the static schedule this replaces
    /// `chunk_sizing`; for on-demand it defaults to 1.
    pub chunk_size: Option<usize>,
    pub chunk_sizing: SizingChoice,
    pub topology: TopologyChoice,
    pub sync: SyncChoice,
}

/// `[output]`
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct OutputConfig {
    pub mode: OutputMode,
    /// Rerun the sequential reference and compare corner values.
    pub validate: bool,
    /// Write a JSON run summary to this path.
    pub json: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum BackendChoice {
    #[default]
    Farm,
    ParallelFor,
    Distributed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ScheduleChoice {
    #[default]
    Static,
    OnDemand,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SizingChoice {
    /// ceil((N - 1) / W), fixed for the whole run.
    #[default]
    FirstDiagonal,
    /// ceil((N - k) / W), recomputed for every diagonal.
    PerDiagonal,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum TopologyChoice {
    #[default]
    Feedback,
    Collector,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum SyncChoice {
    #[default]
    Diagonal,
    FullMatrix,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum OutputMode {
    /// Print only M[0, N-1].
    #[default]
    Corner,
    /// Print every row of the final matrix.
    Matrix,
    /// Print elapsed seconds and the corner value.
    Benchmark,
}

impl BackendChoice {
    pub fn backend_type(self) -> BackendType {
        match self {
            BackendChoice::Farm => BackendType::Farm,
            BackendChoice::ParallelFor => BackendType::ParallelFor,
            BackendChoice::Distributed => BackendType::Distributed,
        }
    }
}

impl EngineSection {
    pub fn schedule(&self) -> Schedule {
        match (self.schedule, self.chunk_size) {
            (ScheduleChoice::Static, Some(rows)) => Schedule::Static(ChunkSizing::Fixed(rows)),
            (ScheduleChoice::Static, None) => Schedule::Static(match self.chunk_sizing {
                SizingChoice::FirstDiagonal => ChunkSizing::FirstDiagonal,
                SizingChoice::PerDiagonal => ChunkSizing::PerDiagonal,
            }),
            (ScheduleChoice::OnDemand, rows) => Schedule::OnDemand {
                chunk_size: rows.unwrap_or(1),
            },
        }
    }

    pub fn engine_config(&self) -> EngineConfig {
        let config = match self.workers {
            Some(workers) => EngineConfig::with_workers(workers),
            None => EngineConfig::default(),
        };
        config
            .schedule(self.schedule())
            .topology(match self.topology {
                TopologyChoice::Feedback => Topology::Feedback,
                TopologyChoice::Collector => Topology::Collector,
            })
            .sync(match self.sync {
                SyncChoice::Diagonal => SyncMode::Diagonal,
                SyncChoice::FullMatrix => SyncMode::FullMatrix,
            })
    }
}

impl JobConfig {
    /// Check the job before any matrix is allocated.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.matrix.size == 0 {
            bail!("N should be greater than 0");
        }
        if self.engine.workers == Some(0) {
            bail!("number of workers should be greater than 0");
        }
        self.engine
            .engine_config()
            .validate()
            .context("invalid engine configuration")?;
        Ok(())
    }
}

/// Load and parse a TOML job configuration file.
pub fn load_config(path: &Path) -> anyhow::Result<JobConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read {}", path.display()))?;
    let config: JobConfig =
        toml::from_str(&content).with_context(|| format!("cannot parse {}", path.display()))?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let job: JobConfig = toml::from_str("").unwrap();
        assert_eq!(job.matrix.size, 512);
        assert_eq!(job.engine.backend, BackendChoice::Farm);
        assert_eq!(job.output.mode, OutputMode::Corner);
        assert_eq!(
            job.engine.schedule(),
            Schedule::Static(ChunkSizing::FirstDiagonal)
        );
        assert!(job.engine.engine_config().workers >= 1);
        job.validate().unwrap();
    }

    #[test]
    fn test_full_job() {
        let job: JobConfig = toml::from_str(
            r#"
            [matrix]
            size = 64

            [engine]
            backend = "distributed"
            workers = 3
            sync = "full-matrix"

            [output]
            mode = "benchmark"
            validate = true
            json = "summary.json"
            "#,
        )
        .unwrap();
        assert_eq!(job.matrix.size, 64);
        assert_eq!(job.engine.backend.backend_type(), BackendType::Distributed);
        let config = job.engine.engine_config();
        assert_eq!(config.workers, 3);
        assert_eq!(config.sync, SyncMode::FullMatrix);
        assert!(job.output.validate);
        assert_eq!(job.output.json.as_deref(), Some("summary.json"));
    }

    #[test]
    fn test_chunk_size_selects_schedule_granularity() {
        let mut engine = EngineSection {
            chunk_size: Some(5),
            ..Default::default()
        };
        assert_eq!(engine.schedule(), Schedule::Static(ChunkSizing::Fixed(5)));
        engine.schedule = ScheduleChoice::OnDemand;
        assert_eq!(engine.schedule(), Schedule::OnDemand { chunk_size: 5 });
        engine.chunk_size = None;
        assert_eq!(engine.schedule(), Schedule::on_demand());
    }

    #[test]
    fn test_rejects_bad_jobs() {
        let zero_size: JobConfig = toml::from_str("[matrix]\nsize = 0").unwrap();
        assert!(zero_size.validate().is_err());

        let zero_workers: JobConfig = toml::from_str("[engine]\nworkers = 0").unwrap();
        assert!(zero_workers.validate().is_err());

        let collector_on_demand: JobConfig = toml::from_str(
            "[engine]\nschedule = \"on-demand\"\ntopology = \"collector\"",
        )
        .unwrap();
        assert!(collector_on_demand.validate().is_err());

        assert!(toml::from_str::<JobConfig>("[engine]\nbackend = \"gpu\"").is_err());
        assert!(toml::from_str::<JobConfig>("[matrix]\nrows = 3").is_err());
    }
}
