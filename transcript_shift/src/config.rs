use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::data_handling::replicates::AggregationMethod;
use crate::error::Result;
use crate::models::{Condition, TimePoint, REPLICATES};

pub const CONFIG_FILE_NAME: &str = "analysis_config.json";

/// Positions of the replicate columns among the numeric columns of the input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnLayout {
    pub malignant_early: [usize; REPLICATES],
    pub malignant_late: [usize; REPLICATES],
    pub total_early: [usize; REPLICATES],
    pub total_late: [usize; REPLICATES],
}

impl Default for ColumnLayout {
    fn default() -> Self {
        Self {
            malignant_early: [0, 1, 2, 3],
            malignant_late: [4, 5, 6, 7],
            total_early: [8, 9, 10, 11],
            total_late: [12, 13, 14, 15],
        }
    }
}

impl ColumnLayout {
    pub fn columns(&self, condition: Condition, time_point: TimePoint) -> &[usize; REPLICATES] {
        match (condition, time_point) {
            (Condition::Malignant, TimePoint::Early) => &self.malignant_early,
            (Condition::Malignant, TimePoint::Late) => &self.malignant_late,
            (Condition::Total, TimePoint::Early) => &self.total_early,
            (Condition::Total, TimePoint::Late) => &self.total_late,
        }
    }

    /// Number of numeric columns the layout addresses.
    pub fn width(&self) -> usize {
        [
            &self.malignant_early,
            &self.malignant_late,
            &self.total_early,
            &self.total_late,
        ]
        .iter()
        .flat_map(|cols| cols.iter())
        .max()
        .map_or(0, |&max| max + 1)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub input_path: String,
    pub output_dir: String,
    pub layout: ColumnLayout,
    /// Replicate aggregation feeding the shrinkage pipeline.
    pub shrinkage_aggregation: AggregationMethod,
    pub ratio_aggregation: AggregationMethod,
    /// FDR threshold shared by all three detection methods.
    pub alpha: f64,
    pub monte_carlo_draws: usize,
    pub seed: u64,
    pub min_prior_samples: usize,
    pub prior_start: [f64; 2],
    pub max_optimizer_iterations: usize,
    pub optimizer_tolerance: f64,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            input_path: String::from("./data/malignant_total_counts.tsv"),
            output_dir: String::from("./results"),
            layout: ColumnLayout::default(),
            shrinkage_aggregation: AggregationMethod::Sum,
            ratio_aggregation: AggregationMethod::GeometricMean,
            alpha: 0.05,
            monte_carlo_draws: 10_000,
            seed: 42,
            min_prior_samples: 3,
            prior_start: [1.0, 10.0],
            max_optimizer_iterations: 5_000,
            optimizer_tolerance: 1e-10,
        }
    }
}

impl AnalysisConfig {
    /// Read the config from `path`, or fall back to defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        info!("Reading config from {}", path.display());
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

/// Persist the effective configuration next to the results.
pub fn write_config_json(config: &AnalysisConfig, output_dir: &str) -> Result<()> {
    let config_path = Path::new(output_dir).join(CONFIG_FILE_NAME);
    fs::create_dir_all(output_dir)?;
    fs::write(&config_path, serde_json::to_string_pretty(config)?)?;
    info!("Wrote effective config to {}", config_path.display());
    Ok(())
}
