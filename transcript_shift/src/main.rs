use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::analysis::report::run_analysis;
use crate::config::{write_config_json, AnalysisConfig, CONFIG_FILE_NAME};
use crate::data_handling::expression_matrix::{ExpressionDataset, ExpressionMatrix};
use crate::helper_functions::project_root;
use crate::models::Dataset;

mod analysis;
mod config;
mod data_handling;
mod error;
mod helper_functions;
mod models;

fn main() -> anyhow::Result<()> {
    // Setup logging and project configuration
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting the malignant transcript shift analysis");

    let root = project_root();
    let config = AnalysisConfig::load_or_default(&root.join(CONFIG_FILE_NAME))?;
    let input_path = root.join(&config.input_path);
    let output_dir = root.join(&config.output_dir);
    let output_dir = output_dir.to_string_lossy();

    // Load and clean the replicate matrix
    let dataset = ExpressionDataset {
        path: input_path.to_string_lossy().to_string(),
    };
    let df = dataset.load()?;
    let matrix = ExpressionMatrix::from_dataframe(&df, config.layout.clone())?;

    // Run all three detection methods and compare their calls
    let report = run_analysis(&matrix, &config)?;
    if let Some(reason) = &report.shrinkage_failure {
        warn!("Shrinkage results unavailable: {}", reason);
    }

    write_config_json(&config, &output_dir)?;
    for path in report.write_tables(&output_dir)? {
        info!("Wrote {}", path.display());
    }

    info!("Analysis complete");
    Ok(())
}
