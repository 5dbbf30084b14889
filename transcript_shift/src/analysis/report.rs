//! Runs the three detection methods over one cleaned matrix and writes the tables.

use std::path::PathBuf;

use polars::prelude::*;
use tracing::{error, info};

use crate::analysis::beta_prior::PriorFitOptions;
use crate::analysis::contingency::{contingency_frame, run_contingency, ContingencyResult};
use crate::analysis::method_comparison::{compare_methods, ComparisonTable, Method, MethodCalls};
use crate::analysis::ratio_imputation::{ratio_frame, run_ratio_imputation, RatioResult};
use crate::analysis::shrinkage::{run_shrinkage, shrinkage_frame, ShrinkageAnalysis, ShrinkageOptions};
use crate::config::AnalysisConfig;
use crate::data_handling::expression_matrix::ExpressionMatrix;
use crate::data_handling::replicates::{aggregate_patients, aggregated_counts_frame, AggregationMethod};
use crate::error::Result;
use crate::helper_functions::dataframe_to_tsv;
use crate::models::PatientCounts;

impl From<&AnalysisConfig> for ShrinkageOptions {
    fn from(config: &AnalysisConfig) -> Self {
        Self {
            prior: PriorFitOptions {
                start: config.prior_start,
                min_samples: config.min_prior_samples,
                max_iterations: config.max_optimizer_iterations,
                tolerance: config.optimizer_tolerance,
                ..Default::default()
            },
            draws: config.monte_carlo_draws,
            seed: config.seed,
            alpha: config.alpha,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub counts: Vec<PatientCounts>,
    /// `None` when the prior could not be fit; the reason is kept in `shrinkage_failure`.
    pub shrinkage: Option<ShrinkageAnalysis>,
    pub shrinkage_failure: Option<String>,
    pub contingency: Vec<ContingencyResult>,
    pub ratio: Vec<RatioResult>,
    pub comparison: ComparisonTable,
}

pub fn run_analysis(matrix: &ExpressionMatrix, config: &AnalysisConfig) -> Result<AnalysisReport> {
    info!("Analysing {} patients", matrix.n_patients());
    let counts = aggregate_patients(matrix, config.shrinkage_aggregation);
    // the chi-squared table needs read counts, whatever feeds the shrinkage
    let summed = match config.shrinkage_aggregation {
        AggregationMethod::Sum => counts.clone(),
        AggregationMethod::GeometricMean => aggregate_patients(matrix, AggregationMethod::Sum),
    };

    let (shrinkage, shrinkage_failure) = match run_shrinkage(&counts, &ShrinkageOptions::from(config)) {
        Ok(analysis) => (Some(analysis), None),
        Err(e) => {
            error!("Shrinkage pipeline aborted: {}", e);
            (None, Some(e.to_string()))
        }
    };
    let shrinkage_calls = match &shrinkage {
        Some(analysis) => analysis.calls(),
        None => vec![None; counts.len()],
    };

    let contingency = run_contingency(&summed, config.alpha)?;
    let ratio = run_ratio_imputation(matrix, config.ratio_aggregation, config.alpha)?;

    let comparison = compare_methods(
        &matrix.patients,
        &[
            MethodCalls { method: Method::Shrinkage, calls: shrinkage_calls },
            MethodCalls {
                method: Method::Contingency,
                calls: contingency.iter().map(|r| r.significant).collect(),
            },
            MethodCalls {
                method: Method::RatioImputation,
                calls: ratio.iter().map(|r| r.significant).collect(),
            },
        ],
    )?;

    Ok(AnalysisReport {
        counts,
        shrinkage,
        shrinkage_failure,
        contingency,
        ratio,
        comparison,
    })
}

impl AnalysisReport {
    /// Write every result table into `output_dir` and return the paths.
    pub fn write_tables(&self, output_dir: &str) -> PolarsResult<Vec<PathBuf>> {
        let mut written = vec![dataframe_to_tsv(
            &mut aggregated_counts_frame(&self.counts)?,
            output_dir,
            "aggregated_counts.tsv",
        )?];

        if let Some(analysis) = &self.shrinkage {
            written.push(dataframe_to_tsv(&mut analysis.prior_frame()?, output_dir, "beta_prior.tsv")?);
            written.push(dataframe_to_tsv(
                &mut shrinkage_frame(&analysis.results)?,
                output_dir,
                "shrinkage_results.tsv",
            )?);
        }
        written.push(dataframe_to_tsv(
            &mut contingency_frame(&self.contingency)?,
            output_dir,
            "contingency_results.tsv",
        )?);
        written.push(dataframe_to_tsv(&mut ratio_frame(&self.ratio)?, output_dir, "ratio_results.tsv")?);
        written.push(dataframe_to_tsv(
            &mut self.comparison.to_dataframe()?,
            output_dir,
            "method_comparison.tsv",
        )?);
        written.push(dataframe_to_tsv(
            &mut self.comparison.overlap_frame()?,
            output_dir,
            "method_overlap.tsv",
        )?);
        Ok(written)
    }
}
