//! Per-patient 2×2 chi-squared test on summed malignant and normal counts.

use polars::prelude::*;
use statrs::distribution::{ChiSquared, ContinuousCDF};
use tracing::{debug, info};

use crate::analysis::fdr::{benjamini_hochberg, significance_calls};
use crate::error::{AnalysisError, Result};
use crate::models::PatientCounts;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChiSquaredTest {
    pub statistic: f64,
    pub p_value: f64,
}

/// Pearson's chi-squared test with Yates' continuity correction on a 2×2 table.
///
/// Returns `Ok(None)` when a margin is zero and expected counts are undefined.
pub fn yates_chi_squared(table: [[f64; 2]; 2]) -> Result<Option<ChiSquaredTest>> {
    let rows = [table[0][0] + table[0][1], table[1][0] + table[1][1]];
    let cols = [table[0][0] + table[1][0], table[0][1] + table[1][1]];
    let n = rows[0] + rows[1];
    if rows.iter().chain(cols.iter()).any(|m| *m <= 0.0) {
        return Ok(None);
    }

    let mut expected = [[0.0; 2]; 2];
    let mut max_correction = f64::INFINITY;
    for i in 0..2 {
        for j in 0..2 {
            expected[i][j] = rows[i] * cols[j] / n;
            max_correction = max_correction.min((table[i][j] - expected[i][j]).abs());
        }
    }
    let correction = max_correction.min(0.5);

    let mut statistic = 0.0;
    for i in 0..2 {
        for j in 0..2 {
            let deviation = (table[i][j] - expected[i][j]).abs() - correction;
            statistic += deviation * deviation / expected[i][j];
        }
    }

    let chi2 = ChiSquared::new(1.0).map_err(|e| AnalysisError::Distribution(e.to_string()))?;
    Ok(Some(ChiSquaredTest {
        statistic,
        p_value: chi2.sf(statistic),
    }))
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContingencyResult {
    pub patient: String,
    pub log2_rr: Option<f64>,
    pub statistic: Option<f64>,
    pub p_value: Option<f64>,
    pub padj: Option<f64>,
    pub significant: Option<bool>,
}

/// Time points as rows, malignant and normal reads as columns.
/// Any missing cell skips the patient.
pub fn contingency_table(record: &PatientCounts) -> Option<[[f64; 2]; 2]> {
    Some([
        [record.early.malignant?, record.early.normal()?],
        [record.late.malignant?, record.late.normal()?],
    ])
}

pub fn run_contingency(records: &[PatientCounts], alpha: f64) -> Result<Vec<ContingencyResult>> {
    let mut results = Vec::with_capacity(records.len());
    for record in records {
        let test = match contingency_table(record) {
            Some(table) => yates_chi_squared(table)?,
            None => None,
        };
        if test.is_none() {
            debug!("{}: contingency test skipped", record.patient);
        }
        let log2_rr = match (record.early.proportion(), record.late.proportion()) {
            (Some(p1), Some(p2)) if p1 > 0.0 && p2 > 0.0 => Some((p2 / p1).log2()),
            _ => None,
        };
        results.push(ContingencyResult {
            patient: record.patient.clone(),
            log2_rr,
            statistic: test.map(|t| t.statistic),
            p_value: test.map(|t| t.p_value),
            padj: None,
            significant: None,
        });
    }

    let padj = benjamini_hochberg(&results.iter().map(|r| r.p_value).collect::<Vec<_>>());
    let calls = significance_calls(&padj, alpha);
    for ((result, adjusted), call) in results.iter_mut().zip(padj).zip(calls) {
        result.padj = adjusted;
        result.significant = call;
    }

    info!(
        "Contingency: {} of {} patients tested, {} significant at FDR < {}",
        results.iter().filter(|r| r.p_value.is_some()).count(),
        results.len(),
        results.iter().filter(|r| r.significant == Some(true)).count(),
        alpha
    );
    Ok(results)
}

pub fn contingency_frame(results: &[ContingencyResult]) -> PolarsResult<DataFrame> {
    df![
        "patient" => results.iter().map(|r| r.patient.as_str()).collect::<Vec<_>>(),
        "log2_rr" => results.iter().map(|r| r.log2_rr).collect::<Vec<_>>(),
        "chi_squared" => results.iter().map(|r| r.statistic).collect::<Vec<_>>(),
        "p_value" => results.iter().map(|r| r.p_value).collect::<Vec<_>>(),
        "padj" => results.iter().map(|r| r.padj).collect::<Vec<_>>(),
        "significant" => results.iter().map(|r| r.significant).collect::<Vec<_>>(),
    ]
}
