//! Ratio-based detection: impute half-missing replicates from the patient's own
//! malignant/total ratio, aggregate (geometric mean by default), and compare
//! replicate log2 ratios between time points with Welch's t-test.

use polars::prelude::*;
use statrs::distribution::{ContinuousCDF, StudentsT};
use tracing::{debug, info};

use crate::analysis::fdr::{benjamini_hochberg, significance_calls};
use crate::data_handling::expression_matrix::ExpressionMatrix;
use crate::data_handling::replicates::{clip_total, geometric_mean, AggregationMethod};
use crate::error::{AnalysisError, Result};
use crate::models::{Condition, Replicates, TimePoint};

/// Geometric mean of the malignant/total ratio over complete replicates.
pub fn reference_ratio(malignant: &Replicates, total: &Replicates) -> Option<f64> {
    let ratios: Vec<Option<f64>> = malignant
        .iter()
        .zip(total)
        .filter_map(|pair| match pair {
            (Some(m), Some(t)) if *t > 0.0 => Some(Some(m / t)),
            _ => None,
        })
        .collect();
    geometric_mean(&ratios)
}

/// Fill a replicate whose partner is present using the reference ratio.
/// Replicates missing in both conditions stay missing.
pub fn impute_replicates(malignant: &Replicates, total: &Replicates) -> (Replicates, Replicates) {
    let mut malignant = *malignant;
    let mut total = *total;
    let Some(ratio) = reference_ratio(&malignant, &total) else {
        return (malignant, total);
    };

    for (m, t) in malignant.iter_mut().zip(total.iter_mut()) {
        match (*m, *t) {
            (None, Some(t_val)) => *m = Some(t_val * ratio),
            (Some(m_val), None) if ratio > 0.0 => *t = Some(m_val / ratio),
            _ => {}
        }
        *t = clip_total(*m, *t);
    }
    (malignant, total)
}

/// Log2 malignant fraction of each replicate with positive counts.
pub fn replicate_log2_ratios(malignant: &Replicates, total: &Replicates) -> Vec<f64> {
    malignant
        .iter()
        .zip(total)
        .filter_map(|pair| match pair {
            (Some(m), Some(t)) if *m > 0.0 && *t > 0.0 => Some((m / t).log2()),
            _ => None,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WelchTest {
    pub statistic: f64,
    pub df: f64,
    pub p_value: f64,
}

fn mean_and_variance(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var)
}

/// Two-sided Welch t-test of `second` against `first`.
///
/// `Ok(None)` when either group has fewer than two values or both groups are constant.
pub fn welch_t_test(first: &[f64], second: &[f64]) -> Result<Option<WelchTest>> {
    if first.len() < 2 || second.len() < 2 {
        return Ok(None);
    }
    let (mean_a, var_a) = mean_and_variance(first);
    let (mean_b, var_b) = mean_and_variance(second);
    let se_a = var_a / first.len() as f64;
    let se_b = var_b / second.len() as f64;
    let se = se_a + se_b;
    if se <= 0.0 {
        return Ok(None);
    }

    let statistic = (mean_b - mean_a) / se.sqrt();
    let df = se * se
        / (se_a * se_a / (first.len() as f64 - 1.0) + se_b * se_b / (second.len() as f64 - 1.0));
    let t = StudentsT::new(0.0, 1.0, df).map_err(|e| AnalysisError::Distribution(e.to_string()))?;
    let p_value = (2.0 * t.sf(statistic.abs())).min(1.0);
    Ok(Some(WelchTest { statistic, df, p_value }))
}

#[derive(Debug, Clone, PartialEq)]
pub struct RatioResult {
    pub patient: String,
    pub ratio_early: Option<f64>,
    pub ratio_late: Option<f64>,
    pub log2_fc: Option<f64>,
    pub statistic: Option<f64>,
    pub p_value: Option<f64>,
    pub padj: Option<f64>,
    pub significant: Option<bool>,
}

struct ImputedTimePoint {
    ratio: Option<f64>,
    log2_ratios: Vec<f64>,
}

fn impute_time_point(
    matrix: &ExpressionMatrix,
    row: usize,
    time_point: TimePoint,
    aggregation: AggregationMethod,
) -> ImputedTimePoint {
    let (malignant, total) = impute_replicates(
        &matrix.replicates(row, Condition::Malignant, time_point),
        &matrix.replicates(row, Condition::Total, time_point),
    );
    let ratio = match (aggregation.aggregate(&malignant), aggregation.aggregate(&total)) {
        (Some(m), Some(t)) if t > 0.0 => Some(m / t),
        _ => None,
    };
    ImputedTimePoint {
        ratio,
        log2_ratios: replicate_log2_ratios(&malignant, &total),
    }
}

pub fn run_ratio_imputation(
    matrix: &ExpressionMatrix,
    aggregation: AggregationMethod,
    alpha: f64,
) -> Result<Vec<RatioResult>> {
    let mut results = Vec::with_capacity(matrix.n_patients());
    for row in 0..matrix.n_patients() {
        let early = impute_time_point(matrix, row, TimePoint::Early, aggregation);
        let late = impute_time_point(matrix, row, TimePoint::Late, aggregation);

        let test = welch_t_test(&early.log2_ratios, &late.log2_ratios)?;
        if test.is_none() {
            debug!("{}: ratio test skipped", matrix.patients[row]);
        }
        let log2_fc = match (early.ratio, late.ratio) {
            (Some(r1), Some(r2)) if r1 > 0.0 && r2 > 0.0 => Some((r2 / r1).log2()),
            _ => None,
        };

        results.push(RatioResult {
            patient: matrix.patients[row].clone(),
            ratio_early: early.ratio,
            ratio_late: late.ratio,
            log2_fc,
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
        "Ratio imputation: {} of {} patients tested, {} significant at FDR < {}",
        results.iter().filter(|r| r.p_value.is_some()).count(),
        results.len(),
        results.iter().filter(|r| r.significant == Some(true)).count(),
        alpha
    );
    Ok(results)
}

pub fn ratio_frame(results: &[RatioResult]) -> PolarsResult<DataFrame> {
    df![
        "patient" => results.iter().map(|r| r.patient.as_str()).collect::<Vec<_>>(),
        "ratio_T1" => results.iter().map(|r| r.ratio_early).collect::<Vec<_>>(),
        "ratio_T2" => results.iter().map(|r| r.ratio_late).collect::<Vec<_>>(),
        "log2_fc" => results.iter().map(|r| r.log2_fc).collect::<Vec<_>>(),
        "t_statistic" => results.iter().map(|r| r.statistic).collect::<Vec<_>>(),
        "p_value" => results.iter().map(|r| r.p_value).collect::<Vec<_>>(),
        "padj" => results.iter().map(|r| r.padj).collect::<Vec<_>>(),
        "significant" => results.iter().map(|r| r.significant).collect::<Vec<_>>(),
    ]
}
