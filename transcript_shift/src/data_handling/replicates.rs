//! Replicate aggregation and the missingness balance filter.

use polars::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::data_handling::expression_matrix::ExpressionMatrix;
use crate::models::{Condition, PatientCounts, TimePoint, TimePointCounts};

/// How the four technical replicates are collapsed into one value.
///
/// `Sum` keeps the full read information for the Beta-Binomial model;
/// `GeometricMean` suits multiplicative amplification noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregationMethod {
    Sum,
    GeometricMean,
}

impl AggregationMethod {
    pub fn aggregate(&self, values: &[Option<f64>]) -> Option<f64> {
        match self {
            AggregationMethod::Sum => robust_sum(values),
            AggregationMethod::GeometricMean => geometric_mean(values),
        }
    }
}

/// Sum of the present values; missing only when every value is missing.
pub fn robust_sum(values: &[Option<f64>]) -> Option<f64> {
    values
        .iter()
        .flatten()
        .fold(None, |acc, v| Some(acc.unwrap_or(0.0) + v))
}

/// Geometric mean of the positive present values.
///
/// Returns `Some(0.0)` when values are present but none is positive,
/// and `None` when every value is missing.
pub fn geometric_mean(values: &[Option<f64>]) -> Option<f64> {
    let present: Vec<f64> = values.iter().flatten().copied().collect();
    if present.is_empty() {
        return None;
    }
    let positive: Vec<f64> = present.into_iter().filter(|v| *v > 0.0).collect();
    if positive.is_empty() {
        return Some(0.0);
    }
    let mean_log = positive.iter().map(|v| v.ln()).sum::<f64>() / positive.len() as f64;
    Some(mean_log.exp())
}

pub fn missing_count(values: &[Option<f64>]) -> usize {
    values.iter().filter(|v| v.is_none()).count()
}

/// True iff as many malignant replicates are missing as total replicates.
pub fn is_balanced(malignant: &[Option<f64>], total: &[Option<f64>]) -> bool {
    missing_count(malignant) == missing_count(total)
}

/// Raise an aggregated total that fell below its malignant count.
pub fn clip_total(malignant: Option<f64>, total: Option<f64>) -> Option<f64> {
    match (malignant, total) {
        (Some(m), Some(t)) if m > t => Some(m),
        _ => total,
    }
}

pub fn aggregate_time_point(
    matrix: &ExpressionMatrix,
    row: usize,
    time_point: TimePoint,
    method: AggregationMethod,
) -> TimePointCounts {
    let malignant = matrix.replicates(row, Condition::Malignant, time_point);
    let total = matrix.replicates(row, Condition::Total, time_point);

    let malignant_agg = method.aggregate(&malignant);
    TimePointCounts {
        malignant: malignant_agg,
        total: clip_total(malignant_agg, method.aggregate(&total)),
        balanced: is_balanced(&malignant, &total),
    }
}

/// Collapse every patient's replicates at both time points.
pub fn aggregate_patients(matrix: &ExpressionMatrix, method: AggregationMethod) -> Vec<PatientCounts> {
    let records: Vec<PatientCounts> = (0..matrix.n_patients())
        .map(|row| PatientCounts {
            patient: matrix.patients[row].clone(),
            early: aggregate_time_point(matrix, row, TimePoint::Early, method),
            late: aggregate_time_point(matrix, row, TimePoint::Late, method),
        })
        .collect();

    let analyzable = records.iter().filter(|r| r.is_analyzable()).count();
    info!(
        "Aggregated {} patients with {:?}; {} balanced at both time points",
        records.len(),
        method,
        analyzable
    );
    for record in records.iter().filter(|r| !r.is_analyzable()) {
        debug!("{} has unbalanced replicate missingness", record.patient);
    }
    records
}

/// Per-patient aggregated counts as a table.
pub fn aggregated_counts_frame(records: &[PatientCounts]) -> PolarsResult<DataFrame> {
    let mut columns = vec![Column::from(Series::new(
        "patient".into(),
        records.iter().map(|r| r.patient.as_str()).collect::<Vec<_>>(),
    ))];

    for time_point in TimePoint::ALL {
        let tp = time_point.label();
        let counts: Vec<&TimePointCounts> = records.iter().map(|r| r.at(time_point)).collect();
        columns.push(Column::from(Series::new(
            format!("malignant_{tp}").into(),
            counts.iter().map(|c| c.malignant).collect::<Vec<_>>(),
        )));
        columns.push(Column::from(Series::new(
            format!("total_{tp}").into(),
            counts.iter().map(|c| c.total).collect::<Vec<_>>(),
        )));
        columns.push(Column::from(Series::new(
            format!("normal_{tp}").into(),
            counts.iter().map(|c| c.normal()).collect::<Vec<_>>(),
        )));
        columns.push(Column::from(Series::new(
            format!("balanced_{tp}").into(),
            counts.iter().map(|c| c.balanced).collect::<Vec<_>>(),
        )));
    }

    DataFrame::new(columns)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ColumnLayout;
    use ndarray::Array2;

    fn matrix_from_rows(rows: &[[Option<f64>; 16]]) -> ExpressionMatrix {
        let mut values = Array2::from_elem((rows.len(), 16), None);
        for (i, row) in rows.iter().enumerate() {
            for (j, v) in row.iter().enumerate() {
                values[[i, j]] = *v;
            }
        }
        let ids = (0..rows.len()).map(|i| format!("p{i}")).collect();
        ExpressionMatrix::new(ids, values, ColumnLayout::default()).unwrap()
    }

    #[test]
    fn geometric_mean_cases() {
        let gm = geometric_mean(&[Some(2.0), Some(8.0)]).unwrap();
        assert!((gm - 4.0).abs() < 1e-12);
        assert_eq!(geometric_mean(&[Some(0.0), Some(0.0)]), Some(0.0));
        assert_eq!(geometric_mean(&[None, None, None, None]), None);
        // zeros are ignored once a positive value is present
        let gm = geometric_mean(&[Some(0.0), Some(9.0), None]).unwrap();
        assert!((gm - 9.0).abs() < 1e-12);
    }

    #[test]
    fn robust_sum_ignores_missing() {
        assert_eq!(robust_sum(&[Some(1.0), None, Some(4.0), None]), Some(5.0));
        assert_eq!(robust_sum(&[Some(0.0), None]), Some(0.0));
        assert_eq!(robust_sum(&[None, None]), None);
    }

    #[test]
    fn balance_compares_missing_counts_not_positions() {
        // malignant missing at 1 and 3, total missing at 2 and 4
        let malignant = [None, Some(1.0), None, Some(1.0)];
        let total = [Some(2.0), None, Some(2.0), None];
        assert!(is_balanced(&malignant, &total));

        let total_one_missing = [Some(2.0), None, Some(2.0), Some(2.0)];
        assert!(!is_balanced(&malignant, &total_one_missing));
    }

    #[test]
    fn aggregated_total_never_below_malignant() {
        // Per replicate totals are fine, but the missing total at r1 makes the
        // summed malignant exceed the summed total.
        let mut row = [Some(10.0); 16];
        row[0] = Some(50.0);
        row[8] = None;
        row[9] = Some(10.0);
        let matrix = matrix_from_rows(&[row]);

        for method in [AggregationMethod::Sum, AggregationMethod::GeometricMean] {
            let records = aggregate_patients(&matrix, method);
            for tp in TimePoint::ALL {
                let counts = records[0].at(tp);
                assert!(counts.total.unwrap() >= counts.malignant.unwrap());
            }
        }
        let sums = aggregate_patients(&matrix, AggregationMethod::Sum);
        assert_eq!(sums[0].early.malignant, Some(80.0));
        assert_eq!(sums[0].early.total, Some(80.0));
        assert!(!sums[0].early.balanced);
        assert!(sums[0].late.balanced);
    }

    #[test]
    fn counts_frame_has_one_row_per_patient() {
        let matrix = matrix_from_rows(&[[Some(1.0); 16], [Some(2.0); 16]]);
        let records = aggregate_patients(&matrix, AggregationMethod::Sum);
        let df = aggregated_counts_frame(&records).unwrap();
        assert_eq!(df.shape(), (2, 9));
        assert_eq!(df.column("normal_T1").unwrap().f64().unwrap().get(1), Some(0.0));
    }
}
