use ndarray::Array2;
use polars::prelude::*;
use tracing::{debug, error, info, warn};

use crate::config::ColumnLayout;
use crate::error::{AnalysisError, Result};
use crate::helper_functions::read_tsv;
use crate::models::{Condition, Dataset, Replicates, TimePoint, REPLICATES};

/// Tab-separated malignant/total replicate counts on disk.
pub struct ExpressionDataset {
    pub path: String,
}

impl Dataset for ExpressionDataset {
    fn load(&self) -> PolarsResult<DataFrame> {
        info!("Reading expression matrix from {}", &self.path);
        let df = match read_tsv(&self.path) {
            Ok(df) => df,
            Err(e) => {
                error!("Failed to read expression TSV: {}", e);
                return Err(e);
            }
        };
        debug!("Loaded {} rows, {} columns", df.height(), df.width());
        Ok(df)
    }
}

/// Negative, infinite and NaN readings are treated as missing.
pub fn clean_value(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v >= 0.0)
}

/// Cleaned patients × replicate-columns matrix.
#[derive(Debug, Clone)]
pub struct ExpressionMatrix {
    pub patients: Vec<String>,
    pub values: Array2<Option<f64>>,
    pub layout: ColumnLayout,
}

impl ExpressionMatrix {
    /// Build from an in-memory matrix, applying the cleaning and clipping rules.
    pub fn new(patients: Vec<String>, values: Array2<Option<f64>>, layout: ColumnLayout) -> Result<Self> {
        if values.nrows() != patients.len() {
            return Err(AnalysisError::InvalidInput {
                reason: format!(
                    "{} patient identifiers for {} matrix rows",
                    patients.len(),
                    values.nrows()
                ),
            });
        }
        if values.ncols() < layout.width() {
            return Err(AnalysisError::InvalidInput {
                reason: format!(
                    "layout needs {} numeric columns, matrix has {}",
                    layout.width(),
                    values.ncols()
                ),
            });
        }

        let mut matrix = Self {
            patients,
            values: values.mapv(clean_value),
            layout,
        };
        let clipped = matrix.clip_totals();
        if clipped > 0 {
            warn!("Raised {} total replicate(s) that were below their malignant count", clipped);
        }
        Ok(matrix)
    }

    /// Convert a raw frame. A leading identifier column is recognised when it is
    /// textual or when exactly one column more than the layout needs is present.
    pub fn from_dataframe(df: &DataFrame, layout: ColumnLayout) -> Result<Self> {
        let columns = df.get_columns();
        let required = layout.width();
        let textual_first = columns.first().is_some_and(|c| c.dtype() == &DataType::String);
        let has_id_column = textual_first || columns.len() == required + 1;
        if has_id_column && !textual_first {
            warn!(
                "Numeric first column '{}' taken as patient identifiers: {} columns found, layout needs {}",
                columns[0].name(),
                columns.len(),
                required
            );
        }

        let patients: Vec<String> = if has_id_column {
            let ids = columns[0].cast(&DataType::String)?;
            ids.str()?
                .into_iter()
                .enumerate()
                .map(|(row, id)| id.map(str::to_string).unwrap_or_else(|| default_patient_id(row)))
                .collect()
        } else {
            (0..df.height()).map(default_patient_id).collect()
        };

        let numeric = if has_id_column { &columns[1..] } else { columns };
        if numeric.len() < required {
            return Err(AnalysisError::InvalidInput {
                reason: format!("expected {} numeric columns, found {}", required, numeric.len()),
            });
        }

        let mut values = Array2::from_elem((df.height(), numeric.len()), None);
        for (j, column) in numeric.iter().enumerate() {
            let as_float = column.cast(&DataType::Float64)?;
            for (row, value) in as_float.f64()?.into_iter().enumerate() {
                values[[row, j]] = value;
            }
        }

        Self::new(patients, values, layout)
    }

    pub fn n_patients(&self) -> usize {
        self.patients.len()
    }

    pub fn replicates(&self, row: usize, condition: Condition, time_point: TimePoint) -> Replicates {
        let columns = self.layout.columns(condition, time_point);
        let mut out = [None; REPLICATES];
        for (slot, &col) in out.iter_mut().zip(columns.iter()) {
            *slot = self.values[[row, col]];
        }
        out
    }

    fn clip_totals(&mut self) -> usize {
        let mut clipped = 0;
        for row in 0..self.values.nrows() {
            for time_point in TimePoint::ALL {
                let malignant = *self.layout.columns(Condition::Malignant, time_point);
                let total = *self.layout.columns(Condition::Total, time_point);
                for (m_col, t_col) in malignant.into_iter().zip(total) {
                    if let (Some(m), Some(t)) = (self.values[[row, m_col]], self.values[[row, t_col]]) {
                        if m > t {
                            self.values[[row, t_col]] = Some(m);
                            clipped += 1;
                        }
                    }
                }
            }
        }
        clipped
    }
}

fn default_patient_id(row: usize) -> String {
    format!("patient_{}", row + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn header() -> String {
        let mut cols = vec!["patient".to_string()];
        for cond in ["mal", "tot"] {
            for tp in ["T1", "T2"] {
                for r in 1..=4 {
                    cols.push(format!("{cond}_{tp}_r{r}"));
                }
            }
        }
        cols.join("\t")
    }

    #[test]
    fn cleaning_drops_negative_and_infinite() {
        assert_eq!(clean_value(Some(-1.0)), None);
        assert_eq!(clean_value(Some(f64::INFINITY)), None);
        assert_eq!(clean_value(Some(f64::NAN)), None);
        assert_eq!(clean_value(Some(0.0)), Some(0.0));
        assert_eq!(clean_value(None), None);
    }

    #[test]
    fn loads_tsv_with_identifier_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("counts.tsv");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(f, "{}", header()).unwrap();
        writeln!(f, "A\t1\t2\t-3\tNA\t5\t6\t7\t8\t10\t20\t30\t40\t50\t60\t70\t80").unwrap();
        writeln!(f, "B\t9\t9\t9\t9\t9\t9\t9\t9\t5\t9\t9\t9\t9\t9\t9\t9").unwrap();
        drop(f);

        let dataset = ExpressionDataset { path: path.to_str().unwrap().to_string() };
        let df = dataset.load().unwrap();
        let matrix = ExpressionMatrix::from_dataframe(&df, ColumnLayout::default()).unwrap();

        assert_eq!(matrix.patients, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(
            matrix.replicates(0, Condition::Malignant, TimePoint::Early),
            [Some(1.0), Some(2.0), None, None]
        );
        // B's first early total (5) is below its malignant count (9) and gets raised.
        assert_eq!(
            matrix.replicates(1, Condition::Total, TimePoint::Early),
            [Some(9.0), Some(9.0), Some(9.0), Some(9.0)]
        );
    }

    #[test]
    fn generates_ids_without_identifier_column() {
        let df = DataFrame::new(
            (0..16)
                .map(|j| Column::from(Series::new(format!("c{j}").into(), &[1.0f64, 2.0])))
                .collect(),
        )
        .unwrap();
        let matrix = ExpressionMatrix::from_dataframe(&df, ColumnLayout::default()).unwrap();
        assert_eq!(matrix.patients, vec!["patient_1", "patient_2"]);
        assert_eq!(matrix.n_patients(), 2);
    }

    #[test]
    fn numeric_identifier_column_is_inferred_from_width() {
        let mut columns = vec![Column::from(Series::new("id".into(), &[101i64, 102]))];
        for j in 0..16 {
            columns.push(Column::from(Series::new(format!("c{j}").into(), &[j as f64, j as f64])));
        }
        let df = DataFrame::new(columns).unwrap();
        let matrix = ExpressionMatrix::from_dataframe(&df, ColumnLayout::default()).unwrap();

        assert_eq!(matrix.patients, vec!["101", "102"]);
        // the first count column is c0, not the identifiers
        assert_eq!(
            matrix.replicates(0, Condition::Malignant, TimePoint::Early),
            [Some(0.0), Some(1.0), Some(2.0), Some(3.0)]
        );
    }

    #[test]
    fn rejects_too_few_columns() {
        let df = df!["a" => &[1.0f64], "b" => &[2.0f64]].unwrap();
        assert!(matches!(
            ExpressionMatrix::from_dataframe(&df, ColumnLayout::default()),
            Err(AnalysisError::InvalidInput { .. })
        ));
    }
}
