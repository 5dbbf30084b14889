//! Merge significance calls of the detection methods into one boolean table.
//!
//! Missing calls are coerced to `false`. That conflates "could not be tested"
//! with "tested and not significant", so the untested count of each method is
//! kept alongside the table and reported.

use std::fmt;

use polars::prelude::*;
use tracing::{info, warn};

use crate::error::{AnalysisError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Shrinkage,
    Contingency,
    RatioImputation,
}

impl Method {
    pub fn column_name(&self) -> &'static str {
        match self {
            Method::Shrinkage => "beta_binomial_shrinkage",
            Method::Contingency => "chi_squared",
            Method::RatioImputation => "ratio_imputation",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.column_name())
    }
}

/// One method's calls, aligned with the patient list.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodCalls {
    pub method: Method,
    pub calls: Vec<Option<bool>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonTable {
    pub patients: Vec<String>,
    pub methods: Vec<Method>,
    /// `significant[m][p]` is the coerced call of method `m` for patient `p`.
    pub significant: Vec<Vec<bool>>,
    pub untested: Vec<usize>,
}

pub fn compare_methods(patients: &[String], methods: &[MethodCalls]) -> Result<ComparisonTable> {
    for m in methods {
        if m.calls.len() != patients.len() {
            return Err(AnalysisError::InvalidInput {
                reason: format!(
                    "{} has {} calls for {} patients",
                    m.method,
                    m.calls.len(),
                    patients.len()
                ),
            });
        }
    }

    let untested: Vec<usize> = methods
        .iter()
        .map(|m| m.calls.iter().filter(|c| c.is_none()).count())
        .collect();
    for (m, &n) in methods.iter().zip(&untested) {
        if n > 0 {
            warn!("{}: {} patient(s) untestable, counted as not significant", m.method, n);
        }
    }

    Ok(ComparisonTable {
        patients: patients.to_vec(),
        methods: methods.iter().map(|m| m.method).collect(),
        significant: methods
            .iter()
            .map(|m| m.calls.iter().map(|c| c.unwrap_or(false)).collect())
            .collect(),
        untested,
    })
}

impl ComparisonTable {
    /// Patients per combination of calls, one entry for every combination.
    pub fn overlap_counts(&self) -> Vec<(Vec<bool>, usize)> {
        let k = self.methods.len();
        (0..1usize << k)
            .map(|mask| {
                let pattern: Vec<bool> = (0..k).map(|m| mask & (1 << m) != 0).collect();
                let count = (0..self.patients.len())
                    .filter(|&p| (0..k).all(|m| self.significant[m][p] == pattern[m]))
                    .count();
                (pattern, count)
            })
            .collect()
    }

    pub fn to_dataframe(&self) -> PolarsResult<DataFrame> {
        let mut columns = vec![Column::from(Series::new(
            "patient".into(),
            self.patients.iter().map(String::as_str).collect::<Vec<_>>(),
        ))];
        for (method, calls) in self.methods.iter().zip(&self.significant) {
            columns.push(Column::from(Series::new(method.column_name().into(), calls.as_slice())));
        }
        DataFrame::new(columns)
    }

    /// Venn-style region counts plus a row of untestable counts per method.
    pub fn overlap_frame(&self) -> PolarsResult<DataFrame> {
        let mut regions = Vec::new();
        let mut counts = Vec::new();
        for (pattern, count) in self.overlap_counts() {
            let members: Vec<&str> = self
                .methods
                .iter()
                .zip(&pattern)
                .filter(|&(_, &hit)| hit)
                .map(|(m, _)| m.column_name())
                .collect();
            regions.push(if members.is_empty() {
                "none".to_string()
            } else {
                members.join("&")
            });
            counts.push(count as u32);
        }
        for (method, &n) in self.methods.iter().zip(&self.untested) {
            regions.push(format!("untestable:{}", method));
            counts.push(n as u32);
        }

        info!("Method overlap: {:?}", regions.iter().zip(&counts).collect::<Vec<_>>());
        df![
            "region" => regions,
            "patients" => counts,
        ]
    }
}
