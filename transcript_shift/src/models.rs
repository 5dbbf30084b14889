use std::fmt;

use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Technical replicates measured per condition and time point.
pub const REPLICATES: usize = 4;

/// One replicate vector; `None` marks a missing measurement.
pub type Replicates = [Option<f64>; REPLICATES];

/// Anything that can be loaded into a raw `DataFrame`.
pub trait Dataset {
    fn load(&self) -> PolarsResult<DataFrame>;
}

/// Wrap a foreign error so it can travel through `PolarsResult`.
pub fn polars_err(e: Box<dyn std::error::Error>) -> PolarsError {
    PolarsError::ComputeError(format!("{}", e).into())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimePoint {
    Early,
    Late,
}

impl TimePoint {
    pub const ALL: [TimePoint; 2] = [TimePoint::Early, TimePoint::Late];

    pub fn label(&self) -> &'static str {
        match self {
            TimePoint::Early => "T1",
            TimePoint::Late => "T2",
        }
    }
}

impl fmt::Display for TimePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Condition {
    Malignant,
    Total,
}

/// Shape parameters of a Beta distribution.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BetaParams {
    pub shape1: f64,
    pub shape2: f64,
}

impl BetaParams {
    pub fn new(shape1: f64, shape2: f64) -> Self {
        Self { shape1, shape2 }
    }

    pub fn mean(&self) -> f64 {
        self.shape1 / (self.shape1 + self.shape2)
    }
}

/// Aggregated counts of one patient at one time point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimePointCounts {
    pub malignant: Option<f64>,
    pub total: Option<f64>,
    pub balanced: bool,
}

impl TimePointCounts {
    /// Reads that are not malignant. Never negative once totals are clipped.
    pub fn normal(&self) -> Option<f64> {
        match (self.malignant, self.total) {
            (Some(m), Some(t)) => Some((t - m).max(0.0)),
            _ => None,
        }
    }

    /// Empirical malignant fraction, missing when the total is missing or zero.
    pub fn proportion(&self) -> Option<f64> {
        match (self.malignant, self.total) {
            (Some(m), Some(t)) if t > 0.0 => Some(m / t),
            _ => None,
        }
    }
}

/// A patient after replicate aggregation.
#[derive(Debug, Clone, PartialEq)]
pub struct PatientCounts {
    pub patient: String,
    pub early: TimePointCounts,
    pub late: TimePointCounts,
}

impl PatientCounts {
    pub fn at(&self, time_point: TimePoint) -> &TimePointCounts {
        match time_point {
            TimePoint::Early => &self.early,
            TimePoint::Late => &self.late,
        }
    }

    /// Balanced at both time points, so both proportions are unbiased.
    pub fn is_analyzable(&self) -> bool {
        self.early.balanced && self.late.balanced
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_and_proportion_follow_counts() {
        let counts = TimePointCounts {
            malignant: Some(25.0),
            total: Some(100.0),
            balanced: true,
        };
        assert_eq!(counts.normal(), Some(75.0));
        assert_eq!(counts.proportion(), Some(0.25));

        let empty = TimePointCounts {
            malignant: Some(0.0),
            total: Some(0.0),
            balanced: true,
        };
        assert_eq!(empty.proportion(), None);
    }

    #[test]
    fn analyzable_needs_both_time_points_balanced() {
        let balanced = TimePointCounts { malignant: Some(1.0), total: Some(2.0), balanced: true };
        let unbalanced = TimePointCounts { balanced: false, ..balanced };
        let patient = PatientCounts {
            patient: "p1".into(),
            early: balanced,
            late: unbalanced,
        };
        assert!(!patient.is_analyzable());
        assert!(PatientCounts { late: balanced, ..patient }.is_analyzable());
    }
}
