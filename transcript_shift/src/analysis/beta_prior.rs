//! Maximum-likelihood Beta prior over the cohort's malignant fractions.
//!
//! The fit minimises the negative Beta log-likelihood over
//! `(ln shape1, ln shape2)` with a Nelder-Mead simplex, so both shapes stay
//! positive without constraints. Convergence is declared once the spread of
//! the simplex values drops below `tolerance` relative to the starting value.

use statrs::function::beta::ln_beta;
use tracing::{debug, info, warn};

use crate::error::{AnalysisError, Result};
use crate::models::{BetaParams, PatientCounts, TimePoint};

/// Shapes beyond this are treated as an unbounded likelihood.
const MAX_SHAPE: f64 = 1e8;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriorFitOptions {
    pub start: [f64; 2],
    pub min_samples: usize,
    pub max_iterations: usize,
    pub tolerance: f64,
    /// Initial simplex edge in log-parameter units.
    pub initial_step: f64,
}

impl Default for PriorFitOptions {
    fn default() -> Self {
        Self {
            start: [1.0, 10.0],
            min_samples: 3,
            max_iterations: 5_000,
            tolerance: 1e-10,
            initial_step: 0.5,
        }
    }
}

/// Proportions of analyzable patients usable for the fit at `time_point`.
/// Missing values and the degenerate end points 0 and 1 are dropped.
pub fn usable_proportions(records: &[PatientCounts], time_point: TimePoint) -> Vec<f64> {
    records
        .iter()
        .filter(|r| r.is_analyzable())
        .filter_map(|r| r.at(time_point).proportion())
        .filter(|p| *p > 0.0 && *p < 1.0)
        .collect()
}

pub fn fit_beta_prior(
    proportions: &[f64],
    options: &PriorFitOptions,
    time_point: TimePoint,
) -> Result<BetaParams> {
    let required = options.min_samples.max(1);
    if proportions.len() < required {
        return Err(AnalysisError::InsufficientData {
            time_point: time_point.to_string(),
            found: proportions.len(),
            required,
        });
    }
    if proportions.iter().any(|p| !(*p > 0.0 && *p < 1.0)) {
        return Err(AnalysisError::InvalidInput {
            reason: format!("proportions at {} must lie strictly inside (0, 1)", time_point),
        });
    }
    let first = proportions[0];
    if proportions.iter().all(|p| *p == first) {
        // zero variance: the likelihood grows without bound
        return Err(AnalysisError::InsufficientData {
            time_point: time_point.to_string(),
            found: 1,
            required: 2,
        });
    }

    let n = proportions.len() as f64;
    let sum_ln_x: f64 = proportions.iter().map(|p| p.ln()).sum();
    let sum_ln_1mx: f64 = proportions.iter().map(|p| (1.0 - p).ln()).sum();

    let objective = |log_params: &[f64]| {
        let a = log_params[0].exp();
        let b = log_params[1].exp();
        if !a.is_finite() || !b.is_finite() || a > MAX_SHAPE || b > MAX_SHAPE || a <= 0.0 || b <= 0.0 {
            return f64::INFINITY;
        }
        -((a - 1.0) * sum_ln_x + (b - 1.0) * sum_ln_1mx - n * ln_beta(a, b))
    };

    let start = [options.start[0].ln(), options.start[1].ln()];
    let result = nelder_mead(
        objective,
        &start,
        options.initial_step,
        options.tolerance,
        options.max_iterations,
    );

    if !result.converged {
        warn!("Beta prior fit at {} stopped after {} iterations", time_point, result.iterations);
        return Err(AnalysisError::NonConvergence {
            time_point: time_point.to_string(),
            iterations: result.iterations,
        });
    }

    let prior = BetaParams::new(result.x[0].exp(), result.x[1].exp());
    info!(
        "Beta prior at {}: shape1 = {:.4}, shape2 = {:.4} (mean {:.4}, {} patients, {} iterations, -logL {:.4})",
        time_point,
        prior.shape1,
        prior.shape2,
        prior.mean(),
        proportions.len(),
        result.iterations,
        result.value
    );
    Ok(prior)
}

#[derive(Debug, Clone)]
pub struct SimplexResult {
    pub x: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Derivative-free minimisation of `f` starting from `start`.
pub fn nelder_mead<F>(f: F, start: &[f64], step: f64, tolerance: f64, max_iterations: usize) -> SimplexResult
where
    F: Fn(&[f64]) -> f64,
{
    const REFLECT: f64 = 1.0;
    const EXPAND: f64 = 2.0;
    const CONTRACT: f64 = 0.5;
    const SHRINK: f64 = 0.5;

    let dim = start.len();
    let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(dim + 1);
    simplex.push(start.to_vec());
    for i in 0..dim {
        let mut vertex = start.to_vec();
        vertex[i] += step;
        simplex.push(vertex);
    }
    let mut values: Vec<f64> = simplex.iter().map(|v| f(v)).collect();
    let converge_below = tolerance * (values[0].abs() + tolerance);

    for iteration in 0..max_iterations {
        let mut order: Vec<usize> = (0..=dim).collect();
        order.sort_by(|&i, &j| values[i].total_cmp(&values[j]));
        simplex = order.iter().map(|&i| simplex[i].clone()).collect();
        values = order.iter().map(|&i| values[i]).collect();

        let best = values[0];
        let worst = values[dim];
        if (worst - best).abs() <= converge_below {
            debug!("Simplex converged after {} iterations at {:.6}", iteration, best);
            return SimplexResult {
                x: simplex[0].clone(),
                value: best,
                iterations: iteration,
                converged: true,
            };
        }

        let mut centroid = vec![0.0; dim];
        for vertex in &simplex[..dim] {
            for (c, v) in centroid.iter_mut().zip(vertex) {
                *c += v / dim as f64;
            }
        }

        // reflection is the centroid pushed away from the worst vertex
        let reflected = along(&centroid, &simplex[dim], -REFLECT);
        let f_reflected = f(&reflected);

        if f_reflected < best {
            let expanded = along(&centroid, &reflected, EXPAND);
            let f_expanded = f(&expanded);
            if f_expanded < f_reflected {
                simplex[dim] = expanded;
                values[dim] = f_expanded;
            } else {
                simplex[dim] = reflected;
                values[dim] = f_reflected;
            }
            continue;
        }

        if f_reflected < values[dim - 1] {
            simplex[dim] = reflected;
            values[dim] = f_reflected;
            continue;
        }

        let (contracted, accept_below) = if f_reflected < worst {
            (along(&centroid, &reflected, CONTRACT), f_reflected)
        } else {
            (along(&centroid, &simplex[dim], CONTRACT), worst)
        };
        let f_contracted = f(&contracted);
        if f_contracted < accept_below {
            simplex[dim] = contracted;
            values[dim] = f_contracted;
            continue;
        }

        let anchor = simplex[0].clone();
        for k in 1..=dim {
            simplex[k] = along(&anchor, &simplex[k], SHRINK);
            values[k] = f(&simplex[k]);
        }
    }

    let best = (0..=dim)
        .min_by(|&i, &j| values[i].total_cmp(&values[j]))
        .unwrap_or(0);
    SimplexResult {
        x: simplex[best].clone(),
        value: values[best],
        iterations: max_iterations,
        converged: false,
    }
}

/// Point at fraction `t` of the way from `from` to `to`.
fn along(from: &[f64], to: &[f64], t: f64) -> Vec<f64> {
    from.iter().zip(to).map(|(a, b)| a + t * (b - a)).collect()
}
