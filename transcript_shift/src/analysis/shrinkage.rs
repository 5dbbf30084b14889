//! Empirical-Bayes Beta-Binomial shrinkage with a Monte-Carlo significance test.
//!
//! Pipeline order matters: both priors are fit over the whole cohort before any
//! patient is shrunk, and p-values are adjusted only after every analyzable
//! patient has been simulated.

use polars::prelude::*;
use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use statrs::distribution::Beta;
use tracing::{debug, info, warn};

use crate::analysis::beta_prior::{fit_beta_prior, usable_proportions, PriorFitOptions};
use crate::analysis::fdr::{benjamini_hochberg, significance_calls};
use crate::error::{AnalysisError, Result};
use crate::models::{BetaParams, PatientCounts, TimePoint};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShrinkageOptions {
    pub prior: PriorFitOptions,
    /// Monte-Carlo draws per posterior.
    pub draws: usize,
    pub seed: u64,
    pub alpha: f64,
}

impl Default for ShrinkageOptions {
    fn default() -> Self {
        Self {
            prior: PriorFitOptions::default(),
            draws: 10_000,
            seed: 42,
            alpha: 0.05,
        }
    }
}

/// Conjugate update of `prior` with `malignant` successes and `normal` failures.
pub fn posterior(malignant: f64, normal: f64, prior: &BetaParams) -> BetaParams {
    BetaParams::new(malignant + prior.shape1, normal + prior.shape2)
}

pub fn log2_relative_risk(early: &BetaParams, late: &BetaParams) -> f64 {
    (late.mean() / early.mean()).log2()
}

/// Independent, reproducible stream for the patient at `row`.
pub fn patient_rng(seed: u64, row: usize) -> StdRng {
    StdRng::seed_from_u64(seed.wrapping_add(row as u64))
}

/// One-sided Monte-Carlo p-value that the observed direction of change is wrong.
///
/// For an increase (`log2_rr > 0`) this is `1 - P(late > early)`, otherwise
/// `1 - P(early > late)`, both estimated from `draws` samples per posterior.
pub fn empirical_p_value<R: Rng + ?Sized>(
    log2_rr: f64,
    early: &BetaParams,
    late: &BetaParams,
    draws: usize,
    rng: &mut R,
) -> Result<f64> {
    if draws == 0 {
        return Err(AnalysisError::InvalidInput {
            reason: "Monte-Carlo test needs at least one draw".into(),
        });
    }
    let early_dist = Beta::new(early.shape1, early.shape2)
        .map_err(|e| AnalysisError::Distribution(e.to_string()))?;
    let late_dist = Beta::new(late.shape1, late.shape2)
        .map_err(|e| AnalysisError::Distribution(e.to_string()))?;

    let early_sim: Vec<f64> = (0..draws).map(|_| early_dist.sample(rng)).collect();
    let late_sim: Vec<f64> = (0..draws).map(|_| late_dist.sample(rng)).collect();

    let increase = log2_rr > 0.0;
    let agreeing = early_sim
        .iter()
        .zip(&late_sim)
        .filter(|(e, l)| if increase { l > e } else { e > l })
        .count();

    Ok(1.0 - agreeing as f64 / draws as f64)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ShrinkageResult {
    pub patient: String,
    pub analyzable: bool,
    pub observed_early: Option<f64>,
    pub observed_late: Option<f64>,
    pub posterior_early: Option<BetaParams>,
    pub posterior_late: Option<BetaParams>,
    pub log2_rr: Option<f64>,
    pub p_value: Option<f64>,
    pub padj: Option<f64>,
    pub significant: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct ShrinkageAnalysis {
    pub prior_early: BetaParams,
    pub prior_late: BetaParams,
    pub results: Vec<ShrinkageResult>,
}

impl ShrinkageAnalysis {
    pub fn calls(&self) -> Vec<Option<bool>> {
        self.results.iter().map(|r| r.significant).collect()
    }

    /// The fitted prior of each time point, one row per time point.
    pub fn prior_frame(&self) -> PolarsResult<DataFrame> {
        let priors = [self.prior_early, self.prior_late];
        df![
            "time_point" => TimePoint::ALL.iter().map(|tp| tp.label()).collect::<Vec<_>>(),
            "shape1" => priors.iter().map(|p| p.shape1).collect::<Vec<_>>(),
            "shape2" => priors.iter().map(|p| p.shape2).collect::<Vec<_>>(),
            "mean" => priors.iter().map(|p| p.mean()).collect::<Vec<_>>(),
        ]
    }
}

fn posteriors_for(
    record: &PatientCounts,
    prior_early: &BetaParams,
    prior_late: &BetaParams,
) -> Option<(BetaParams, BetaParams)> {
    if !record.is_analyzable() {
        return None;
    }
    let early = posterior(record.early.malignant?, record.early.normal()?, prior_early);
    let late = posterior(record.late.malignant?, record.late.normal()?, prior_late);
    Some((early, late))
}

/// Fit both priors, shrink every analyzable patient and test each for a shift.
///
/// A failed prior fit aborts the whole pipeline; a failed simulation only
/// leaves that patient untested.
pub fn run_shrinkage(records: &[PatientCounts], options: &ShrinkageOptions) -> Result<ShrinkageAnalysis> {
    let prior_early = fit_beta_prior(
        &usable_proportions(records, TimePoint::Early),
        &options.prior,
        TimePoint::Early,
    )?;
    let prior_late = fit_beta_prior(
        &usable_proportions(records, TimePoint::Late),
        &options.prior,
        TimePoint::Late,
    )?;

    let mut results = Vec::with_capacity(records.len());
    for (row, record) in records.iter().enumerate() {
        let posteriors = posteriors_for(record, &prior_early, &prior_late);

        let (log2_rr, p_value) = match posteriors {
            Some((early, late)) => {
                let rr = log2_relative_risk(&early, &late);
                let mut rng = patient_rng(options.seed, row);
                match empirical_p_value(rr, &early, &late, options.draws, &mut rng) {
                    Ok(p) => (Some(rr), Some(p)),
                    Err(e) => {
                        warn!("Skipping {}: {}", record.patient, e);
                        (Some(rr), None)
                    }
                }
            }
            None => (None, None),
        };
        debug!("{}: log2RR = {:?}, p = {:?}", record.patient, log2_rr, p_value);

        results.push(ShrinkageResult {
            patient: record.patient.clone(),
            analyzable: record.is_analyzable(),
            observed_early: record.early.proportion(),
            observed_late: record.late.proportion(),
            posterior_early: posteriors.map(|(e, _)| e),
            posterior_late: posteriors.map(|(_, l)| l),
            log2_rr,
            p_value,
            padj: None,
            significant: None,
        });
    }

    let p_values: Vec<Option<f64>> = results.iter().map(|r| r.p_value).collect();
    let padj = benjamini_hochberg(&p_values);
    let calls = significance_calls(&padj, options.alpha);
    for ((result, adjusted), call) in results.iter_mut().zip(padj).zip(calls) {
        result.padj = adjusted;
        result.significant = call;
    }

    let tested = p_values.iter().flatten().count();
    let significant = results.iter().filter(|r| r.significant == Some(true)).count();
    info!(
        "Shrinkage: {} of {} patients tested, {} significant at FDR < {}",
        tested,
        results.len(),
        significant,
        options.alpha
    );

    Ok(ShrinkageAnalysis {
        prior_early,
        prior_late,
        results,
    })
}

pub fn shrinkage_frame(results: &[ShrinkageResult]) -> PolarsResult<DataFrame> {
    let shape = |f: fn(&ShrinkageResult) -> Option<BetaParams>, pick: fn(&BetaParams) -> f64| {
        results.iter().map(|r| f(r).as_ref().map(pick)).collect::<Vec<Option<f64>>>()
    };
    let early = |r: &ShrinkageResult| r.posterior_early;
    let late = |r: &ShrinkageResult| r.posterior_late;

    DataFrame::new(vec![
        Column::from(Series::new("patient".into(), results.iter().map(|r| r.patient.as_str()).collect::<Vec<_>>())),
        Column::from(Series::new("analyzable".into(), results.iter().map(|r| r.analyzable).collect::<Vec<_>>())),
        Column::from(Series::new("observed_T1".into(), results.iter().map(|r| r.observed_early).collect::<Vec<_>>())),
        Column::from(Series::new("observed_T2".into(), results.iter().map(|r| r.observed_late).collect::<Vec<_>>())),
        Column::from(Series::new("shape1_T1".into(), shape(early, |b| b.shape1))),
        Column::from(Series::new("shape2_T1".into(), shape(early, |b| b.shape2))),
        Column::from(Series::new("shape1_T2".into(), shape(late, |b| b.shape1))),
        Column::from(Series::new("shape2_T2".into(), shape(late, |b| b.shape2))),
        Column::from(Series::new("posterior_T1".into(), shape(early, BetaParams::mean))),
        Column::from(Series::new("posterior_T2".into(), shape(late, BetaParams::mean))),
        Column::from(Series::new("log2_rr".into(), results.iter().map(|r| r.log2_rr).collect::<Vec<_>>())),
        Column::from(Series::new("p_value".into(), results.iter().map(|r| r.p_value).collect::<Vec<_>>())),
        Column::from(Series::new("padj".into(), results.iter().map(|r| r.padj).collect::<Vec<_>>())),
        Column::from(Series::new("significant".into(), results.iter().map(|r| r.significant).collect::<Vec<_>>())),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimePointCounts;

    fn patient(name: &str, early: (f64, f64), late: (f64, f64)) -> PatientCounts {
        PatientCounts {
            patient: name.into(),
            early: TimePointCounts { malignant: Some(early.0), total: Some(early.1), balanced: true },
            late: TimePointCounts { malignant: Some(late.0), total: Some(late.1), balanced: true },
        }
    }

    #[test]
    fn empty_counts_return_the_prior_mean() {
        let prior = BetaParams::new(2.0, 8.0);
        let post = posterior(0.0, 0.0, &prior);
        assert_eq!(post, prior);
        assert_eq!(post.mean(), 0.2);
    }

    #[test]
    fn large_counts_dominate_the_prior() {
        let post = posterior(1000.0, 1000.0, &BetaParams::new(2.0, 8.0));
        assert!((post.mean() - 0.5).abs() < 0.005);
    }

    #[test]
    fn identical_posteriors_give_half() {
        let shapes = BetaParams::new(30.0, 70.0);
        for direction in [1.0, -1.0] {
            let mut rng = patient_rng(1, 0);
            let p = empirical_p_value(direction, &shapes, &shapes, 100_000, &mut rng).unwrap();
            assert!((p - 0.5).abs() < 0.01, "p = {p}");
        }
    }

    #[test]
    fn fixed_seed_is_bit_reproducible() {
        let early = BetaParams::new(12.0, 88.0);
        let late = BetaParams::new(18.0, 82.0);
        let first = empirical_p_value(0.5, &early, &late, 10_000, &mut patient_rng(42, 3)).unwrap();
        let second = empirical_p_value(0.5, &early, &late, 10_000, &mut patient_rng(42, 3)).unwrap();
        assert_eq!(first.to_bits(), second.to_bits());
    }

    #[test]
    fn clear_shift_is_near_zero_and_reverse_claim_near_one() {
        let early = BetaParams::new(50.0, 950.0);
        let late = BetaParams::new(500.0, 500.0);
        let rr = log2_relative_risk(&early, &late);
        assert!(rr > 0.0);
        let p = empirical_p_value(rr, &early, &late, 10_000, &mut patient_rng(0, 0)).unwrap();
        assert!(p < 1e-3);
        let wrong = empirical_p_value(-rr, &early, &late, 10_000, &mut patient_rng(0, 0)).unwrap();
        assert!(wrong > 0.999);
    }

    #[test]
    fn zero_draws_is_rejected() {
        let b = BetaParams::new(1.0, 1.0);
        assert!(empirical_p_value(1.0, &b, &b, 0, &mut patient_rng(0, 0)).is_err());
    }

    #[test]
    fn unanalyzable_patients_stay_untested() {
        let mut records = vec![
            patient("a", (50.0, 1000.0), (55.0, 1000.0)),
            patient("b", (60.0, 1000.0), (58.0, 1000.0)),
            patient("c", (40.0, 1000.0), (45.0, 1000.0)),
            patient("d", (45.0, 1000.0), (40.0, 1000.0)),
        ];
        records[3].late.balanced = false;

        let options = ShrinkageOptions { draws: 2_000, ..Default::default() };
        let analysis = run_shrinkage(&records, &options).unwrap();
        let d = &analysis.results[3];
        assert!(!d.analyzable);
        assert_eq!(d.p_value, None);
        assert_eq!(d.padj, None);
        assert_eq!(d.significant, None);
        assert!(analysis.results[..3].iter().all(|r| r.padj.is_some()));

        let df = shrinkage_frame(&analysis.results).unwrap();
        assert_eq!(df.shape(), (4, 14));

        let priors = analysis.prior_frame().unwrap();
        assert_eq!(priors.shape(), (2, 4));
        let means = priors.column("mean").unwrap().f64().unwrap();
        assert_eq!(means.get(0), Some(analysis.prior_early.mean()));
        assert_eq!(means.get(1), Some(analysis.prior_late.mean()));
    }

    #[test]
    fn p_values_do_not_depend_on_other_patients() {
        // "b" has zero malignant reads, so it never enters the prior fit
        let mut records = vec![
            patient("a", (50.0, 1000.0), (55.0, 1000.0)),
            patient("b", (0.0, 1000.0), (0.0, 1000.0)),
            patient("c", (60.0, 1000.0), (58.0, 1000.0)),
            patient("d", (40.0, 1000.0), (45.0, 1000.0)),
            patient("e", (45.0, 1000.0), (52.0, 1000.0)),
        ];
        let options = ShrinkageOptions { draws: 2_000, ..Default::default() };
        let bits = |analysis: &ShrinkageAnalysis| -> Vec<Option<u64>> {
            analysis.results.iter().map(|r| r.p_value.map(f64::to_bits)).collect()
        };

        let all_tested = run_shrinkage(&records, &options).unwrap();
        records[1].late.balanced = false;
        let without_b = run_shrinkage(&records, &options).unwrap();

        assert_eq!(all_tested.prior_early, without_b.prior_early);
        assert!(all_tested.results[1].p_value.is_some());
        assert_eq!(without_b.results[1].p_value, None);
        let (before, after) = (bits(&all_tested), bits(&without_b));
        for row in [0, 2, 3, 4] {
            assert_eq!(before[row], after[row], "patient {}", records[row].patient);
        }
    }

    #[test]
    fn prior_failure_aborts_the_pipeline() {
        let records = vec![
            patient("a", (50.0, 1000.0), (55.0, 1000.0)),
            patient("b", (60.0, 1000.0), (58.0, 1000.0)),
        ];
        let err = run_shrinkage(&records, &ShrinkageOptions::default()).unwrap_err();
        assert!(matches!(err, AnalysisError::InsufficientData { .. }));
    }
}
