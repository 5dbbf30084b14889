//! Benjamini-Hochberg false discovery rate adjustment.

/// Adjust the present p-values for multiple testing.
///
/// Missing entries stay missing and do not count towards the number of tests,
/// so each method is corrected over the patients it could actually test.
pub fn benjamini_hochberg(pvalues: &[Option<f64>]) -> Vec<Option<f64>> {
    let mut tested: Vec<(usize, f64)> = pvalues
        .iter()
        .enumerate()
        .filter_map(|(i, p)| p.filter(|v| v.is_finite()).map(|v| (i, v)))
        .collect();

    let mut adjusted = vec![None; pvalues.len()];
    let m = tested.len();
    if m == 0 {
        return adjusted;
    }

    tested.sort_by(|a, b| a.1.total_cmp(&b.1));

    // Walk from the largest p-value down, carrying the running minimum.
    let mut running_min = 1.0_f64;
    for (rank0, &(idx, p)) in tested.iter().enumerate().rev() {
        let rank = rank0 + 1;
        running_min = running_min.min(p * m as f64 / rank as f64);
        adjusted[idx] = Some(running_min);
    }
    adjusted
}

/// Significance call: missing stays missing.
pub fn significance_calls(adjusted: &[Option<f64>], alpha: f64) -> Vec<Option<bool>> {
    adjusted.iter().map(|p| p.map(|v| v < alpha)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_hand_computed_values() {
        let padj = benjamini_hochberg(&[Some(0.01), Some(0.04), Some(0.03), Some(0.02)]);
        // every raw p times 4/rank equals 0.04, so all adjust to 0.04
        for adj in padj {
            assert!((adj.unwrap() - 0.04).abs() < 1e-12);
        }
    }

    #[test]
    fn sorted_input_gives_monotone_output() {
        let pvalues = [0.001, 0.008, 0.039, 0.041, 0.042, 0.06, 0.074, 0.205, 0.212, 0.216];
        let padj = benjamini_hochberg(&pvalues.map(Some));
        for pair in padj.windows(2) {
            assert!(pair[0].unwrap() <= pair[1].unwrap());
        }
        for (p, adj) in pvalues.iter().zip(&padj) {
            assert!(adj.unwrap() >= *p);
            assert!(adj.unwrap() <= 1.0);
        }
    }

    #[test]
    fn missing_values_are_excluded_from_the_family() {
        let padj = benjamini_hochberg(&[Some(0.01), None, Some(0.02)]);
        assert_eq!(padj[1], None);
        // two tests, not three
        assert!((padj[0].unwrap() - 0.02).abs() < 1e-12);
        assert!((padj[2].unwrap() - 0.02).abs() < 1e-12);
    }

    #[test]
    fn all_missing_stays_missing() {
        assert_eq!(benjamini_hochberg(&[None, None]), vec![None, None]);
        assert!(benjamini_hochberg(&[]).is_empty());
    }

    #[test]
    fn calls_keep_missing() {
        let calls = significance_calls(&[Some(0.01), None, Some(0.2)], 0.05);
        assert_eq!(calls, vec![Some(true), None, Some(false)]);
    }
}
