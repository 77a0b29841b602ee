//! Benjamini-Hochberg false discovery rate correction

/// Benjamini-Hochberg adjusted p-values.
///
/// Non-finite p-values are left out of the correction (they do not count
/// toward the number of tests) and come back as NaN.
pub fn benjamini_hochberg(pvalues: &[f64]) -> Vec<f64> {
    let mut tested: Vec<usize> = (0..pvalues.len())
        .filter(|&i| pvalues[i].is_finite())
        .collect();
    let m = tested.len();
    let mut padj = vec![f64::NAN; pvalues.len()];
    if m == 0 {
        return padj;
    }

    tested.sort_by(|&a, &b| pvalues[a].total_cmp(&pvalues[b]));

    // walk from the largest p-value down, carrying the running minimum
    let mut cummin = f64::INFINITY;
    for (rank0, &i) in tested.iter().enumerate().rev() {
        let adj = (pvalues[i] * m as f64 / (rank0 + 1) as f64).min(1.0);
        cummin = cummin.min(adj);
        padj[i] = cummin;
    }
    padj
}
