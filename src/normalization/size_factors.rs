//! Size factor estimation using the median of ratios method

use ndarray::{Array1, ArrayView2, Axis};

use crate::data::TwoGroupDataSet;
use crate::error::{AnalysisError, Result};
use crate::stats::median;

/// Estimate size factors for the two-group subset and store them (together
/// with the normalized counts) on the dataset.
///
/// Accounts for both sequencing depth and RNA composition bias.
pub fn estimate_size_factors(ds: &mut TwoGroupDataSet) -> Result<()> {
    let size_factors = median_of_ratios(ds.counts().counts())?;
    log::debug!("Size factors: {:?}", size_factors.to_vec());
    ds.set_size_factors(size_factors)?;
    Ok(())
}

/// Standard median of ratios method.
///
/// The reference for each gene is its geometric mean across samples; only
/// genes with a positive count in every sample (and no missing values)
/// contribute.
pub fn median_of_ratios(counts: ArrayView2<f64>) -> Result<Array1<f64>> {
    let (n_genes, n_samples) = counts.dim();

    if n_genes == 0 || n_samples == 0 {
        return Err(AnalysisError::EmptyData {
            reason: "Count matrix is empty".to_string(),
        });
    }

    // Step 1: log geometric mean for each usable gene
    let references: Vec<(usize, f64)> = counts
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, row)| row.iter().all(|&x| x > 0.0))
        .map(|(i, row)| {
            let log_mean = row.iter().map(|&x| x.ln()).sum::<f64>() / n_samples as f64;
            (i, log_mean)
        })
        .collect();

    if references.is_empty() {
        return Err(AnalysisError::SizeFactorFailed {
            reason: "every gene has a zero or missing count in at least one sample; \
                     the median-of-ratios reference cannot be formed"
                .to_string(),
        });
    }

    // Step 2: median ratio to the reference, per sample
    let mut size_factors = Array1::zeros(n_samples);
    for j in 0..n_samples {
        let log_ratios: Vec<f64> = references
            .iter()
            .map(|&(i, log_mean)| counts[[i, j]].ln() - log_mean)
            .collect();
        size_factors[j] = median(&log_ratios).exp();
    }

    if size_factors.iter().any(|&x| x <= 0.0 || !x.is_finite()) {
        return Err(AnalysisError::SizeFactorFailed {
            reason: "Invalid size factors computed".to_string(),
        });
    }

    Ok(size_factors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::CountMatrix;
    use ndarray::array;

    fn create_test_dataset() -> TwoGroupDataSet {
        let counts = CountMatrix::new(
            array![
                [100.0, 200.0, 80.0, 160.0],
                [500.0, 1000.0, 400.0, 800.0],
                [50.0, 100.0, 40.0, 80.0],
                [200.0, 400.0, 160.0, 320.0]
            ],
            vec![
                "gene1".to_string(),
                "gene2".to_string(),
                "gene3".to_string(),
                "gene4".to_string(),
            ],
            vec!["s1".to_string(), "s2".to_string(), "s3".to_string(), "s4".to_string()],
        )
        .unwrap();

        TwoGroupDataSet::new(counts, "A", "B", vec![false, false, true, true]).unwrap()
    }

    #[test]
    fn test_size_factor_estimation() {
        let mut ds = create_test_dataset();
        estimate_size_factors(&mut ds).unwrap();

        let sf = ds.size_factors().unwrap();
        assert_eq!(sf.len(), 4);
        assert!(sf.iter().all(|&x| x > 0.0));

        // s2 has 2x the depth of s1, s4 has 2x the depth of s3
        assert!((sf[1] / sf[0] - 2.0).abs() < 1e-9);
        assert!((sf[3] / sf[2] - 2.0).abs() < 1e-9);

        // geometric mean of the size factors is 1
        let log_mean: f64 = sf.iter().map(|x| x.ln()).sum::<f64>() / 4.0;
        assert!(log_mean.abs() < 1e-9);
    }

    #[test]
    fn test_normalized_counts() {
        let mut ds = create_test_dataset();
        estimate_size_factors(&mut ds).unwrap();

        let norm_counts = ds.normalized_counts().unwrap();
        let gene1_norm: Vec<f64> = norm_counts.row(0).to_vec();
        let mean = gene1_norm.iter().sum::<f64>() / 4.0;
        for val in gene1_norm {
            assert!((val - mean).abs() / mean < 0.1);
        }
    }

    #[test]
    fn test_zero_and_missing_genes_are_skipped() {
        let counts = array![
            [100.0, 200.0, 0.0, 160.0],
            [500.0, 1000.0, 400.0, 800.0],
            [f64::NAN, 100.0, 40.0, 80.0]
        ];
        let sf = median_of_ratios(counts.view()).unwrap();
        // only gene 2 contributes
        assert!((sf[1] / sf[0] - 2.0).abs() < 1e-9);
        assert!((sf[2] / sf[0] - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_no_reference_genes() {
        let counts = array![[0.0, 5.0], [3.0, 0.0]];
        assert!(matches!(
            median_of_ratios(counts.view()),
            Err(AnalysisError::SizeFactorFailed { .. })
        ));
    }
}
