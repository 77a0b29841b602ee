//! Small dense linear algebra helpers on top of nalgebra
//!
//! The per-gene models have a handful of coefficients, so everything here
//! works on tiny symmetric systems built from an ndarray design matrix.

use nalgebra::{DMatrix, DVector};
use ndarray::Array2;

/// Build X'WX for a design matrix and per-sample weights
pub fn weighted_gram(design: &Array2<f64>, weights: &[f64]) -> DMatrix<f64> {
    let p = design.ncols();
    let mut xtwx = DMatrix::zeros(p, p);
    for (i, &w) in weights.iter().enumerate() {
        for j in 0..p {
            let xij = design[[i, j]];
            if xij == 0.0 {
                continue;
            }
            for k in 0..p {
                xtwx[(j, k)] += w * xij * design[[i, k]];
            }
        }
    }
    xtwx
}

/// Build X'Wz
pub fn weighted_cross(design: &Array2<f64>, weights: &[f64], response: &[f64]) -> DVector<f64> {
    let p = design.ncols();
    let mut xtwz = DVector::zeros(p);
    for (i, (&w, &z)) in weights.iter().zip(response).enumerate() {
        for j in 0..p {
            xtwz[j] += w * design[[i, j]] * z;
        }
    }
    xtwz
}

/// Smallest pivot accepted, relative to the largest, before a factorization
/// is treated as rank deficient
const PIVOT_TOL: f64 = 16.0 * f64::EPSILON;

/// True when the squared pivots of a triangular factor span more than
/// `1 / PIVOT_TOL`. Cholesky and LU both succeed on matrices that are
/// singular up to rounding, so their results are only trusted past this check.
fn rank_deficient(diagonal: impl Iterator<Item = f64>, squared: bool) -> bool {
    let pivots: Vec<f64> = diagonal
        .map(|d| if squared { d * d } else { d.abs() })
        .collect();
    if pivots.iter().any(|p| !p.is_finite()) {
        return true;
    }
    let largest = pivots.iter().copied().fold(0.0_f64, f64::max);
    let smallest = pivots.iter().copied().fold(f64::INFINITY, f64::min);
    largest <= 0.0 || smallest <= largest * PIVOT_TOL
}

/// Solve a symmetric positive definite system, falling back to LU when the
/// Cholesky factorization fails. `None` when the matrix is singular.
pub fn solve_spd(a: &DMatrix<f64>, b: &DVector<f64>) -> Option<DVector<f64>> {
    if let Some(chol) = a.clone().cholesky() {
        if rank_deficient(chol.l_dirty().diagonal().iter().copied(), true) {
            return None;
        }
        return Some(chol.solve(b));
    }
    let lu = a.clone().lu();
    if rank_deficient(lu.u().diagonal().iter().copied(), false) {
        return None;
    }
    lu.solve(b)
}

/// Inverse of a symmetric positive definite matrix, `None` when singular
pub fn invert_spd(a: &DMatrix<f64>) -> Option<DMatrix<f64>> {
    if let Some(chol) = a.clone().cholesky() {
        if rank_deficient(chol.l_dirty().diagonal().iter().copied(), true) {
            return None;
        }
        return Some(chol.inverse());
    }
    let lu = a.clone().lu();
    if rank_deficient(lu.u().diagonal().iter().copied(), false) {
        return None;
    }
    lu.try_inverse()
}

/// Linear predictor x_i . beta for one sample
pub fn linear_predictor(design: &Array2<f64>, row: usize, beta: &[f64]) -> f64 {
    beta.iter()
        .enumerate()
        .map(|(j, &b)| design[[row, j]] * b)
        .sum()
}

/// Ordinary least squares coefficients, `None` for a singular X'X
pub fn ols(design: &Array2<f64>, response: &[f64]) -> Option<Vec<f64>> {
    let ones = vec![1.0; design.nrows()];
    let xtx = weighted_gram(design, &ones);
    let xty = weighted_cross(design, &ones, response);
    solve_spd(&xtx, &xty).map(|beta| beta.iter().copied().collect())
}
