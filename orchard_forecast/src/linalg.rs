//! Dense linear algebra helpers for least-squares estimation

use crate::error::{ForecastError, Result};
use ndarray::{Array1, Array2, Axis};

/// Lower-triangular Cholesky factor of a symmetric positive-definite matrix
pub fn cholesky(a: &Array2<f64>) -> Result<Array2<f64>> {
    let n = a.nrows();
    if n != a.ncols() {
        return Err(ForecastError::MathError(format!(
            "Cholesky needs a square matrix, got {}x{}",
            n,
            a.ncols()
        )));
    }

    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return Err(ForecastError::MathError(
                        "Matrix is not positive definite".to_string(),
                    ));
                }
                l[[i, i]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    Ok(l)
}

/// Solve `A X = B` for SPD `A` using its Cholesky factor
pub fn solve_spd(a: &Array2<f64>, b: &Array2<f64>) -> Result<Array2<f64>> {
    let l = cholesky(a)?;
    let n = l.nrows();
    if b.nrows() != n {
        return Err(ForecastError::MathError(format!(
            "Right-hand side has {} rows, expected {}",
            b.nrows(),
            n
        )));
    }

    let mut x = b.clone();
    for col in 0..b.ncols() {
        // forward: L y = b
        for i in 0..n {
            let mut sum = x[[i, col]];
            for k in 0..i {
                sum -= l[[i, k]] * x[[k, col]];
            }
            x[[i, col]] = sum / l[[i, i]];
        }
        // backward: L^T x = y
        for i in (0..n).rev() {
            let mut sum = x[[i, col]];
            for k in i + 1..n {
                sum -= l[[k, i]] * x[[k, col]];
            }
            x[[i, col]] = sum / l[[i, i]];
        }
    }
    Ok(x)
}

/// Least-squares coefficients for `Y ≈ X B` via ridge-stabilised normal equations.
///
/// A tiny ridge proportional to the mean diagonal keeps collinear
/// regressors (e.g. constant columns after scaling) solvable.
pub fn least_squares(x: &Array2<f64>, y: &Array2<f64>) -> Result<Array2<f64>> {
    if x.nrows() != y.nrows() {
        return Err(ForecastError::MathError(format!(
            "Design matrix has {} rows but response has {}",
            x.nrows(),
            y.nrows()
        )));
    }
    if x.nrows() < x.ncols() {
        return Err(ForecastError::MathError(format!(
            "Underdetermined system: {} observations for {} regressors",
            x.nrows(),
            x.ncols()
        )));
    }
    if x.iter().chain(y.iter()).any(|v| !v.is_finite()) {
        return Err(ForecastError::MathError(
            "Non-finite values in regression data".to_string(),
        ));
    }

    let mut xtx = x.t().dot(x);
    let xty = x.t().dot(y);

    let k = xtx.nrows();
    let mean_diag = (0..k).map(|i| xtx[[i, i]]).sum::<f64>() / k.max(1) as f64;
    let ridge = 1e-10 * mean_diag.max(1.0);
    for i in 0..k {
        xtx[[i, i]] += ridge;
    }

    solve_spd(&xtx, &xty)
}

/// Least squares for a single response vector
pub fn least_squares_vec(x: &Array2<f64>, y: &Array1<f64>) -> Result<Array1<f64>> {
    let y2 = y.clone().insert_axis(Axis(1));
    let b = least_squares(x, &y2)?;
    Ok(b.column(0).to_owned())
}

/// Natural log of the determinant of an SPD matrix
pub fn log_det_spd(a: &Array2<f64>) -> Result<f64> {
    let l = cholesky(a)?;
    Ok((0..l.nrows()).map(|i| l[[i, i]].ln()).sum::<f64>() * 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_cholesky_reconstructs_matrix() {
        let a = array![[4.0, 2.0], [2.0, 3.0]];
        let l = cholesky(&a).unwrap();
        let back = l.dot(&l.t());
        for (x, y) in back.iter().zip(a.iter()) {
            assert_relative_eq!(x, y, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_cholesky_rejects_indefinite() {
        let a = array![[1.0, 2.0], [2.0, 1.0]];
        assert!(cholesky(&a).is_err());
    }

    #[test]
    fn test_least_squares_recovers_line() {
        // y = 2 + 3x
        let x = array![[1.0, 0.0], [1.0, 1.0], [1.0, 2.0], [1.0, 3.0]];
        let y = array![2.0, 5.0, 8.0, 11.0];
        let b = least_squares_vec(&x, &y).unwrap();
        assert_relative_eq!(b[0], 2.0, epsilon = 1e-6);
        assert_relative_eq!(b[1], 3.0, epsilon = 1e-6);
    }

    #[test]
    fn test_log_det() {
        let a = array![[2.0, 0.0], [0.0, 8.0]];
        assert_relative_eq!(log_det_spd(&a).unwrap(), 16f64.ln(), epsilon = 1e-12);
    }
}
