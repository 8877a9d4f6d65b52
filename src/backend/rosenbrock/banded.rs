//! Packed band storage.
//!
//! A banded Jacobian with `lower` sub- and `upper` super-diagonals is
//! passed as `lower + upper + 1` rows of length `n`, row `upper + i - j`
//! holding `J[i][j]` (the LAPACK `gbtrf` layout without the extra fill-in
//! rows).

use crate::backend::Band;
use crate::callback::Matrix;
use crate::error::{IntegrateError, IntegrateResult};

/// Expand packed band storage into a dense row-major `n x n` buffer.
pub(crate) fn expand(packed: &Matrix, band: Band, n: usize) -> IntegrateResult<Vec<f64>> {
    if packed.len() != band.rows() || packed.iter().any(|row| row.len() != n) {
        return Err(IntegrateError::InvalidInput {
            context: format!(
                "banded Jacobian must have {} rows of length {}, got {} rows",
                band.rows(),
                n,
                packed.len()
            ),
        });
    }

    let mut dense = vec![0.0; n * n];
    for i in 0..n {
        let j_lo = i.saturating_sub(band.lower);
        let j_hi = (i + band.upper).min(n - 1);
        for j in j_lo..=j_hi {
            dense[i * n + j] = packed[band.upper + i - j][j];
        }
    }
    Ok(dense)
}

/// Flatten a dense Jacobian, checking it is `n x n`.
pub(crate) fn flatten(jac: &Matrix, n: usize) -> IntegrateResult<Vec<f64>> {
    if jac.len() != n || jac.iter().any(|row| row.len() != n) {
        return Err(IntegrateError::InvalidInput {
            context: format!("Jacobian must be {} x {}, got {} rows", n, n, jac.len()),
        });
    }
    Ok(jac.iter().flatten().copied().collect())
}

/// Zero every entry outside the band of a dense row-major buffer.
pub(crate) fn mask(dense: &mut [f64], band: Band, n: usize) {
    for i in 0..n {
        for j in 0..n {
            if j + band.lower < i || i + band.upper < j {
                dense[i * n + j] = 0.0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_tridiagonal() {
        // [[2, -1, 0], [-1, 2, -1], [0, -1, 2]]
        let packed = vec![
            vec![0.0, -1.0, -1.0],
            vec![2.0, 2.0, 2.0],
            vec![-1.0, -1.0, 0.0],
        ];
        let dense = expand(&packed, Band::new(1, 1), 3).unwrap();
        assert_eq!(dense, vec![2.0, -1.0, 0.0, -1.0, 2.0, -1.0, 0.0, -1.0, 2.0]);
    }

    #[test]
    fn test_expand_lower_only() {
        // [[1, 0], [3, 2]]
        let packed = vec![vec![1.0, 2.0], vec![3.0, 0.0]];
        let dense = expand(&packed, Band::new(1, 0), 2).unwrap();
        assert_eq!(dense, vec![1.0, 0.0, 3.0, 2.0]);
    }

    #[test]
    fn test_expand_rejects_wrong_shape() {
        let packed = vec![vec![1.0, 2.0]];
        assert!(expand(&packed, Band::new(1, 0), 2).is_err());
        assert!(flatten(&vec![vec![1.0]], 2).is_err());
    }

    #[test]
    fn test_mask() {
        let mut dense = vec![1.0; 9];
        mask(&mut dense, Band::new(1, 0), 3);
        assert_eq!(dense, vec![1.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0, 1.0, 1.0]);
    }
}
