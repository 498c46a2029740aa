//! Allocation-free dense solve for the `d x d` Newton systems (`d <= 3`).
//!
//! Gaussian elimination with partial pivoting. Badly scaled systems are
//! equilibrated first: rows, then columns, are scaled by the inverse of their
//! largest magnitude whenever the ratio of smallest to largest scale drops
//! below [`EQUILIBRATION_THRESHOLD`].

use crate::interp::shape::{Dimension, MAX_DIM};

/// Scale ratio below which the system is equilibrated before factoring.
pub const EQUILIBRATION_THRESHOLD: f64 = 0.1;

/// The matrix has a zero row, zero column or zero pivot.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SingularMatrix;

/// A `d x d` system stored in the top-left corner of a 3x3 array.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct LocalSystem {
    dim: Dimension,
    a: [[f64; MAX_DIM]; MAX_DIM],
}

impl LocalSystem {
    pub fn zeros(dim: Dimension) -> Self {
        Self {
            dim,
            a: [[0.0; MAX_DIM]; MAX_DIM],
        }
    }

    #[inline]
    pub fn dim(&self) -> Dimension {
        self.dim
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.a[row][col]
    }

    #[inline]
    pub fn add(&mut self, row: usize, col: usize, v: f64) {
        self.a[row][col] += v;
    }

    /// Row and column scale factors, or `None` when no scaling is needed.
    fn equilibration(&self) -> Result<Option<([f64; MAX_DIM], [f64; MAX_DIM])>, SingularMatrix> {
        let n = self.dim.get();
        let mut r = [1.0; MAX_DIM];
        let mut c = [1.0; MAX_DIM];
        for i in 0..n {
            let m = self.a[i][..n].iter().fold(0.0_f64, |m, v| m.max(v.abs()));
            if m == 0.0 {
                return Err(SingularMatrix);
            }
            r[i] = 1.0 / m;
        }
        for j in 0..n {
            let m = (0..n).fold(0.0_f64, |m, i| m.max(r[i] * self.a[i][j].abs()));
            if m == 0.0 {
                return Err(SingularMatrix);
            }
            c[j] = 1.0 / m;
        }
        let ratio = |s: &[f64]| {
            let (lo, hi) = s
                .iter()
                .fold((f64::INFINITY, 0.0_f64), |(lo, hi), &v| (lo.min(v), hi.max(v)));
            lo / hi
        };
        // Scales are inverse magnitudes, so min/max matches the magnitude ratio.
        if ratio(&r[..n]) < EQUILIBRATION_THRESHOLD || ratio(&c[..n]) < EQUILIBRATION_THRESHOLD {
            Ok(Some((r, c)))
        } else {
            Ok(None)
        }
    }

    /// Solve `A x = b`; only the first `d` entries of `b` are read.
    pub fn solve(&self, b: &[f64; MAX_DIM]) -> Result<[f64; MAX_DIM], SingularMatrix> {
        let n = self.dim.get();
        let mut a = self.a;
        let mut rhs = *b;
        let scaling = self.equilibration()?;
        if let Some((r, c)) = &scaling {
            for i in 0..n {
                for j in 0..n {
                    a[i][j] *= r[i] * c[j];
                }
                rhs[i] *= r[i];
            }
        }

        for col in 0..n {
            let pivot = (col..n)
                .max_by(|&p, &q| a[p][col].abs().total_cmp(&a[q][col].abs()))
                .unwrap_or(col);
            let p = a[pivot][col];
            if p == 0.0 || !p.is_finite() {
                return Err(SingularMatrix);
            }
            a.swap(col, pivot);
            rhs.swap(col, pivot);
            for row in col + 1..n {
                let f = a[row][col] / a[col][col];
                for k in col..n {
                    a[row][k] -= f * a[col][k];
                }
                rhs[row] -= f * rhs[col];
            }
        }

        let mut x = [0.0; MAX_DIM];
        for row in (0..n).rev() {
            let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
            x[row] = (rhs[row] - tail) / a[row][row];
        }
        if let Some((_, c)) = scaling {
            for (xi, ci) in x.iter_mut().zip(c).take(n) {
                *xi *= ci;
            }
        }
        if x[..n].iter().all(|v| v.is_finite()) {
            Ok(x)
        } else {
            Err(SingularMatrix)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn system(dim: Dimension, rows: &[[f64; 3]]) -> LocalSystem {
        let mut s = LocalSystem::zeros(dim);
        for (i, row) in rows.iter().enumerate() {
            for (j, &v) in row.iter().enumerate().take(dim.get()) {
                s.add(i, j, v);
            }
        }
        s
    }

    #[test]
    fn needs_pivoting() {
        let s = system(Dimension::Two, &[[0.0, 2.0, 0.0], [3.0, 1.0, 0.0]]);
        let x = s.solve(&[4.0, 5.0, 0.0]).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-14);
        assert!((x[1] - 2.0).abs() < 1e-14);
    }

    #[test]
    fn badly_scaled_system_is_equilibrated() {
        let s = system(
            Dimension::Three,
            &[[1e8, 0.0, 0.0], [0.0, 1.0, 1.0], [0.0, 0.0, 1e-6]],
        );
        assert!(s.equilibration().unwrap().is_some());
        let x = s.solve(&[1e8, 3.0, 2e-6]).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 1.0).abs() < 1e-12);
        assert!((x[2] - 2.0).abs() < 1e-12);
    }

    #[test]
    fn singular_is_reported() {
        let s = system(Dimension::Two, &[[1.0, 2.0, 0.0], [2.0, 4.0, 0.0]]);
        assert_eq!(s.solve(&[1.0, 1.0, 0.0]), Err(SingularMatrix));
        let z = LocalSystem::zeros(Dimension::One);
        assert_eq!(z.solve(&[1.0, 0.0, 0.0]), Err(SingularMatrix));
    }
}
