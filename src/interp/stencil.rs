//! Interpolation stencils from Newton inversion of the isoparametric map.
//!
//! For a fine node at `x_p` and the `2^d` coarse corners `x_i` around it, the
//! solver looks for the reference point `xi` with `sum_i N_i(xi) x_i = x_p`.
//! The basis values at that point are the interpolation weights.

use crate::interp::local_solve::{LocalSystem, SingularMatrix};
use crate::interp::params::NewtonOptions;
use crate::interp::shape::{Dimension, MAX_CORNERS, MAX_DIM, ShapeValues, evaluate};

/// Weights of one fine node plus the Newton history that produced them.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Stencil {
    weights: [f64; MAX_CORNERS],
    len: usize,
    /// Reference-space point of the final evaluation.
    pub reference_point: [f64; MAX_DIM],
    pub iterations: usize,
    pub residual_norm: f64,
    pub reference_norm: f64,
    pub converged: bool,
}

impl Stencil {
    /// The stencil of a fine node that coincides with one coarse node.
    pub fn coincident() -> Self {
        let mut weights = [0.0; MAX_CORNERS];
        weights[0] = 1.0;
        Self {
            weights,
            len: 1,
            reference_point: [0.0; MAX_DIM],
            iterations: 0,
            residual_norm: 0.0,
            reference_norm: 0.0,
            converged: true,
        }
    }

    #[inline]
    pub fn weights(&self) -> &[f64] {
        &self.weights[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

fn residual(
    dim: Dimension,
    shape: &ShapeValues,
    target: &[f64; MAX_DIM],
    corners: &[[f64; MAX_DIM]; MAX_CORNERS],
) -> [f64; MAX_DIM] {
    let mut r = [0.0; MAX_DIM];
    for (j, rj) in r.iter_mut().enumerate().take(dim.get()) {
        *rj = target[j]
            - (0..dim.num_corners())
                .map(|i| shape.values[i] * corners[i][j])
                .sum::<f64>();
    }
    r
}

#[inline]
fn norm(dim: Dimension, v: &[f64; MAX_DIM]) -> f64 {
    v[..dim.get()].iter().map(|x| x * x).sum::<f64>().sqrt()
}

/// Residual floor in units of `f64::EPSILON` times the coordinate magnitude.
const ROUNDOFF_ULPS: f64 = 64.0;

/// Smallest residual norm that is distinguishable from round-off for this cell.
fn roundoff_floor(
    dim: Dimension,
    target: &[f64; MAX_DIM],
    corners: &[[f64; MAX_DIM]; MAX_CORNERS],
) -> f64 {
    let scale = corners[..dim.num_corners()]
        .iter()
        .chain(std::iter::once(target))
        .flat_map(|x| x[..dim.get()].iter())
        .fold(0.0f64, |m, x| m.max(x.abs()));
    ROUNDOFF_ULPS * f64::EPSILON * scale
}

/// Newton-solve for the linear interpolation weights of `target`.
///
/// Starts at the reference centre and stops once the residual norm is at
/// most `opts.tolerance` times the residual norm at the centre, or after
/// `opts.max_iterations` updates. The threshold never drops below the
/// round-off level of the cell's coordinates, so a target at the cell centre
/// converges after one update. A non-converged result is returned with
/// `converged == false`; only a singular Jacobian is an error.
pub fn compute_linear_stencil(
    dim: Dimension,
    target: &[f64; MAX_DIM],
    corners: &[[f64; MAX_DIM]; MAX_CORNERS],
    opts: &NewtonOptions,
) -> Result<Stencil, SingularMatrix> {
    let d = dim.get();
    let mut xi = [0.0; MAX_DIM];
    let mut shape = evaluate(dim, &xi);
    let mut r = residual(dim, &shape, target, corners);
    let reference_norm = norm(dim, &r);
    let threshold = (opts.tolerance * reference_norm).max(roundoff_floor(dim, target, corners));

    let mut iterations = 0;
    let mut residual_norm = reference_norm;
    while iterations < opts.max_iterations {
        iterations += 1;
        let mut jac = LocalSystem::zeros(dim);
        for j in 0..d {
            for k in 0..d {
                let djk: f64 = (0..dim.num_corners())
                    .map(|i| shape.gradients[k][i] * corners[i][j])
                    .sum();
                jac.add(j, k, djk);
            }
        }
        let delta = jac.solve(&r)?;
        for k in 0..d {
            xi[k] += delta[k];
        }
        shape = evaluate(dim, &xi);
        r = residual(dim, &shape, target, corners);
        residual_norm = norm(dim, &r);
        if residual_norm <= threshold {
            break;
        }
    }

    let mut weights = [0.0; MAX_CORNERS];
    weights[..dim.num_corners()].copy_from_slice(&shape.values[..dim.num_corners()]);
    Ok(Stencil {
        weights,
        len: dim.num_corners(),
        reference_point: xi,
        iterations,
        residual_norm,
        reference_norm,
        converged: residual_norm <= threshold,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_corners(dim: Dimension) -> [[f64; MAX_DIM]; MAX_CORNERS] {
        let mut c = [[0.0; MAX_DIM]; MAX_CORNERS];
        for (i, corner) in c.iter_mut().enumerate().take(dim.num_corners()) {
            for (k, x) in corner.iter_mut().enumerate().take(dim.get()) {
                *x = ((i >> k) & 1) as f64;
            }
        }
        c
    }

    #[test]
    fn segment_midpoint() {
        let s = compute_linear_stencil(
            Dimension::One,
            &[0.5, 0.0, 0.0],
            &unit_corners(Dimension::One),
            &NewtonOptions::default(),
        )
        .unwrap();
        assert_eq!(s.len(), 2);
        assert!((s.weights()[0] - 0.5).abs() < 1e-12);
        assert!((s.weights()[1] - 0.5).abs() < 1e-12);
        assert!(s.converged);
    }

    #[test]
    fn skewed_quad_reproduces_target() {
        let mut corners = [[0.0; MAX_DIM]; MAX_CORNERS];
        corners[0] = [0.0, 0.0, 0.0];
        corners[1] = [2.0, 0.2, 0.0];
        corners[2] = [0.1, 1.0, 0.0];
        corners[3] = [2.3, 1.4, 0.0];
        let target = [1.2, 0.7, 0.0];
        let s = compute_linear_stencil(Dimension::Two, &target, &corners, &NewtonOptions::default())
            .unwrap();
        assert!(s.converged);
        let mut x = [0.0; 2];
        for (i, w) in s.weights().iter().enumerate() {
            x[0] += w * corners[i][0];
            x[1] += w * corners[i][1];
        }
        assert!((x[0] - target[0]).abs() < 1e-5);
        assert!((x[1] - target[1]).abs() < 1e-5);
        assert!((s.weights().iter().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn degenerate_corners_are_singular() {
        let mut corners = [[0.0; MAX_DIM]; MAX_CORNERS];
        corners[1] = [1.0, 0.0, 0.0];
        corners[3] = [1.0, 0.0, 0.0];
        let r = compute_linear_stencil(
            Dimension::Two,
            &[0.5, 0.0, 0.0],
            &corners,
            &NewtonOptions::default(),
        );
        assert_eq!(r, Err(SingularMatrix));
    }

    #[test]
    fn iteration_cap_reports_non_convergence() {
        let opts = NewtonOptions {
            max_iterations: 1,
            tolerance: 1e-14,
        };
        let mut corners = [[0.0; MAX_DIM]; MAX_CORNERS];
        corners[1] = [1.0, 0.0, 0.0];
        corners[2] = [0.0, 1.0, 0.0];
        corners[3] = [3.0, 3.0, 0.0];
        let s = compute_linear_stencil(Dimension::Two, &[0.9, 0.2, 0.0], &corners, &opts).unwrap();
        assert_eq!(s.iterations, 1);
        assert!(!s.converged);
        assert!(s.residual_norm > 0.0);
    }

    #[test]
    fn roundoff_reference_norm_still_converges() {
        // Centre of the cell up to round-off in the inputs.
        let mut corners = [[0.0; MAX_DIM]; MAX_CORNERS];
        let (x0, x1, y0, y1) = (0.1, 0.4, 0.3, 0.7);
        corners[0] = [x0, y0, 0.0];
        corners[1] = [x1, y0, 0.0];
        corners[2] = [x0, y1, 0.0];
        corners[3] = [x1, y1, 0.0];
        let target = [0.1 + 0.15, 0.3 + 0.2, 0.0];
        let s = compute_linear_stencil(Dimension::Two, &target, &corners, &NewtonOptions::default())
            .unwrap();
        assert!(s.reference_norm < 1e-15);
        assert!(s.converged);
        assert_eq!(s.iterations, 1);
        for w in s.weights() {
            assert!((w - 0.25).abs() < 1e-12);
        }
    }

    #[test]
    fn floor_follows_coordinate_magnitude() {
        let mut far = [[0.0; MAX_DIM]; MAX_CORNERS];
        far[0] = [1.0e6, 0.0, 0.0];
        far[1] = [1.0e6 + 2.0, 0.0, 0.0];
        let near = unit_corners(Dimension::One);
        let f_far = roundoff_floor(Dimension::One, &[1.0e6 + 1.0, 0.0, 0.0], &far);
        let f_near = roundoff_floor(Dimension::One, &[0.5, 0.0, 0.0], &near);
        assert!(f_far > 1.0e5 * f_near);
        assert!(f_far < 1e-7);
    }
}
