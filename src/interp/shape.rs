//! Multilinear shape functions on the reference segment, quad and hex.
//!
//! The reference cell is `[-1, 1]^d` with `2^d` corners. Corner `i` sits on
//! the high side of dimension `k` iff bit `k` of `i` is set, so for a hex the
//! corners run `(-,-,-), (+,-,-), (-,+,-), (+,+,-), (-,-,+), ...`.

use serde::{Deserialize, Serialize};

use crate::mesh_error::MeshGmgError;

/// Largest number of corners of a supported cell (hex).
pub const MAX_CORNERS: usize = 8;
/// Largest supported spatial dimension.
pub const MAX_DIM: usize = 3;

/// Spatial dimension of the reference cell.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub enum Dimension {
    One,
    Two,
    Three,
}

impl Dimension {
    #[inline]
    pub const fn get(self) -> usize {
        match self {
            Dimension::One => 1,
            Dimension::Two => 2,
            Dimension::Three => 3,
        }
    }

    /// `2^d`.
    #[inline]
    pub const fn num_corners(self) -> usize {
        1 << self.get()
    }
}

impl TryFrom<usize> for Dimension {
    type Error = MeshGmgError;

    fn try_from(d: usize) -> Result<Self, Self::Error> {
        match d {
            1 => Ok(Dimension::One),
            2 => Ok(Dimension::Two),
            3 => Ok(Dimension::Three),
            other => Err(MeshGmgError::UnsupportedDimension(other)),
        }
    }
}

impl From<Dimension> for usize {
    fn from(d: Dimension) -> usize {
        d.get()
    }
}

/// Basis values and reference-space gradients at one reference point.
///
/// Only the first `dim.num_corners()` corners and `dim.get()` directions are
/// meaningful; the remaining slots are zero.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ShapeValues {
    pub values: [f64; MAX_CORNERS],
    /// `gradients[k][i] = dN_i / dxi_k`.
    pub gradients: [[f64; MAX_CORNERS]; MAX_DIM],
}

/// Evaluate the `2^d` basis functions of `dim` and their derivatives at `xi`.
///
/// Components of `xi` beyond `dim` are ignored.
pub fn evaluate(dim: Dimension, xi: &[f64; MAX_DIM]) -> ShapeValues {
    let d = dim.get();
    let n = dim.num_corners();
    let scale = 1.0 / n as f64;
    let mut out = ShapeValues {
        values: [0.0; MAX_CORNERS],
        gradients: [[0.0; MAX_CORNERS]; MAX_DIM],
    };
    for i in 0..n {
        // One linear factor per dimension: 1 - xi_k or 1 + xi_k.
        let mut factors = [1.0; MAX_DIM];
        let mut signs = [0.0; MAX_DIM];
        for k in 0..d {
            let s = if (i >> k) & 1 == 1 { 1.0 } else { -1.0 };
            signs[k] = s;
            factors[k] = 1.0 + s * xi[k];
        }
        out.values[i] = scale * factors[..d].iter().product::<f64>();
        for k in 0..d {
            let others: f64 = (0..d).filter(|&m| m != k).map(|m| factors[m]).product();
            out.gradients[k][i] = scale * signs[k] * others;
        }
    }
    out
}
