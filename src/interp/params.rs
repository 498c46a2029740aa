//! Interpolation parameters.
//!
//! All structs implement `Default` with the values the level builder uses
//! when nothing is configured, so partial configuration reads naturally:
//!
//! ```
//! use mesh_gmg::interp::params::{InterpolationParams, NonConvergencePolicy};
//! let params = InterpolationParams {
//!     non_convergence: NonConvergencePolicy::Error,
//!     ..Default::default()
//! };
//! assert_eq!(params.newton.max_iterations, 5);
//! ```

use serde::{Deserialize, Serialize};

use crate::mesh_error::MeshGmgError;

/// Interpolation order: piecewise constant or multilinear.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum InterpolationOrder {
    Constant,
    #[default]
    Linear,
}

impl TryFrom<u8> for InterpolationOrder {
    type Error = MeshGmgError;

    fn try_from(order: u8) -> Result<Self, Self::Error> {
        match order {
            0 => Ok(InterpolationOrder::Constant),
            1 => Ok(InterpolationOrder::Linear),
            other => Err(MeshGmgError::UnsupportedOrder(other)),
        }
    }
}

impl From<InterpolationOrder> for u8 {
    fn from(order: InterpolationOrder) -> u8 {
        match order {
            InterpolationOrder::Constant => 0,
            InterpolationOrder::Linear => 1,
        }
    }
}

/// What to do with a stencil whose Newton iteration hit the cap.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NonConvergencePolicy {
    /// Keep the last weights silently.
    Accept,
    /// Keep the last weights and log a warning per node.
    #[default]
    Warn,
    /// Abort the build with [`MeshGmgError::StencilNotConverged`].
    Error,
}

/// Newton iteration controls for the stencil solver.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonOptions {
    pub max_iterations: usize,
    /// Relative to the residual norm at the reference centre.
    pub tolerance: f64,
}

impl Default for NewtonOptions {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            tolerance: 1.0e-5,
        }
    }
}

/// Parameters of one prolongator build.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterpolationParams {
    pub order: InterpolationOrder,
    pub build_coarse_coordinates: bool,
    pub newton: NewtonOptions,
    pub non_convergence: NonConvergencePolicy,
}

impl Default for InterpolationParams {
    fn default() -> Self {
        Self {
            order: InterpolationOrder::Linear,
            build_coarse_coordinates: true,
            newton: NewtonOptions::default(),
            non_convergence: NonConvergencePolicy::Warn,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let p = InterpolationParams::default();
        assert_eq!(p.order, InterpolationOrder::Linear);
        assert!(p.build_coarse_coordinates);
        assert_eq!(p.newton.tolerance, 1e-5);
        assert_eq!(p.non_convergence, NonConvergencePolicy::Warn);
    }

    #[test]
    fn order_from_integer() {
        assert_eq!(InterpolationOrder::try_from(0).unwrap(), InterpolationOrder::Constant);
        assert_eq!(
            InterpolationOrder::try_from(2).unwrap_err(),
            MeshGmgError::UnsupportedOrder(2)
        );
    }
}
