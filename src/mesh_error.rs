//! MeshGmgError: unified error type for mesh-gmg public APIs
//!
//! Every fallible operation in the crate (communication, map construction,
//! sparse structure assembly and prolongator construction) reports failures
//! through this enum. Errors are fatal for the level build that raised them;
//! there is no partial-result mode.

use thiserror::Error;

/// Boxed, cloneable error source carried by communication failures.
pub type ErrorSource = std::sync::Arc<dyn std::error::Error + Send + Sync>;

/// Unified error type for mesh-gmg operations.
#[derive(Debug, Error, Clone)]
pub enum MeshGmgError {
    /// A message exchange with a neighbour failed or delivered malformed data.
    #[error("communication with rank {neighbor} failed: {source}")]
    CommError {
        neighbor: usize,
        #[source]
        source: ErrorSource,
    },
    /// A global id was looked up in a map that does not contain it.
    #[error("global id {gid} is not present in the map")]
    GlobalIdNotFound { gid: u64 },
    /// A global id has no owning rank in the distributed directory.
    #[error("global id {gid} has no owner in the directory")]
    MissingOwner { gid: u64 },
    /// A global id is registered by more than one rank in a one-to-one map.
    #[error("global id {gid} is owned by both rank {first} and rank {second}")]
    DuplicateOwner { gid: u64, first: usize, second: usize },
    /// A local index is outside the valid range.
    #[error("local index {index} out of range (len {len})")]
    LocalIndexOutOfRange { index: usize, len: usize },
    /// Two maps or vectors that must agree in length do not.
    #[error("length mismatch in {context}: expected {expected}, found {found}")]
    LengthMismatch {
        context: &'static str,
        expected: usize,
        found: usize,
    },
    /// A sparse structure was used in the wrong fill state.
    #[error("invalid fill state: {0}")]
    FillState(&'static str),
    /// A column index handed to `replace_local_values` is not in the row.
    #[error("column {col} is not part of local row {row}")]
    ColumnNotInRow { row: usize, col: usize },
    /// The column map is not laid out in aligned, contiguous dof blocks.
    #[error("column map is not blocked by {block_size} dofs at column {column}")]
    BlockLayoutMismatch { block_size: usize, column: usize },
    /// A pattern row has an entry count the requested interpolation cannot use.
    #[error("row {row} has {found} entries, expected {expected}")]
    PatternRowLength {
        row: usize,
        found: usize,
        expected: &'static str,
    },
    /// Unsupported spatial dimension (only 1, 2 and 3 are meaningful).
    #[error("unsupported number of spatial dimensions: {0}")]
    UnsupportedDimension(usize),
    /// Unsupported interpolation order.
    #[error("unsupported interpolation order: {0}")]
    UnsupportedOrder(u8),
    /// An input needed by the requested configuration was not supplied.
    #[error("missing input `{0}` required by the interpolation parameters")]
    MissingInput(&'static str),
    /// The local Newton Jacobian could not be factored.
    #[error("singular Jacobian in interpolation stencil for node {node}")]
    SingularJacobian { node: usize },
    /// Newton iterations stopped at the cap without meeting the tolerance.
    #[error(
        "interpolation stencil for node {node} did not converge after {iterations} iterations (residual {residual:e})"
    )]
    StencilNotConverged {
        node: usize,
        iterations: usize,
        residual: f64,
    },
    /// Another rank failed during a stage this rank completed.
    #[error("stage `{stage}` failed on {failed_ranks} other rank(s)")]
    RemoteFailure {
        stage: &'static str,
        failed_ranks: u64,
    },
    /// Invalid parameters for a structured grid fixture.
    #[error("invalid structured grid: {0}")]
    InvalidGrid(String),
}

impl MeshGmgError {
    /// Build a [`MeshGmgError::CommError`] from a plain message.
    pub fn comm(neighbor: usize, msg: impl Into<String>) -> Self {
        let msg: String = msg.into();
        let source: Box<dyn std::error::Error + Send + Sync> = msg.into();
        MeshGmgError::CommError {
            neighbor,
            source: ErrorSource::from(source),
        }
    }
}

impl PartialEq for MeshGmgError {
    fn eq(&self, other: &Self) -> bool {
        // Error sources are opaque; compare by rendered message.
        self.to_string() == other.to_string()
    }
}
