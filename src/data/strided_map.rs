//! Strided maps: a dof map annotated with its per-node block layout.

use std::sync::Arc;

use crate::data::dist_map::DistMap;
use crate::mesh_error::MeshGmgError;

/// A map whose local entries come in blocks described by `stride_info`.
///
/// `stride_info` lists the width of each field inside a node block; the
/// block size is their sum (a single entry for scalar or vector problems).
#[derive(Clone, Debug)]
pub struct StridedMap {
    map: Arc<DistMap>,
    stride_info: Vec<usize>,
}

impl StridedMap {
    pub fn new(map: Arc<DistMap>, stride_info: Vec<usize>) -> Result<Self, MeshGmgError> {
        let block: usize = stride_info.iter().sum();
        if stride_info.is_empty() || block == 0 {
            return Err(MeshGmgError::BlockLayoutMismatch {
                block_size: block,
                column: 0,
            });
        }
        if map.local_len() % block != 0 {
            return Err(MeshGmgError::BlockLayoutMismatch {
                block_size: block,
                column: map.local_len(),
            });
        }
        Ok(Self { map, stride_info })
    }

    #[inline]
    pub fn map(&self) -> &Arc<DistMap> {
        &self.map
    }

    #[inline]
    pub fn stride_info(&self) -> &[usize] {
        &self.stride_info
    }

    #[inline]
    pub fn block_size(&self) -> usize {
        self.stride_info.iter().sum()
    }

    /// Number of node blocks on this rank.
    pub fn local_num_nodes(&self) -> usize {
        self.map.local_len() / self.block_size()
    }
}
