//! The compiled expression plan.
//!
//! A [`Plan`] is everything the analyzer produced: the typed arena, the
//! descriptor table, the root node, the output dtype, the temporary-slot
//! table with the per-block arena size, and optional ND metadata. It is
//! immutable after compile and shared read-only by any number of
//! concurrent evaluate calls (`Send + Sync`); all mutable evaluation state
//! lives per call.

use serde::{Deserialize, Serialize};

use crate::ast::{ExprArena, NodeId};
use crate::dtype::DType;
use crate::variable::VarDesc;

/// One temporary slot: a DSL local, a phi, a coercion buffer, or a
/// reduction accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotDesc {
    pub dtype: DType,
    /// Scalar slots hold one element (reduction results, broadcast
    /// induction variables); vector slots hold one element per block lane.
    pub scalar: bool,
}

impl SlotDesc {
    /// Bytes this slot contributes to the per-block arena.
    pub fn bytes(&self, block_size: usize) -> usize {
        let lanes = if self.scalar { 1 } else { block_size };
        self.dtype.width().max(1) * lanes
    }
}

/// C-order rectangular layout for padding-aware evaluation: the logical
/// shape, the chunk tile, and the block tile within a chunk. Padding is
/// implicit wherever a chunk or block extends past the shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NdLayout {
    pub shape: Vec<i64>,
    pub chunk: Vec<i32>,
    pub block: Vec<i32>,
}

impl NdLayout {
    pub fn ndims(&self) -> usize {
        self.shape.len()
    }

    /// Basic consistency: equal dimensionality, strictly positive extents,
    /// block not larger than chunk in any dimension.
    pub fn validate(&self) -> Result<(), String> {
        if self.shape.is_empty() {
            return Err("nd layout needs at least one dimension".into());
        }
        if self.chunk.len() != self.shape.len() || self.block.len() != self.shape.len() {
            return Err(format!(
                "nd layout dimensionality mismatch: shape {}d, chunk {}d, block {}d",
                self.shape.len(),
                self.chunk.len(),
                self.block.len()
            ));
        }
        for d in 0..self.shape.len() {
            if self.shape[d] <= 0 || self.chunk[d] <= 0 || self.block[d] <= 0 {
                return Err(format!("nd layout extent must be positive in dim {d}"));
            }
            if self.block[d] > self.chunk[d] {
                return Err(format!(
                    "block extent {} exceeds chunk extent {} in dim {d}",
                    self.block[d], self.chunk[d]
                ));
            }
        }
        Ok(())
    }

    /// Total elements of one block tile, padding included.
    pub fn block_nitems(&self) -> usize {
        self.block.iter().map(|&b| b as usize).product()
    }

    /// Number of chunks along each dimension.
    fn chunk_grid(&self) -> Vec<i64> {
        self.shape
            .iter()
            .zip(&self.chunk)
            .map(|(&s, &c)| (s + c as i64 - 1) / c as i64)
            .collect()
    }

    /// Number of blocks along each dimension of one chunk.
    fn block_grid(&self) -> Vec<i64> {
        self.chunk
            .iter()
            .zip(&self.block)
            .map(|(&c, &b)| (c as i64 + b as i64 - 1) / b as i64)
            .collect()
    }

    /// Decomposes a C-order linear index over `grid` into coordinates.
    fn unravel(mut linear: i64, grid: &[i64]) -> Option<Vec<i64>> {
        let total: i64 = grid.iter().product();
        if linear < 0 || linear >= total {
            return None;
        }
        let mut coords = vec![0i64; grid.len()];
        for d in (0..grid.len()).rev() {
            coords[d] = linear % grid[d];
            linear /= grid[d];
        }
        Some(coords)
    }

    /// Count of non-padding elements of block `nblock` within chunk
    /// `nchunk`, both C-order linear indices. Returns `None` for indices
    /// outside the grid.
    pub fn valid_nitems(&self, nchunk: i64, nblock: i64) -> Option<usize> {
        let chunk_coords = Self::unravel(nchunk, &self.chunk_grid())?;
        let block_coords = Self::unravel(nblock, &self.block_grid())?;

        let mut count = 1usize;
        for d in 0..self.ndims() {
            let chunk_origin = chunk_coords[d] * self.chunk[d] as i64;
            let block_origin = block_coords[d] * self.block[d] as i64;
            let origin = chunk_origin + block_origin;
            // Valid extent: bounded by the block, the chunk edge, and the
            // logical shape.
            let within_chunk = (self.chunk[d] as i64 - block_origin).min(self.block[d] as i64);
            let within_shape = self.shape[d] - origin;
            let extent = within_chunk.min(within_shape).max(0);
            count *= extent as usize;
        }
        Some(count)
    }
}

/// The compiled expression (minus any JIT handle, which the public
/// `Expression` owns so the plan stays backend-agnostic).
#[derive(Debug, Clone)]
pub struct Plan {
    pub arena: ExprArena,
    /// Descriptor table in ordinal order; evaluate takes arrays in this
    /// order.
    pub vars: Vec<VarDesc>,
    /// Effective dtype per descriptor: the declared dtype, or the output
    /// dtype for `auto` variables in homogeneous mode.
    pub var_dtypes: Vec<DType>,
    pub root: NodeId,
    pub out_dtype: DType,
    /// Temporary slots indexed by the slot ids stored in the arena.
    pub slots: Vec<SlotDesc>,
    /// Elements per block for this plan.
    pub block_size: usize,
    /// Total per-block temporary arena, in bytes. Sized once at compile;
    /// evaluate allocates it once per call.
    pub arena_bytes_per_block: usize,
    pub nd: Option<NdLayout>,
    /// True for the multi-statement (scripting) form.
    pub script: bool,
}

impl Plan {
    /// Recomputes the arena size from the slot table; called by the
    /// analyzer after slot assignment.
    pub fn compute_arena_bytes(slots: &[SlotDesc], block_size: usize) -> usize {
        slots.iter().map(|s| s.bytes(block_size)).sum()
    }

    /// Number of data-array descriptors (the arrays evaluate expects).
    pub fn array_var_count(&self) -> usize {
        self.vars.iter().filter(|v| v.kind.is_array()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cube_layout() -> NdLayout {
        NdLayout {
            shape: vec![7, 7, 7],
            chunk: vec![64, 64, 64],
            block: vec![24, 24, 24],
        }
    }

    #[test]
    fn layout_validation() {
        assert!(cube_layout().validate().is_ok());

        let bad = NdLayout {
            shape: vec![10, 10],
            chunk: vec![4],
            block: vec![2],
        };
        assert!(bad.validate().is_err());

        let block_too_big = NdLayout {
            shape: vec![10],
            chunk: vec![4],
            block: vec![8],
        };
        assert!(block_too_big.validate().is_err());
    }

    #[test]
    fn single_block_covers_whole_small_shape() {
        let layout = cube_layout();
        // One chunk, one block; every logical element is valid.
        assert_eq!(layout.valid_nitems(0, 0), Some(343));
        assert_eq!(layout.block_nitems(), 24 * 24 * 24);
        // Out-of-grid indices are rejected.
        assert_eq!(layout.valid_nitems(1, 0), None);
        assert_eq!(layout.valid_nitems(0, 99), None);
    }

    #[test]
    fn partial_blocks_at_the_shape_edge() {
        let layout = NdLayout {
            shape: vec![10],
            chunk: vec![8],
            block: vec![4],
        };
        // Chunk 0: blocks of 4 and 4 valid elements.
        assert_eq!(layout.valid_nitems(0, 0), Some(4));
        assert_eq!(layout.valid_nitems(0, 1), Some(4));
        // Chunk 1 holds elements 8..10: first block has 2, second none.
        assert_eq!(layout.valid_nitems(1, 0), Some(2));
        assert_eq!(layout.valid_nitems(1, 1), Some(0));
    }

    #[test]
    fn two_dim_edge_blocks_multiply_extents() {
        let layout = NdLayout {
            shape: vec![5, 6],
            chunk: vec![4, 4],
            block: vec![4, 4],
        };
        // Chunk grid is 2x2. Chunk (0,0) is fully inside: 4*4.
        assert_eq!(layout.valid_nitems(0, 0), Some(16));
        // Chunk (0,1) covers columns 4..6: 4*2.
        assert_eq!(layout.valid_nitems(1, 0), Some(8));
        // Chunk (1,0) covers rows 4..5: 1*4.
        assert_eq!(layout.valid_nitems(2, 0), Some(4));
        // Chunk (1,1): 1*2.
        assert_eq!(layout.valid_nitems(3, 0), Some(2));
    }

    #[test]
    fn slot_bytes_scale_with_block() {
        let vec_slot = SlotDesc {
            dtype: DType::F64,
            scalar: false,
        };
        let scalar_slot = SlotDesc {
            dtype: DType::I64,
            scalar: true,
        };
        assert_eq!(vec_slot.bytes(1024), 8 * 1024);
        assert_eq!(scalar_slot.bytes(1024), 8);
        assert_eq!(
            Plan::compute_arena_bytes(&[vec_slot, scalar_slot], 1024),
            8 * 1024 + 8
        );
    }
}
