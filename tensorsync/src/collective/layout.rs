//! Flat buffer layout for a fused variable-size allgather.
//!
//! The transport buffer is rank-major, entry-minor: rank 0's blocks for
//! every entry come first, then rank 1's, and so on. All quantities here are
//! in elements, not bytes.
//!
//! ```text
//! | rank 0: e0 e1 e2 | rank 1: e0 e1 e2 | ... |
//! ^ displacement[0]  ^ displacement[1]
//!                       ^ displacement[1] + offset[e1][1]
//! ```

use crate::error::{Result, TensorSyncError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatherLayout {
    world_size: usize,
    num_entries: usize,
    /// `[entry * world_size + rank]`: elements rank contributes for entry.
    component_sizes: Vec<usize>,
    /// `[entry * world_size + rank]`: start of the block within the rank's region.
    component_offsets: Vec<usize>,
    recvcounts: Vec<usize>,
    displacements: Vec<usize>,
    /// `[entry * world_size + rank]`: start of the rank's rows in the entry's output.
    output_offsets: Vec<usize>,
    /// Leading dimension of each entry's gathered output.
    output_first_dims: Vec<usize>,
}

impl GatherLayout {
    /// Build the layout from each entry's per-row element count and the
    /// coordinator's first-dimension table (`tensor_sizes[entry * world + rank]`).
    ///
    /// The table must list every rank for every entry, zeros included.
    pub fn compute(
        slice_elements: &[usize],
        tensor_sizes: &[usize],
        world_size: usize,
    ) -> Result<Self> {
        let num_entries = slice_elements.len();
        let expected = num_entries * world_size;
        if tensor_sizes.len() != expected {
            return Err(TensorSyncError::InvalidResponse {
                expected,
                actual: tensor_sizes.len(),
            });
        }

        let mut component_sizes = vec![0usize; expected];
        let mut output_offsets = vec![0usize; expected];
        let mut recvcounts = vec![0usize; world_size];
        let mut output_first_dims = vec![0usize; num_entries];

        for (e, &slice) in slice_elements.iter().enumerate() {
            let mut written = 0;
            for r in 0..world_size {
                let rows = tensor_sizes[e * world_size + r];
                let elements = rows * slice;
                component_sizes[e * world_size + r] = elements;
                output_offsets[e * world_size + r] = written;
                written += elements;
                recvcounts[r] += elements;
                output_first_dims[e] += rows;
            }
        }

        let mut displacements = vec![0usize; world_size];
        for r in 1..world_size {
            displacements[r] = displacements[r - 1] + recvcounts[r - 1];
        }

        let mut component_offsets = vec![0usize; expected];
        for r in 0..world_size {
            for e in 1..num_entries {
                component_offsets[e * world_size + r] = component_offsets
                    [(e - 1) * world_size + r]
                    + component_sizes[(e - 1) * world_size + r];
            }
        }

        Ok(Self {
            world_size,
            num_entries,
            component_sizes,
            component_offsets,
            recvcounts,
            displacements,
            output_offsets,
            output_first_dims,
        })
    }

    pub fn world_size(&self) -> usize {
        self.world_size
    }

    pub fn num_entries(&self) -> usize {
        self.num_entries
    }

    /// Elements each rank contributes across all entries.
    pub fn recvcounts(&self) -> &[usize] {
        &self.recvcounts
    }

    /// Element offset of each rank's region in the flat buffer.
    pub fn displacements(&self) -> &[usize] {
        &self.displacements
    }

    /// Elements `rank` contributes for `entry`.
    pub fn component_size(&self, entry: usize, rank: usize) -> usize {
        self.component_sizes[entry * self.world_size + rank]
    }

    /// Offset of `entry`'s block within `rank`'s region.
    pub fn component_offset(&self, entry: usize, rank: usize) -> usize {
        self.component_offsets[entry * self.world_size + rank]
    }

    /// Offset of `entry`'s block from `rank` in the flat buffer.
    pub fn absolute_offset(&self, entry: usize, rank: usize) -> usize {
        self.displacements[rank] + self.component_offset(entry, rank)
    }

    /// Offset of `rank`'s rows inside `entry`'s gathered output.
    pub fn output_offset(&self, entry: usize, rank: usize) -> usize {
        self.output_offsets[entry * self.world_size + rank]
    }

    pub fn output_first_dim(&self, entry: usize) -> usize {
        self.output_first_dims[entry]
    }

    /// Total elements in the flat buffer.
    pub fn total_len(&self) -> usize {
        match (self.displacements.last(), self.recvcounts.last()) {
            (Some(d), Some(c)) => d + c,
            _ => 0,
        }
    }
}
