//! Block geometry planning and per-dimension coordinate lookup tables.
//!
//! A volume is partitioned into fixed-shape rectangular blocks. Finding
//! the block and intra-block position of a voxel happens on every get
//! and set, so both are precomputed per coordinate value: translating a
//! voxel is one table read and one addition per dimension, with no
//! division or modulo on the hot path.

use crate::config::{AccessPattern, CacheOptions};
use crate::error::{Error, Result};

/// Maximum number of volume dimensions.
pub const MAX_DIMENSIONS: usize = 5;

/// Contributions of one coordinate value along one dimension.
#[derive(Debug, Clone, Copy, Default)]
struct LookupEntry {
    /// Contribution to the block's linear index,
    /// `(coordinate / block_size) * block_stride`.
    block_index_offset: usize,
    /// Contribution to the intra-block linear offset,
    /// `(coordinate % block_size) * element_stride`.
    block_offset: usize,
}

/// Block partitioning of a volume: block shape, block counts, and the
/// lookup tables translating coordinates into (block, offset) pairs.
#[derive(Debug)]
pub struct BlockGeometry {
    extents: Vec<usize>,
    block_sizes: Vec<usize>,
    blocks_per_dim: Vec<usize>,
    total_block_size: usize,
    max_blocks: usize,
    lookup: Vec<Vec<LookupEntry>>,
}

/// Derive the block shape for a volume from its options.
///
/// An explicit shape is used verbatim, with non-positive entries
/// replaced by the dimension's full extent. Otherwise the access
/// pattern decides: `SequentialSlice` keeps whole slices together
/// (thickness 1 everywhere except the last two dimensions), `Random`
/// uses one uniform block size on every dimension.
pub(crate) fn resolve_block_sizes(extents: &[usize], options: &CacheOptions) -> Result<Vec<usize>> {
    let n_dims = extents.len();

    if let Some(explicit) = &options.block_sizes {
        if explicit.len() != n_dims {
            return Err(Error::invalid_argument(format!(
                "block_sizes has {} entries for a {}-dimensional volume",
                explicit.len(),
                n_dims
            )));
        }
        return Ok(explicit
            .iter()
            .zip(extents)
            .map(|(&size, &extent)| if size <= 0 { extent } else { size as usize })
            .collect());
    }

    let sizes = match options.access_pattern {
        AccessPattern::SequentialSlice => {
            let mut sizes = vec![1; n_dims];
            for dim in n_dims.saturating_sub(2)..n_dims {
                sizes[dim] = extents[dim];
            }
            sizes
        }
        AccessPattern::Random => vec![options.default_block_size; n_dims],
    };

    Ok(sizes)
}

impl BlockGeometry {
    /// Build the geometry for a volume.
    ///
    /// `block_sizes` must contain one positive entry per dimension
    /// (values may exceed the extent; the far edge is clipped during
    /// file transfers). `max_blocks` is derived from the byte budget
    /// but never drops below one block, even if that single block
    /// exceeds the budget.
    pub fn new(
        extents: &[usize],
        block_sizes: &[usize],
        max_cache_bytes: usize,
        element_size: usize,
    ) -> Result<Self> {
        let n_dims = extents.len();
        if n_dims == 0 || n_dims > MAX_DIMENSIONS {
            return Err(Error::invalid_argument(format!(
                "volume must have 1 to {} dimensions, got {}",
                MAX_DIMENSIONS, n_dims
            )));
        }
        if extents.iter().any(|&extent| extent == 0) {
            return Err(Error::invalid_argument("volume extents must be >= 1"));
        }
        if block_sizes.len() != n_dims {
            return Err(Error::invalid_argument(format!(
                "{} block sizes for a {}-dimensional volume",
                block_sizes.len(),
                n_dims
            )));
        }
        if block_sizes.iter().any(|&size| size == 0) {
            return Err(Error::invalid_argument("block sizes must be >= 1"));
        }

        let blocks_per_dim: Vec<usize> = extents
            .iter()
            .zip(block_sizes)
            .map(|(&extent, &size)| (extent - 1) / size + 1)
            .collect();

        // Fill the tables last dimension first so block index and
        // intra-block offset contributions fall out of running strides.
        let mut lookup: Vec<Vec<LookupEntry>> = vec![Vec::new(); n_dims];
        let mut element_stride = 1;
        let mut block_stride = 1;

        for dim in (0..n_dims).rev() {
            let size = block_sizes[dim];
            let mut entries = Vec::with_capacity(extents[dim]);
            for x in 0..extents[dim] {
                entries.push(LookupEntry {
                    block_index_offset: (x / size) * block_stride,
                    block_offset: (x % size) * element_stride,
                });
            }
            lookup[dim] = entries;

            element_stride *= size;
            block_stride *= blocks_per_dim[dim];
        }

        let total_block_size = element_stride;
        let mut max_blocks = max_cache_bytes / (total_block_size * element_size);
        if max_blocks < 1 {
            max_blocks = 1;
        }

        log::debug!(
            "block geometry: shape {:?}, {:?} blocks per dim, {} elements per block, {} resident max",
            block_sizes,
            blocks_per_dim,
            total_block_size,
            max_blocks
        );

        Ok(Self {
            extents: extents.to_vec(),
            block_sizes: block_sizes.to_vec(),
            blocks_per_dim,
            total_block_size,
            max_blocks,
            lookup,
        })
    }

    /// Translate voxel coordinates into (linear block index, intra-block
    /// offset). Called on every voxel access.
    #[inline]
    pub fn voxel_to_block(&self, coords: &[usize]) -> (usize, usize) {
        assert_eq!(coords.len(), self.extents.len(), "coordinate arity");

        let mut block_index = 0;
        let mut offset = 0;
        for (dim, &coord) in coords.iter().enumerate() {
            debug_assert!(coord < self.extents[dim], "voxel coordinate out of range");
            let entry = &self.lookup[dim][coord];
            block_index += entry.block_index_offset;
            offset += entry.block_offset;
        }
        (block_index, offset)
    }

    /// Starting voxel coordinates of a block.
    pub fn block_start(&self, block_index: usize) -> Vec<usize> {
        let n_dims = self.extents.len();
        let mut start = vec![0; n_dims];
        let mut remaining = block_index;
        for dim in (0..n_dims).rev() {
            start[dim] = (remaining % self.blocks_per_dim[dim]) * self.block_sizes[dim];
            remaining /= self.blocks_per_dim[dim];
        }
        start
    }

    /// Number of dimensions.
    pub fn n_dims(&self) -> usize {
        self.extents.len()
    }

    /// Volume extents per dimension.
    pub fn extents(&self) -> &[usize] {
        &self.extents
    }

    /// Block shape per dimension.
    pub fn block_sizes(&self) -> &[usize] {
        &self.block_sizes
    }

    /// Number of blocks along each dimension.
    pub fn blocks_per_dim(&self) -> &[usize] {
        &self.blocks_per_dim
    }

    /// Elements in one block buffer.
    pub fn total_block_size(&self) -> usize {
        self.total_block_size
    }

    /// Maximum number of resident blocks.
    pub fn max_blocks(&self) -> usize {
        self.max_blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geometry(extents: &[usize], block_sizes: &[usize], budget: usize) -> BlockGeometry {
        BlockGeometry::new(extents, block_sizes, budget, 8).unwrap()
    }

    #[test]
    fn test_resolve_explicit_sizes_with_full_extent() {
        let options = CacheOptions::new().block_sizes(&[4, -1, 0]);
        let sizes = resolve_block_sizes(&[16, 16, 10], &options).unwrap();
        assert_eq!(sizes, vec![4, 16, 10]);
    }

    #[test]
    fn test_resolve_slice_pattern() {
        let options = CacheOptions::new().access_pattern(AccessPattern::SequentialSlice);
        let sizes = resolve_block_sizes(&[10, 20, 30, 40], &options).unwrap();
        assert_eq!(sizes, vec![1, 1, 30, 40]);

        // A 2-D volume is a single slice
        let sizes = resolve_block_sizes(&[10, 20], &options).unwrap();
        assert_eq!(sizes, vec![10, 20]);
    }

    #[test]
    fn test_resolve_random_pattern_uniform() {
        let options = CacheOptions::new().default_block_size(4);
        let sizes = resolve_block_sizes(&[100, 100, 100], &options).unwrap();
        assert_eq!(sizes, vec![4, 4, 4]);
    }

    #[test]
    fn test_resolve_wrong_arity_rejected() {
        let options = CacheOptions::new().block_sizes(&[4, 4]);
        assert!(resolve_block_sizes(&[16, 16, 16], &options).is_err());
    }

    #[test]
    fn test_blocks_per_dim_rounds_up() {
        let geom = geometry(&[5, 4, 9], &[2, 2, 4], 1 << 20);
        assert_eq!(geom.blocks_per_dim(), &[3, 2, 3]);
        assert_eq!(geom.total_block_size(), 16);
    }

    #[test]
    fn test_max_blocks_from_budget() {
        // 2x2x2 blocks of f64 = 64 bytes each
        let geom = geometry(&[4, 4, 4], &[2, 2, 2], 128);
        assert_eq!(geom.max_blocks(), 2);

        // Budget below one block still allows one
        let geom = geometry(&[4, 4, 4], &[2, 2, 2], 1);
        assert_eq!(geom.max_blocks(), 1);
    }

    #[test]
    fn test_voxel_to_block_matches_direct_computation() {
        let geom = geometry(&[5, 6, 7], &[2, 3, 4], 1 << 20);

        for x in 0..5 {
            for y in 0..6 {
                for z in 0..7 {
                    let (block_index, offset) = geom.voxel_to_block(&[x, y, z]);

                    let expected_block =
                        ((x / 2) * 2 + (y / 3)) * 2 + (z / 4);
                    let expected_offset = ((x % 2) * 3 + (y % 3)) * 4 + (z % 4);

                    assert_eq!(block_index, expected_block, "at ({},{},{})", x, y, z);
                    assert_eq!(offset, expected_offset, "at ({},{},{})", x, y, z);
                }
            }
        }
    }

    #[test]
    fn test_block_start_inverts_block_index() {
        let geom = geometry(&[5, 6, 7], &[2, 3, 4], 1 << 20);

        // Every voxel's block index must map back to a start within
        // block_size of the voxel on every axis.
        for x in 0..5 {
            for y in 0..6 {
                for z in 0..7 {
                    let (block_index, _) = geom.voxel_to_block(&[x, y, z]);
                    let start = geom.block_start(block_index);
                    assert_eq!(start[0], (x / 2) * 2);
                    assert_eq!(start[1], (y / 3) * 3);
                    assert_eq!(start[2], (z / 4) * 4);
                }
            }
        }
    }

    #[test]
    fn test_block_size_larger_than_extent() {
        let geom = geometry(&[3, 3], &[8, 8], 1 << 20);
        assert_eq!(geom.blocks_per_dim(), &[1, 1]);
        let (block_index, offset) = geom.voxel_to_block(&[2, 2]);
        assert_eq!(block_index, 0);
        assert_eq!(offset, 2 * 8 + 2);
    }

    #[test]
    fn test_invalid_geometry_rejected() {
        assert!(BlockGeometry::new(&[], &[], 1024, 8).is_err());
        assert!(BlockGeometry::new(&[1; 6], &[1; 6], 1024, 8).is_err());
        assert!(BlockGeometry::new(&[4, 0], &[2, 2], 1024, 8).is_err());
        assert!(BlockGeometry::new(&[4, 4], &[2, 0], 1024, 8).is_err());
        assert!(BlockGeometry::new(&[4, 4], &[2], 1024, 8).is_err());
    }
}
