//! # VoxStore - Out-of-Core Volume Storage
//!
//! VoxStore gives voxel-level read/write access to large 2-5
//! dimensional numeric arrays whose full content may exceed available
//! memory. Fixed-shape rectangular blocks are paged between memory and
//! a backing file behind every access.
//!
//! ## Architecture
//!
//! The cache consists of several key components:
//!
//! - **Block Geometry**: plans the block shape and builds per-dimension
//!   lookup tables so each voxel access is additions only
//! - **Block Table**: hash-indexed arena of resident blocks threaded
//!   onto an intrusive LRU list
//! - **File Binding**: lazily opened input/output files, axis mapping,
//!   and the dirty-block write-back path
//! - **Volume**: the handle tying them together
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use voxstore::{CacheOptions, Volume};
//!
//! # fn main() -> Result<(), voxstore::Error> {
//! // A 3-D volume cached under a 1 MiB budget
//! let options = CacheOptions::new().max_cache_bytes(1 << 20);
//! let mut volume: Volume<f64> =
//!     Volume::new(&["z", "y", "x"], &[256, 256, 256], options)?;
//!
//! volume.set_voxel(&[0, 0, 0], 42.0)?;
//! assert_eq!(volume.get_voxel(&[0, 0, 0])?, 42.0);
//!
//! // Persist to a named file instead of the default temporary
//! volume.set_output_path("./scan.vxv");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod cache;
pub mod config;
pub mod element;
pub mod error;
pub mod file;

// Re-exports
pub use cache::{BlockGeometry, CacheStats, MAX_DIMENSIONS};
pub use config::{AccessPattern, CacheOptions};
pub use element::{Element, ElementType};
pub use error::{Error, Result};
pub use file::RawVolumeFile;

use cache::BlockTable;
use file::FileBinding;
use std::path::Path;

/// A multidimensional volume of numeric voxels backed by a block cache.
///
/// Only a bounded set of blocks is resident at any time; the rest live
/// in the backing file. Reads fault blocks in on demand, writes mark
/// them dirty, and the least recently used block is written back and
/// recycled when the budget is reached.
///
/// The output file is created lazily on the first write: a volume that
/// is only ever read never creates one, and a volume without an
/// explicit output path writes to an anonymous temporary file that
/// disappears at teardown.
pub struct Volume<T: Element> {
    dim_names: Vec<String>,
    extents: Vec<usize>,
    options: CacheOptions,
    geometry: BlockGeometry,
    table: BlockTable<T>,
    binding: FileBinding<T>,
    stats: CacheStats,
    closed: bool,
}

impl<T: Element> Volume<T> {
    /// Creates a fresh volume with the given dimension names and
    /// extents. All voxels read as zero until written.
    ///
    /// # Errors
    ///
    /// Returns an error if the options are invalid, the dimension count
    /// is outside 1 to [`MAX_DIMENSIONS`], any extent is zero, or the
    /// dimension names are not unique.
    pub fn new(dim_names: &[&str], extents: &[usize], options: CacheOptions) -> Result<Self> {
        let names: Vec<String> = dim_names.iter().map(|name| name.to_string()).collect();
        Self::build(names, extents.to_vec(), options, FileBinding::new())
    }

    /// Opens a volume bound to an existing file for reading.
    ///
    /// The volume's dimensions mirror the file's; blocks are
    /// materialized from the file on demand. The file stays read-only
    /// until the first write, which switches the cache to a fresh
    /// output file after copying the existing content across.
    pub fn open<P: AsRef<Path>>(path: P, options: CacheOptions) -> Result<Self> {
        let store = RawVolumeFile::open(path)?;
        let names = store.dim_names().to_vec();
        let extents = store.extents().to_vec();
        let n_dims = extents.len();

        let mut binding = FileBinding::new();
        binding.bind_input(store, (0..n_dims).map(Some).collect(), vec![0; n_dims]);
        Self::build(names, extents, options, binding)
    }

    /// Opens a sub-volume of a packed file.
    ///
    /// The named file dimensions become the volume's axes, in the order
    /// given; every other file dimension stays fixed at its entry in
    /// `file_offsets` (indexed in file dimension order). Offsets on the
    /// named dimensions shrink the volume's extent accordingly.
    pub fn open_slab<P: AsRef<Path>>(
        path: P,
        dim_names: &[&str],
        file_offsets: &[usize],
        options: CacheOptions,
    ) -> Result<Self> {
        let store = RawVolumeFile::open(path)?;
        if file_offsets.len() != store.n_dims() {
            return Err(Error::invalid_argument(format!(
                "{} file offsets for a {}-dimensional file",
                file_offsets.len(),
                store.n_dims()
            )));
        }

        let mut to_volume = vec![None; store.n_dims()];
        let mut extents = vec![0usize; dim_names.len()];
        for (vol_dim, name) in dim_names.iter().enumerate() {
            let file_dim = store
                .dim_names()
                .iter()
                .position(|file_name| file_name == name)
                .ok_or_else(|| {
                    Error::dimension_mismatch(format!("file has no dimension named {:?}", name))
                })?;
            if to_volume[file_dim].is_some() {
                return Err(Error::dimension_mismatch(format!(
                    "dimension {:?} requested twice",
                    name
                )));
            }
            if file_offsets[file_dim] >= store.extents()[file_dim] {
                return Err(Error::invalid_argument(format!(
                    "offset {} exceeds extent {} of dimension {:?}",
                    file_offsets[file_dim],
                    store.extents()[file_dim],
                    name
                )));
            }
            to_volume[file_dim] = Some(vol_dim);
            extents[vol_dim] = store.extents()[file_dim] - file_offsets[file_dim];
        }
        for (file_dim, &offset) in file_offsets.iter().enumerate() {
            if to_volume[file_dim].is_none() && offset >= store.extents()[file_dim] {
                return Err(Error::invalid_argument(format!(
                    "offset {} exceeds extent {} of file dimension {}",
                    offset,
                    store.extents()[file_dim],
                    file_dim
                )));
            }
        }

        let names: Vec<String> = dim_names.iter().map(|name| name.to_string()).collect();
        let mut binding = FileBinding::new();
        binding.bind_input(store, to_volume, file_offsets.to_vec());
        Self::build(names, extents, options, binding)
    }

    fn build(
        dim_names: Vec<String>,
        extents: Vec<usize>,
        options: CacheOptions,
        binding: FileBinding<T>,
    ) -> Result<Self> {
        options.validate()?;
        if dim_names.len() != extents.len() {
            return Err(Error::invalid_argument(
                "dimension names and extents must have equal length",
            ));
        }
        for (index, name) in dim_names.iter().enumerate() {
            if dim_names[..index].contains(name) {
                return Err(Error::invalid_argument(format!(
                    "duplicate dimension name {:?}",
                    name
                )));
            }
        }

        let block_sizes = cache::resolve_block_sizes(&extents, &options)?;
        let geometry =
            BlockGeometry::new(&extents, &block_sizes, options.max_cache_bytes, T::KIND.size())?;
        let table = BlockTable::new(geometry.max_blocks(), geometry.total_block_size());

        log::info!(
            "volume cache created: extents {:?}, block shape {:?}, {} resident blocks max",
            extents,
            geometry.block_sizes(),
            geometry.max_blocks()
        );

        Ok(Self {
            dim_names,
            extents,
            options,
            geometry,
            table,
            binding,
            stats: CacheStats::default(),
            closed: false,
        })
    }

    /// Reads the voxel at the given coordinates.
    ///
    /// Faults the containing block in from the backing file if needed,
    /// possibly evicting the least recently used block first.
    ///
    /// # Panics
    ///
    /// Panics if `coords` has the wrong number of entries or any
    /// coordinate is outside the volume.
    pub fn get_voxel(&mut self, coords: &[usize]) -> Result<T> {
        let (block_index, offset) = self.geometry.voxel_to_block(coords);
        let slot = self.fault_block(block_index)?;
        Ok(self.table.get(slot, offset))
    }

    /// Writes the voxel at the given coordinates, marking its block
    /// dirty.
    ///
    /// The first write opens the output binding: the named output file
    /// if one was set, otherwise an anonymous temporary. If the volume
    /// was reading an input file, its content is copied into the output
    /// first.
    ///
    /// # Panics
    ///
    /// Panics if `coords` has the wrong number of entries or any
    /// coordinate is outside the volume.
    pub fn set_voxel(&mut self, coords: &[usize], value: T) -> Result<()> {
        if !self.binding.is_output_open() {
            self.binding.open_output(&self.dim_names, &self.extents)?;
        }
        let (block_index, offset) = self.geometry.voxel_to_block(coords);
        let slot = self.fault_block(block_index)?;
        self.table.put(slot, offset, value);
        Ok(())
    }

    /// Finds the resident slot for a block, faulting it in on a miss.
    /// This runs on every voxel access.
    fn fault_block(&mut self, block_index: usize) -> Result<usize> {
        self.stats.lookups += 1;

        // Repeated access to one block skips the hash probe and the
        // recency-list update entirely.
        if let Some(slot) = self.table.fast_path(block_index) {
            self.stats.hits += 1;
            return Ok(slot);
        }
        if let Some(slot) = self.table.find(block_index) {
            self.stats.hits += 1;
            return Ok(slot);
        }
        self.stats.misses += 1;

        let (slot, recycled) = if self.table.is_full() {
            let tail = self
                .table
                .tail()
                .ok_or_else(|| Error::internal("full block table with no tail"))?;
            if self.table.is_dirty(tail) {
                self.write_back(tail)?;
            }
            log::trace!(
                "evicting block {} for block {}",
                self.table.block_index_of(tail),
                block_index
            );
            self.stats.evictions += 1;
            (self.table.recycle_tail(block_index), true)
        } else {
            (self.table.insert_new(block_index), false)
        };

        if self.binding.must_read() {
            let block_start = self.geometry.block_start(block_index);
            self.binding.read_block_region(
                &self.extents,
                self.geometry.block_sizes(),
                &block_start,
                self.table.data_mut(slot),
            )?;
            self.table.mark_clean(slot);
            self.stats.block_reads += 1;
        } else if recycled {
            self.table.fill_zero(slot);
        }

        Ok(slot)
    }

    /// Writes one resident block back to the bound store.
    fn write_back(&mut self, slot: usize) -> Result<()> {
        let block_index = self.table.block_index_of(slot);
        let block_start = self.geometry.block_start(block_index);
        self.binding.write_block_region(
            &self.extents,
            self.geometry.block_sizes(),
            &block_start,
            self.table.data(slot),
        )?;
        self.table.mark_clean(slot);
        self.stats.block_writes += 1;
        Ok(())
    }

    /// Writes every dirty resident block back to the backing file.
    ///
    /// Blocks stay resident and are marked clean.
    pub fn flush(&mut self) -> Result<()> {
        for slot in self.table.slot_handles() {
            if self.table.is_dirty(slot) {
                self.write_back(slot)?;
            }
        }
        Ok(())
    }

    /// Flushes and discards every resident block.
    ///
    /// During teardown of a temp-backed volume the writes are discarded
    /// along with the temporary file; in every other case dirty blocks
    /// are written back first.
    fn drop_all_blocks(&mut self, deleting: bool) -> Result<()> {
        let discard = deleting && self.binding.is_temp_backed();
        for slot in self.table.slot_handles() {
            if self.table.is_dirty(slot) && !discard {
                self.write_back(slot)?;
            }
        }
        self.table.clear();
        Ok(())
    }

    /// Changes the cache block shape.
    ///
    /// Every entry must be at least 1; otherwise the change is rejected
    /// in full and the current configuration stays active. A real
    /// change flushes all resident blocks (written values survive and
    /// are re-read from the backing file on demand), then rebuilds the
    /// lookup tables and an empty block table.
    pub fn set_block_sizes(&mut self, block_sizes: &[i64]) -> Result<()> {
        if block_sizes.len() != self.extents.len() {
            return Err(Error::invalid_argument(format!(
                "{} block sizes for a {}-dimensional volume",
                block_sizes.len(),
                self.extents.len()
            )));
        }
        if block_sizes.iter().any(|&size| size < 1) {
            return Err(Error::invalid_argument("block sizes must be >= 1"));
        }

        let new_sizes: Vec<usize> = block_sizes.iter().map(|&size| size as usize).collect();
        if new_sizes.as_slice() == self.geometry.block_sizes() {
            return Ok(());
        }

        self.drop_all_blocks(false)?;
        self.rebuild(&new_sizes)
    }

    /// Changes the cache byte budget, flushing and rebuilding the
    /// cache structure.
    pub fn set_max_cache_bytes(&mut self, max_bytes: usize) -> Result<()> {
        self.drop_all_blocks(false)?;
        self.options.max_cache_bytes = max_bytes;
        let block_sizes = self.geometry.block_sizes().to_vec();
        self.rebuild(&block_sizes)
    }

    fn rebuild(&mut self, block_sizes: &[usize]) -> Result<()> {
        self.geometry = BlockGeometry::new(
            &self.extents,
            block_sizes,
            self.options.max_cache_bytes,
            T::KIND.size(),
        )?;
        self.table = BlockTable::new(self.geometry.max_blocks(), self.geometry.total_block_size());
        log::info!(
            "volume cache rebuilt: block shape {:?}, {} resident blocks max",
            self.geometry.block_sizes(),
            self.geometry.max_blocks()
        );
        Ok(())
    }

    /// Changes the per-file-dimension offsets used when several volumes
    /// share one file.
    ///
    /// Resident blocks are flushed before the offsets change so dirty
    /// data lands where it was written.
    pub fn set_file_offset(&mut self, offsets: &[usize]) -> Result<()> {
        if offsets == self.binding.file_offset() {
            return Ok(());
        }
        self.drop_all_blocks(false)?;
        self.binding.set_file_offset(offsets.to_vec());
        Ok(())
    }

    /// Names the output file created on the first write.
    ///
    /// Without this, writes go to an anonymous temporary file that
    /// disappears at teardown. Has no effect once the output is open.
    pub fn set_output_path<P: AsRef<Path>>(&mut self, path: P) {
        self.binding.set_output_path(path);
    }

    /// Overrides the dimension names of the output file.
    ///
    /// The names must be a permutation of the volume's own dimension
    /// names; the bijection is checked when the output opens, and a
    /// mismatch there is a fatal configuration error.
    pub fn set_output_dimension_names(&mut self, names: &[&str]) -> Result<()> {
        if names.len() != self.extents.len() {
            return Err(Error::invalid_argument(format!(
                "{} output dimension names for a {}-dimensional volume",
                names.len(),
                self.extents.len()
            )));
        }
        self.binding
            .set_output_dim_names(names.iter().map(|name| name.to_string()).collect());
        Ok(())
    }

    /// Whether any voxel has been written (the output binding is open).
    pub fn is_modified(&self) -> bool {
        self.binding.is_output_open()
    }

    /// Number of dimensions.
    pub fn n_dims(&self) -> usize {
        self.extents.len()
    }

    /// Volume extents per dimension.
    pub fn extents(&self) -> &[usize] {
        &self.extents
    }

    /// Dimension names.
    pub fn dim_names(&self) -> &[String] {
        &self.dim_names
    }

    /// Current cache block shape.
    pub fn block_sizes(&self) -> &[usize] {
        self.geometry.block_sizes()
    }

    /// Maximum number of resident blocks.
    pub fn max_blocks(&self) -> usize {
        self.geometry.max_blocks()
    }

    /// Number of blocks currently resident.
    pub fn resident_blocks(&self) -> usize {
        self.table.n_blocks()
    }

    /// Current cache statistics.
    pub fn cache_stats(&self) -> CacheStats {
        self.stats.clone()
    }

    /// Resets cache statistics to zero.
    pub fn reset_cache_stats(&mut self) {
        self.stats.reset();
    }

    /// Closes the volume, flushing all data to the backing file.
    ///
    /// Dirty blocks of a temp-backed volume are discarded along with
    /// the temporary file. A volume that was never written never
    /// creates an output file.
    ///
    /// # Errors
    ///
    /// Returns an error if the final flush fails.
    pub fn close(mut self) -> Result<()> {
        self.teardown()?;
        self.closed = true;
        Ok(())
    }

    fn teardown(&mut self) -> Result<()> {
        self.drop_all_blocks(true)?;
        self.binding.close()?;
        log::info!("volume cache closed");
        Ok(())
    }
}

impl<T: Element> Drop for Volume<T> {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // Best-effort teardown; errors cannot propagate from drop
        if let Err(e) = self.teardown() {
            log::warn!("error flushing volume during drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_options(max_bytes: usize) -> CacheOptions {
        CacheOptions::new().max_cache_bytes(max_bytes).block_sizes(&[2, 2, 2])
    }

    #[test]
    fn test_volume_new() {
        let volume: Volume<f64> =
            Volume::new(&["z", "y", "x"], &[4, 4, 4], CacheOptions::default()).unwrap();
        assert_eq!(volume.n_dims(), 3);
        assert_eq!(volume.extents(), &[4, 4, 4]);
        assert!(!volume.is_modified());
    }

    #[test]
    fn test_volume_rejects_bad_shape() {
        let result: Result<Volume<f64>> =
            Volume::new(&["a"], &[4, 4], CacheOptions::default());
        assert!(result.is_err());

        let result: Result<Volume<f64>> =
            Volume::new(&["a", "a"], &[4, 4], CacheOptions::default());
        assert!(result.is_err());

        let result: Result<Volume<f64>> =
            Volume::new(&["a", "b", "c", "d", "e", "f"], &[2; 6], CacheOptions::default());
        assert!(result.is_err());
    }

    #[test]
    fn test_fresh_volume_reads_zero() {
        let mut volume: Volume<f64> =
            Volume::new(&["z", "y", "x"], &[4, 4, 4], small_options(1 << 16)).unwrap();
        assert_eq!(volume.get_voxel(&[0, 0, 0]).unwrap(), 0.0);
        assert_eq!(volume.get_voxel(&[3, 3, 3]).unwrap(), 0.0);
        // Reads alone never open an output
        assert!(!volume.is_modified());
    }

    #[test]
    fn test_write_then_read_same_block() {
        let mut volume: Volume<f64> =
            Volume::new(&["z", "y", "x"], &[4, 4, 4], small_options(1 << 16)).unwrap();

        volume.set_voxel(&[1, 2, 3], 12.5).unwrap();
        assert!(volume.is_modified());
        assert_eq!(volume.get_voxel(&[1, 2, 3]).unwrap(), 12.5);

        // Same-block fast path
        let stats = volume.cache_stats();
        assert!(stats.hits >= 1);
        assert!(stats.hit_rate() > 0.0);

        volume.reset_cache_stats();
        assert_eq!(volume.cache_stats().lookups, 0);
    }

    #[test]
    fn test_capacity_bound_holds() {
        // Budget of exactly two 2x2x2 f64 blocks
        let mut volume: Volume<f64> =
            Volume::new(&["z", "y", "x"], &[4, 4, 4], small_options(128)).unwrap();
        assert_eq!(volume.max_blocks(), 2);

        for z in 0..4 {
            for y in 0..4 {
                for x in 0..4 {
                    volume.set_voxel(&[z, y, x], (z * 16 + y * 4 + x) as f64).unwrap();
                    assert!(volume.resident_blocks() <= volume.max_blocks());
                }
            }
        }
    }

    #[test]
    fn test_round_trip_with_eviction() {
        let mut volume: Volume<f64> =
            Volume::new(&["z", "y", "x"], &[4, 4, 4], small_options(128)).unwrap();

        // 8 distinct blocks, budget of 2: constant eviction churn
        for z in 0..4 {
            for y in 0..4 {
                for x in 0..4 {
                    volume.set_voxel(&[z, y, x], (z * 100 + y * 10 + x) as f64).unwrap();
                }
            }
        }
        for z in 0..4 {
            for y in 0..4 {
                for x in 0..4 {
                    assert_eq!(
                        volume.get_voxel(&[z, y, x]).unwrap(),
                        (z * 100 + y * 10 + x) as f64,
                        "at ({},{},{})",
                        z,
                        y,
                        x
                    );
                }
            }
        }

        let stats = volume.cache_stats();
        assert!(stats.evictions > 0);
        assert!(stats.block_writes > 0);
        assert!(stats.block_reads > 0);
    }

    #[test]
    fn test_eviction_scenario_lru_order() {
        let mut volume: Volume<f64> =
            Volume::new(&["z", "y", "x"], &[4, 4, 4], small_options(128)).unwrap();
        assert_eq!(volume.max_blocks(), 2);

        // Two distinct blocks, both fit
        volume.set_voxel(&[0, 0, 0], 7.0).unwrap();
        volume.set_voxel(&[3, 3, 3], 9.0).unwrap();
        assert_eq!(volume.cache_stats().evictions, 0);

        // Third block evicts the least recently touched, (0,0,0)'s
        volume.set_voxel(&[0, 0, 3], 5.0).unwrap();
        assert_eq!(volume.cache_stats().evictions, 1);

        // (3,3,3) was never evicted: its read is a pure hit
        let reads_before = volume.cache_stats().block_reads;
        assert_eq!(volume.get_voxel(&[3, 3, 3]).unwrap(), 9.0);
        assert_eq!(volume.cache_stats().block_reads, reads_before);

        // (0,0,0) was evicted dirty and comes back from the write-back
        assert_eq!(volume.get_voxel(&[0, 0, 0]).unwrap(), 7.0);
        assert!(volume.cache_stats().block_reads > reads_before);

        assert_eq!(volume.get_voxel(&[0, 0, 3]).unwrap(), 5.0);
    }

    #[test]
    fn test_flush_keeps_blocks_resident() {
        let mut volume: Volume<f64> =
            Volume::new(&["z", "y", "x"], &[4, 4, 4], small_options(1 << 16)).unwrap();

        volume.set_voxel(&[0, 0, 0], 1.0).unwrap();
        volume.set_voxel(&[3, 3, 3], 2.0).unwrap();
        let resident = volume.resident_blocks();

        volume.flush().unwrap();
        assert_eq!(volume.resident_blocks(), resident);
        assert_eq!(volume.get_voxel(&[0, 0, 0]).unwrap(), 1.0);
        assert_eq!(volume.get_voxel(&[3, 3, 3]).unwrap(), 2.0);
    }

    #[test]
    fn test_teardown_discards_dirty_blocks_of_temp_output() {
        // No output path: writes land in the anonymous temporary
        let mut volume: Volume<f64> =
            Volume::new(&["z", "y", "x"], &[4, 4, 4], small_options(1 << 16)).unwrap();
        volume.set_voxel(&[0, 0, 0], 1.0).unwrap();
        volume.set_voxel(&[3, 3, 3], 2.0).unwrap();
        assert!(volume.is_modified());

        // Teardown of a temp-backed volume skips the write-back
        let writes_before = volume.cache_stats().block_writes;
        volume.drop_all_blocks(true).unwrap();
        assert_eq!(volume.cache_stats().block_writes, writes_before);
        assert_eq!(volume.resident_blocks(), 0);
    }

    #[test]
    fn test_teardown_flushes_dirty_blocks_of_named_output() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kept.vxv");

        let mut volume: Volume<f64> =
            Volume::new(&["z", "y", "x"], &[4, 4, 4], small_options(1 << 16)).unwrap();
        volume.set_output_path(&path);
        volume.set_voxel(&[0, 0, 0], 1.0).unwrap();

        // A named output is always flushed, even during teardown
        let writes_before = volume.cache_stats().block_writes;
        volume.drop_all_blocks(true).unwrap();
        assert!(volume.cache_stats().block_writes > writes_before);
        assert_eq!(volume.resident_blocks(), 0);
    }

    #[test]
    fn test_close_without_writes_creates_no_output() {
        let mut volume: Volume<f64> =
            Volume::new(&["y", "x"], &[4, 4], CacheOptions::default()).unwrap();
        let _ = volume.get_voxel(&[2, 2]).unwrap();
        assert!(!volume.is_modified());
        volume.close().unwrap();
    }
}
