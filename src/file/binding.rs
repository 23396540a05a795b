//! The cache's attachment to backing files.
//!
//! A cache is bound to at most one authoritative store at a time: the
//! input file it was materialized from, or the output file it writes
//! back to. The binding owns the axis map between file dimensions and
//! volume dimensions, the per-file-dimension offsets used when several
//! volumes share one file, and the lazy output-open logic: the output
//! file does not exist until the first voxel write, and if no name was
//! supplied it is an anonymous temporary that vanishes with its handle.

use crate::element::Element;
use crate::error::{Error, Result};
use crate::file::RawVolumeFile;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub(crate) struct FileBinding<T: Element> {
    store: Option<RawVolumeFile<T>>,
    /// File dimension -> volume dimension, for the current store.
    to_volume: Vec<Option<usize>>,
    /// Fixed starting position per file dimension of the current store.
    file_offset: Vec<usize>,
    output_open: bool,
    writing_to_temp: bool,
    /// Set whenever a file holds content the cache has not seen: a
    /// bound input, or an output that has received any write-back.
    must_read_before_use: bool,
    output_path: Option<PathBuf>,
    output_dim_names: Option<Vec<String>>,
}

impl<T: Element> FileBinding<T> {
    /// A binding with no file attached.
    pub fn new() -> Self {
        Self {
            store: None,
            to_volume: Vec::new(),
            file_offset: Vec::new(),
            output_open: false,
            writing_to_temp: false,
            must_read_before_use: false,
            output_path: None,
            output_dim_names: None,
        }
    }

    /// Attach an input store. Blocks must be materialized from it
    /// before first use.
    pub fn bind_input(
        &mut self,
        store: RawVolumeFile<T>,
        to_volume: Vec<Option<usize>>,
        file_offset: Vec<usize>,
    ) {
        debug_assert_eq!(to_volume.len(), store.n_dims());
        debug_assert_eq!(file_offset.len(), store.n_dims());
        self.store = Some(store);
        self.to_volume = to_volume;
        self.file_offset = file_offset;
        self.must_read_before_use = true;
    }

    /// Whether block faults must load from the bound store.
    pub fn must_read(&self) -> bool {
        self.must_read_before_use && self.store.is_some()
    }

    /// Whether the output store has been opened (i.e. any write occurred).
    pub fn is_output_open(&self) -> bool {
        self.output_open
    }

    /// Whether the output is an anonymous temporary file.
    pub fn is_temp_backed(&self) -> bool {
        self.writing_to_temp
    }

    /// Name the output file created on first write. Consulted only at
    /// that point; has no effect once the output is open.
    pub fn set_output_path<P: AsRef<Path>>(&mut self, path: P) {
        self.output_path = Some(path.as_ref().to_path_buf());
    }

    /// Override the output file's dimension names. Must be a
    /// permutation of the volume's own names; checked at output open.
    pub fn set_output_dim_names(&mut self, names: Vec<String>) {
        self.output_dim_names = Some(names);
    }

    /// Per-file-dimension offsets for the current store.
    pub fn file_offset(&self) -> &[usize] {
        &self.file_offset
    }

    /// Replace the per-file-dimension offsets. The caller must have
    /// flushed resident blocks first so dirty data lands at the
    /// positions it was written under.
    pub fn set_file_offset(&mut self, offsets: Vec<usize>) {
        self.file_offset = offsets;
    }

    /// Open the output store, lazily, ahead of the first write-back.
    ///
    /// Resolves the output name (explicit path or anonymous temp file),
    /// matches the volume's dimension names one-to-one against the
    /// output dimension names, and creates the store. If an input store
    /// was attached, the entire volume is copied into the output before
    /// the input is closed.
    pub fn open_output(&mut self, vol_dim_names: &[String], vol_extents: &[usize]) -> Result<()> {
        let n_dims = vol_dim_names.len();

        let out_names: Vec<String> = match &self.output_dim_names {
            Some(names) => names.clone(),
            None => vol_dim_names.to_vec(),
        };
        if out_names.len() != n_dims {
            return Err(Error::dimension_mismatch(format!(
                "{} output dimension names for a {}-dimensional volume",
                out_names.len(),
                n_dims
            )));
        }

        // Name-based bijection: every output dimension takes its extent
        // from exactly one volume dimension, and every volume dimension
        // must be used.
        let mut out_extents = vec![0usize; n_dims];
        let mut to_volume = vec![None; n_dims];
        let mut used = vec![false; n_dims];
        let mut n_found = 0;
        for (vol_dim, vol_name) in vol_dim_names.iter().enumerate() {
            for (out_dim, out_name) in out_names.iter().enumerate() {
                if !used[out_dim] && vol_name == out_name {
                    out_extents[out_dim] = vol_extents[vol_dim];
                    to_volume[out_dim] = Some(vol_dim);
                    used[out_dim] = true;
                    n_found += 1;
                    break;
                }
            }
        }
        if n_found != n_dims {
            return Err(Error::dimension_mismatch(format!(
                "output dimension names {:?} do not match volume dimensions {:?}",
                out_names, vol_dim_names
            )));
        }

        let mut output = match &self.output_path {
            Some(path) => {
                self.writing_to_temp = false;
                log::info!("opening output volume file {:?}", path);
                RawVolumeFile::create_path(path, &out_names, &out_extents)?
            }
            None => {
                // Anonymous temp file: already unlinked, gone when the
                // last handle closes.
                self.writing_to_temp = true;
                log::info!("opening anonymous temporary output volume file");
                RawVolumeFile::create(tempfile::tempfile()?, &out_names, &out_extents)?
            }
        };

        // Preserve existing content when switching from read-only to
        // read/write: stream the input volume into the new output.
        if let Some(mut input) = self.store.take() {
            log::info!("copying existing volume content into the output file");
            copy_volume(
                &mut input,
                &self.to_volume,
                &self.file_offset,
                &mut output,
                &to_volume,
                vol_extents,
            )?;
            self.must_read_before_use = true;
        }

        self.store = Some(output);
        self.to_volume = to_volume;
        self.file_offset = vec![0; n_dims];
        self.output_open = true;
        Ok(())
    }

    /// Load one block region from the bound store into `dest`.
    pub fn read_block_region(
        &mut self,
        vol_extents: &[usize],
        block_shape: &[usize],
        block_start: &[usize],
        dest: &mut [T],
    ) -> Result<()> {
        let (file_start, file_count) = self.region_params(vol_extents, block_shape, block_start);
        let store = self
            .store
            .as_mut()
            .ok_or_else(|| Error::internal("block read with no bound store"))?;
        store.read_block(block_shape, dest, &self.to_volume, &file_start, &file_count)
    }

    /// Write one block region from `src` back to the bound store.
    ///
    /// After any write-back the file is the authoritative image, so
    /// future block faults must re-read it.
    pub fn write_block_region(
        &mut self,
        vol_extents: &[usize],
        block_shape: &[usize],
        block_start: &[usize],
        src: &[T],
    ) -> Result<()> {
        let (file_start, file_count) = self.region_params(vol_extents, block_shape, block_start);
        let store = self
            .store
            .as_mut()
            .ok_or_else(|| Error::internal("block write with no bound store"))?;
        store.write_block(block_shape, src, &self.to_volume, &file_start, &file_count)?;
        self.must_read_before_use = true;
        Ok(())
    }

    /// Flush and detach the store, closing its handle.
    pub fn close(&mut self) -> Result<()> {
        if let Some(mut store) = self.store.take() {
            if self.output_open {
                store.sync()?;
            }
        }
        Ok(())
    }

    /// Per-file-dimension start and count for one block transfer.
    ///
    /// Mapped dimensions start at the configured offset plus the block
    /// start, clipped to the volume boundary; unmapped dimensions stay
    /// fixed at their offset with zero count.
    fn region_params(
        &self,
        vol_extents: &[usize],
        block_shape: &[usize],
        block_start: &[usize],
    ) -> (Vec<usize>, Vec<usize>) {
        let n_file = self.to_volume.len();
        let mut file_start = vec![0usize; n_file];
        let mut file_count = vec![0usize; n_file];

        for dim in 0..n_file {
            let offset = self.file_offset.get(dim).copied().unwrap_or(0);
            match self.to_volume[dim] {
                Some(vol_dim) => {
                    file_start[dim] = offset + block_start[vol_dim];
                    file_count[dim] =
                        (vol_extents[vol_dim] - block_start[vol_dim]).min(block_shape[vol_dim]);
                }
                None => {
                    file_start[dim] = offset;
                    file_count[dim] = 0;
                }
            }
        }
        (file_start, file_count)
    }
}

/// Stream a whole volume from one store to another, one row at a time
/// along the volume's last dimension.
fn copy_volume<T: Element>(
    input: &mut RawVolumeFile<T>,
    input_map: &[Option<usize>],
    input_offset: &[usize],
    output: &mut RawVolumeFile<T>,
    output_map: &[Option<usize>],
    vol_extents: &[usize],
) -> Result<()> {
    let n_dims = vol_extents.len();
    let last = n_dims - 1;
    let row_len = vol_extents[last];

    let mut row_shape = vec![1usize; n_dims];
    row_shape[last] = row_len;
    let mut row = vec![T::default(); row_len];

    let params = |map: &[Option<usize>], offsets: &[usize], coords: &[usize]| {
        let mut start = vec![0usize; map.len()];
        let mut count = vec![0usize; map.len()];
        for dim in 0..map.len() {
            let offset = offsets.get(dim).copied().unwrap_or(0);
            match map[dim] {
                Some(vol_dim) => {
                    start[dim] = offset + coords[vol_dim];
                    count[dim] = if vol_dim == last { row_len } else { 1 };
                }
                None => {
                    start[dim] = offset;
                    count[dim] = 0;
                }
            }
        }
        (start, count)
    };

    let mut coords = vec![0usize; n_dims];
    'rows: loop {
        let (in_start, in_count) = params(input_map, input_offset, &coords);
        input.read_block(&row_shape, &mut row, input_map, &in_start, &in_count)?;

        let (out_start, out_count) = params(output_map, &[], &coords);
        output.write_block(&row_shape, &row, output_map, &out_start, &out_count)?;

        // Advance over all dimensions but the last.
        let mut dim = last;
        while dim > 0 {
            dim -= 1;
            coords[dim] += 1;
            if coords[dim] < vol_extents[dim] {
                continue 'rows;
            }
            coords[dim] = 0;
        }
        break;
    }

    Ok(())
}
