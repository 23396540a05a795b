//! Flat binary volume files with hyperslab block I/O.
//!
//! File layout:
//! ```text
//! [magic: 4 bytes "VXV1"]
//! [header_len: u32 LE]
//! [header: bincode (dimension names, extents, element type code)]
//! [header_crc: u32 LE]
//! [element data: little-endian, row-major in file dimension order]
//! ```
//!
//! The file is pre-sized at creation so any region that has never been
//! written reads back as zeros. `read_block` and `write_block` are the
//! two operations the cache needs: transfer one rectangular hyperslab
//! between the file and a dense block buffer, honoring an axis map from
//! file dimensions to buffer dimensions.

use crate::element::{Element, ElementType};
use crate::error::{Error, Result};
use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::marker::PhantomData;
use std::path::Path;

const MAGIC: &[u8; 4] = b"VXV1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct VolumeHeader {
    dim_names: Vec<String>,
    extents: Vec<u64>,
    element_type: u8,
}

/// One contiguous-in-buffer run of a hyperslab walk.
struct Run {
    buffer_base: usize,
    file_elem: u64,
}

/// Shape shared by every run of one transfer.
struct RunShape {
    run_len: usize,
    buffer_stride: usize,
    file_stride: u64,
}

/// A volume file opened for hyperslab block transfers.
///
/// The type parameter fixes the element type; opening a file whose
/// header records a different element type is a corruption error.
#[derive(Debug)]
pub struct RawVolumeFile<T: Element> {
    file: File,
    dim_names: Vec<String>,
    extents: Vec<usize>,
    data_offset: u64,
    _marker: PhantomData<T>,
}

impl<T: Element> RawVolumeFile<T> {
    /// Create a volume file on an already-open handle, writing the
    /// header and pre-sizing the data region to zeros.
    ///
    /// The handle must be readable and writable; anonymous temporary
    /// files are passed in here as well as freshly created named files.
    pub fn create(mut file: File, dim_names: &[String], extents: &[usize]) -> Result<Self> {
        if dim_names.len() != extents.len() || extents.is_empty() {
            return Err(Error::invalid_argument(
                "dimension names and extents must be non-empty and of equal length",
            ));
        }
        if extents.iter().any(|&extent| extent == 0) {
            return Err(Error::invalid_argument("file extents must be >= 1"));
        }

        let header = VolumeHeader {
            dim_names: dim_names.to_vec(),
            extents: extents.iter().map(|&extent| extent as u64).collect(),
            element_type: T::KIND as u8,
        };
        let header_bytes = bincode::serialize(&header)?;

        let mut buf = Vec::with_capacity(12 + header_bytes.len());
        buf.extend_from_slice(MAGIC);
        buf.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
        buf.extend_from_slice(&header_bytes);
        buf.extend_from_slice(&crc32fast::hash(&header_bytes).to_le_bytes());

        file.seek(SeekFrom::Start(0))?;
        file.write_all(&buf)?;

        let data_offset = buf.len() as u64;
        let total_elements: u64 = extents.iter().map(|&extent| extent as u64).product();
        file.set_len(data_offset + total_elements * T::KIND.size() as u64)?;

        Ok(Self {
            file,
            dim_names: dim_names.to_vec(),
            extents: extents.to_vec(),
            data_offset,
            _marker: PhantomData,
        })
    }

    /// Create a named volume file, truncating any existing file.
    pub fn create_path<P: AsRef<Path>>(
        path: P,
        dim_names: &[String],
        extents: &[usize],
    ) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Self::create(file, dim_names, extents)
    }

    /// Open an existing volume file and verify its header.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_file(file)
    }

    /// Open a volume file from an already-open handle.
    pub fn from_file(mut file: File) -> Result<Self> {
        file.seek(SeekFrom::Start(0))?;

        let mut fixed = [0u8; 8];
        file.read_exact(&mut fixed)
            .map_err(|_| Error::corruption("file too small to hold a volume header"))?;

        if &fixed[0..4] != MAGIC {
            return Err(Error::corruption("bad magic, not a volume file"));
        }
        let header_len = u32::from_le_bytes(fixed[4..8].try_into().unwrap()) as usize;

        let mut header_bytes = vec![0u8; header_len];
        file.read_exact(&mut header_bytes)
            .map_err(|_| Error::corruption("truncated volume header"))?;

        let mut crc_bytes = [0u8; 4];
        file.read_exact(&mut crc_bytes)
            .map_err(|_| Error::corruption("truncated header checksum"))?;
        let stored_crc = u32::from_le_bytes(crc_bytes);
        let computed_crc = crc32fast::hash(&header_bytes);
        if stored_crc != computed_crc {
            return Err(Error::corruption(format!(
                "header checksum mismatch: expected {:#x}, got {:#x}",
                stored_crc, computed_crc
            )));
        }

        let header: VolumeHeader = bincode::deserialize(&header_bytes)?;

        let file_type = ElementType::from_u8(header.element_type)
            .ok_or_else(|| Error::corruption("unknown element type code"))?;
        if file_type != T::KIND {
            return Err(Error::corruption(format!(
                "element type mismatch: file holds {}, volume expects {}",
                file_type,
                T::KIND
            )));
        }
        if header.dim_names.len() != header.extents.len() || header.extents.is_empty() {
            return Err(Error::corruption("inconsistent header dimensions"));
        }

        Ok(Self {
            file,
            dim_names: header.dim_names,
            extents: header.extents.iter().map(|&extent| extent as usize).collect(),
            data_offset: 12 + header_len as u64,
            _marker: PhantomData,
        })
    }

    /// Number of file dimensions.
    pub fn n_dims(&self) -> usize {
        self.extents.len()
    }

    /// Dimension names, in file order.
    pub fn dim_names(&self) -> &[String] {
        &self.dim_names
    }

    /// Extents per file dimension.
    pub fn extents(&self) -> &[usize] {
        &self.extents
    }

    /// Fill a dense block buffer from a hyperslab of the file.
    ///
    /// `block_shape` describes the buffer's dimensions (volume order);
    /// `to_volume[d]` maps file dimension `d` to a buffer dimension, or
    /// `None` for file dimensions with no buffer counterpart, which stay
    /// fixed at `file_start[d]` and transfer zero count. `file_count`
    /// may be smaller than the mapped block extent at the far edge of
    /// the volume; buffer elements beyond the transferred region are
    /// left untouched.
    pub fn read_block(
        &mut self,
        block_shape: &[usize],
        dest: &mut [T],
        to_volume: &[Option<usize>],
        file_start: &[usize],
        file_count: &[usize],
    ) -> Result<()> {
        let (runs, shape) =
            self.plan_runs(block_shape, dest.len(), to_volume, file_start, file_count)?;
        let elem_size = T::KIND.size();
        let mut scratch = BytesMut::zeroed(shape.run_len * elem_size);

        for run in runs {
            if shape.file_stride == 1 {
                let byte_pos = self.data_offset + run.file_elem * elem_size as u64;
                self.file.seek(SeekFrom::Start(byte_pos))?;
                self.file.read_exact(&mut scratch)?;
                for step in 0..shape.run_len {
                    dest[run.buffer_base + step * shape.buffer_stride] =
                        T::read_le(&scratch[step * elem_size..(step + 1) * elem_size]);
                }
            } else {
                let mut one = [0u8; 8];
                for step in 0..shape.run_len {
                    let byte_pos = self.data_offset
                        + (run.file_elem + step as u64 * shape.file_stride) * elem_size as u64;
                    self.file.seek(SeekFrom::Start(byte_pos))?;
                    self.file.read_exact(&mut one[..elem_size])?;
                    dest[run.buffer_base + step * shape.buffer_stride] =
                        T::read_le(&one[..elem_size]);
                }
            }
        }
        Ok(())
    }

    /// Write a dense block buffer into a hyperslab of the file.
    /// Symmetric to [`read_block`](Self::read_block).
    pub fn write_block(
        &mut self,
        block_shape: &[usize],
        src: &[T],
        to_volume: &[Option<usize>],
        file_start: &[usize],
        file_count: &[usize],
    ) -> Result<()> {
        let (runs, shape) =
            self.plan_runs(block_shape, src.len(), to_volume, file_start, file_count)?;
        let elem_size = T::KIND.size();
        let mut scratch = BytesMut::zeroed(shape.run_len * elem_size);

        for run in runs {
            if shape.file_stride == 1 {
                for step in 0..shape.run_len {
                    let value = src[run.buffer_base + step * shape.buffer_stride];
                    value.write_le(&mut scratch[step * elem_size..(step + 1) * elem_size]);
                }
                let byte_pos = self.data_offset + run.file_elem * elem_size as u64;
                self.file.seek(SeekFrom::Start(byte_pos))?;
                self.file.write_all(&scratch)?;
            } else {
                let mut one = [0u8; 8];
                for step in 0..shape.run_len {
                    let byte_pos = self.data_offset
                        + (run.file_elem + step as u64 * shape.file_stride) * elem_size as u64;
                    src[run.buffer_base + step * shape.buffer_stride]
                        .write_le(&mut one[..elem_size]);
                    self.file.seek(SeekFrom::Start(byte_pos))?;
                    self.file.write_all(&one[..elem_size])?;
                }
            }
        }
        Ok(())
    }

    /// Validate a transfer and lay out its runs.
    ///
    /// The innermost mapped file dimension becomes the run; the
    /// remaining mapped dimensions are walked with an odometer, each
    /// combination yielding one run's buffer base and starting file
    /// element. Unmapped dimensions contribute a fixed offset.
    fn plan_runs(
        &self,
        block_shape: &[usize],
        buffer_len: usize,
        to_volume: &[Option<usize>],
        file_start: &[usize],
        file_count: &[usize],
    ) -> Result<(Vec<Run>, RunShape)> {
        let n_file = self.extents.len();
        self.check_region(block_shape, buffer_len, to_volume, file_start, file_count)?;

        // Element strides of the block buffer (volume order) and of the
        // file's row-major layout.
        let n_vol = block_shape.len();
        let mut vol_strides = vec![1usize; n_vol];
        for dim in (0..n_vol.saturating_sub(1)).rev() {
            vol_strides[dim] = vol_strides[dim + 1] * block_shape[dim + 1];
        }
        let mut file_strides = vec![1u64; n_file];
        for dim in (0..n_file.saturating_sub(1)).rev() {
            file_strides[dim] = file_strides[dim + 1] * self.extents[dim + 1] as u64;
        }

        let inner = (0..n_file)
            .rev()
            .find(|&dim| to_volume[dim].is_some())
            .ok_or_else(|| Error::internal("no file dimension maps to the volume"))?;
        let shape = RunShape {
            run_len: file_count[inner],
            buffer_stride: vol_strides[to_volume[inner].unwrap()],
            file_stride: file_strides[inner],
        };

        let outer: Vec<usize> = (0..n_file)
            .filter(|&dim| dim != inner && to_volume[dim].is_some())
            .collect();
        let fixed_offset: u64 = (0..n_file)
            .filter(|&dim| to_volume[dim].is_none())
            .map(|dim| file_start[dim] as u64 * file_strides[dim])
            .sum();

        let n_runs: usize = outer.iter().map(|&dim| file_count[dim]).product();
        let mut runs = Vec::with_capacity(n_runs);
        let mut odometer = vec![0usize; outer.len()];

        'region: loop {
            let mut file_elem = fixed_offset + file_start[inner] as u64 * shape.file_stride;
            let mut buffer_base = 0usize;
            for (&position, &dim) in odometer.iter().zip(&outer) {
                file_elem += (file_start[dim] + position) as u64 * file_strides[dim];
                buffer_base += position * vol_strides[to_volume[dim].unwrap()];
            }
            runs.push(Run { buffer_base, file_elem });

            // Advance the odometer, rightmost dimension fastest.
            let mut dim = outer.len();
            while dim > 0 {
                dim -= 1;
                odometer[dim] += 1;
                if odometer[dim] < file_count[outer[dim]] {
                    continue 'region;
                }
                odometer[dim] = 0;
            }
            break;
        }

        Ok((runs, shape))
    }

    fn check_region(
        &self,
        block_shape: &[usize],
        buffer_len: usize,
        to_volume: &[Option<usize>],
        file_start: &[usize],
        file_count: &[usize],
    ) -> Result<()> {
        let n_file = self.extents.len();
        if to_volume.len() != n_file || file_start.len() != n_file || file_count.len() != n_file {
            return Err(Error::invalid_argument(
                "axis map, start, and count must have one entry per file dimension",
            ));
        }
        let block_elements: usize = block_shape.iter().product();
        if buffer_len != block_elements {
            return Err(Error::invalid_argument(format!(
                "buffer holds {} elements, block shape needs {}",
                buffer_len, block_elements
            )));
        }
        for dim in 0..n_file {
            match to_volume[dim] {
                Some(vol_dim) => {
                    if vol_dim >= block_shape.len() {
                        return Err(Error::invalid_argument("axis map points past block shape"));
                    }
                    if file_count[dim] == 0 || file_count[dim] > block_shape[vol_dim] {
                        return Err(Error::invalid_argument(
                            "transfer count must be within the block shape",
                        ));
                    }
                    if file_start[dim] + file_count[dim] > self.extents[dim] {
                        return Err(Error::invalid_argument(format!(
                            "transfer [{}, {}) exceeds file extent {} on dimension {}",
                            file_start[dim],
                            file_start[dim] + file_count[dim],
                            self.extents[dim],
                            dim
                        )));
                    }
                }
                None => {
                    if file_start[dim] >= self.extents[dim] {
                        return Err(Error::invalid_argument(format!(
                            "fixed position {} exceeds file extent {} on dimension {}",
                            file_start[dim], self.extents[dim], dim
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Flush buffered writes to the operating system.
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}
