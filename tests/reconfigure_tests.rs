// Reconfiguration tests for VoxStore
// Block-shape, byte-budget, and file-offset changes must be atomic:
// either fully applied or fully rejected, never losing written values

use tempfile::TempDir;
use voxstore::{CacheOptions, Volume};

fn filled_volume() -> Volume<f64> {
    let options = CacheOptions::new().max_cache_bytes(128).block_sizes(&[2, 2, 2]);
    let mut volume: Volume<f64> = Volume::new(&["z", "y", "x"], &[4, 4, 4], options).unwrap();
    for z in 0..4 {
        for y in 0..4 {
            for x in 0..4 {
                volume.set_voxel(&[z, y, x], (z * 100 + y * 10 + x) as f64).unwrap();
            }
        }
    }
    volume
}

fn assert_contents(volume: &mut Volume<f64>) {
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
}

/// Changing the block shape preserves every written value
#[test]
fn test_block_size_change_preserves_values() {
    let mut volume = filled_volume();

    volume.set_block_sizes(&[3, 1, 4]).unwrap();
    assert_eq!(volume.block_sizes(), &[3, 1, 4]);
    assert_eq!(volume.resident_blocks(), 0);
    assert_contents(&mut volume);
}

/// An invalid block size rejects the whole change and leaves the old
/// configuration and all cached values untouched
#[test]
fn test_invalid_block_size_rejected_in_full() {
    let mut volume = filled_volume();
    let resident_before = volume.resident_blocks();

    let result = volume.set_block_sizes(&[2, 0, 2]);
    assert!(result.is_err());

    // Old configuration still active, nothing was flushed
    assert_eq!(volume.block_sizes(), &[2, 2, 2]);
    assert_eq!(volume.resident_blocks(), resident_before);
    assert_contents(&mut volume);
}

/// A wrong-arity block shape is rejected the same way
#[test]
fn test_wrong_arity_block_size_rejected() {
    let mut volume = filled_volume();
    assert!(volume.set_block_sizes(&[2, 2]).is_err());
    assert_eq!(volume.block_sizes(), &[2, 2, 2]);
    assert_contents(&mut volume);
}

/// Setting the same shape again is a no-op without a flush
#[test]
fn test_unchanged_block_size_is_noop() {
    let mut volume = filled_volume();
    let resident_before = volume.resident_blocks();
    let writes_before = volume.cache_stats().block_writes;

    volume.set_block_sizes(&[2, 2, 2]).unwrap();
    assert_eq!(volume.resident_blocks(), resident_before);
    assert_eq!(volume.cache_stats().block_writes, writes_before);
}

/// Reconfiguration flushes dirty blocks even on a temp-backed volume;
/// only teardown may discard them
#[test]
fn test_reconfigure_flushes_even_temp_backed() {
    // Temp-backed: no output path was ever set
    let mut volume = filled_volume();
    assert!(volume.is_modified());

    volume.set_block_sizes(&[4, 4, 1]).unwrap();
    assert_contents(&mut volume);

    // And a second reconfiguration on top
    volume.set_max_cache_bytes(4 * 4 * 8).unwrap();
    assert_contents(&mut volume);
}

/// Shrinking the byte budget to a single block keeps the volume correct
#[test]
fn test_budget_change_preserves_values() {
    let mut volume = filled_volume();

    // One 2x2x2 block only
    volume.set_max_cache_bytes(64).unwrap();
    assert_eq!(volume.max_blocks(), 1);
    assert_contents(&mut volume);

    // Grow it back
    volume.set_max_cache_bytes(1 << 20).unwrap();
    assert!(volume.max_blocks() >= 8);
    assert_contents(&mut volume);
}

/// Reconfiguring a persistent volume keeps the named file authoritative
#[test]
fn test_reconfigure_then_close_persists() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("reconfigured.vxv");

    {
        let options = CacheOptions::new().max_cache_bytes(128).block_sizes(&[2, 2, 2]);
        let mut volume: Volume<f64> =
            Volume::new(&["z", "y", "x"], &[4, 4, 4], options).unwrap();
        volume.set_output_path(&path);
        for z in 0..4 {
            for y in 0..4 {
                for x in 0..4 {
                    volume.set_voxel(&[z, y, x], (z * 100 + y * 10 + x) as f64).unwrap();
                }
            }
        }
        volume.set_block_sizes(&[1, 2, 2]).unwrap();
        volume.close().unwrap();
    }

    let mut volume: Volume<f64> = Volume::open(&path, CacheOptions::default()).unwrap();
    assert_contents(&mut volume);
}

/// Changing the file offsets retargets a packed file's sub-volume
#[test]
fn test_file_offset_change_switches_slab() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("packed.vxv");

    {
        let names: Vec<String> = ["t", "y", "x"].iter().map(|s| s.to_string()).collect();
        let mut store: voxstore::RawVolumeFile<i32> =
            voxstore::RawVolumeFile::create_path(&path, &names, &[2, 2, 2]).unwrap();
        let map = [None, Some(0), Some(1)];
        store.write_block(&[2, 2], &[1, 2, 3, 4], &map, &[0, 0, 0], &[0, 2, 2]).unwrap();
        store.write_block(&[2, 2], &[5, 6, 7, 8], &map, &[1, 0, 0], &[0, 2, 2]).unwrap();
    }

    let mut volume: Volume<i32> =
        Volume::open_slab(&path, &["y", "x"], &[0, 0, 0], CacheOptions::default()).unwrap();
    assert_eq!(volume.get_voxel(&[0, 0]).unwrap(), 1);
    assert_eq!(volume.get_voxel(&[1, 1]).unwrap(), 4);

    // Retarget the unmapped dimension to the second packed sub-volume
    volume.set_file_offset(&[1, 0, 0]).unwrap();
    assert_eq!(volume.resident_blocks(), 0);
    assert_eq!(volume.get_voxel(&[0, 0]).unwrap(), 5);
    assert_eq!(volume.get_voxel(&[1, 1]).unwrap(), 8);

    // Setting identical offsets changes nothing
    let misses_before = volume.cache_stats().misses;
    volume.set_file_offset(&[1, 0, 0]).unwrap();
    assert_eq!(volume.get_voxel(&[0, 0]).unwrap(), 5);
    assert_eq!(volume.cache_stats().misses, misses_before);
}
