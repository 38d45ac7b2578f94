//! E2E: on-disk byte order.
//!
//! The `little_endian` attribute controls the stored byte order of a
//! chunk; flipping it after data exists byte-swaps the file content while
//! the values read back unchanged.

use pghmri::{Dataset, OpenMode};
use tempfile::TempDir;

fn dataset_path(dir: &TempDir, name: &str) -> String {
    dir.path().join(name).to_str().unwrap().to_string()
}

fn make_i32_chunk(ds: &mut Dataset, little_endian: i64) {
    ds.create_chunk("x").unwrap();
    ds.set_string("x.datatype", "int32").unwrap();
    ds.set_string("x.dimensions", "x").unwrap();
    ds.set_int("x.extent.x", 1).unwrap();
    ds.set_int("x.little_endian", little_endian).unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Raw byte order on disk
// ─────────────────────────────────────────────────────────────────────────────

/// A little-endian int32 chunk stores 0x01020304 as 04 03 02 01.
#[test]
fn little_endian_bytes_on_disk() {
    let dir = TempDir::new().unwrap();
    let path = dataset_path(&dir, "t.mri");

    let mut ds = Dataset::open(&path, OpenMode::Write).unwrap();
    make_i32_chunk(&mut ds, 1);
    ds.set_chunk("x", 0, &[0x0102_0304i32]).unwrap();
    ds.close().unwrap();

    let ds = Dataset::open(&path, OpenMode::Read).unwrap();
    let offset = ds.chunk_info("x").unwrap().offset() as usize;
    ds.close().unwrap();

    let raw = std::fs::read(&path).unwrap();
    assert_eq!(&raw[offset..offset + 4], &[0x04, 0x03, 0x02, 0x01]);
}

/// A big-endian int32 chunk stores 0x01020304 as 01 02 03 04.
#[test]
fn big_endian_bytes_on_disk() {
    let dir = TempDir::new().unwrap();
    let path = dataset_path(&dir, "t.mri");

    let mut ds = Dataset::open(&path, OpenMode::Write).unwrap();
    make_i32_chunk(&mut ds, 0);
    ds.set_chunk("x", 0, &[0x0102_0304i32]).unwrap();
    ds.close().unwrap();

    let ds = Dataset::open(&path, OpenMode::Read).unwrap();
    let offset = ds.chunk_info("x").unwrap().offset() as usize;
    ds.close().unwrap();

    let raw = std::fs::read(&path).unwrap();
    assert_eq!(&raw[offset..offset + 4], &[0x01, 0x02, 0x03, 0x04]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Swapping existing data
// ─────────────────────────────────────────────────────────────────────────────

/// Flipping little_endian after a write swaps the stored bytes in place;
/// the logical values are untouched.
#[test]
fn endianness_flip_converts_stored_bytes() {
    let dir = TempDir::new().unwrap();
    let path = dataset_path(&dir, "t.mri");

    let values = [0x0102_0304i32, -1, 42, i32::MIN];
    let mut ds = Dataset::open(&path, OpenMode::Write).unwrap();
    ds.create_chunk("x").unwrap();
    ds.set_string("x.datatype", "int32").unwrap();
    ds.set_string("x.dimensions", "x").unwrap();
    ds.set_int("x.extent.x", 4).unwrap();
    ds.set_int("x.little_endian", 1).unwrap();
    ds.set_chunk("x", 0, &values).unwrap();
    ds.set_int("x.little_endian", 0).unwrap();
    ds.close().unwrap();

    let mut ds = Dataset::open(&path, OpenMode::Read).unwrap();
    let (offset, little) = {
        let ch = ds.chunk_info("x").unwrap();
        (ch.offset() as usize, ch.little_endian())
    };
    assert!(!little);
    let back: Vec<i32> = ds.get_chunk("x", 4, 0).unwrap();
    assert_eq!(back, values);
    ds.close().unwrap();

    let raw = std::fs::read(&path).unwrap();
    assert_eq!(&raw[offset..offset + 4], &[0x01, 0x02, 0x03, 0x04]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Mixed-endian chunks in one dataset
// ─────────────────────────────────────────────────────────────────────────────

/// Two chunks of opposite byte order coexist and both read correctly.
#[test]
fn mixed_endian_chunks_coexist() {
    let dir = TempDir::new().unwrap();
    let path = dataset_path(&dir, "t.mri");

    let mut ds = Dataset::open(&path, OpenMode::Write).unwrap();
    for (name, little) in [("le", 1i64), ("be", 0)] {
        ds.create_chunk(name).unwrap();
        ds.set_string(&format!("{}.datatype", name), "int16").unwrap();
        ds.set_string(&format!("{}.dimensions", name), "x").unwrap();
        ds.set_int(&format!("{}.extent.x", name), 3).unwrap();
        ds.set_int(&format!("{}.little_endian", name), little).unwrap();
        ds.set_chunk(name, 0, &[0x1122i16, 0x3344, -2]).unwrap();
    }
    ds.close().unwrap();

    let mut ds = Dataset::open(&path, OpenMode::Read).unwrap();
    for name in ["le", "be"] {
        let back: Vec<i16> = ds.get_chunk(name, 3, 0).unwrap();
        assert_eq!(back, [0x1122, 0x3344, -2], "chunk {}", name);
    }
    ds.close().unwrap();
}
