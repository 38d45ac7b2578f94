//! E2E: allocator and repositioner behavior.
//!
//! Datatype changes resize chunks, the packer keeps chunks disjoint and
//! packed, fixed-offset chunks stay put, large chunks land on alignment
//! boundaries, and data survives every move.

use pghmri::{Dataset, OpenMode, ALIGNMENT_BOUNDARY, ALIGNMENT_THRESHOLD};
use tempfile::TempDir;

fn dataset_path(dir: &TempDir, name: &str) -> String {
    dir.path().join(name).to_str().unwrap().to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Repack after a datatype change
// ─────────────────────────────────────────────────────────────────────────────

/// Widening a chunk's datatype grows it, displaces its neighbor, and
/// preserves the values of both.
#[test]
fn datatype_change_repacks_without_overlap() {
    let dir = TempDir::new().unwrap();
    let path = dataset_path(&dir, "t.mri");

    let a_data: Vec<i16> = (0..16).collect();
    let b_data: Vec<i32> = (100..116).collect();

    let mut ds = Dataset::open(&path, OpenMode::Write).unwrap();
    ds.create_chunk("a").unwrap();
    ds.set_string("a.dimensions", "xy").unwrap();
    ds.set_int("a.extent.x", 4).unwrap();
    ds.set_int("a.extent.y", 4).unwrap();
    ds.create_chunk("b").unwrap();
    ds.set_string("b.datatype", "int32").unwrap();
    ds.set_string("b.dimensions", "xy").unwrap();
    ds.set_int("b.extent.x", 4).unwrap();
    ds.set_int("b.extent.y", 4).unwrap();
    ds.set_int("b.order", 1).unwrap();
    ds.set_chunk("a", 0, &a_data).unwrap();
    ds.set_chunk("b", 0, &b_data).unwrap();
    ds.close().unwrap();

    let mut ds = Dataset::open(&path, OpenMode::Modify).unwrap();
    ds.set_string("a.datatype", "int32").unwrap();
    ds.close().unwrap();

    let mut ds = Dataset::open(&path, OpenMode::Read).unwrap();
    assert_eq!(ds.get_int("a.size").unwrap(), 64);

    let (a_off, a_size) = {
        let a = ds.chunk_info("a").unwrap();
        (a.offset(), a.size())
    };
    let (b_off, b_size) = {
        let b = ds.chunk_info("b").unwrap();
        (b.offset(), b.size())
    };
    assert!(
        a_off + a_size <= b_off || b_off + b_size <= a_off,
        "chunks overlap: a=[{}, {}) b=[{}, {})",
        a_off,
        a_off + a_size,
        b_off,
        b_off + b_size
    );
    // Packed: no space wasted between the header reservation and the end.
    let file_len = std::fs::metadata(&path).unwrap().len();
    assert_eq!(file_len, a_off.max(b_off) + if a_off > b_off { a_size } else { b_size });

    let a_back: Vec<i32> = ds.get_chunk("a", 16, 0).unwrap();
    assert_eq!(a_back, (0..16).collect::<Vec<i32>>());
    let b_back: Vec<i32> = ds.get_chunk("b", 16, 0).unwrap();
    assert_eq!(b_back, b_data);
    ds.close().unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Fixed offsets
// ─────────────────────────────────────────────────────────────────────────────

/// A fixed-offset chunk sits exactly where it was declared; packed chunks
/// flow around it.
#[test]
fn fixed_offset_chunks_stay_put() {
    let dir = TempDir::new().unwrap();
    let path = dataset_path(&dir, "t.mri");

    let mut ds = Dataset::open(&path, OpenMode::Write).unwrap();
    ds.create_chunk("pinned").unwrap();
    ds.set_string("pinned.datatype", "uint8").unwrap();
    ds.set_string("pinned.dimensions", "x").unwrap();
    ds.set_int("pinned.extent.x", 100).unwrap();
    ds.set_string("pinned.order", "fixed_offset").unwrap();
    ds.set_int("pinned.offset", 2000).unwrap();
    ds.create_chunk("float").unwrap();
    ds.set_string("float.datatype", "uint8").unwrap();
    ds.set_string("float.dimensions", "x").unwrap();
    ds.set_int("float.extent.x", 4000).unwrap();
    ds.set_chunk_raw("pinned", 0, &[0xAA; 100]).unwrap();
    ds.set_chunk_raw("float", 0, &[0xBB; 4000]).unwrap();
    ds.close().unwrap();

    let mut ds = Dataset::open(&path, OpenMode::Read).unwrap();
    let pinned_off = ds.chunk_info("pinned").unwrap().offset();
    let float_off = ds.chunk_info("float").unwrap().offset();
    assert_eq!(pinned_off, 2000);
    // The 4000-byte chunk cannot sit in [512, 2000), so it lands after
    // the pinned region.
    assert!(float_off >= 2100, "float chunk at {}", float_off);

    let pinned = ds.get_chunk_raw("pinned", 100, 0).unwrap();
    assert!(ds.buffer_bytes(pinned).unwrap().iter().all(|&b| b == 0xAA));
    let float = ds.get_chunk_raw("float", 4000, 0).unwrap();
    assert!(ds.buffer_bytes(float).unwrap().iter().all(|&b| b == 0xBB));
    ds.close().unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Alignment
// ─────────────────────────────────────────────────────────────────────────────

/// Chunks at or above the alignment threshold start on an aligned offset.
#[test]
fn large_chunks_are_aligned() {
    let dir = TempDir::new().unwrap();
    let path = dataset_path(&dir, "t.mri");

    let mut ds = Dataset::open(&path, OpenMode::Write).unwrap();
    ds.create_chunk("big").unwrap();
    ds.set_string("big.datatype", "uint8").unwrap();
    ds.set_string("big.dimensions", "x").unwrap();
    ds.set_int("big.extent.x", ALIGNMENT_THRESHOLD as i64).unwrap();
    ds.set_chunk_raw("big", 0, &vec![1u8; ALIGNMENT_THRESHOLD as usize]).unwrap();
    ds.close().unwrap();

    let ds = Dataset::open(&path, OpenMode::Read).unwrap();
    let off = ds.chunk_info("big").unwrap().offset();
    assert_eq!(off % ALIGNMENT_BOUNDARY, 0, "offset {} misaligned", off);
    assert!(off >= 512);
    ds.close().unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Round-trip datatype flip
// ─────────────────────────────────────────────────────────────────────────────

/// Changing a datatype and changing it back, with no intervening writes,
/// leaves the stored values intact.
#[test]
fn datatype_flip_and_back_preserves_values() {
    let dir = TempDir::new().unwrap();
    let path = dataset_path(&dir, "t.mri");

    let data: Vec<i16> = (-8..8).collect();
    let mut ds = Dataset::open(&path, OpenMode::Write).unwrap();
    ds.create_chunk("c").unwrap();
    ds.set_string("c.dimensions", "x").unwrap();
    ds.set_int("c.extent.x", 16).unwrap();
    ds.set_chunk("c", 0, &data).unwrap();
    ds.close().unwrap();

    let mut ds = Dataset::open(&path, OpenMode::Modify).unwrap();
    ds.set_string("c.datatype", "int32").unwrap();
    ds.close().unwrap();

    let mut ds = Dataset::open(&path, OpenMode::Modify).unwrap();
    ds.set_string("c.datatype", "int16").unwrap();
    ds.close().unwrap();

    let mut ds = Dataset::open(&path, OpenMode::Read).unwrap();
    let back: Vec<i16> = ds.get_chunk("c", 16, 0).unwrap();
    assert_eq!(back, data);
    ds.close().unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Update is idempotent
// ─────────────────────────────────────────────────────────────────────────────

/// Repeated update_chunk calls with no intervening mutation are no-ops.
#[test]
fn update_chunk_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let path = dataset_path(&dir, "t.mri");

    let mut ds = Dataset::open(&path, OpenMode::Write).unwrap();
    ds.create_chunk("c").unwrap();
    ds.set_string("c.dimensions", "x").unwrap();
    ds.set_int("c.extent.x", 8).unwrap();
    ds.set_chunk("c", 0, &[5i16; 8]).unwrap();

    ds.update_chunk("c").unwrap();
    let offset_after_first = ds.chunk_info("c").unwrap().offset();
    ds.update_chunk("c").unwrap();
    ds.update_chunk("c").unwrap();
    assert_eq!(ds.chunk_info("c").unwrap().offset(), offset_after_first);
    let back: Vec<i16> = ds.get_chunk("c", 8, 0).unwrap();
    assert_eq!(back, [5i16; 8]);
    ds.close().unwrap();
}
