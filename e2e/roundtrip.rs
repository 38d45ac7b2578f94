//! E2E: small-dataset round trips.
//!
//! Covers the basic life of a dataset: create, declare a chunk, write
//! typed data, close, reopen read-only, and read everything back, plus
//! header round trips of awkward key values.

use pghmri::{Dataset, ImageShape, OpenMode};
use tempfile::TempDir;

fn dataset_path(dir: &TempDir, name: &str) -> String {
    dir.path().join(name).to_str().unwrap().to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Float chunk round trip
// ─────────────────────────────────────────────────────────────────────────────

/// Create a float32 chunk of 2x2x1x3 elements, write 0..12, reopen, read.
#[test]
fn float_chunk_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dataset_path(&dir, "t.mri");

    let mut ds = Dataset::open(&path, OpenMode::Write).expect("create dataset");
    ds.create_chunk("images").expect("create chunk");
    ds.set_string("images.datatype", "float32").unwrap();
    ds.set_string("images.dimensions", "xyzt").unwrap();
    ds.set_int("images.extent.x", 2).unwrap();
    ds.set_int("images.extent.y", 2).unwrap();
    ds.set_int("images.extent.z", 1).unwrap();
    ds.set_int("images.extent.t", 3).unwrap();

    // Size is derived: 4 bytes * 2*2*1*3.
    assert_eq!(ds.get_int("images.size").unwrap(), 48);

    let data: Vec<f32> = (0..12).map(|i| i as f32).collect();
    ds.set_chunk("images", 0, &data).expect("write chunk");
    ds.close().expect("close dataset");

    let mut ds = Dataset::open(&path, OpenMode::Read).expect("reopen dataset");
    assert_eq!(ds.get_string("!format").unwrap(), "pgh");
    assert_eq!(ds.get_string("!version").unwrap(), "1.0");
    let back: Vec<f32> = ds.get_chunk("images", 12, 0).expect("read chunk");
    assert_eq!(back, data);
    ds.close().unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Standard images
// ─────────────────────────────────────────────────────────────────────────────

/// An `images` chunk with an xyzt layout unlocks (time, slice)
/// addressing; each image is one xy plane.
#[test]
fn standard_image_helpers_address_time_slice() {
    let dir = TempDir::new().unwrap();
    let path = dataset_path(&dir, "t.mri");

    let mut ds = Dataset::open(&path, OpenMode::Write).unwrap();
    ds.create_chunk("images").unwrap();
    ds.set_string("images.dimensions", "xyzt").unwrap();
    ds.set_int("images.extent.x", 2).unwrap();
    ds.set_int("images.extent.y", 2).unwrap();
    ds.set_int("images.extent.z", 2).unwrap();
    ds.set_int("images.extent.t", 2).unwrap();
    assert!(ds.has_standard_images());

    let all: Vec<i16> = (0..16).collect();
    ds.set_chunk("images", 0, &all).unwrap();

    // Images are laid out (time-major, then slice): t=1, z=0 is the
    // third xy plane.
    let img: Vec<i16> = ds.get_image(1, 0, ImageShape::Scalar).unwrap();
    assert_eq!(img, [8, 9, 10, 11]);

    ds.set_image(0, 1, ImageShape::Scalar, &[-1i16, -2, -3, -4]).unwrap();
    let back: Vec<i16> = ds.get_chunk("images", 4, 4).unwrap();
    assert_eq!(back, [-1, -2, -3, -4]);

    // A scalar layout is not complex-valued.
    assert!(ds.get_image::<i16>(0, 0, ImageShape::Complex).is_err());
    ds.close().unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Partial reads and writes
// ─────────────────────────────────────────────────────────────────────────────

/// Reads at an element offset see exactly the elements written there.
#[test]
fn offset_reads_see_offset_writes() {
    let dir = TempDir::new().unwrap();
    let path = dataset_path(&dir, "t.mri");

    let mut ds = Dataset::open(&path, OpenMode::Write).unwrap();
    ds.create_chunk("v").unwrap();
    ds.set_string("v.datatype", "int32").unwrap();
    ds.set_string("v.dimensions", "x").unwrap();
    ds.set_int("v.extent.x", 100).unwrap();

    let all: Vec<i32> = (0..100).collect();
    ds.set_chunk("v", 0, &all).unwrap();
    ds.set_chunk("v", 40, &[-1i32, -2, -3]).unwrap();

    let back: Vec<i32> = ds.get_chunk("v", 5, 39).unwrap();
    assert_eq!(back, [39, -1, -2, -3, 43]);
    ds.close().unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Raw access and the buffer pool
// ─────────────────────────────────────────────────────────────────────────────

/// Raw bytes written are the raw bytes read, and a retained pool buffer
/// survives later reads.
#[test]
fn raw_round_trip_with_retained_buffer() {
    let dir = TempDir::new().unwrap();
    let path = dataset_path(&dir, "t.mri");

    let mut ds = Dataset::open(&path, OpenMode::Write).unwrap();
    ds.create_chunk("blob").unwrap();
    ds.set_string("blob.datatype", "uint8").unwrap();
    ds.set_string("blob.dimensions", "x").unwrap();
    ds.set_int("blob.extent.x", 64).unwrap();

    let bytes: Vec<u8> = (0..64).collect();
    ds.set_chunk_raw("blob", 0, &bytes).unwrap();

    let buf = ds.get_chunk_raw("blob", 64, 0).unwrap();
    ds.retain_buffer(buf).unwrap();

    // Churn the pool; the retained buffer must not be recycled.
    for _ in 0..20 {
        ds.get_chunk_raw("blob", 16, 8).unwrap();
    }
    assert_eq!(ds.buffer_bytes(buf).unwrap(), bytes.as_slice());
    ds.discard_buffer(buf).unwrap();
    assert!(ds.buffer_bytes(buf).is_none());
    ds.close().unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Header value round trips
// ─────────────────────────────────────────────────────────────────────────────

/// A value full of quotes, newlines, and '=' survives close and reopen.
#[test]
fn awkward_value_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dataset_path(&dir, "t.mri");

    let value = "hello \"world\"\nline2=ok";
    let mut ds = Dataset::open(&path, OpenMode::Write).unwrap();
    ds.set_string("note", value).unwrap();
    ds.set_string("empty", "").unwrap();
    ds.set_string("spaced", "two words").unwrap();
    ds.close().unwrap();

    let ds = Dataset::open(&path, OpenMode::Read).unwrap();
    assert_eq!(ds.get_string("note").unwrap(), value);
    assert_eq!(ds.get_string("empty").unwrap(), "");
    assert_eq!(ds.get_string("spaced").unwrap(), "two words");
    ds.close().unwrap();
}

/// Key iteration is ascending lexicographic, and tolerates removal of a
/// not-yet-visited key.
#[test]
fn key_iteration_order() {
    let dir = TempDir::new().unwrap();
    let path = dataset_path(&dir, "t.mri");

    let mut ds = Dataset::open(&path, OpenMode::Write).unwrap();
    ds.set_string("zz", "1").unwrap();
    ds.set_string("aa", "2").unwrap();
    ds.set_string("mm", "3").unwrap();

    let keys: Vec<String> = ds.iterate_keys().collect();
    assert_eq!(keys, ["!format", "!version", "aa", "mm", "zz"]);

    let mut it = ds.iterate_keys();
    assert_eq!(it.next().as_deref(), Some("!format"));
    ds.remove("zz").unwrap();
    // The snapshot still yields the removed key name.
    assert_eq!(it.last().as_deref(), Some("zz"));
    ds.close().unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Mode enforcement
// ─────────────────────────────────────────────────────────────────────────────

/// Read-only datasets refuse key mutation and chunk writes.
#[test]
fn read_only_dataset_rejects_mutation() {
    let dir = TempDir::new().unwrap();
    let path = dataset_path(&dir, "t.mri");

    let mut ds = Dataset::open(&path, OpenMode::Write).unwrap();
    ds.create_chunk("c").unwrap();
    ds.set_string("c.dimensions", "x").unwrap();
    ds.set_int("c.extent.x", 4).unwrap();
    ds.set_chunk("c", 0, &[1i16, 2, 3, 4]).unwrap();
    ds.close().unwrap();

    let mut ds = Dataset::open(&path, OpenMode::Read).unwrap();
    assert!(ds.set_string("k", "v").is_err());
    assert!(ds.remove("c").is_err());
    assert!(ds.set_chunk("c", 0, &[9i16]).is_err());
    // Reads still work.
    let back: Vec<i16> = ds.get_chunk("c", 4, 0).unwrap();
    assert_eq!(back, [1, 2, 3, 4]);
    ds.close().unwrap();
}

/// Modify-data mode may rewrite chunk bytes in place but refuses any key
/// mutation.
#[test]
fn modify_data_mode_rewrites_in_place() {
    let dir = TempDir::new().unwrap();
    let path = dataset_path(&dir, "t.mri");

    let mut ds = Dataset::open(&path, OpenMode::Write).unwrap();
    ds.create_chunk("c").unwrap();
    ds.set_string("c.dimensions", "x").unwrap();
    ds.set_int("c.extent.x", 4).unwrap();
    ds.set_chunk("c", 0, &[1i16, 2, 3, 4]).unwrap();
    ds.close().unwrap();

    let mut ds = Dataset::open(&path, OpenMode::ModifyData).unwrap();
    assert!(ds.set_string("note", "nope").is_err());
    assert!(ds.set_string("c.datatype", "int32").is_err());
    ds.set_chunk("c", 1, &[-20i16, -30]).unwrap();
    ds.close().unwrap();

    let mut ds = Dataset::open(&path, OpenMode::Read).unwrap();
    let back: Vec<i16> = ds.get_chunk("c", 4, 0).unwrap();
    assert_eq!(back, [1, -20, -30, 4]);
    assert!(!ds.has("note"));
    ds.close().unwrap();
}

/// Destroy unlinks every owned host file.
#[test]
fn destroy_removes_files() {
    let dir = TempDir::new().unwrap();
    let path = dataset_path(&dir, "t.mri");

    let mut ds = Dataset::open(&path, OpenMode::Write).unwrap();
    ds.create_chunk("c").unwrap();
    ds.set_string("c.file", ".dat").unwrap();
    ds.set_string("c.dimensions", "x").unwrap();
    ds.set_int("c.extent.x", 16).unwrap();
    ds.set_chunk("c", 0, &[7i16; 16]).unwrap();

    let data_path = dataset_path(&dir, "t.dat");
    assert!(std::path::Path::new(&data_path).exists());
    ds.destroy().expect("destroy dataset");
    assert!(!std::path::Path::new(&path).exists());
    assert!(!std::path::Path::new(&data_path).exists());
}
