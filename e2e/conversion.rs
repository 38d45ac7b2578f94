//! E2E: type conversion at the read/write boundary.
//!
//! Requests in a type other than the chunk's on-disk datatype convert
//! element-wise: widenings are exact, narrowings saturate at the target
//! range and record an out-of-range warning, and non-finite floats pass
//! through to float targets.

use pghmri::{Dataset, OpenMode};
use tempfile::TempDir;

fn dataset_path(dir: &TempDir, name: &str) -> String {
    dir.path().join(name).to_str().unwrap().to_string()
}

fn make_chunk(ds: &mut Dataset, name: &str, datatype: &str, extent: i64) {
    ds.create_chunk(name).unwrap();
    ds.set_string(&format!("{}.datatype", name), datatype).unwrap();
    ds.set_string(&format!("{}.dimensions", name), "x").unwrap();
    ds.set_int(&format!("{}.extent.x", name), extent).unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Saturating reads
// ─────────────────────────────────────────────────────────────────────────────

/// Reading int16 data as uint8 clamps to [0, 255]. The warning is
/// recorded but never fails the read.
#[test]
fn int16_read_as_uint8_clamps() {
    let dir = TempDir::new().unwrap();
    let path = dataset_path(&dir, "t.mri");

    let mut ds = Dataset::open(&path, OpenMode::Write).unwrap();
    make_chunk(&mut ds, "c", "int16", 5);
    ds.set_chunk("c", 0, &[-5i16, 0, 100, 255, 1000]).unwrap();

    let back: Vec<u8> = ds.get_chunk("c", 5, 0).unwrap();
    assert_eq!(back, [0, 0, 100, 255, 255]);
    ds.close().unwrap();
}

/// Reading float64 data as int32 truncates in range and clamps outside.
#[test]
fn float64_read_as_int32_clamps() {
    let dir = TempDir::new().unwrap();
    let path = dataset_path(&dir, "t.mri");

    let mut ds = Dataset::open(&path, OpenMode::Write).unwrap();
    make_chunk(&mut ds, "c", "float64", 4);
    ds.set_chunk("c", 0, &[1.75f64, -2.5, 3e12, -3e12]).unwrap();

    let back: Vec<i32> = ds.get_chunk("c", 4, 0).unwrap();
    assert_eq!(back, [1, -2, i32::MAX, i32::MIN]);
    ds.close().unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Saturating writes
// ─────────────────────────────────────────────────────────────────────────────

/// Writing double 1e40 into a float32 chunk stores f32::MAX; +Inf passes
/// through as a float infinity.
#[test]
fn double_writes_into_float32_chunk() {
    let dir = TempDir::new().unwrap();
    let path = dataset_path(&dir, "t.mri");

    let mut ds = Dataset::open(&path, OpenMode::Write).unwrap();
    make_chunk(&mut ds, "c", "float32", 4);
    ds.set_chunk("c", 0, &[1e40f64, -1e40, f64::INFINITY, 2.5]).unwrap();

    let back: Vec<f32> = ds.get_chunk("c", 4, 0).unwrap();
    assert_eq!(back[0], f32::MAX);
    assert_eq!(back[1], -f32::MAX);
    assert!(back[2].is_infinite() && back[2] > 0.0);
    assert_eq!(back[3], 2.5);
    ds.close().unwrap();
}

/// Writing i64 values into a uint8 chunk clamps at both ends.
#[test]
fn int64_writes_into_uint8_chunk() {
    let dir = TempDir::new().unwrap();
    let path = dataset_path(&dir, "t.mri");

    let mut ds = Dataset::open(&path, OpenMode::Write).unwrap();
    make_chunk(&mut ds, "c", "uint8", 4);
    ds.set_chunk("c", 0, &[-7i64, 0, 200, 90000]).unwrap();

    let back: Vec<u8> = ds.get_chunk("c", 4, 0).unwrap();
    assert_eq!(back, [0, 0, 200, 255]);
    ds.close().unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Exact widenings
// ─────────────────────────────────────────────────────────────────────────────

/// int16 data read back as every wider type is exact.
#[test]
fn widening_reads_are_exact() {
    let dir = TempDir::new().unwrap();
    let path = dataset_path(&dir, "t.mri");

    let values = [-32768i16, -1, 0, 1, 32767];
    let mut ds = Dataset::open(&path, OpenMode::Write).unwrap();
    make_chunk(&mut ds, "c", "int16", 5);
    ds.set_chunk("c", 0, &values).unwrap();

    let as_i32: Vec<i32> = ds.get_chunk("c", 5, 0).unwrap();
    assert_eq!(as_i32, [-32768, -1, 0, 1, 32767]);
    let as_i64: Vec<i64> = ds.get_chunk("c", 5, 0).unwrap();
    assert_eq!(as_i64, [-32768, -1, 0, 1, 32767]);
    let as_f32: Vec<f32> = ds.get_chunk("c", 5, 0).unwrap();
    assert_eq!(as_f32, [-32768.0, -1.0, 0.0, 1.0, 32767.0]);
    let as_f64: Vec<f64> = ds.get_chunk("c", 5, 0).unwrap();
    assert_eq!(as_f64, [-32768.0, -1.0, 0.0, 1.0, 32767.0]);
    ds.close().unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Bounds
// ─────────────────────────────────────────────────────────────────────────────

/// Reads and writes past the end of a chunk fail without touching data.
#[test]
fn out_of_bounds_access_fails() {
    let dir = TempDir::new().unwrap();
    let path = dataset_path(&dir, "t.mri");

    let mut ds = Dataset::open(&path, OpenMode::Write).unwrap();
    make_chunk(&mut ds, "c", "int16", 8);
    ds.set_chunk("c", 0, &[1i16; 8]).unwrap();

    // Exactly at the end is fine.
    assert!(ds.get_chunk::<i16>("c", 8, 0).is_ok());
    assert!(ds.get_chunk::<i16>("c", 1, 7).is_ok());
    // One past is not.
    let err = ds.get_chunk::<i16>("c", 9, 0).unwrap_err();
    assert!(err.to_string().contains("out-of-bounds"), "got: {}", err);
    assert!(ds.get_chunk::<i16>("c", 1, 8).is_err());
    assert!(ds.set_chunk("c", 5, &[0i16; 4]).is_err());
    // Raw bounds are in bytes.
    assert!(ds.get_chunk_raw("c", 16, 0).is_ok());
    assert!(ds.get_chunk_raw("c", 17, 0).is_err());
    ds.close().unwrap();
}

/// The derived size key cannot be set to anything but its own value.
#[test]
fn size_key_is_derived_only() {
    let dir = TempDir::new().unwrap();
    let path = dataset_path(&dir, "t.mri");

    let mut ds = Dataset::open(&path, OpenMode::Write).unwrap();
    make_chunk(&mut ds, "c", "int16", 8);
    assert_eq!(ds.get_int("c.size").unwrap(), 16);
    assert!(ds.set_int("c.size", 999).is_err());
    // Rejected set leaves the stored value untouched.
    assert_eq!(ds.get_int("c.size").unwrap(), 16);
    // Setting it to the derived value is a harmless no-op.
    assert!(ds.set_int("c.size", 16).is_ok());
    assert!(ds.remove("c.size").is_err());
    ds.close().unwrap();
}

/// An invalid datatype token is rejected and the previous value survives.
#[test]
fn invalid_datatype_token_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dataset_path(&dir, "t.mri");

    let mut ds = Dataset::open(&path, OpenMode::Write).unwrap();
    make_chunk(&mut ds, "c", "int16", 4);
    assert!(ds.set_string("c.datatype", "int12").is_err());
    assert_eq!(ds.get_string("c.datatype").unwrap(), "int16");
    assert_eq!(ds.chunk_info("c").unwrap().datatype().token(), "int16");
    ds.close().unwrap();
}
