//! E2E: dataset copying.
//!
//! Copying duplicates every key and the contents of every non-external
//! chunk. A writable source is copied eagerly; a read-only source defers
//! the data transfer to the new dataset's repositioner.

use pghmri::{Dataset, OpenMode};
use tempfile::TempDir;

fn dataset_path(dir: &TempDir, name: &str) -> String {
    dir.path().join(name).to_str().unwrap().to_string()
}

fn build_source(path: &str) -> Dataset {
    let mut ds = Dataset::open(path, OpenMode::Write).unwrap();
    ds.set_string("subject", "phantom-07").unwrap();
    ds.set_float("tr", 1.5).unwrap();
    ds.create_chunk("images").unwrap();
    ds.set_string("images.datatype", "float32").unwrap();
    ds.set_string("images.dimensions", "xyzt").unwrap();
    ds.set_int("images.extent.x", 4).unwrap();
    ds.set_int("images.extent.y", 4).unwrap();
    ds.set_int("images.extent.z", 2).unwrap();
    ds.set_int("images.extent.t", 3).unwrap();
    let data: Vec<f32> = (0..96).map(|i| i as f32 * 0.5).collect();
    ds.set_chunk("images", 0, &data).unwrap();
    ds
}

// ─────────────────────────────────────────────────────────────────────────────
// Eager copy from a writable source
// ─────────────────────────────────────────────────────────────────────────────

/// Copying a writable dataset transfers keys and bytes immediately.
#[test]
fn eager_copy_duplicates_keys_and_data() {
    let dir = TempDir::new().unwrap();
    let src_path = dataset_path(&dir, "src.mri");
    let dst_path = dataset_path(&dir, "dst.mri");

    let mut src = build_source(&src_path);
    let dst = src.copy_dataset(&dst_path).expect("copy dataset");
    dst.close().unwrap();
    src.close().unwrap();

    let mut dst = Dataset::open(&dst_path, OpenMode::Read).unwrap();
    assert_eq!(dst.get_string("subject").unwrap(), "phantom-07");
    assert_eq!(dst.get_float("tr").unwrap(), 1.5);
    assert_eq!(dst.get_int("images.size").unwrap(), 384);
    let back: Vec<f32> = dst.get_chunk("images", 96, 0).unwrap();
    let expect: Vec<f32> = (0..96).map(|i| i as f32 * 0.5).collect();
    assert_eq!(back, expect);
    dst.close().unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Deferred copy from a read-only source
// ─────────────────────────────────────────────────────────────────────────────

/// Copying a read-only dataset links the data lazily; after close the
/// copy is complete and self-contained.
#[test]
fn lazy_copy_materializes_on_close() {
    let dir = TempDir::new().unwrap();
    let src_path = dataset_path(&dir, "src.mri");
    let dst_path = dataset_path(&dir, "dst.mri");

    build_source(&src_path).close().unwrap();

    let mut src = Dataset::open(&src_path, OpenMode::Read).unwrap();
    let dst = src.copy_dataset(&dst_path).expect("copy dataset");
    dst.close().unwrap();
    src.close().unwrap();

    // The source must be untouched.
    let mut src = Dataset::open(&src_path, OpenMode::Read).unwrap();
    let src_back: Vec<f32> = src.get_chunk("images", 96, 0).unwrap();
    src.close().unwrap();

    let mut dst = Dataset::open(&dst_path, OpenMode::Read).unwrap();
    let dst_back: Vec<f32> = dst.get_chunk("images", 96, 0).unwrap();
    assert_eq!(dst_back, src_back);
    assert_eq!(dst.get_string("subject").unwrap(), "phantom-07");
    dst.close().unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Sibling-file renaming
// ─────────────────────────────────────────────────────────────────────────────

/// A chunk-file key naming a concrete sibling is rewritten to a
/// dataset-relative `.dat` name in the copy, and the data follows.
#[test]
fn copy_rewrites_concrete_chunk_file_names() {
    let dir = TempDir::new().unwrap();
    let src_path = dataset_path(&dir, "src.mri");
    let dst_path = dataset_path(&dir, "dst.mri");

    let mut src = Dataset::open(&src_path, OpenMode::Write).unwrap();
    src.create_chunk("c").unwrap();
    src.set_string("c.datatype", "uint8").unwrap();
    src.set_string("c.dimensions", "x").unwrap();
    src.set_int("c.extent.x", 10).unwrap();
    src.set_string("c.file", "payload.bin").unwrap();
    src.set_chunk_raw("c", 0, &[7u8; 10]).unwrap();

    let dst = src.copy_dataset(&dst_path).expect("copy dataset");
    dst.close().unwrap();
    src.close().unwrap();

    let mut dst = Dataset::open(&dst_path, OpenMode::Read).unwrap();
    assert_eq!(dst.get_string("c.file").unwrap(), ".dat");
    let buf = dst.get_chunk_raw("c", 10, 0).unwrap();
    assert_eq!(dst.buffer_bytes(buf).unwrap(), &[7u8; 10]);
    dst.close().unwrap();

    // The copy's chunk lives beside the copy, in dst.dat.
    assert!(std::path::Path::new(&dataset_path(&dir, "dst.dat")).exists());
}
