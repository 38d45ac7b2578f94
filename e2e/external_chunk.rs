//! E2E: external chunks.
//!
//! External chunks live in files the engine does not own: the allocator
//! never places them, the repositioner never moves them, writes are
//! rejected, and reads pull bytes straight from the foreign file.

use pghmri::{Dataset, OpenMode};
use tempfile::TempDir;

fn dataset_path(dir: &TempDir, name: &str) -> String {
    dir.path().join(name).to_str().unwrap().to_string()
}

// ─────────────────────────────────────────────────────────────────────────────
// Write rejection
// ─────────────────────────────────────────────────────────────────────────────

/// Writing to an external chunk fails, whatever the dataset mode.
#[test]
fn writes_to_external_chunks_are_rejected() {
    let dir = TempDir::new().unwrap();
    let path = dataset_path(&dir, "t.mri");

    let mut ds = Dataset::open(&path, OpenMode::Write).unwrap();
    ds.create_chunk("raw").unwrap();
    ds.set_string("raw.file", ".ext").unwrap();
    ds.set_string("raw.order", "external").unwrap();
    ds.set_string("raw.datatype", "uint8").unwrap();
    ds.set_string("raw.dimensions", "x").unwrap();
    ds.set_int("raw.extent.x", 8).unwrap();

    let err = ds.set_chunk_raw("raw", 0, &[0u8; 8]).unwrap_err();
    assert!(err.to_string().contains("external chunk"), "got: {}", err);
    ds.close().unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Reading foreign bytes
// ─────────────────────────────────────────────────────────────────────────────

/// Bytes placed in the external file by someone else read back verbatim.
#[test]
fn external_chunk_reads_foreign_file() {
    let dir = TempDir::new().unwrap();
    let path = dataset_path(&dir, "t.mri");

    let mut ds = Dataset::open(&path, OpenMode::Write).unwrap();
    ds.create_chunk("raw").unwrap();
    ds.set_string("raw.file", ".ext").unwrap();
    ds.set_string("raw.order", "external").unwrap();
    ds.set_string("raw.datatype", "uint8").unwrap();
    ds.set_string("raw.dimensions", "x").unwrap();
    ds.set_int("raw.extent.x", 8).unwrap();
    ds.close().unwrap();

    // Populate the external file out of band.
    let ext_path = dataset_path(&dir, "t.ext");
    std::fs::write(&ext_path, [0u8, 1, 2, 3, 4, 5, 6, 7]).unwrap();

    let mut ds = Dataset::open(&path, OpenMode::Read).unwrap();
    let buf = ds.get_chunk_raw("raw", 8, 0).expect("read external chunk");
    assert_eq!(ds.buffer_bytes(buf).unwrap(), &[0, 1, 2, 3, 4, 5, 6, 7]);
    ds.close().unwrap();

    // The engine never truncated or rewrote the foreign file.
    assert_eq!(std::fs::read(&ext_path).unwrap(), [0, 1, 2, 3, 4, 5, 6, 7]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Destroy leaves foreign files alone
// ─────────────────────────────────────────────────────────────────────────────

/// Destroying a dataset unlinks its own files but not external ones.
#[test]
fn destroy_spares_external_files() {
    let dir = TempDir::new().unwrap();
    let path = dataset_path(&dir, "t.mri");
    let ext_path = dataset_path(&dir, "t.ext");
    std::fs::write(&ext_path, [9u8; 4]).unwrap();

    let mut ds = Dataset::open(&path, OpenMode::Write).unwrap();
    ds.create_chunk("raw").unwrap();
    ds.set_string("raw.file", ".ext").unwrap();
    ds.set_string("raw.order", "external").unwrap();
    ds.set_string("raw.datatype", "uint8").unwrap();
    ds.set_string("raw.dimensions", "x").unwrap();
    ds.set_int("raw.extent.x", 4).unwrap();
    ds.destroy().unwrap();

    assert!(!std::path::Path::new(&path).exists());
    assert!(std::path::Path::new(&ext_path).exists());
}
