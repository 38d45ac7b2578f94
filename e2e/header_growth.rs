//! E2E: header sizing.
//!
//! A header alone in its file occupies exactly its written length. When
//! chunks share the file, the reservation grows to the next power of two
//! with slack, and the chunks are repacked above it.

use pghmri::{Dataset, OpenMode};
use tempfile::TempDir;

fn dataset_path(dir: &TempDir, name: &str) -> String {
    dir.path().join(name).to_str().unwrap().to_string()
}

fn forty_byte_value(i: usize) -> String {
    format!("{:0>40}", i)
}

// ─────────────────────────────────────────────────────────────────────────────
// Header alone in its file
// ─────────────────────────────────────────────────────────────────────────────

/// With no chunks in the header file, the file length equals the header
/// text exactly; no power-of-two padding.
#[test]
fn lone_header_is_exact() {
    let dir = TempDir::new().unwrap();
    let path = dataset_path(&dir, "t.mri");

    let mut ds = Dataset::open(&path, OpenMode::Write).unwrap();
    for i in 0..200 {
        ds.set_string(&format!("key.{:03}", i), &forty_byte_value(i)).unwrap();
    }
    ds.close().unwrap();

    let file_len = std::fs::metadata(&path).unwrap().len();
    // Far beyond the initial 512-byte assumption.
    assert!(file_len > 200 * 40, "file length {}", file_len);

    let ds = Dataset::open(&path, OpenMode::Read).unwrap();
    assert_eq!(ds.header_size(), file_len);
    assert_eq!(ds.n_keys(), 202);
    for i in 0..200 {
        assert_eq!(
            ds.get_string(&format!("key.{:03}", i)).unwrap(),
            forty_byte_value(i)
        );
    }
    ds.close().unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Header sharing its file with chunks
// ─────────────────────────────────────────────────────────────────────────────

/// With a chunk in the header file, the reservation rounds up to a power
/// of two and the chunk is repacked above it with its data intact.
#[test]
fn shared_header_grows_to_power_of_two() {
    let dir = TempDir::new().unwrap();
    let path = dataset_path(&dir, "t.mri");

    let data: Vec<u8> = (0..100).collect();
    let mut ds = Dataset::open(&path, OpenMode::Write).unwrap();
    ds.create_chunk("c").unwrap();
    ds.set_string("c.datatype", "uint8").unwrap();
    ds.set_string("c.dimensions", "x").unwrap();
    ds.set_int("c.extent.x", 100).unwrap();
    ds.set_chunk_raw("c", 0, &data).unwrap();
    for i in 0..200 {
        ds.set_string(&format!("key.{:03}", i), &forty_byte_value(i)).unwrap();
    }
    ds.close().unwrap();

    let mut ds = Dataset::open(&path, OpenMode::Read).unwrap();
    let offset = ds.chunk_info("c").unwrap().offset();
    // The reopened header size is the reserved space below the first chunk.
    assert_eq!(ds.header_size(), offset);
    assert!(offset.is_power_of_two(), "reservation {} not a power of two", offset);
    // 200 keys at ~50 bytes per line cannot fit the initial 512 bytes.
    assert!(offset >= 8192, "reservation {} suspiciously small", offset);

    let buf = ds.get_chunk_raw("c", 100, 0).unwrap();
    assert_eq!(ds.buffer_bytes(buf).unwrap(), data.as_slice());
    ds.close().unwrap();
}

// ─────────────────────────────────────────────────────────────────────────────
// Stability across a rewrite
// ─────────────────────────────────────────────────────────────────────────────

/// Reopening and closing without changes keeps every key and the chunk
/// bytes identical.
#[test]
fn close_reopen_close_is_stable() {
    let dir = TempDir::new().unwrap();
    let path = dataset_path(&dir, "t.mri");

    let mut ds = Dataset::open(&path, OpenMode::Write).unwrap();
    ds.create_chunk("c").unwrap();
    ds.set_string("c.dimensions", "x").unwrap();
    ds.set_int("c.extent.x", 32).unwrap();
    let data: Vec<i16> = (0..32).collect();
    ds.set_chunk("c", 0, &data).unwrap();
    for i in 0..50 {
        ds.set_string(&format!("k{:02}", i), &format!("value-{}", i)).unwrap();
    }
    ds.close().unwrap();

    let first = std::fs::read(&path).unwrap();
    let ds = Dataset::open(&path, OpenMode::Modify).unwrap();
    ds.close().unwrap();
    let second = std::fs::read(&path).unwrap();
    assert_eq!(first, second);
}
