//! Reader/writer for Pittsburgh MRI (`.mri`) datasets.
//!
//! A dataset pairs a textual key/value header with named N-dimensional
//! binary arrays ("chunks") packed into one or more host files. The
//! library manages chunk placement automatically: changing a chunk's
//! datatype, extents, host file, or byte order through its header keys
//! queues a repack that runs before the next data access or at close,
//! converting the stored bytes as needed.

pub mod bio;
pub mod chunk;
pub mod error;
pub mod header;
pub mod keys;
pub mod pool;
pub mod types;

mod access;
mod dataset;
mod file;
mod layout;
mod reposition;

// ─────────────────────────────────────────────────────────────────────────────
// Primary surface
// ─────────────────────────────────────────────────────────────────────────────

/// An open dataset; see [`Dataset::open`].
pub use dataset::Dataset;

/// How a dataset is opened: `Read`, `Write`, `Modify`, or `ModifyData`.
pub use types::OpenMode;

/// On-disk element type of a chunk.
pub use types::Datatype;

/// Placement class of a chunk: packed by rank, pinned to its offset, or
/// external.
pub use types::ChunkOrder;

/// Scalar types accepted by the typed read/write calls.
pub use bio::Element;

/// Byte order selector used by the binary I/O layer.
pub use bio::Endian;

/// Chunk descriptor handed out by [`Dataset::chunk_info`].
pub use chunk::Chunk;

/// Vector interpretation for the (time, slice) image helpers.
pub use chunk::ImageShape;

/// Handle to a pool-managed buffer from [`Dataset::get_chunk_raw`].
pub use pool::BufferId;

/// Handle to a host file of a dataset.
pub use file::FileId;

// ─────────────────────────────────────────────────────────────────────────────
// Errors and process-wide policy
// ─────────────────────────────────────────────────────────────────────────────

pub use error::{
    error_handling, last_error, set_error_handling, set_notification_level, ErrorMode, MriError,
    Result,
};

// ─────────────────────────────────────────────────────────────────────────────
// Format constants
// ─────────────────────────────────────────────────────────────────────────────

pub use types::{
    ALIGNMENT_BOUNDARY, ALIGNMENT_THRESHOLD, CHUNK_SENTINEL, MAX_DIMS, MAX_KEY_LENGTH,
    MAX_OPEN_FILES, MAX_VALUE_LENGTH,
};
