//! Shared scalar types and format limits.
//!
//! Everything here is descriptive state with no behavior beyond token
//! parsing and printing: the on-disk element type of a chunk, its placement
//! class, the dataset open mode, and the compile-time limits of the format.

use std::fmt;

// ---------------------------------------------------------------------------
// Format limits
// ---------------------------------------------------------------------------

/// Maximum number of axes in a chunk's dimension string.
pub const MAX_DIMS: usize = 16;

/// Maximum length of a key name in the header.
pub const MAX_KEY_LENGTH: usize = 255;

/// Maximum length of a key's value in the header.
pub const MAX_VALUE_LENGTH: usize = 4095;

/// Maximum number of simultaneously open streams per dataset.
pub const MAX_OPEN_FILES: usize = 8;

/// Chunks at least this large are aligned within their host file.
pub const ALIGNMENT_THRESHOLD: u64 = 65536;

/// Alignment boundary for large chunks.
pub const ALIGNMENT_BOUNDARY: u64 = 16384;

/// Scratch size for block copies, zero fills, and conversion passes.
pub const COPY_BUFFER_SIZE: usize = 1 << 20;

/// Initial space assumed for the header of a new dataset.
pub const INITIAL_HEADER_SIZE: u64 = 512;

/// Number of unretained pool buffers a caller may hold before recycling.
pub const SAFE_BUFFER_COUNT: usize = 4;

/// Maximum number of unretained pool buffers kept around.
pub const MAX_BUFFER_COUNT: usize = 8;

/// Value string that declares its key to be a chunk name.
pub const CHUNK_SENTINEL: &str = "[chunk]";

// ---------------------------------------------------------------------------
// Datatype
// ---------------------------------------------------------------------------

/// On-disk element type of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datatype {
    Uint8,
    Int16,
    Int32,
    Int64,
    Float32,
    Float64,
}

impl Datatype {
    /// Size in bytes of one element.
    pub fn elem_size(self) -> u64 {
        match self {
            Datatype::Uint8 => 1,
            Datatype::Int16 => 2,
            Datatype::Int32 => 4,
            Datatype::Int64 => 8,
            Datatype::Float32 => 4,
            Datatype::Float64 => 8,
        }
    }

    /// Parses a header token such as `int16` or `float64`.
    pub fn parse(token: &str) -> Option<Datatype> {
        match token {
            "uint8" => Some(Datatype::Uint8),
            "int16" => Some(Datatype::Int16),
            "int32" => Some(Datatype::Int32),
            "int64" => Some(Datatype::Int64),
            "float32" => Some(Datatype::Float32),
            "float64" => Some(Datatype::Float64),
            _ => None,
        }
    }

    /// The header token for this type.
    pub fn token(self) -> &'static str {
        match self {
            Datatype::Uint8 => "uint8",
            Datatype::Int16 => "int16",
            Datatype::Int32 => "int32",
            Datatype::Int64 => "int64",
            Datatype::Float32 => "float32",
            Datatype::Float64 => "float64",
        }
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

// ---------------------------------------------------------------------------
// Placement class
// ---------------------------------------------------------------------------

/// Placement policy of a chunk within its host file.
///
/// `Ranked(n)` chunks are packed in ascending `n` order by the allocator;
/// `FixedOffset` chunks stay at their declared offset; `External` chunks
/// live in files the engine does not own and are never moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkOrder {
    External,
    FixedOffset,
    Ranked(i64),
}

impl ChunkOrder {
    /// Parses a header value: a plain integer, or the tokens
    /// `fixed_offset` and `external`.
    pub fn parse(token: &str) -> Option<ChunkOrder> {
        match token {
            "fixed_offset" => Some(ChunkOrder::FixedOffset),
            "external" => Some(ChunkOrder::External),
            _ => token.trim().parse::<i64>().ok().map(ChunkOrder::from_rank),
        }
    }

    /// Maps the numeric encoding (-2 external, -1 fixed) back to a class.
    pub fn from_rank(n: i64) -> ChunkOrder {
        match n {
            -2 => ChunkOrder::External,
            -1 => ChunkOrder::FixedOffset,
            n => ChunkOrder::Ranked(n),
        }
    }

    /// Numeric sort key: external < fixed_offset < ranked values.
    pub fn rank(self) -> i64 {
        match self {
            ChunkOrder::External => -2,
            ChunkOrder::FixedOffset => -1,
            ChunkOrder::Ranked(n) => n,
        }
    }

    pub fn is_external(self) -> bool {
        matches!(self, ChunkOrder::External)
    }

    pub fn is_fixed_offset(self) -> bool {
        matches!(self, ChunkOrder::FixedOffset)
    }
}

impl fmt::Display for ChunkOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkOrder::External => f.write_str("external"),
            ChunkOrder::FixedOffset => f.write_str("fixed_offset"),
            ChunkOrder::Ranked(n) => write!(f, "{}", n),
        }
    }
}

// ---------------------------------------------------------------------------
// Open mode
// ---------------------------------------------------------------------------

/// How a dataset was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Existing dataset, no mutation of any kind.
    Read,
    /// Fresh dataset; host files are truncated on first open.
    Write,
    /// Existing dataset; keys, chunks, and data may all change.
    Modify,
    /// Existing dataset; chunk data may be rewritten in place, but no key
    /// mutation and no layout change is permitted.
    ModifyData,
}

impl OpenMode {
    /// True for the modes that permit no mutation of the key/value store.
    pub fn is_read_only(self) -> bool {
        matches!(self, OpenMode::Read | OpenMode::ModifyData)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn datatype_tokens_round_trip() {
        for dt in [
            Datatype::Uint8,
            Datatype::Int16,
            Datatype::Int32,
            Datatype::Int64,
            Datatype::Float32,
            Datatype::Float64,
        ] {
            assert_eq!(Datatype::parse(dt.token()), Some(dt));
        }
        assert_eq!(Datatype::parse("int8"), None);
        assert_eq!(Datatype::parse(""), None);
    }

    #[test]
    fn elem_sizes() {
        assert_eq!(Datatype::Uint8.elem_size(), 1);
        assert_eq!(Datatype::Int16.elem_size(), 2);
        assert_eq!(Datatype::Int32.elem_size(), 4);
        assert_eq!(Datatype::Int64.elem_size(), 8);
        assert_eq!(Datatype::Float32.elem_size(), 4);
        assert_eq!(Datatype::Float64.elem_size(), 8);
    }

    #[test]
    fn order_tokens() {
        assert_eq!(ChunkOrder::parse("fixed_offset"), Some(ChunkOrder::FixedOffset));
        assert_eq!(ChunkOrder::parse("external"), Some(ChunkOrder::External));
        assert_eq!(ChunkOrder::parse("3"), Some(ChunkOrder::Ranked(3)));
        assert_eq!(ChunkOrder::parse("-1"), Some(ChunkOrder::FixedOffset));
        assert_eq!(ChunkOrder::parse("-2"), Some(ChunkOrder::External));
        assert_eq!(ChunkOrder::parse("fast"), None);
        assert!(ChunkOrder::External.rank() < ChunkOrder::FixedOffset.rank());
        assert!(ChunkOrder::FixedOffset.rank() < ChunkOrder::Ranked(0).rank());
    }
}
