//! Chunk descriptors.
//!
//! A chunk carries two mirrors of its placement and representation: the
//! *desired* state, driven by the header keys, and the *actual* state of
//! the bytes currently on disk. The two disagree exactly while `modified`
//! is set; the repositioner reconciles them. Attribute-key parsing helpers
//! and the standard-images probe live here as well.

use crate::file::FileId;
use crate::types::{ChunkOrder, Datatype};

/// Handle to a chunk within its dataset's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkId(pub(crate) usize);

/// One named N-dimensional array.
#[derive(Debug)]
pub struct Chunk {
    pub(crate) name: String,

    // Desired state, tracking the header keys.
    pub(crate) datatype: Datatype,
    pub(crate) dimensions: String,
    pub(crate) extents: Vec<u64>,
    pub(crate) little_endian: bool,
    pub(crate) order: ChunkOrder,
    pub(crate) file: FileId,
    pub(crate) offset: u64,
    pub(crate) size: u64,

    // Actual on-disk state.
    pub(crate) actual_datatype: Datatype,
    pub(crate) actual_little_endian: bool,
    pub(crate) actual_file: FileId,
    pub(crate) actual_offset: u64,
    pub(crate) actual_size: u64,

    pub(crate) modified: bool,
    pub(crate) repositioning: bool,
    pub(crate) ready_to_read: bool,
    pub(crate) ready_to_write: bool,
}

impl Chunk {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn datatype(&self) -> Datatype {
        self.datatype
    }

    pub fn dimensions(&self) -> &str {
        &self.dimensions
    }

    pub fn extents(&self) -> &[u64] {
        &self.extents
    }

    pub fn little_endian(&self) -> bool {
        self.little_endian
    }

    pub fn order(&self) -> ChunkOrder {
        self.order
    }

    pub fn file(&self) -> FileId {
        self.file
    }

    /// Byte offset within the host file.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Total size in bytes: element size times the product of the extents.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Size derived from the descriptor; `size` always tracks this.
    pub(crate) fn derived_size(datatype: Datatype, extents: &[u64]) -> u64 {
        extents.iter().product::<u64>() * datatype.elem_size()
    }

    pub(crate) fn mark_not_ready(&mut self) {
        self.ready_to_read = false;
        self.ready_to_write = false;
    }
}

// ---------------------------------------------------------------------------
// Attribute keys
// ---------------------------------------------------------------------------

/// Splits `some.chunk.name.attr` into the chunk name and the attribute
/// tail. The tail is the text after the last dot, except that `extent.X`
/// keys keep both of their final components together.
pub(crate) fn split_attr_key(key: &str) -> Option<(&str, &str)> {
    let dot = key.rfind('.')?;
    let (name, _) = (&key[..dot], &key[dot + 1..]);
    if let Some(stripped) = name.strip_suffix(".extent") {
        return Some((stripped, &key[stripped.len() + 1..]));
    }
    Some((name, &key[dot + 1..]))
}

/// True for `extent.X` tails: exactly one single-byte axis letter.
pub(crate) fn is_extent_tail(tail: &str) -> bool {
    tail.len() == 8 && tail.starts_with("extent.")
}

// ---------------------------------------------------------------------------
// Standard images
// ---------------------------------------------------------------------------

/// Geometry of a recognized `images` chunk, enabling (time, slice)
/// addressing.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StdImages {
    /// Elements per voxel: `extent.v`, or 1 for scalar layouts.
    pub vector_size: u64,
    /// Elements per single image (the product of the image axes).
    pub image_size: u64,
    /// Number of slices per time step: `extent.z`.
    pub n_slices: u64,
}

impl StdImages {
    /// Probes a chunk named `images` for one of the canonical layouts.
    pub fn detect(chunk: &Chunk) -> Option<StdImages> {
        if chunk.name != "images" {
            return None;
        }
        let e = &chunk.extents;
        match chunk.dimensions.as_str() {
            "xyz" | "xyzt" => Some(StdImages {
                vector_size: 1,
                image_size: e[0] * e[1],
                n_slices: e[2],
            }),
            "vxyz" | "vxyzt" => Some(StdImages {
                vector_size: e[0],
                image_size: e[0] * e[1] * e[2],
                n_slices: e[3],
            }),
            _ => None,
        }
    }
}

/// Interpretation of per-voxel values for the image helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageShape {
    /// One value per voxel; requires vector size 1.
    Scalar,
    /// Real/imaginary pairs; requires vector size 2.
    Complex,
    /// Any vector size.
    Vector,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attr_key_splitting() {
        assert_eq!(split_attr_key("images.datatype"), Some(("images", "datatype")));
        assert_eq!(split_attr_key("images.extent.x"), Some(("images", "extent.x")));
        assert_eq!(
            split_attr_key("a.b.extent.q"),
            Some(("a.b", "extent.q"))
        );
        assert_eq!(split_attr_key("nodots"), None);
        // A dotted key whose tail is not an attribute still splits; the
        // caller simply finds no matching attribute name.
        assert_eq!(split_attr_key("images.comment"), Some(("images", "comment")));
    }

    #[test]
    fn extent_tails() {
        assert!(is_extent_tail("extent.x"));
        assert!(!is_extent_tail("extent.xy"));
        assert!(!is_extent_tail("extent."));
        assert!(!is_extent_tail("offset"));
    }
}
