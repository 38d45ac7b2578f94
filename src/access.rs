//! Public chunk data access: typed reads and writes with on-the-fly
//! datatype conversion, and raw byte access backed by the buffer pool.
//!
//! Offsets and counts are in units of the chunk's on-disk elements (bytes
//! for raw access). Every access first settles pending layout work: reads
//! flush the allocator and repositioner, writes additionally require a
//! writable mode and a non-external chunk. When the requested element
//! type differs from the on-disk datatype the transfer runs through the
//! widen-to-f64 path, saturating and warning on out-of-range values.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::bio::{self, Element, Endian};
use crate::chunk::{ChunkId, ImageShape};
use crate::error::{fail, warn, MriError, Result};
use crate::pool::BufferId;
use crate::types::{OpenMode, COPY_BUFFER_SIZE};
use crate::Dataset;

/// Elements per conversion pass.
const PASS_ELEMS: u64 = (COPY_BUFFER_SIZE / std::mem::size_of::<f64>()) as u64;

fn in_bounds(offset: u64, count: u64, elem_size: u64, chunk_size: u64) -> bool {
    offset
        .checked_add(count)
        .and_then(|end| end.checked_mul(elem_size))
        .is_some_and(|end| end <= chunk_size)
}

impl Dataset {
    fn require_chunk(&self, name: &str) -> Result<ChunkId> {
        match self.find_chunk(name) {
            Some(id) => Ok(id),
            None => fail(MriError::Validation(format!("no such chunk named {}", name))),
        }
    }

    // -----------------------------------------------------------------------
    // Access gates
    // -----------------------------------------------------------------------

    fn prepare_to_read(&mut self, id: ChunkId) -> Result<()> {
        if self.recompute_positions {
            self.compute_positions()?;
        }
        if self.chunk(id).modified {
            self.reposition_chunk(id)?;
        }
        let file = self.chunk(id).file;
        self.open_file(file, false)?;
        self.chunk_mut(id).ready_to_read = true;
        Ok(())
    }

    fn prepare_to_write(&mut self, id: ChunkId) -> Result<()> {
        if self.mode == OpenMode::Read {
            return fail(MriError::State(
                "attempt to write to a read-only dataset".into(),
            ));
        }
        if self.chunk(id).order.is_external() {
            return fail(MriError::State(
                "attempt to write to an external chunk".into(),
            ));
        }
        if self.mode != OpenMode::ModifyData {
            if self.recompute_positions {
                self.compute_positions()?;
            }
            if self.chunk(id).modified {
                self.reposition_chunk(id)?;
            }
        } else if self.recompute_positions || self.chunk(id).modified {
            return fail(MriError::State(
                "chunk layout change pending in modify-data mode".into(),
            ));
        }
        let file = self.chunk(id).file;
        self.open_file(file, true)?;
        let ch = self.chunk_mut(id);
        ch.ready_to_read = true;
        ch.ready_to_write = true;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Typed access
    // -----------------------------------------------------------------------

    /// Reads `dst.len()` elements starting at element `offset`, converting
    /// from the on-disk datatype to `T`.
    pub fn read_chunk_into<T: Element>(
        &mut self,
        name: &str,
        offset: u64,
        dst: &mut [T],
    ) -> Result<()> {
        let id = self.require_chunk(name)?;
        let count = dst.len() as u64;
        {
            let ch = self.chunk(id);
            if !in_bounds(offset, count, ch.datatype.elem_size(), ch.size) {
                return fail(MriError::Validation(format!(
                    "out-of-bounds read of chunk {}",
                    name
                )));
            }
        }
        if !self.chunk(id).ready_to_read {
            self.prepare_to_read(id)?;
        }

        let (file, base, datatype, little) = {
            let ch = self.chunk(id);
            (ch.file, ch.offset, ch.datatype, ch.little_endian)
        };
        self.files.touch(file);
        let endian = Endian::from_little_flag(little);
        let elem_size = datatype.elem_size();

        let stream = self.files.stream(file)?;
        stream
            .seek(SeekFrom::Start(base + offset * elem_size))
            .map_err(|e| crate::error::report(MriError::io("chunk seek", e)))?;

        if T::DATATYPE == datatype {
            bio::read_array(stream, dst, endian)
                .map_err(|e| crate::error::report(MriError::io("chunk read", e)))?;
            return Ok(());
        }

        let mut dbl = vec![0f64; count.min(PASS_ELEMS) as usize];
        let mut clamped = false;
        let mut done = 0u64;
        while done < count {
            let n = (count - done).min(PASS_ELEMS) as usize;
            {
                let stream = self.files.stream(file)?;
                bio::read_block_f64(stream, datatype, endian, &mut dbl[..n])
                    .map_err(|e| crate::error::report(MriError::io("chunk read", e)))?;
            }
            for (d, v) in dst[done as usize..done as usize + n].iter_mut().zip(&dbl[..n]) {
                *d = T::from_f64(*v, &mut clamped);
            }
            done += n as u64;
        }
        if clamped {
            warn(format!("out-of-range conversions reading chunk {}", name));
        }
        Ok(())
    }

    /// Reads `count` elements starting at element `offset` into a fresh
    /// vector, converting from the on-disk datatype to `T`.
    pub fn get_chunk<T: Element>(&mut self, name: &str, count: usize, offset: u64) -> Result<Vec<T>> {
        let mut out = vec![T::default(); count];
        self.read_chunk_into(name, offset, &mut out)?;
        Ok(out)
    }

    /// Writes `src` starting at element `offset`, converting from `T` to
    /// the on-disk datatype.
    pub fn set_chunk<T: Element>(&mut self, name: &str, offset: u64, src: &[T]) -> Result<()> {
        let id = self.require_chunk(name)?;
        let count = src.len() as u64;
        {
            let ch = self.chunk(id);
            if !in_bounds(offset, count, ch.datatype.elem_size(), ch.size) {
                return fail(MriError::Validation(format!(
                    "out-of-bounds write of chunk {}",
                    name
                )));
            }
        }
        if !self.chunk(id).ready_to_write {
            self.prepare_to_write(id)?;
        }

        let (file, base, datatype, little) = {
            let ch = self.chunk(id);
            (ch.file, ch.offset, ch.datatype, ch.little_endian)
        };
        self.files.touch(file);
        let endian = Endian::from_little_flag(little);
        let elem_size = datatype.elem_size();

        let stream = self.files.stream(file)?;
        stream
            .seek(SeekFrom::Start(base + offset * elem_size))
            .map_err(|e| crate::error::report(MriError::io("chunk seek", e)))?;

        if T::DATATYPE == datatype {
            bio::write_array(stream, src, endian)
                .map_err(|e| crate::error::report(MriError::io("chunk write", e)))?;
            return Ok(());
        }

        let mut dbl = vec![0f64; count.min(PASS_ELEMS) as usize];
        let mut clamped = false;
        let mut done = 0u64;
        while done < count {
            let n = (count - done).min(PASS_ELEMS) as usize;
            for (d, v) in dbl[..n].iter_mut().zip(&src[done as usize..done as usize + n]) {
                *d = v.to_f64();
            }
            {
                let stream = self.files.stream(file)?;
                bio::write_block_f64(stream, datatype, endian, &dbl[..n], &mut clamped)
                    .map_err(|e| crate::error::report(MriError::io("chunk write", e)))?;
            }
            done += n as u64;
        }
        if clamped {
            warn(format!("out-of-range conversions writing chunk {}", name));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Raw access
    // -----------------------------------------------------------------------

    /// Reads `size` bytes at byte `offset` into a pool-managed buffer.
    /// The buffer stays valid for the next few reads, or indefinitely
    /// once retained; see [`Dataset::retain_buffer`].
    pub fn get_chunk_raw(&mut self, name: &str, size: u64, offset: u64) -> Result<BufferId> {
        let id = self.require_chunk(name)?;
        {
            let ch = self.chunk(id);
            if !in_bounds(offset, size, 1, ch.size) {
                return fail(MriError::Validation(format!(
                    "out-of-bounds read of chunk {}",
                    name
                )));
            }
        }
        if !self.chunk(id).ready_to_read {
            self.prepare_to_read(id)?;
        }
        let (file, base) = {
            let ch = self.chunk(id);
            (ch.file, ch.offset)
        };
        self.files.touch(file);

        let buf = self.pool.get(size as usize);
        let files = &mut self.files;
        let pool = &mut self.pool;
        let stream = files.stream(file)?;
        let bytes = pool
            .bytes_mut(buf)
            .ok_or_else(|| MriError::Internal("pool buffer vanished".into()))?;
        stream
            .seek(SeekFrom::Start(base + offset))
            .and_then(|_| stream.read_exact(bytes))
            .map_err(|e| crate::error::report(MriError::io("chunk read", e)))?;
        Ok(buf)
    }

    /// Writes raw bytes at byte `offset`, bypassing all conversion.
    pub fn set_chunk_raw(&mut self, name: &str, offset: u64, bytes: &[u8]) -> Result<()> {
        let id = self.require_chunk(name)?;
        {
            let ch = self.chunk(id);
            if !in_bounds(offset, bytes.len() as u64, 1, ch.size) {
                return fail(MriError::Validation(format!(
                    "out-of-bounds write of chunk {}",
                    name
                )));
            }
        }
        if !self.chunk(id).ready_to_write {
            self.prepare_to_write(id)?;
        }
        let (file, base) = {
            let ch = self.chunk(id);
            (ch.file, ch.offset)
        };
        self.files.touch(file);
        let stream = self.files.stream(file)?;
        stream
            .seek(SeekFrom::Start(base + offset))
            .and_then(|_| stream.write_all(bytes))
            .map_err(|e| crate::error::report(MriError::io("chunk write", e)))?;
        Ok(())
    }

    /// Bytes of a pool buffer returned by [`Dataset::get_chunk_raw`].
    pub fn buffer_bytes(&self, id: BufferId) -> Option<&[u8]> {
        self.pool.bytes(id)
    }

    /// Pins a pool buffer until [`Dataset::discard_buffer`].
    pub fn retain_buffer(&mut self, id: BufferId) -> Result<()> {
        if self.pool.retain(id) {
            Ok(())
        } else {
            fail(MriError::Validation("buffer parameter is not valid".into()))
        }
    }

    /// Frees a pool buffer, retained or not.
    pub fn discard_buffer(&mut self, id: BufferId) -> Result<()> {
        if self.pool.discard(id) {
            Ok(())
        } else {
            fail(MriError::Validation("buffer parameter is not valid".into()))
        }
    }

    // -----------------------------------------------------------------------
    // Standard images
    // -----------------------------------------------------------------------

    fn std_image_geometry(&self, shape: ImageShape) -> Result<(u64, u64)> {
        let std = match self.std_images {
            Some(s) => s,
            None => {
                return fail(MriError::State(
                    "dataset does not have standard images".into(),
                ))
            }
        };
        match shape {
            ImageShape::Scalar if std.vector_size != 1 => fail(MriError::Validation(
                "image is not composed of scalars".into(),
            )),
            ImageShape::Complex if std.vector_size != 2 => fail(MriError::Validation(
                "image is not composed of complex values".into(),
            )),
            _ => Ok((std.image_size, std.n_slices)),
        }
    }

    /// Reads the image at `(time, slice)` from the `images` chunk.
    pub fn get_image<T: Element>(
        &mut self,
        time: u64,
        slice: u64,
        shape: ImageShape,
    ) -> Result<Vec<T>> {
        let (image_size, n_slices) = self.std_image_geometry(shape)?;
        self.get_chunk(
            "images",
            image_size as usize,
            (time * n_slices + slice) * image_size,
        )
    }

    /// Writes the image at `(time, slice)` into the `images` chunk.
    /// `data` must hold exactly one image worth of elements.
    pub fn set_image<T: Element>(
        &mut self,
        time: u64,
        slice: u64,
        shape: ImageShape,
        data: &[T],
    ) -> Result<()> {
        let (image_size, n_slices) = self.std_image_geometry(shape)?;
        if data.len() as u64 != image_size {
            return fail(MriError::Validation(format!(
                "image data holds {} elements, expected {}",
                data.len(),
                image_size
            )));
        }
        self.set_chunk("images", (time * n_slices + slice) * image_size, data)
    }
}
