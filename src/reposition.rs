//! Reconciliation of chunk placement: moving and converting bytes from
//! their actual location to the desired one.
//!
//! A chunk move may displace other chunks whose bytes occupy the target
//! region, which recurses. Two situations force a detour through a
//! temporary file: a cycle among the chunks being repositioned, and a
//! chunk overlapping itself in a way an in-place pass would corrupt (the
//! offset moves, or the element type widens so writes would outrun reads).
//! Temp-file contents are copied into place after the whole recursion
//! finishes, and host files that no longer hold any chunk are unlinked.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::bio::{self, Endian};
use crate::chunk::ChunkId;
use crate::error::{warn, MriError, Result};
use crate::file::FileId;
use crate::layout::{EmptyBlockList, OPEN_END};
use crate::types::COPY_BUFFER_SIZE;
use crate::Dataset;

/// A deferred temp-to-destination copy.
struct CopyRequest {
    src_file: FileId,
    src_offset: u64,
    dest_file: FileId,
    dest_offset: u64,
    size: u64,
    chunk: ChunkId,
}

impl Dataset {
    /// Brings one modified chunk (and everything its move displaces) to
    /// its desired file, offset, datatype, and endianness.
    pub(crate) fn reposition_chunk(&mut self, id: ChunkId) -> Result<()> {
        let mut queue = Vec::new();
        let outcome = self.reposition_rec(id, &mut queue).and_then(|()| {
            for req in queue.drain(..) {
                self.copy_block(
                    req.dest_file,
                    req.dest_offset,
                    req.src_file,
                    req.src_offset,
                    req.size,
                )?;
                self.update_chunk_attributes(req.chunk);
                self.destroy_file(req.src_file);
            }
            Ok(())
        });
        if outcome.is_err() {
            // Leave every chunk retryable: modified stays set, but nothing
            // may be considered mid-reposition anymore.
            for chunk in self.chunks.iter_mut().flatten() {
                chunk.repositioning = false;
            }
            return outcome;
        }
        self.sweep_unused_files();
        Ok(())
    }

    fn reposition_rec(&mut self, id: ChunkId, queue: &mut Vec<CopyRequest>) -> Result<()> {
        if self.chunk(id).order.is_external() {
            // External bytes never move; only the descriptor catches up.
            self.update_chunk_attributes(id);
            return Ok(());
        }

        self.chunk_mut(id).repositioning = true;
        let (file, offset, size) = {
            let ch = self.chunk(id);
            (ch.file, ch.offset, ch.size)
        };

        let mut use_temp_file = false;
        for other in self.live_chunk_ids() {
            let (o_file, o_offset, o_size, o_repositioning) = {
                let och = self.chunk(other);
                (och.actual_file, och.actual_offset, och.actual_size, och.repositioning)
            };
            // One byte of slack on both sides: adjacent chunks are treated
            // as overlapping, which may move a neighbor needlessly but
            // never misses a real overlap.
            let overlaps = file == o_file
                && offset <= o_offset + o_size + 1
                && offset + size + 1 >= o_offset;
            if !overlaps {
                continue;
            }
            if !o_repositioning {
                self.reposition_rec(other, queue)?;
            } else if other != id {
                // Cycle: this neighbor is an ancestor of the current call.
                use_temp_file = true;
            } else {
                let ch = self.chunk(id);
                if ch.offset != ch.actual_offset
                    || ch.datatype.elem_size() > ch.actual_datatype.elem_size()
                {
                    use_temp_file = true;
                }
            }
        }

        if use_temp_file {
            let temp = self.files.create_temp()?;
            self.convert_chunk(id, temp, 0)?;
            queue.push(CopyRequest {
                src_file: temp,
                src_offset: 0,
                dest_file: file,
                dest_offset: offset,
                size,
                chunk: id,
            });
        } else {
            self.convert_chunk(id, file, offset)?;
            self.update_chunk_attributes(id);
        }
        Ok(())
    }

    /// Declares the desired state achieved.
    fn update_chunk_attributes(&mut self, id: ChunkId) {
        let ch = self.chunk_mut(id);
        ch.actual_file = ch.file;
        ch.actual_datatype = ch.datatype;
        ch.actual_little_endian = ch.little_endian;
        ch.actual_offset = ch.offset;
        ch.actual_size = ch.size;
        ch.modified = false;
        ch.repositioning = false;
    }

    /// Unlinks non-external host files no chunk references anymore. The
    /// header file is always kept.
    fn sweep_unused_files(&mut self) {
        for id in self.files.ids() {
            self.files.entry_mut(id).used = false;
        }
        let header_file = self.header_file;
        self.files.entry_mut(header_file).used = true;
        for id in self.live_chunk_ids() {
            let (file, actual_file) = {
                let ch = self.chunk(id);
                (ch.file, ch.actual_file)
            };
            self.files.entry_mut(file).used = true;
            self.files.entry_mut(actual_file).used = true;
        }
        for id in self.files.ids() {
            let entry = self.files.entry(id);
            if !entry.used && !entry.external {
                self.destroy_file(id);
            }
        }
    }

    /// Writes the chunk's bytes, in the desired datatype and endianness,
    /// at `dest_offset` in `dest`, reading from the actual location. A
    /// pure move (same datatype, same endianness) is a block copy; any
    /// growth of the region is zero-filled.
    pub(crate) fn convert_chunk(
        &mut self,
        id: ChunkId,
        dest: FileId,
        dest_offset: u64,
    ) -> Result<()> {
        let (datatype, little, size, a_datatype, a_little, a_file, a_offset, a_size) = {
            let ch = self.chunk(id);
            (
                ch.datatype,
                ch.little_endian,
                ch.size,
                ch.actual_datatype,
                ch.actual_little_endian,
                ch.actual_file,
                ch.actual_offset,
                ch.actual_size,
            )
        };

        if datatype == a_datatype && little == a_little {
            self.copy_block(dest, dest_offset, a_file, a_offset, size.min(a_size))?;
            if size > a_size {
                self.clear_block(dest, dest_offset + a_size, size - a_size)?;
            }
            return Ok(());
        }

        let read_size = a_datatype.elem_size();
        let write_size = datatype.elem_size();
        let in_endian = Endian::from_little_flag(a_little);
        let out_endian = Endian::from_little_flag(little);

        self.open_file(a_file, false)?;
        self.open_file(dest, true)?;

        let mut count = a_size / read_size;
        if count * write_size > size {
            count = size / write_size;
        }

        let pass = (COPY_BUFFER_SIZE / std::mem::size_of::<f64>()) as u64;
        let mut dbl = vec![0f64; count.min(pass) as usize];
        let mut read_offset = 0u64;
        let mut write_offset = 0u64;
        let mut clamped = false;

        while count > 0 {
            let n = count.min(pass) as usize;
            {
                let src = self.files.stream(a_file)?;
                src.seek(SeekFrom::Start(a_offset + read_offset))
                    .and_then(|_| bio::read_block_f64(src, a_datatype, in_endian, &mut dbl[..n]))
                    .map_err(|e| {
                        crate::error::report(MriError::io("chunk conversion read", e))
                    })?;
            }
            read_offset += n as u64 * read_size;

            {
                let dst = self.files.stream(dest)?;
                dst.seek(SeekFrom::Start(dest_offset + write_offset))
                    .and_then(|_| {
                        bio::write_block_f64(dst, datatype, out_endian, &dbl[..n], &mut clamped)
                    })
                    .map_err(|e| {
                        crate::error::report(MriError::io("chunk conversion write", e))
                    })?;
            }
            write_offset += n as u64 * write_size;
            count -= n as u64;
        }

        if clamped {
            warn(format!(
                "out-of-range values clamped while converting chunk {}",
                self.chunk(id).name
            ));
        }
        if size > write_offset {
            self.clear_block(dest, dest_offset + write_offset, size - write_offset)?;
        }
        Ok(())
    }

    /// Copies `size` bytes between file regions through a bounded scratch
    /// buffer. Copying a region onto itself is a no-op.
    pub(crate) fn copy_block(
        &mut self,
        dest: FileId,
        dest_offset: u64,
        src: FileId,
        src_offset: u64,
        size: u64,
    ) -> Result<()> {
        if src == dest && src_offset == dest_offset {
            return Ok(());
        }
        self.open_file(src, false)?;
        self.open_file(dest, true)?;

        let mut buf = vec![0u8; size.min(COPY_BUFFER_SIZE as u64) as usize];
        let mut done = 0u64;
        while done < size {
            let n = (size - done).min(COPY_BUFFER_SIZE as u64) as usize;
            {
                let s = self.files.stream(src)?;
                s.seek(SeekFrom::Start(src_offset + done))
                    .and_then(|_| s.read_exact(&mut buf[..n]))
                    .map_err(|e| crate::error::report(MriError::io("block copy read", e)))?;
            }
            {
                let d = self.files.stream(dest)?;
                d.seek(SeekFrom::Start(dest_offset + done))
                    .and_then(|_| d.write_all(&buf[..n]))
                    .map_err(|e| crate::error::report(MriError::io("block copy write", e)))?;
            }
            done += n as u64;
        }
        Ok(())
    }

    /// Zero-fills `size` bytes at `offset` in `dest`.
    pub(crate) fn clear_block(&mut self, dest: FileId, offset: u64, size: u64) -> Result<()> {
        self.open_file(dest, true)?;
        let zeros = vec![0u8; size.min(COPY_BUFFER_SIZE as u64) as usize];
        let stream = self.files.stream(dest)?;
        stream
            .seek(SeekFrom::Start(offset))
            .map_err(|e| crate::error::report(MriError::io("zero fill", e)))?;
        let mut left = size;
        while left > 0 {
            let n = left.min(COPY_BUFFER_SIZE as u64) as usize;
            stream
                .write_all(&zeros[..n])
                .map_err(|e| crate::error::report(MriError::io("zero fill", e)))?;
            left -= n as u64;
        }
        Ok(())
    }

    /// Zeros every gap between chunks and truncates each non-external
    /// host file just past its last chunk (or its header).
    pub(crate) fn clean_files(&mut self) -> Result<()> {
        for file in self.files.ids() {
            if self.files.entry(file).external {
                continue;
            }

            let mut blocks = EmptyBlockList::new(if file == self.header_file {
                self.header_size
            } else {
                0
            });
            for id in self.live_chunk_ids() {
                let ch = self.chunk(id);
                if ch.file == file {
                    blocks.reserve(ch.offset, ch.size);
                }
            }

            self.open_file(file, true)?;
            for blk in blocks.blocks().to_vec() {
                if blk.end < OPEN_END {
                    self.clear_block(file, blk.start, blk.end - blk.start + 1)?;
                } else {
                    let stream = self.files.stream(file)?;
                    stream
                        .set_len(blk.start)
                        .map_err(|e| crate::error::report(MriError::io("truncate", e)))?;
                }
            }
        }
        Ok(())
    }
}
