//! Dataset assembly: lifecycle, the key/value surface, and chunk hooks.
//!
//! A [`Dataset`] owns the key table, the chunk arena, the host-file
//! registry, and the buffer pool. Every mutation flows through the key
//! store: setting `NAME = [chunk]` creates a chunk, setting or removing
//! `NAME.<attr>` keys edits its desired descriptor, and the layout dirty
//! flag queues a repack that runs before the next data access or at close.

use std::io::{BufReader, Seek, SeekFrom};

use crate::chunk::{is_extent_tail, split_attr_key, Chunk, ChunkId, StdImages};
use crate::error::{fail, warn, MriError, Result};
use crate::file::{FileId, FileRegistry};
use crate::header;
use crate::keys::{valid_key_name, valid_value, KeyIter, KeyTable};
use crate::layout::EmptyBlockList;
use crate::types::{
    ChunkOrder, Datatype, OpenMode, CHUNK_SENTINEL, COPY_BUFFER_SIZE, INITIAL_HEADER_SIZE,
    MAX_DIMS,
};

/// An open dataset.
pub struct Dataset {
    pub(crate) name: String,
    pub(crate) mode: OpenMode,
    pub(crate) keys: KeyTable,
    pub(crate) files: FileRegistry,
    pub(crate) chunks: Vec<Option<Chunk>>,
    pub(crate) header_file: FileId,
    pub(crate) header_size: u64,
    pub(crate) recompute_positions: bool,
    pub(crate) pool: crate::pool::BufferPool,
    pub(crate) std_images: Option<StdImages>,
    pub(crate) closed: bool,
}

impl Dataset {
    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Opens (or, in `Write` mode, creates) the dataset at `name`. The
    /// `.mri` extension is appended when absent.
    pub fn open(name: &str, mode: OpenMode) -> Result<Dataset> {
        let mut file_name = name.to_string();
        if !file_name.ends_with(".mri") {
            file_name.push_str(".mri");
        }

        let mut files = FileRegistry::new(file_name.clone(), mode);
        let header_file = files.get_or_create("");

        let mut ds = Dataset {
            name: file_name,
            mode,
            keys: KeyTable::new(),
            files,
            chunks: Vec::new(),
            header_file,
            header_size: INITIAL_HEADER_SIZE,
            recompute_positions: false,
            pool: crate::pool::BufferPool::new(),
            std_images: None,
            // Armed only once the open fully succeeds, so a failed open
            // never runs close-time rewriting from Drop.
            closed: true,
        };

        let for_write = matches!(mode, OpenMode::Write | OpenMode::Modify);
        ds.open_file(header_file, for_write)?;

        let end = {
            let stream = ds.files.stream(header_file)?;
            let end = stream
                .seek(SeekFrom::End(0))
                .map_err(|e| MriError::io(&ds.name, e))?;
            stream
                .seek(SeekFrom::Start(0))
                .map_err(|e| MriError::io(&ds.name, e))?;
            end
        };

        if mode == OpenMode::Write || end == 0 {
            ds.create_new()?;
        } else {
            ds.read_header()?;
        }

        if mode == OpenMode::Read && ds.keys.is_empty() {
            return fail(MriError::Validation(format!(
                "{} is unexpectedly empty",
                ds.name
            )));
        }

        // Build chunk descriptors for every [chunk] key.
        let chunk_names: Vec<String> = ds
            .keys
            .iter()
            .filter(|(_, v)| *v == CHUNK_SENTINEL)
            .map(|(k, _)| k.to_string())
            .collect();
        for name in chunk_names {
            ds.new_chunk(&name)
                .map_err(|e| MriError::Validation(format!("error in chunk {}: {}", name, e)))?;
        }

        // Chunks stored in the header file tell us how much space was
        // actually reserved for the header.
        let first_chunk_start = ds
            .live_chunk_ids()
            .into_iter()
            .filter(|&id| ds.chunk(id).file == ds.header_file)
            .map(|id| ds.chunk(id).offset)
            .min();
        if let Some(start) = first_chunk_start {
            ds.header_size = start;
        }

        ds.closed = false;
        Ok(ds)
    }

    fn create_new(&mut self) -> Result<()> {
        self.set_string("!format", "pgh")?;
        self.set_string("!version", "1.0")
    }

    fn read_header(&mut self) -> Result<()> {
        let header_file = self.header_file;
        let stream = self.files.stream(header_file)?;
        let parsed = header::parse_header(BufReader::new(stream)).map_err(crate::error::report)?;
        for (key, value) in parsed.pairs {
            self.keys.insert(&key, &value);
        }
        self.header_size = parsed.consumed;
        Ok(())
    }

    /// Flushes pending layout work, rewrites the header, zeros all gaps,
    /// truncates the host files, and releases every stream. Read-only and
    /// modify-data datasets are released without touching the files.
    pub fn close(mut self) -> Result<()> {
        self.close_impl()
    }

    fn close_impl(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if self.mode.is_read_only() {
            self.files.close_all();
            return Ok(());
        }

        if self.recompute_positions {
            self.compute_positions()?;
        }

        let alone = !self
            .live_chunk_ids()
            .into_iter()
            .any(|id| self.chunk(id).file == self.header_file);

        // Serialize the header into a scratch file to learn its size.
        let temp = self.files.create_temp()?;
        self.open_file(temp, true)?;
        let mut pos = self.write_header_to(temp, !alone)?;
        self.close_file(temp);

        if alone {
            self.header_size = pos;
        } else if pos > self.header_size {
            // Grow the reservation, leaving slack for offsets that may
            // print wider after the repack below.
            let needed = pos + 10 * self.keys.len() as u64;
            let mut size = 1;
            while size < needed {
                size *= 2;
            }
            self.header_size = size;
            self.compute_positions()?;

            self.open_file(temp, true)?;
            pos = self.write_header_to(temp, !alone)?;
            self.close_file(temp);
        }

        for id in self.live_chunk_ids() {
            if self.chunk(id).modified {
                self.reposition_chunk(id)?;
            }
        }

        let header_file = self.header_file;
        self.copy_block(header_file, 0, temp, 0, pos)?;
        self.header_size = pos;
        self.destroy_file(temp);

        self.clean_files()?;
        self.files.close_all();
        Ok(())
    }

    fn write_header_to(&mut self, file: FileId, separator: bool) -> Result<u64> {
        let keys = &self.keys;
        let stream = self.files.stream(file)?;
        stream
            .seek(SeekFrom::Start(0))
            .map_err(|e| crate::error::report(MriError::io("header write", e)))?;
        header::write_header(&mut *stream, keys.iter(), separator)
            .map_err(|e| crate::error::report(MriError::io("header write", e)))?;
        stream
            .stream_position()
            .map_err(|e| crate::error::report(MriError::io("header write", e)))
    }

    /// Unlinks every host file the dataset owns and releases the handle.
    pub fn destroy(mut self) -> Result<()> {
        if self.mode.is_read_only() {
            return fail(MriError::State("cannot destroy a read-only dataset".into()));
        }
        self.closed = true;
        for id in self.files.ids() {
            let entry = self.files.entry(id);
            if !entry.external || entry.temp {
                self.mark_file_chunks_not_ready(id);
                self.files.destroy(id);
            }
        }
        Ok(())
    }

    /// Creates `filename` as a copy of this dataset: every key, and the
    /// contents of every non-external chunk. Chunk files that carried
    /// absolute names are renamed to dataset-relative `.dat` siblings.
    /// When this dataset is open read-only the data copy is deferred: the
    /// new dataset links back to the original files and materializes on
    /// close or first access.
    pub fn copy_dataset(&mut self, filename: &str) -> Result<Dataset> {
        let mut nds = Dataset::open(filename, OpenMode::Write)?;

        for key in self.iterate_keys() {
            let mut value = self.get_string(&key)?.to_string();
            if let Some(chunk_name) = key.strip_suffix(".file") {
                if !value.starts_with('.') {
                    if let Some(id) = self.find_chunk(chunk_name) {
                        let chunk_file = self.chunk(id).file;
                        // Data files younger than this chunk's file decide
                        // the suffix, so each sibling gets a distinct name.
                        let count = self
                            .files
                            .ids()
                            .into_iter()
                            .filter(|&f| f.0 > chunk_file.0)
                            .filter(|&f| {
                                let e = self.files.entry(f);
                                !e.external && !e.path.starts_with('.')
                            })
                            .count();
                        value = if count == 0 {
                            ".dat".to_string()
                        } else {
                            format!(".{}.dat", count)
                        };
                    }
                }
            }
            nds.set_string(&key, &value)?;
        }

        for id in self.live_chunk_ids() {
            if self.chunk(id).order.is_external() {
                continue;
            }
            let name = self.chunk(id).name.clone();
            if self.mode == OpenMode::Read {
                // Defer: point the new chunk's actual state at the
                // original bytes and let the repositioner pull them over.
                let nid = match nds.find_chunk(&name) {
                    Some(nid) => nid,
                    None => {
                        return fail(MriError::Internal(
                            "chunk name not copied correctly".into(),
                        ))
                    }
                };
                let src_path = absolute_path(self.files.path(self.chunk(id).file))?;
                let src = nds.files.get_or_create(&src_path);
                nds.files.entry_mut(src).external = true;
                let (datatype, little, offset, size) = {
                    let ch = self.chunk(id);
                    (ch.datatype, ch.little_endian, ch.offset, ch.size)
                };
                let nch = nds.chunk_mut(nid);
                nch.actual_file = src;
                nch.actual_datatype = datatype;
                nch.actual_little_endian = little;
                nch.actual_offset = offset;
                nch.actual_size = size;
                nch.modified = true;
                nds.recompute_positions = true;
            } else {
                let size = self.chunk(id).size;
                let mut total = 0u64;
                while total < size {
                    let n = (size - total).min(COPY_BUFFER_SIZE as u64);
                    let buf = self.get_chunk_raw(&name, n, total)?;
                    let bytes = self
                        .pool
                        .bytes(buf)
                        .ok_or_else(|| MriError::Internal("copy buffer vanished".into()))?
                        .to_vec();
                    nds.set_chunk_raw(&name, total, &bytes)?;
                    total += n;
                }
            }
        }

        Ok(nds)
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Canonical dataset file name (always carries the `.mri` extension).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Number of keys in the header.
    pub fn n_keys(&self) -> usize {
        self.keys.len()
    }

    /// Bytes reserved for the header in its host file.
    pub fn header_size(&self) -> u64 {
        self.header_size
    }

    /// Names of all chunks, in creation order.
    pub fn chunk_names(&self) -> Vec<String> {
        self.chunks
            .iter()
            .flatten()
            .map(|ch| ch.name.clone())
            .collect()
    }

    /// Descriptor of the named chunk.
    pub fn chunk_info(&self, name: &str) -> Option<&Chunk> {
        self.chunks
            .iter()
            .flatten()
            .find(|ch| ch.name == name)
    }

    /// Resolved path of a host file.
    pub fn file_path(&self, id: FileId) -> &str {
        self.files.path(id)
    }

    /// True if the dataset has an `images` chunk with one of the canonical
    /// layouts, enabling the (time, slice) helpers.
    pub fn has_standard_images(&self) -> bool {
        self.std_images.is_some()
    }

    // -----------------------------------------------------------------------
    // Key/value surface
    // -----------------------------------------------------------------------

    pub fn has(&self, key: &str) -> bool {
        self.keys.has(key)
    }

    pub fn get_string(&self, key: &str) -> Result<&str> {
        match self.keys.get(key) {
            Some(v) => Ok(v),
            None => fail(MriError::Validation(format!("non-existent key {}", key))),
        }
    }

    pub fn get_int(&self, key: &str) -> Result<i64> {
        let s = self.get_string(key)?;
        match s.trim().parse::<i64>() {
            Ok(v) => Ok(v),
            Err(_) => fail(MriError::Validation(format!(
                "value of key {} is not an integer",
                key
            ))),
        }
    }

    pub fn get_float(&self, key: &str) -> Result<f64> {
        let s = self.get_string(key)?;
        match s.trim().parse::<f64>() {
            Ok(v) => Ok(v),
            Err(_) => fail(MriError::Validation(format!(
                "value of key {} is not a float",
                key
            ))),
        }
    }

    /// Sets a key, running the chunk hooks. A rejected hook leaves the
    /// store as it was.
    pub fn set_string(&mut self, key: &str, value: &str) -> Result<()> {
        if self.mode.is_read_only() {
            return fail(MriError::State(
                "attempt to add a key to a read-only dataset".into(),
            ));
        }
        if !valid_key_name(key) {
            return fail(MriError::Validation(format!("invalid key name <{}>", key)));
        }
        if !valid_value(value) {
            return fail(MriError::Validation(format!("value of {} is too long", key)));
        }

        let old = self.keys.insert(key, value);
        if let Err(e) = self.check_hooks(key, value) {
            match old {
                Some(prior) => {
                    self.keys.insert(key, &prior);
                }
                None => {
                    self.keys.remove(key);
                }
            }
            return Err(e);
        }
        Ok(())
    }

    pub fn set_int(&mut self, key: &str, value: i64) -> Result<()> {
        self.set_string(key, &value.to_string())
    }

    pub fn set_float(&mut self, key: &str, value: f64) -> Result<()> {
        self.set_string(key, &value.to_string())
    }

    /// Removes a key. Removing a chunk-declaring key deallocates the
    /// chunk; removing an attribute key resets the attribute to its
    /// default. Removing a missing key is a no-op.
    pub fn remove(&mut self, key: &str) -> Result<()> {
        if self.mode.is_read_only() {
            return fail(MriError::State(
                "attempt to remove a key from a read-only dataset".into(),
            ));
        }
        let value = match self.keys.get(key) {
            Some(v) => v.to_string(),
            None => return Ok(()),
        };

        if value == CHUNK_SENTINEL {
            self.keys.remove(key);
            if let Some(id) = self.find_chunk(key) {
                self.chunk_mut(id).mark_not_ready();
                self.chunks[id.0] = None;
                self.recompute_positions = true;
                self.check_std_images();
            }
            return Ok(());
        }

        // The size key is derived; it may never be removed out from under
        // a live chunk.
        if let Some((chunk_name, tail)) = split_attr_key(key) {
            if tail == "size" && self.find_chunk(chunk_name).is_some() {
                return fail(MriError::Validation(
                    "not allowed to remove a chunk size".into(),
                ));
            }
        }

        self.keys.remove(key);
        self.apply_removal_reset(key)
    }

    /// Snapshot iterator over key names in ascending lexicographic order.
    pub fn iterate_keys(&self) -> KeyIter {
        KeyIter::new(&self.keys)
    }

    // -----------------------------------------------------------------------
    // Chunk hooks
    // -----------------------------------------------------------------------

    fn check_hooks(&mut self, key: &str, value: &str) -> Result<()> {
        if value == CHUNK_SENTINEL {
            if self.find_chunk(key).is_some() {
                return Ok(());
            }
            let id = self.new_chunk(key)?;
            let header_file = self.header_file;
            {
                let ch = self.chunk_mut(id);
                ch.actual_file = header_file;
                ch.actual_offset = 0;
                ch.actual_size = 0;
            }
            self.modify_chunk(id)?;

            let le_key = format!("{}.little_endian", key);
            if !self.keys.has(&le_key) {
                let little = cfg!(target_endian = "little");
                self.set_int(&le_key, little as i64)?;
            }
            return Ok(());
        }

        let (chunk_name, tail) = match split_attr_key(key) {
            Some(split) => split,
            None => return Ok(()),
        };
        let (chunk_name, tail) = (chunk_name.to_string(), tail.to_string());
        let id = match self.find_chunk(&chunk_name) {
            Some(id) => id,
            None => return Ok(()),
        };

        match tail.as_str() {
            "datatype" => {
                let new = match Datatype::parse(value) {
                    Some(dt) => dt,
                    None => {
                        return fail(MriError::Validation(format!(
                            "invalid datatype <{}> specified for chunk {}",
                            value, chunk_name
                        )))
                    }
                };
                if new != self.chunk(id).datatype {
                    self.chunk_mut(id).datatype = new;
                    self.modify_chunk(id)?;
                }
                Ok(())
            }
            "dimensions" => {
                if value.chars().count() > MAX_DIMS {
                    return fail(MriError::Validation(
                        "too many dimensions specified".into(),
                    ));
                }
                self.chunk_mut(id).dimensions = value.to_string();
                self.modify_chunk(id)
            }
            "file" => {
                let file = self.files.get_or_create(value);
                self.chunk_mut(id).file = file;
                self.modify_chunk(id)
            }
            "order" => {
                let new = match ChunkOrder::parse(value) {
                    Some(o) => o,
                    None => {
                        return fail(MriError::Validation(format!(
                            "invalid chunk order <{}>",
                            value
                        )))
                    }
                };
                if new != self.chunk(id).order {
                    self.chunk_mut(id).order = new;
                    self.modify_chunk(id)?;
                }
                Ok(())
            }
            "offset" => {
                let new = match value.trim().parse::<i64>() {
                    Ok(v) if v >= 0 => v as u64,
                    _ => return fail(MriError::Validation("invalid chunk offset".into())),
                };
                if new != self.chunk(id).offset {
                    self.chunk_mut(id).offset = new;
                    self.modify_chunk(id)?;
                }
                Ok(())
            }
            "little_endian" => match value.trim().parse::<i64>() {
                Ok(v @ (0 | 1)) => {
                    let new = v == 1;
                    if new != self.chunk(id).little_endian {
                        self.chunk_mut(id).little_endian = new;
                        self.modify_chunk(id)?;
                    }
                    Ok(())
                }
                _ => fail(MriError::Validation("invalid little_endian value".into())),
            },
            "size" => match value.trim().parse::<i64>() {
                Ok(v) if v >= 0 && v as u64 == self.chunk(id).size => Ok(()),
                _ => fail(MriError::Validation("not allowed to set a chunk size".into())),
            },
            tail if is_extent_tail(tail) => {
                match value.trim().parse::<i64>() {
                    Ok(v) if v >= 1 => {}
                    _ => return fail(MriError::Validation("invalid extent".into())),
                }
                self.modify_chunk(id)
            }
            _ => Ok(()),
        }
    }

    fn apply_removal_reset(&mut self, key: &str) -> Result<()> {
        let (chunk_name, tail) = match split_attr_key(key) {
            Some(split) => split,
            None => return Ok(()),
        };
        let (chunk_name, tail) = (chunk_name.to_string(), tail.to_string());
        let id = match self.find_chunk(&chunk_name) {
            Some(id) => id,
            None => return Ok(()),
        };

        match tail.as_str() {
            "datatype" => {
                if self.chunk(id).datatype != Datatype::Int16 {
                    self.chunk_mut(id).datatype = Datatype::Int16;
                    self.modify_chunk(id)?;
                }
                Ok(())
            }
            "dimensions" => {
                self.chunk_mut(id).dimensions = "xyzt".to_string();
                self.modify_chunk(id)
            }
            "file" => {
                self.chunk_mut(id).file = self.header_file;
                self.modify_chunk(id)
            }
            "order" => {
                if self.chunk(id).order != ChunkOrder::Ranked(0) {
                    self.chunk_mut(id).order = ChunkOrder::Ranked(0);
                    self.modify_chunk(id)?;
                }
                Ok(())
            }
            "offset" => {
                if self.chunk(id).offset != 0 {
                    self.chunk_mut(id).offset = 0;
                    self.modify_chunk(id)?;
                }
                Ok(())
            }
            "little_endian" => {
                if self.chunk(id).little_endian {
                    self.chunk_mut(id).little_endian = false;
                    self.modify_chunk(id)?;
                }
                Ok(())
            }
            tail if is_extent_tail(tail) => self.modify_chunk(id),
            _ => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Chunk management
    // -----------------------------------------------------------------------

    /// Declares a chunk named `key` (sets its value to `[chunk]`).
    pub fn create_chunk(&mut self, key: &str) -> Result<()> {
        if self.mode.is_read_only() {
            return fail(MriError::State(
                "attempt to create a chunk in a read-only dataset".into(),
            ));
        }
        self.set_string(key, CHUNK_SENTINEL)
    }

    /// Forces any pending layout recomputation and repositioning of the
    /// named chunk to happen now.
    pub fn update_chunk(&mut self, key: &str) -> Result<()> {
        let id = match self.find_chunk(key) {
            Some(id) => id,
            None => return fail(MriError::Validation(format!("no such chunk {}", key))),
        };
        if self.recompute_positions {
            self.compute_positions()?;
        }
        if self.chunk(id).modified {
            self.reposition_chunk(id)?;
        }
        Ok(())
    }

    /// Builds the descriptor for a chunk from its attribute keys.
    fn new_chunk(&mut self, name: &str) -> Result<ChunkId> {
        let datatype = match self.keys.get(&format!("{}.datatype", name)) {
            None => Datatype::Int16,
            Some(tok) => match Datatype::parse(tok) {
                Some(dt) => dt,
                None => return fail(MriError::Validation("invalid chunk datatype".into())),
            },
        };

        let dimensions = self
            .keys
            .get(&format!("{}.dimensions", name))
            .unwrap_or("xyzt")
            .to_string();
        if dimensions.chars().count() > MAX_DIMS {
            return fail(MriError::Validation("too many dimensions specified".into()));
        }

        let mut extents = Vec::with_capacity(dimensions.chars().count());
        for axis in dimensions.chars() {
            extents.push(self.read_extent_key(name, axis)?);
        }

        let little_endian = self
            .keys
            .get(&format!("{}.little_endian", name))
            .and_then(|v| v.trim().parse::<i64>().ok())
            == Some(1);

        let order = match self.keys.get(&format!("{}.order", name)) {
            None => ChunkOrder::Ranked(0),
            Some(tok) => match ChunkOrder::parse(tok) {
                Some(o) => o,
                None => return fail(MriError::Validation("invalid chunk order".into())),
            },
        };

        let file_spec = self
            .keys
            .get(&format!("{}.file", name))
            .unwrap_or("")
            .to_string();
        let file = self.files.get_or_create(&file_spec);

        let offset = match self.keys.get(&format!("{}.offset", name)) {
            None => 0,
            Some(v) => match v.trim().parse::<i64>() {
                Ok(v) if v >= 0 => v as u64,
                _ => return fail(MriError::Validation("invalid chunk offset".into())),
            },
        };

        let derived = Chunk::derived_size(datatype, &extents);
        if let Some(declared) = self.keys.get(&format!("{}.size", name)) {
            if declared.trim().parse::<i64>().ok() != Some(derived as i64) {
                warn(format!("{}.size field is being corrected to {}", name, derived));
            }
        }

        let chunk = Chunk {
            name: name.to_string(),
            datatype,
            dimensions,
            extents: extents.clone(),
            little_endian,
            order,
            file,
            offset,
            size: derived,
            actual_datatype: datatype,
            actual_little_endian: little_endian,
            actual_file: file,
            actual_offset: offset,
            actual_size: derived,
            modified: false,
            repositioning: false,
            ready_to_read: false,
            ready_to_write: false,
        };
        self.chunks.push(Some(chunk));
        let id = ChunkId(self.chunks.len() - 1);
        if order.is_external() {
            self.files.entry_mut(file).external = true;
        }
        self.check_std_images();
        Ok(id)
    }

    fn read_extent_key(&self, chunk: &str, axis: char) -> Result<u64> {
        match self.keys.get(&format!("{}.extent.{}", chunk, axis)) {
            None => Ok(1),
            Some(v) => match v.trim().parse::<i64>() {
                Ok(e) if e >= 1 => Ok(e as u64),
                _ => fail(MriError::Validation(format!(
                    "invalid extent for axis {} of chunk {}",
                    axis, chunk
                ))),
            },
        }
    }

    /// Re-derives extents and size from the keys after any descriptor
    /// change, marks the chunk modified, and flags the layout dirty.
    fn modify_chunk(&mut self, id: ChunkId) -> Result<()> {
        let (name, dimensions, datatype) = {
            let ch = self.chunk(id);
            (ch.name.clone(), ch.dimensions.clone(), ch.datatype)
        };

        let mut extents = Vec::with_capacity(dimensions.chars().count());
        for axis in dimensions.chars() {
            extents.push(self.read_extent_key(&name, axis)?);
        }
        let size = Chunk::derived_size(datatype, &extents);

        {
            let ch = self.chunk_mut(id);
            ch.extents = extents;
            ch.size = size;
            ch.modified = true;
            ch.mark_not_ready();
        }
        self.recompute_positions = true;

        // A file hosting an external chunk is out of the engine's hands
        // from the moment the chunk says so.
        if self.chunk(id).order.is_external() {
            let file = self.chunk(id).file;
            self.files.entry_mut(file).external = true;
        }

        // The derived size is mirrored into the header; the size hook
        // accepts it because it matches.
        self.set_int(&format!("{}.size", name), size as i64)?;
        self.check_std_images();
        Ok(())
    }

    fn check_std_images(&mut self) {
        self.std_images = self
            .chunks
            .iter()
            .flatten()
            .find_map(StdImages::detect);
    }

    // -----------------------------------------------------------------------
    // Layout
    // -----------------------------------------------------------------------

    /// Recomputes the placement of every non-external chunk, file by file:
    /// fixed-offset chunks keep their declared region, the rest are packed
    /// first-fit in (order, previous offset) order.
    pub(crate) fn compute_positions(&mut self) -> Result<()> {
        // Files hosting external chunks are out of bounds for the packer.
        for id in self.live_chunk_ids() {
            if self.chunk(id).order.is_external() {
                let file = self.chunk(id).file;
                self.files.entry_mut(file).external = true;
            }
        }

        let mut checked = vec![false; self.chunks.len()];

        for seed in self.live_chunk_ids() {
            if checked[seed.0] || self.chunk(seed).order.is_external() {
                continue;
            }
            let file = self.chunk(seed).file;

            let mut group: Vec<ChunkId> = self
                .live_chunk_ids()
                .into_iter()
                .filter(|&id| !checked[id.0] && self.chunk(id).file == file)
                .filter(|&id| !self.chunk(id).order.is_external())
                .collect();

            let mut blocks = EmptyBlockList::new(if file == self.header_file {
                self.header_size
            } else {
                0
            });

            // Fixed-offset chunks claim their exact regions first.
            group.retain(|&id| {
                let ch = self.chunk(id);
                if ch.order.is_fixed_offset() {
                    blocks.reserve(ch.offset, ch.size);
                    checked[id.0] = true;
                    false
                } else {
                    true
                }
            });

            // The previous offset as secondary key gives hysteresis:
            // equal-order chunks keep their relative placement.
            group.sort_by_key(|&id| {
                let ch = self.chunk(id);
                (ch.order.rank(), ch.offset)
            });

            for id in group {
                let size = self.chunk(id).size;
                let offset = blocks.reserve_first_fit(size)?;
                let name = self.chunk(id).name.clone();
                self.chunk_mut(id).offset = offset;
                // The offset key now matches the field, so the hook sees
                // no change and the dirty flag stays clear.
                self.set_int(&format!("{}.offset", name), offset as i64)?;
                let ch = self.chunk_mut(id);
                if ch.file != ch.actual_file || ch.offset != ch.actual_offset {
                    ch.modified = true;
                }
                checked[id.0] = true;
            }
        }

        self.recompute_positions = false;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Arena plumbing
    // -----------------------------------------------------------------------

    pub(crate) fn find_chunk(&self, name: &str) -> Option<ChunkId> {
        self.chunks
            .iter()
            .position(|c| c.as_ref().is_some_and(|ch| ch.name == name))
            .map(ChunkId)
    }

    pub(crate) fn live_chunk_ids(&self) -> Vec<ChunkId> {
        self.chunks
            .iter()
            .enumerate()
            .filter(|(_, c)| c.is_some())
            .map(|(i, _)| ChunkId(i))
            .collect()
    }

    pub(crate) fn chunk(&self, id: ChunkId) -> &Chunk {
        self.chunks[id.0].as_ref().expect("chunk is live")
    }

    pub(crate) fn chunk_mut(&mut self, id: ChunkId) -> &mut Chunk {
        self.chunks[id.0].as_mut().expect("chunk is live")
    }

    // -----------------------------------------------------------------------
    // File plumbing
    // -----------------------------------------------------------------------

    pub(crate) fn open_file(&mut self, id: FileId, for_write: bool) -> Result<()> {
        let closed = self.files.open(id, for_write)?;
        for file in closed {
            self.mark_file_chunks_not_ready(file);
        }
        Ok(())
    }

    pub(crate) fn close_file(&mut self, id: FileId) {
        if self.files.close(id) {
            self.mark_file_chunks_not_ready(id);
        }
    }

    pub(crate) fn destroy_file(&mut self, id: FileId) {
        self.mark_file_chunks_not_ready(id);
        self.files.destroy(id);
    }

    fn mark_file_chunks_not_ready(&mut self, file: FileId) {
        for chunk in self.chunks.iter_mut().flatten() {
            if chunk.file == file {
                chunk.mark_not_ready();
            }
        }
    }
}

impl Drop for Dataset {
    fn drop(&mut self) {
        // Best effort: an explicitly closed or destroyed dataset is a
        // no-op here.
        let _ = self.close_impl();
    }
}

/// Prefixes a relative path with the current directory.
fn absolute_path(path: &str) -> Result<String> {
    if path.starts_with('/') {
        return Ok(path.to_string());
    }
    let cwd = std::env::current_dir().map_err(|e| MriError::io("current directory", e))?;
    Ok(format!("{}/{}", cwd.display(), path))
}
