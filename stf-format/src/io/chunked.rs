//! Chunked, ZSTD-compressed backing (the `.zstf` extension). Body records
//! are buffered uncompressed until an instruction boundary crosses the
//! chunk-size threshold, then flushed as one independently-decodable ZSTD
//! frame; a trailing index maps each chunk back to an instruction range and
//! a byte offset, which is what makes `seek(instruction_index)` possible
//! without decompressing the whole file (spec §4.1).
//!
//! The decompression-overlap thread mirrors the single-slot
//! producer/consumer used elsewhere in the pack for exactly this shape of
//! problem (one producer, one consumer, bounded to avoid unbounded
//! read-ahead): a `crossbeam_channel::bounded(1)` channel carries the next
//! chunk's decompressed bytes while the current chunk is still being
//! consumed.

use std::fs::File;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};
use std::path::Path;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crossbeam_channel::{bounded, Receiver};

use crate::error::{FormatError, Result};
use crate::io::raw;
use crate::io::ThreadMode;

const MAGIC: &[u8; 8] = b"STFIDX01";
const FOOTER_LEN: u64 = 8 /* table_offset */ + 4 /* count */ + 8 /* magic */;
const INDEX_ENTRY_LEN: u64 = 8 + 8 + 8;
const DEFAULT_ZSTD_LEVEL: i32 = 3;

/// One entry in a chunked file's trailing index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkIndexEntry {
    /// 1-based index of the first instruction whose terminating opcode
    /// record lives in this chunk.
    pub start_instruction: u64,
    pub offset: u64,
    pub compressed_len: u64,
}

pub struct ChunkedWriter {
    file: File,
    chunk_threshold: u64,
    pending: Vec<u8>,
    pending_start_instruction: u64,
    bytes_written: u64,
    index: Vec<ChunkIndexEntry>,
}

impl ChunkedWriter {
    pub fn create(path: &Path, overwrite: bool, chunk_instructions: u64) -> Result<Self> {
        Ok(Self {
            file: raw::create_write(path, overwrite)?,
            chunk_threshold: chunk_instructions,
            pending: Vec::new(),
            pending_start_instruction: 1,
            bytes_written: 0,
            index: Vec::new(),
        })
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.pending.extend_from_slice(bytes);
        Ok(())
    }

    /// Called after each opcode record is written. Closes the current
    /// chunk once it has accumulated at least `chunk_threshold`
    /// instructions, so the boundary always falls after a complete
    /// instruction (spec §4.1).
    pub fn note_instruction_boundary(&mut self, instruction_index: u64) -> Result<()> {
        if instruction_index + 1 - self.pending_start_instruction >= self.chunk_threshold {
            self.flush_chunk(instruction_index + 1)?;
        }
        Ok(())
    }

    fn flush_chunk(&mut self, next_start_instruction: u64) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let compressed = zstd::stream::encode_all(&self.pending[..], DEFAULT_ZSTD_LEVEL)
            .map_err(|e| FormatError::CorruptChunk(e.to_string()))?;
        self.index.push(ChunkIndexEntry {
            start_instruction: self.pending_start_instruction,
            offset: self.bytes_written,
            compressed_len: compressed.len() as u64,
        });
        self.file.write_all(&compressed)?;
        self.bytes_written += compressed.len() as u64;
        self.pending.clear();
        self.pending_start_instruction = next_start_instruction;
        Ok(())
    }

    /// Flushes any partial final chunk and appends the index trailer.
    /// Consumes `self`: once this runs there is nothing more to append.
    pub fn finish(mut self, last_instruction_index: u64) -> Result<()> {
        self.flush_chunk(last_instruction_index + 1)?;
        let table_offset = self.bytes_written;
        for entry in &self.index {
            self.file.write_u64::<LittleEndian>(entry.start_instruction)?;
            self.file.write_u64::<LittleEndian>(entry.offset)?;
            self.file.write_u64::<LittleEndian>(entry.compressed_len)?;
        }
        self.file.write_u64::<LittleEndian>(table_offset)?;
        self.file.write_u32::<LittleEndian>(self.index.len() as u32)?;
        self.file.write_all(MAGIC)?;
        self.file.flush()?;
        Ok(())
    }
}

enum Prefetch {
    Idle,
    Pending(Receiver<std::result::Result<Vec<u8>, String>>),
}

pub struct ChunkedReader {
    file: File,
    index: Vec<ChunkIndexEntry>,
    current_chunk: usize,
    current: Cursor<Vec<u8>>,
    thread_mode: ThreadMode,
    prefetch: Prefetch,
}

impl ChunkedReader {
    pub fn open(path: &Path, thread_mode: ThreadMode) -> Result<Self> {
        let mut file = File::open(path)?;
        let index = read_index(&mut file)?;
        let mut reader = Self {
            file,
            index,
            current_chunk: 0,
            current: Cursor::new(Vec::new()),
            thread_mode,
            prefetch: Prefetch::Idle,
        };
        if !reader.index.is_empty() {
            reader.load_chunk(0)?;
            reader.start_prefetch(1);
        }
        Ok(reader)
    }

    fn load_chunk(&mut self, chunk: usize) -> Result<()> {
        let entry = self.index[chunk];
        let bytes = if chunk == self.current_chunk + 1 {
            if let Prefetch::Pending(rx) = std::mem::replace(&mut self.prefetch, Prefetch::Idle) {
                rx.recv()
                    .map_err(|_| FormatError::CorruptChunk("decompression thread died".into()))?
                    .map_err(FormatError::CorruptChunk)?
            } else {
                decompress_entry(&mut self.file, &entry)?
            }
        } else {
            decompress_entry(&mut self.file, &entry)?
        };
        self.current_chunk = chunk;
        self.current = Cursor::new(bytes);
        Ok(())
    }

    fn start_prefetch(&mut self, chunk: usize) {
        self.prefetch = Prefetch::Idle;
        if self.thread_mode != ThreadMode::Background || chunk >= self.index.len() {
            return;
        }
        let entry = self.index[chunk];
        let mut file = match self.file.try_clone() {
            Ok(f) => f,
            Err(_) => return,
        };
        let (tx, rx) = bounded(1);
        std::thread::spawn(move || {
            let result = decompress_entry(&mut file, &entry).map_err(|e| e.to_string());
            let _ = tx.send(result);
        });
        self.prefetch = Prefetch::Pending(rx);
    }

    fn advance_chunk(&mut self) -> Result<bool> {
        let next = self.current_chunk + 1;
        if next >= self.index.len() {
            return Ok(false);
        }
        self.load_chunk(next)?;
        self.start_prefetch(next + 1);
        Ok(true)
    }

    /// Repositions to the chunk containing `target_instruction`: the last
    /// chunk whose `start_instruction <= target_instruction`. Returns that
    /// chunk's `start_instruction`, which is usually well below the target
    /// — the caller (the record reader) is responsible for discarding
    /// records from there until it reaches the exact instruction (spec
    /// §4.1).
    pub fn seek_to_instruction(&mut self, target_instruction: u64) -> Result<u64> {
        let chunk = self
            .index
            .iter()
            .rposition(|e| e.start_instruction <= target_instruction)
            .unwrap_or(0);
        let start_instruction = self.index[chunk].start_instruction;
        self.load_chunk(chunk)?;
        self.start_prefetch(chunk + 1);
        Ok(start_instruction)
    }
}

impl Read for ChunkedReader {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        loop {
            let n = self.current.read(buf)?;
            if n > 0 {
                return Ok(n);
            }
            match self.advance_chunk() {
                Ok(true) => continue,
                Ok(false) => return Ok(0),
                Err(e) => return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, e)),
            }
        }
    }
}

fn decompress_entry(file: &mut File, entry: &ChunkIndexEntry) -> Result<Vec<u8>> {
    file.seek(SeekFrom::Start(entry.offset))?;
    let mut compressed = vec![0u8; entry.compressed_len as usize];
    file.read_exact(&mut compressed)?;
    zstd::stream::decode_all(&compressed[..]).map_err(|e| FormatError::CorruptChunk(e.to_string()))
}

fn read_index(file: &mut File) -> Result<Vec<ChunkIndexEntry>> {
    let len = file.metadata()?.len();
    if len < FOOTER_LEN {
        return Err(FormatError::CorruptChunk("file too short for a chunk index footer".into()));
    }
    file.seek(SeekFrom::Start(len - FOOTER_LEN))?;
    let table_offset = file.read_u64::<LittleEndian>()?;
    let count = file.read_u32::<LittleEndian>()?;
    let mut magic = [0u8; 8];
    file.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(FormatError::CorruptChunk("missing chunk index magic trailer".into()));
    }
    let expected_table_len = table_offset + (count as u64) * INDEX_ENTRY_LEN;
    if expected_table_len + FOOTER_LEN != len {
        return Err(FormatError::CorruptChunk("chunk index size mismatch".into()));
    }
    file.seek(SeekFrom::Start(table_offset))?;
    let mut entries = Vec::with_capacity(count as usize);
    for _ in 0..count {
        entries.push(ChunkIndexEntry {
            start_instruction: file.read_u64::<LittleEndian>()?,
            offset: file.read_u64::<LittleEndian>()?,
            compressed_len: file.read_u64::<LittleEndian>()?,
        });
    }
    Ok(entries)
}
