//! Sequential byte sources for snapshot files
//!
//! Snapshot files are consumed front to back. [`ByteSource`] hides whether
//! the bytes come through a read buffer or a read-only memory mapping, so the
//! framing code is the same for both and the choice is a per-file setting.

use memmap2::Mmap;
use metanode_common::ReadStrategy;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::Path;

/// Longest LEB128 encoding of a u64
pub const MAX_VARINT_LEN: usize = 10;

/// A forward-only source of bytes
pub trait ByteSource {
    /// True when no bytes are left
    fn is_exhausted(&mut self) -> io::Result<bool>;

    /// Borrow exactly `len` bytes, failing with `UnexpectedEof` on a short file
    fn read_slice(&mut self, len: usize) -> io::Result<&[u8]>;

    /// Bytes consumed so far
    fn position(&self) -> u64;

    /// Decode a LEB128 varint, appending its raw bytes to `raw`
    fn read_varint(&mut self, raw: &mut Vec<u8>) -> io::Result<u64> {
        let start = raw.len();
        loop {
            let byte = self.read_slice(1)?[0];
            raw.push(byte);
            if byte < 0x80 || raw.len() - start >= MAX_VARINT_LEN {
                break;
            }
        }
        let mut encoded = &raw[start..];
        prost::encoding::decode_varint(&mut encoded)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }
}

/// Buffered sequential reader
pub struct BufferedSource<R> {
    reader: BufReader<R>,
    scratch: Vec<u8>,
    /// Bytes left when the total length is known up front
    remaining: Option<u64>,
    position: u64,
}

impl<R: Read> BufferedSource<R> {
    pub fn new(inner: R, buffer_size: usize) -> Self {
        Self {
            reader: BufReader::with_capacity(buffer_size, inner),
            scratch: Vec::new(),
            remaining: None,
            position: 0,
        }
    }

    /// Declare the total length, so oversized length headers fail before
    /// any allocation
    #[must_use]
    pub fn with_len(mut self, len: u64) -> Self {
        self.remaining = Some(len);
        self
    }
}

impl<R: Read> ByteSource for BufferedSource<R> {
    fn is_exhausted(&mut self) -> io::Result<bool> {
        Ok(self.reader.fill_buf()?.is_empty())
    }

    fn read_slice(&mut self, len: usize) -> io::Result<&[u8]> {
        if let Some(remaining) = self.remaining {
            if len as u64 > remaining {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("need {} bytes, {} left", len, remaining),
                ));
            }
        }
        self.scratch.resize(len, 0);
        self.reader.read_exact(&mut self.scratch)?;
        self.position += len as u64;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= len as u64;
        }
        Ok(&self.scratch)
    }

    fn position(&self) -> u64 {
        self.position
    }
}

/// Source over bytes already in memory (a mapping or a buffer)
pub struct SliceSource<T> {
    data: T,
    position: usize,
}

impl<T: AsRef<[u8]>> SliceSource<T> {
    pub fn new(data: T) -> Self {
        Self { data, position: 0 }
    }

    fn rest(&self) -> &[u8] {
        &self.data.as_ref()[self.position..]
    }
}

impl<T: AsRef<[u8]>> ByteSource for SliceSource<T> {
    fn is_exhausted(&mut self) -> io::Result<bool> {
        Ok(self.rest().is_empty())
    }

    fn read_slice(&mut self, len: usize) -> io::Result<&[u8]> {
        let left = self.rest().len();
        if len > left {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("need {} bytes, {} left", len, left),
            ));
        }
        let start = self.position;
        self.position += len;
        Ok(&self.data.as_ref()[start..start + len])
    }

    fn position(&self) -> u64 {
        self.position as u64
    }

    fn read_varint(&mut self, raw: &mut Vec<u8>) -> io::Result<u64> {
        let rest = self.rest();
        let mut cursor = rest;
        let value = prost::encoding::decode_varint(&mut cursor).map_err(|e| {
            if rest.len() < MAX_VARINT_LEN && rest.iter().all(|b| b & 0x80 != 0) {
                io::Error::new(io::ErrorKind::UnexpectedEof, e)
            } else {
                io::Error::new(io::ErrorKind::InvalidData, e)
            }
        })?;
        let consumed = rest.len() - cursor.len();
        raw.extend_from_slice(&rest[..consumed]);
        self.position += consumed;
        Ok(value)
    }
}

/// Read-only mapping of a whole file. Empty files are not mapped.
pub struct MappedFile(Option<Mmap>);

impl MappedFile {
    pub fn open(file: &File) -> io::Result<Self> {
        if file.metadata()?.len() == 0 {
            return Ok(Self(None));
        }
        // SAFETY: snapshot files are never modified in place; a new generation
        // is written to a fresh file and swapped in by rename, so the mapped
        // bytes do not change while the mapping is alive.
        #[allow(unsafe_code)]
        let map = unsafe { Mmap::map(file)? };
        Ok(Self(Some(map)))
    }
}

impl AsRef<[u8]> for MappedFile {
    fn as_ref(&self) -> &[u8] {
        self.0.as_deref().unwrap_or(&[])
    }
}

/// A snapshot file opened with the configured strategy
pub enum FileSource {
    Buffered(BufferedSource<File>),
    Mapped(SliceSource<MappedFile>),
}

impl FileSource {
    /// Open `path`. Returns `Ok(None)` when the file does not exist.
    pub fn open(path: &Path, strategy: ReadStrategy, buffer_size: usize) -> io::Result<Option<Self>> {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let source = match strategy {
            ReadStrategy::Buffered => {
                let len = file.metadata()?.len();
                Self::Buffered(BufferedSource::new(file, buffer_size).with_len(len))
            }
            ReadStrategy::Mapped => Self::Mapped(SliceSource::new(MappedFile::open(&file)?)),
        };
        Ok(Some(source))
    }
}

impl ByteSource for FileSource {
    fn is_exhausted(&mut self) -> io::Result<bool> {
        match self {
            Self::Buffered(s) => s.is_exhausted(),
            Self::Mapped(s) => s.is_exhausted(),
        }
    }

    fn read_slice(&mut self, len: usize) -> io::Result<&[u8]> {
        match self {
            Self::Buffered(s) => s.read_slice(len),
            Self::Mapped(s) => s.read_slice(len),
        }
    }

    fn position(&self) -> u64 {
        match self {
            Self::Buffered(s) => s.position(),
            Self::Mapped(s) => s.position(),
        }
    }

    fn read_varint(&mut self, raw: &mut Vec<u8>) -> io::Result<u64> {
        match self {
            Self::Buffered(s) => s.read_varint(raw),
            Self::Mapped(s) => s.read_varint(raw),
        }
    }
}
