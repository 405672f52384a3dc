//! Record framing for snapshot files
//!
//! Two framings exist on disk and both are kept for file compatibility:
//!
//! ```text
//! stream  (inode, dentry):      [u32 BE len][payload] [u32 BE len][payload] ... EOF
//! counted (extend, multipart):  [varint count] ([varint len][payload]) x count
//! ```
//!
//! Both are one [`FramedWriter`] / [`FramedReader`] parameterized by the
//! [`HeaderCodec`]. Every byte that passes through, headers included, feeds a
//! running CRC-32 in file order.

use crate::source::ByteSource;
use metanode_common::ChecksumCalculator;
use std::io::{self, Write};
use std::marker::PhantomData;

/// Encoding of length and count headers
pub trait HeaderCodec {
    /// Encode `value`, appending to `buf`
    fn encode(value: u64, buf: &mut Vec<u8>) -> io::Result<()>;

    /// Decode one header, appending its raw bytes to `raw`
    fn decode<S: ByteSource + ?Sized>(src: &mut S, raw: &mut Vec<u8>) -> io::Result<u64>;
}

/// Fixed 4-byte big-endian header
#[derive(Debug, Clone, Copy)]
pub struct FixedBe32;

impl HeaderCodec for FixedBe32 {
    fn encode(value: u64, buf: &mut Vec<u8>) -> io::Result<()> {
        let value = u32::try_from(value).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("record of {} bytes exceeds u32 length header", value),
            )
        })?;
        buf.extend_from_slice(&value.to_be_bytes());
        Ok(())
    }

    fn decode<S: ByteSource + ?Sized>(src: &mut S, raw: &mut Vec<u8>) -> io::Result<u64> {
        let bytes = src.read_slice(4)?;
        raw.extend_from_slice(bytes);
        let mut header = [0u8; 4];
        header.copy_from_slice(bytes);
        Ok(u64::from(u32::from_be_bytes(header)))
    }
}

/// LEB128 varint header
#[derive(Debug, Clone, Copy)]
pub struct Varint;

impl HeaderCodec for Varint {
    fn encode(value: u64, buf: &mut Vec<u8>) -> io::Result<()> {
        prost::encoding::encode_varint(value, buf);
        Ok(())
    }

    fn decode<S: ByteSource + ?Sized>(src: &mut S, raw: &mut Vec<u8>) -> io::Result<u64> {
        src.read_varint(raw)
    }
}

/// Writes framed records and signs everything written
pub struct FramedWriter<W, H> {
    inner: W,
    signer: ChecksumCalculator,
    header: Vec<u8>,
    records: u64,
    _codec: PhantomData<H>,
}

impl<W: Write, H: HeaderCodec> FramedWriter<W, H> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            signer: ChecksumCalculator::new(),
            header: Vec::with_capacity(crate::source::MAX_VARINT_LEN),
            records: 0,
            _codec: PhantomData,
        }
    }

    /// Write the leading record count of a counted framing
    pub fn write_count(&mut self, count: u64) -> io::Result<()> {
        self.write_header(count)
    }

    /// Write one record: header, then payload
    pub fn write_record(&mut self, payload: &[u8]) -> io::Result<()> {
        self.write_header(payload.len() as u64)?;
        self.inner.write_all(payload)?;
        self.signer.update(payload);
        self.records += 1;
        Ok(())
    }

    fn write_header(&mut self, value: u64) -> io::Result<()> {
        self.header.clear();
        H::encode(value, &mut self.header)?;
        self.inner.write_all(&self.header)?;
        self.signer.update(&self.header);
        Ok(())
    }

    /// Records written so far
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Checksum of everything written so far
    pub fn checksum(&self) -> u32 {
        self.signer.value()
    }

    /// Return the underlying writer and the final checksum
    pub fn into_parts(self) -> (W, u32) {
        (self.inner, self.signer.finalize())
    }
}

/// Reads framed records and signs everything read
pub struct FramedReader<S, H> {
    src: S,
    signer: ChecksumCalculator,
    header: Vec<u8>,
    records: u64,
    _codec: PhantomData<H>,
}

impl<S: ByteSource, H: HeaderCodec> FramedReader<S, H> {
    pub fn new(src: S) -> Self {
        Self {
            src,
            signer: ChecksumCalculator::new(),
            header: Vec::with_capacity(crate::source::MAX_VARINT_LEN),
            records: 0,
            _codec: PhantomData,
        }
    }

    /// Read the leading record count of a counted framing
    pub fn read_count(&mut self) -> io::Result<u64> {
        self.read_header()
    }

    /// Next record of a stream framing; `None` at a clean end of file.
    /// End of file inside a header or a payload is an `UnexpectedEof` error.
    pub fn next_record(&mut self) -> io::Result<Option<&[u8]>> {
        if self.src.is_exhausted()? {
            return Ok(None);
        }
        self.read_record().map(Some)
    }

    /// Read one record whose presence is promised by a count
    pub fn read_record(&mut self) -> io::Result<&[u8]> {
        let len = self.read_header()?;
        let len = usize::try_from(len).map_err(|_| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("record length {} does not fit in memory", len),
            )
        })?;
        let payload = self.src.read_slice(len)?;
        self.signer.update(payload);
        self.records += 1;
        Ok(payload)
    }

    fn read_header(&mut self) -> io::Result<u64> {
        self.header.clear();
        let value = H::decode(&mut self.src, &mut self.header)?;
        self.signer.update(&self.header);
        Ok(value)
    }

    /// Records read so far
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Checksum of everything read so far
    pub fn checksum(&self) -> u32 {
        self.signer.value()
    }

    /// Bytes consumed from the source
    pub fn position(&self) -> u64 {
        self.src.position()
    }
}

/// Length-prefixed stream framing used by inode and dentry files
pub type StreamWriter<W> = FramedWriter<W, FixedBe32>;
/// Reader for [`StreamWriter`] files
pub type StreamReader<S> = FramedReader<S, FixedBe32>;
/// Varint-counted framing used by extend and multipart files
pub type CountedWriter<W> = FramedWriter<W, Varint>;
/// Reader for [`CountedWriter`] files
pub type CountedReader<S> = FramedReader<S, Varint>;
