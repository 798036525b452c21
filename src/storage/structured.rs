//! Checksummed binary record I/O for index part files.
//!
//! Every part file is written through [`StructWriter`], which tracks the
//! byte position and accumulates a CRC32 over everything written; the
//! checksum lands in the last four bytes of the file. [`StructReader`]
//! mirrors the write calls and verifies the checksum when the stream is
//! finished.

use byteorder::{BigEndian, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::{PeregrineError, Result};
use crate::util::varint;
use std::io::{Read, Write};

/// A structured file writer for binary data.
pub struct StructWriter<W: Write> {
    writer: W,
    hasher: crc32fast::Hasher,
    position: u64,
}

impl<W: Write> StructWriter<W> {
    /// Create a new structured file writer.
    pub fn new(writer: W) -> Self {
        StructWriter {
            writer,
            hasher: crc32fast::Hasher::new(),
            position: 0,
        }
    }

    /// Write a u8 value.
    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.writer.write_u8(value)?;
        self.track(&[value]);
        Ok(())
    }

    /// Write a u32 value (little-endian).
    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.writer.write_u32::<LittleEndian>(value)?;
        self.track(&value.to_le_bytes());
        Ok(())
    }

    /// Write a u64 value (little-endian).
    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.writer.write_u64::<LittleEndian>(value)?;
        self.track(&value.to_le_bytes());
        Ok(())
    }

    /// Write an f32 as 4 raw big-endian IEEE-754 bytes.
    pub fn write_f32(&mut self, value: f32) -> Result<()> {
        self.writer.write_f32::<BigEndian>(value)?;
        self.track(&value.to_be_bytes());
        Ok(())
    }

    /// Write a variable-length integer.
    pub fn write_varint(&mut self, value: u64) -> Result<()> {
        let mut encoded = Vec::new();
        varint::encode_u64(value, &mut encoded);
        self.writer.write_all(&encoded)?;
        self.track(&encoded);
        Ok(())
    }

    /// Write raw bytes with a varint length prefix.
    pub fn write_bytes(&mut self, value: &[u8]) -> Result<()> {
        self.write_varint(value.len() as u64)?;
        self.write_raw(value)
    }

    /// Write raw bytes without a length prefix.
    pub fn write_raw(&mut self, value: &[u8]) -> Result<()> {
        self.writer.write_all(value)?;
        self.track(value);
        Ok(())
    }

    /// Get the current file position.
    pub fn position(&self) -> u64 {
        self.position
    }

    fn track(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.position += data.len() as u64;
    }

    /// Write the trailing checksum, flush, and return the inner writer.
    pub fn finish(mut self) -> Result<W> {
        let checksum = self.hasher.finalize();
        self.writer.write_u32::<LittleEndian>(checksum)?;
        self.writer.flush()?;
        Ok(self.writer)
    }
}

/// A structured file reader for binary data.
///
/// `size` is the total file size including the 4-byte trailing checksum.
pub struct StructReader<R: Read> {
    reader: R,
    hasher: crc32fast::Hasher,
    position: u64,
    payload_size: u64,
}

impl<R: Read> StructReader<R> {
    /// Create a new structured file reader over a stream of `size` bytes.
    pub fn new(reader: R, size: u64) -> Result<Self> {
        if size < 4 {
            return Err(PeregrineError::corruption("file too small for checksum"));
        }
        Ok(StructReader {
            reader,
            hasher: crc32fast::Hasher::new(),
            position: 0,
            payload_size: size - 4,
        })
    }

    /// Read a u8 value.
    pub fn read_u8(&mut self) -> Result<u8> {
        let value = self.reader.read_u8()?;
        self.track(&[value]);
        Ok(value)
    }

    /// Read a u32 value (little-endian).
    pub fn read_u32(&mut self) -> Result<u32> {
        let value = self.reader.read_u32::<LittleEndian>()?;
        self.track(&value.to_le_bytes());
        Ok(value)
    }

    /// Read a u64 value (little-endian).
    pub fn read_u64(&mut self) -> Result<u64> {
        let value = self.reader.read_u64::<LittleEndian>()?;
        self.track(&value.to_le_bytes());
        Ok(value)
    }

    /// Read an f32 from 4 raw big-endian bytes.
    pub fn read_f32(&mut self) -> Result<f32> {
        let value = self.reader.read_f32::<BigEndian>()?;
        self.track(&value.to_be_bytes());
        Ok(value)
    }

    /// Read a variable-length integer.
    pub fn read_varint(&mut self) -> Result<u64> {
        let mut bytes = Vec::new();
        loop {
            let byte = self.reader.read_u8()?;
            bytes.push(byte);
            if byte & 0x80 == 0 {
                break;
            }
        }

        let (value, _) = varint::decode_u64(&bytes)?;
        self.track(&bytes);
        Ok(value)
    }

    /// Read length-prefixed bytes.
    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.read_varint()? as usize;
        self.read_raw(len)
    }

    /// Read exactly `len` raw bytes.
    pub fn read_raw(&mut self, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.reader.read_exact(&mut buf)?;
        self.track(&buf);
        Ok(buf)
    }

    /// Get the current file position.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Bytes remaining before the trailing checksum.
    pub fn remaining(&self) -> u64 {
        self.payload_size.saturating_sub(self.position)
    }

    fn track(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.position += data.len() as u64;
    }

    /// Consume any unread payload, then verify the trailing checksum.
    pub fn finish(mut self) -> Result<()> {
        let remaining = self.remaining() as usize;
        if remaining > 0 {
            self.read_raw(remaining)?;
        }

        let expected = self.reader.read_u32::<LittleEndian>()?;
        let actual = self.hasher.finalize();
        if expected != actual {
            return Err(PeregrineError::corruption(format!(
                "checksum mismatch: expected {expected:08x}, computed {actual:08x}"
            )));
        }
        Ok(())
    }
}
