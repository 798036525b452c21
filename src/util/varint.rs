//! Variable-length integer encoding utilities.
//!
//! Non-negative integers are encoded with 7 data bits per byte and a
//! continuation bit in the high bit, so small values take a single byte.
//! Floats are never variable-length encoded: an `f32` is exactly 4 raw
//! big-endian IEEE-754 bytes.

use crate::error::{PeregrineError, Result};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Append a u32 value to `buf` using variable-length encoding.
///
/// Returns the number of bytes written (1-5).
pub fn encode_u32(value: u32, buf: &mut Vec<u8>) -> usize {
    encode_u64(value as u64, buf)
}

/// Append a u64 value to `buf` using variable-length encoding.
///
/// Returns the number of bytes written (1-10).
pub fn encode_u64(value: u64, buf: &mut Vec<u8>) -> usize {
    let start = buf.len();
    let mut val = value;

    loop {
        let mut byte = (val & 0x7F) as u8;
        val >>= 7;

        if val != 0 {
            byte |= 0x80; // Set continuation bit
        }

        buf.push(byte);

        if val == 0 {
            break;
        }
    }

    buf.len() - start
}

/// Decode a u32 value from variable-length encoding.
///
/// Returns `(value, bytes_consumed)`.
pub fn decode_u32(bytes: &[u8]) -> Result<(u32, usize)> {
    let (value, read) = decode_u64(bytes)?;
    if value > u32::MAX as u64 {
        return Err(PeregrineError::corruption("VarInt overflows u32"));
    }
    Ok((value as u32, read))
}

/// Decode a u64 value from variable-length encoding.
///
/// Returns `(value, bytes_consumed)`.
pub fn decode_u64(bytes: &[u8]) -> Result<(u64, usize)> {
    let mut result = 0u64;
    let mut shift = 0;
    let mut bytes_read = 0;

    for &byte in bytes {
        bytes_read += 1;

        if shift >= 64 {
            return Err(PeregrineError::corruption("VarInt overflow"));
        }

        result |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            return Ok((result, bytes_read));
        }

        shift += 7;
    }

    Err(PeregrineError::corruption("Incomplete VarInt"))
}

/// Skip past one variable-length integer in `bytes`.
///
/// Returns the number of bytes occupied without materializing the value.
pub fn skip_varint(bytes: &[u8]) -> Result<usize> {
    for (i, &byte) in bytes.iter().enumerate() {
        if byte & 0x80 == 0 {
            return Ok(i + 1);
        }
        if i >= 9 {
            return Err(PeregrineError::corruption("VarInt overflow"));
        }
    }
    Err(PeregrineError::corruption("Incomplete VarInt"))
}

/// Write a variable-length encoded u64 to a writer.
pub fn write_u64<W: Write>(writer: &mut W, value: u64) -> Result<usize> {
    let mut bytes = Vec::new();
    encode_u64(value, &mut bytes);
    writer.write_all(&bytes)?;
    Ok(bytes.len())
}

/// Read a variable-length encoded u64 from a reader.
pub fn read_u64<R: Read>(reader: &mut R) -> Result<u64> {
    let mut result = 0u64;
    let mut shift = 0;

    loop {
        let byte = reader.read_u8()?;

        if shift >= 64 {
            return Err(PeregrineError::corruption("VarInt overflow"));
        }

        result |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            return Ok(result);
        }

        shift += 7;
    }
}

/// Write an f32 as 4 raw big-endian IEEE-754 bytes.
pub fn write_f32<W: Write>(writer: &mut W, value: f32) -> Result<()> {
    writer.write_f32::<BigEndian>(value)?;
    Ok(())
}

/// Read an f32 from 4 raw big-endian IEEE-754 bytes.
pub fn read_f32<R: Read>(reader: &mut R) -> Result<f32> {
    Ok(reader.read_f32::<BigEndian>()?)
}
