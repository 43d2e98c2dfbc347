//! # Encoding Primitives
//!
//! Fixed binary codec primitives for the metadata payload committed to
//! the Taproot tree, plus hex and base64 helpers. The codec is
//! little-endian throughout; strings and sequences carry a single u8
//! length prefix.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::{VaultError, VaultResult};

/// Append-only writer for the metadata wire format.
#[derive(Debug, Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self {
            buf: Vec::with_capacity(64),
        }
    }

    pub fn push_u8(&mut self, value: u8) {
        self.buf.push(value);
    }

    pub fn push_u32_le(&mut self, value: u32) {
        self.buf.extend_from_slice(&value.to_le_bytes());
    }

    /// Write a u8-length-prefixed byte sequence. Fails when the
    /// sequence does not fit the single-byte count.
    pub fn push_bytes_u8(&mut self, field: &str, bytes: &[u8]) -> VaultResult<()> {
        if bytes.len() > u8::MAX as usize {
            return Err(VaultError::MetadataEncodeTooLong {
                message: format!("{} is {} bytes, limit is {}", field, bytes.len(), u8::MAX),
            });
        }
        self.buf.push(bytes.len() as u8);
        self.buf.extend_from_slice(bytes);
        Ok(())
    }

    /// Write a u8-length-prefixed UTF-8 string.
    pub fn push_str_u8(&mut self, field: &str, value: &str) -> VaultResult<()> {
        self.push_bytes_u8(field, value.as_bytes())
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Cursor-style reader over the metadata wire format.
///
/// Every read is bounds-checked; a short buffer surfaces as
/// `MetadataDecodeFailed` naming the truncated field.
#[derive(Debug)]
pub struct ByteReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn read_u8(&mut self, field: &str) -> VaultResult<u8> {
        if self.remaining() < 1 {
            return Err(VaultError::metadata(format!("truncated {}", field)));
        }
        let value = self.data[self.pos];
        self.pos += 1;
        Ok(value)
    }

    pub fn read_u32_le(&mut self, field: &str) -> VaultResult<u32> {
        if self.remaining() < 4 {
            return Err(VaultError::metadata(format!("truncated {}", field)));
        }
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&self.data[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(u32::from_le_bytes(raw))
    }

    pub fn read_bytes(&mut self, field: &str, len: usize) -> VaultResult<&'a [u8]> {
        if self.remaining() < len {
            return Err(VaultError::metadata(format!(
                "truncated {}: wanted {} bytes, {} left",
                field,
                len,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    /// Read a u8-length-prefixed byte sequence.
    pub fn read_bytes_u8(&mut self, field: &str) -> VaultResult<&'a [u8]> {
        let len = self.read_u8(field)? as usize;
        self.read_bytes(field, len)
    }

    /// Read a u8-length-prefixed UTF-8 string.
    pub fn read_str_u8(&mut self, field: &str) -> VaultResult<String> {
        let bytes = self.read_bytes_u8(field)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| VaultError::metadata(format!("{} is not valid UTF-8: {}", field, e)))
    }
}

/// Encode bytes as lowercase hex.
pub fn to_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Decode a hex string, naming the field in the error.
pub fn from_hex(field: &str, value: &str) -> VaultResult<Vec<u8>> {
    hex::decode(value).map_err(|e| VaultError::invalid_input(format!("{}: bad hex: {}", field, e)))
}

/// Encode bytes as standard padded base64.
pub fn to_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode standard padded base64.
pub fn from_base64(field: &str, value: &str) -> VaultResult<Vec<u8>> {
    BASE64
        .decode(value)
        .map_err(|e| VaultError::invalid_input(format!("{}: bad base64: {}", field, e)))
}

/// Length of a value's Bitcoin compact-size prefix, used by the
/// witness-size estimator.
pub fn compact_size_len(value: u64) -> usize {
    match value {
        0..=0xfc => 1,
        0xfd..=0xffff => 3,
        0x1_0000..=0xffff_ffff => 5,
        _ => 9,
    }
}
