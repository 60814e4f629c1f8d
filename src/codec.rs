//! Bitcoin-style varint/varstring/varbytes codec, plus big-endian fixed
//! widths, over a byte-slice reader and a growable writer.
//!
//! Encoder and decoder are strict inverses (invariant 1 in the spec's
//! testable properties): any varint whose declared length would overrun
//! the input fails with [`BmError::Parse`]; payloads over
//! [`MAX_PAYLOAD_SIZE`] fail with [`BmError::Oversize`].

use crate::error::BmError;

/// Maximum object payload size, per spec §4.1.
pub const MAX_PAYLOAD_SIZE: usize = 1_600_003;

/// A cursor over a byte slice with checked, bounds-enforced reads.
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    fn need(&self, n: usize) -> Result<(), BmError> {
        if self.remaining() < n {
            Err(BmError::Parse(format!(
                "need {n} bytes, only {} remaining",
                self.remaining()
            )))
        } else {
            Ok(())
        }
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&'a [u8], BmError> {
        self.need(n)?;
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, BmError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u32_be(&mut self) -> Result<u32, BmError> {
        let b = self.read_bytes(4)?;
        Ok(u32::from_be_bytes(b.try_into().unwrap()))
    }

    pub fn read_u64_be(&mut self) -> Result<u64, BmError> {
        let b = self.read_bytes(8)?;
        Ok(u64::from_be_bytes(b.try_into().unwrap()))
    }

    /// Bitcoin-style variable length integer.
    pub fn read_var_int(&mut self) -> Result<u64, BmError> {
        let tag = self.read_u8()?;
        match tag {
            0xFF => Ok(self.read_u64_be()?),
            0xFE => Ok(self.read_u32_be()? as u64),
            0xFD => {
                let b = self.read_bytes(2)?;
                Ok(u16::from_be_bytes(b.try_into().unwrap()) as u64)
            }
            n => Ok(n as u64),
        }
    }

    pub fn read_var_bytes(&mut self) -> Result<&'a [u8], BmError> {
        let len = self.read_var_int()? as usize;
        if len > MAX_PAYLOAD_SIZE {
            return Err(BmError::Oversize);
        }
        self.read_bytes(len)
    }

    pub fn read_var_string(&mut self) -> Result<String, BmError> {
        let bytes = self.read_var_bytes()?;
        String::from_utf8(bytes.to_vec()).map_err(|e| BmError::Parse(e.to_string()))
    }
}

/// A growable byte buffer used to build frames and payloads.
#[derive(Default)]
pub struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn write_u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn write_u32_be(&mut self, v: u32) -> &mut Self {
        self.write_bytes(&v.to_be_bytes())
    }

    pub fn write_u64_be(&mut self, v: u64) -> &mut Self {
        self.write_bytes(&v.to_be_bytes())
    }

    pub fn write_var_int(&mut self, v: u64) -> &mut Self {
        if v < 0xFD {
            self.write_u8(v as u8);
        } else if v <= 0xFFFF {
            self.write_u8(0xFD);
            self.write_bytes(&(v as u16).to_be_bytes());
        } else if v <= 0xFFFF_FFFF {
            self.write_u8(0xFE);
            self.write_bytes(&(v as u32).to_be_bytes());
        } else {
            self.write_u8(0xFF);
            self.write_bytes(&v.to_be_bytes());
        }
        self
    }

    pub fn write_var_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.write_var_int(bytes.len() as u64);
        self.write_bytes(bytes)
    }

    pub fn write_var_string(&mut self, s: &str) -> &mut Self {
        self.write_var_bytes(s.as_bytes())
    }
}

/// Encode a `u64` as a Bitcoin-style varint, standalone helper for callers
/// that only need the bytes (e.g. hashing a field without a full writer).
pub fn encode_var_int(v: u64) -> Vec<u8> {
    let mut w = ByteWriter::new();
    w.write_var_int(v);
    w.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_roundtrip_and_widths() {
        let cases: &[(u64, usize)] = &[
            (0, 1),
            (252, 1),
            (253, 3),
            (0xFFFF, 3),
            (0x10000, 5),
            (0xFFFF_FFFF, 5),
            (0x1_0000_0000, 9),
        ];
        for &(value, expected_len) in cases {
            let bytes = encode_var_int(value);
            assert_eq!(bytes.len(), expected_len, "value={value}");
            let mut reader = ByteReader::new(&bytes);
            assert_eq!(reader.read_var_int().unwrap(), value);
            assert_eq!(reader.remaining(), 0);
        }
    }

    #[test]
    fn var_bytes_roundtrip() {
        let mut w = ByteWriter::new();
        w.write_var_bytes(b"hello bitmessage");
        let bytes = w.into_bytes();
        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.read_var_bytes().unwrap(), b"hello bitmessage");
    }

    #[test]
    fn var_string_roundtrip() {
        let mut w = ByteWriter::new();
        w.write_var_string("hello");
        let bytes = w.into_bytes();
        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.read_var_string().unwrap(), "hello");
    }

    #[test]
    fn truncated_varint_is_parse_error() {
        let bytes = [0xFFu8, 0x01, 0x02];
        let mut r = ByteReader::new(&bytes);
        assert!(matches!(r.read_var_int(), Err(BmError::Parse(_))));
    }

    #[test]
    fn oversize_var_bytes_rejected() {
        let mut w = ByteWriter::new();
        w.write_var_int((MAX_PAYLOAD_SIZE + 1) as u64);
        let bytes = w.into_bytes();
        let mut r = ByteReader::new(&bytes);
        assert!(matches!(r.read_var_bytes(), Err(BmError::Oversize)));
    }

    #[test]
    fn fixed_width_big_endian() {
        let mut w = ByteWriter::new();
        w.write_u32_be(0x01020304).write_u64_be(0x0102030405060708);
        let bytes = w.into_bytes();
        let mut r = ByteReader::new(&bytes);
        assert_eq!(r.read_u32_be().unwrap(), 0x01020304);
        assert_eq!(r.read_u64_be().unwrap(), 0x0102030405060708);
    }
}
