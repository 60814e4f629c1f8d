//! Wire framing: `magic || command(12B) || length(u32) || checksum(4B) ||
//! payload`, per spec §4.7/§6. Grounded in the teacher's `MessageHeader`/
//! `FramedMessage` (`network/protocol.rs`), swapped from bincode + a
//! 64-byte SHA-512 checksum to the spec's big-endian codec and 4-byte
//! truncated-SHA-512 checksum.

use crate::codec::{ByteReader, ByteWriter};
use crate::crypto::Cryptography;
use crate::error::BmError;

pub const MAGIC: u32 = 0xE9BE_B4D9;
const COMMAND_LEN: usize = 12;
pub const MAX_PAYLOAD_SIZE: usize = 1_600_003;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub magic: u32,
    pub command: [u8; COMMAND_LEN],
    pub length: u32,
    pub checksum: [u8; 4],
}

impl FrameHeader {
    pub fn command_str(&self) -> &str {
        let end = self.command.iter().position(|&b| b == 0).unwrap_or(COMMAND_LEN);
        std::str::from_utf8(&self.command[..end]).unwrap_or("")
    }
}

fn command_bytes(command: &str) -> Result<[u8; COMMAND_LEN], BmError> {
    let bytes = command.as_bytes();
    if bytes.len() > COMMAND_LEN {
        return Err(BmError::ProtocolViolation(format!(
            "command '{command}' exceeds {COMMAND_LEN} bytes"
        )));
    }
    let mut out = [0u8; COMMAND_LEN];
    out[..bytes.len()].copy_from_slice(bytes);
    Ok(out)
}

fn checksum(crypto: &dyn Cryptography, payload: &[u8]) -> [u8; 4] {
    let digest = crypto.sha512(payload);
    let mut out = [0u8; 4];
    out.copy_from_slice(&digest[..4]);
    out
}

/// A complete frame ready to write to (or just read from) the wire.
#[derive(Debug, Clone)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn build(crypto: &dyn Cryptography, command: &str, payload: Vec<u8>) -> Result<Self, BmError> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(BmError::Oversize);
        }
        let header = FrameHeader {
            magic: MAGIC,
            command: command_bytes(command)?,
            length: payload.len() as u32,
            checksum: checksum(crypto, &payload),
        };
        Ok(Self { header, payload })
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_u32_be(self.header.magic);
        w.write_bytes(&self.header.command);
        w.write_u32_be(self.header.length);
        w.write_bytes(&self.header.checksum);
        w.write_bytes(&self.payload);
        w.into_bytes()
    }

    /// Decodes a complete frame from a byte slice already known to hold
    /// at least one frame. Real I/O uses [`read_header`]/a length-prefixed
    /// read instead of buffering an unbounded slice.
    pub fn decode(bytes: &[u8]) -> Result<Self, BmError> {
        let mut r = ByteReader::new(bytes);
        let header = read_header(&mut r)?;
        if header.length as usize > MAX_PAYLOAD_SIZE {
            return Err(BmError::Oversize);
        }
        let payload = r.read_bytes(header.length as usize)?.to_vec();
        Ok(Self { header, payload })
    }

    pub fn verify_checksum(&self, crypto: &dyn Cryptography) -> bool {
        checksum(crypto, &self.payload) == self.header.checksum
    }
}

/// Reads just the fixed-size header, the shape a real stream reader uses
/// to learn how many more bytes to buffer before the payload is complete.
pub fn read_header(r: &mut ByteReader) -> Result<FrameHeader, BmError> {
    let magic = r.read_u32_be()?;
    if magic != MAGIC {
        return Err(BmError::ProtocolViolation(format!(
            "bad magic: {magic:#010x}"
        )));
    }
    let command: [u8; COMMAND_LEN] = r.read_bytes(COMMAND_LEN)?.try_into().unwrap();
    let length = r.read_u32_be()?;
    let checksum: [u8; 4] = r.read_bytes(4)?.try_into().unwrap();
    Ok(FrameHeader {
        magic,
        command,
        length,
        checksum,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::native::NativeCryptography;

    #[test]
    fn s3_frame_roundtrip_is_byte_identical() {
        let crypto = NativeCryptography::new();
        let frame = Frame::build(&crypto, "version", b"hello".to_vec()).unwrap();
        let bytes = frame.encode();
        let decoded = Frame::decode(&bytes).unwrap();
        assert_eq!(decoded.encode(), bytes);
        assert_eq!(decoded.header.command_str(), "version");
        assert!(decoded.verify_checksum(&crypto));
    }

    #[test]
    fn oversize_payload_is_rejected_at_build() {
        let crypto = NativeCryptography::new();
        let huge = vec![0u8; MAX_PAYLOAD_SIZE + 1];
        assert!(matches!(
            Frame::build(&crypto, "object", huge),
            Err(BmError::Oversize)
        ));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = vec![0u8; 20];
        bytes[3] = 0x01; // corrupt the magic
        assert!(matches!(
            Frame::decode(&bytes),
            Err(BmError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn command_over_12_bytes_is_rejected() {
        let crypto = NativeCryptography::new();
        assert!(Frame::build(&crypto, "way-too-long-command", vec![]).is_err());
    }
}
