//! Textual Bitmessage addresses: `BM-` + Base58(varint(version) ||
//! varint(stream) || ripe[stripped] || checksum4), per spec §3/§6.

use crate::codec::{ByteReader, ByteWriter};
use crate::crypto::Cryptography;
use crate::error::BmError;

const ADDRESS_PREFIX: &str = "BM-";
const RIPE_LEN: usize = 20;
const CHECKSUM_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BitmessageAddress {
    pub version: u64,
    pub stream: u64,
    pub ripe: [u8; RIPE_LEN],
}

impl BitmessageAddress {
    pub fn new(version: u64, stream: u64, ripe: [u8; RIPE_LEN]) -> Self {
        Self {
            version,
            stream,
            ripe,
        }
    }

    /// Strips leading zero bytes from `ripe`, the way a real address does
    /// to keep short hashes compact — at least one byte always survives.
    fn stripped_ripe(&self) -> &[u8] {
        let first_nonzero = self.ripe.iter().position(|&b| b != 0).unwrap_or(RIPE_LEN - 1);
        &self.ripe[first_nonzero..]
    }

    fn checksum(crypto: &dyn Cryptography, data: &[u8]) -> [u8; CHECKSUM_LEN] {
        let digest = crypto.double_sha512(data);
        let mut out = [0u8; CHECKSUM_LEN];
        out.copy_from_slice(&digest[..CHECKSUM_LEN]);
        out
    }

    pub fn format(&self, crypto: &dyn Cryptography) -> String {
        let mut w = ByteWriter::new();
        w.write_var_int(self.version);
        w.write_var_int(self.stream);
        w.write_bytes(self.stripped_ripe());
        let data = w.into_bytes();

        let checksum = Self::checksum(crypto, &data);
        let mut payload = data;
        payload.extend_from_slice(&checksum);

        format!("{ADDRESS_PREFIX}{}", bs58::encode(payload).into_string())
    }

    pub fn parse(crypto: &dyn Cryptography, text: &str) -> Result<Self, BmError> {
        let body = text
            .strip_prefix(ADDRESS_PREFIX)
            .ok_or_else(|| BmError::Parse("address missing BM- prefix".into()))?;

        let payload = bs58::decode(body)
            .into_vec()
            .map_err(|e| BmError::Parse(format!("invalid base58: {e}")))?;

        if payload.len() < CHECKSUM_LEN {
            return Err(BmError::Parse("address payload too short".into()));
        }
        let (data, checksum) = payload.split_at(payload.len() - CHECKSUM_LEN);
        let expected = Self::checksum(crypto, data);
        if checksum != expected {
            return Err(BmError::ChecksumMismatch);
        }

        let mut reader = ByteReader::new(data);
        let version = reader.read_var_int()?;
        let stream = reader.read_var_int()?;
        let stripped = reader.read_bytes(reader.remaining())?;
        if stripped.len() > RIPE_LEN {
            return Err(BmError::Parse("ripe hash too long".into()));
        }

        let mut ripe = [0u8; RIPE_LEN];
        ripe[RIPE_LEN - stripped.len()..].copy_from_slice(stripped);

        Ok(Self {
            version,
            stream,
            ripe,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::native::NativeCryptography;

    #[test]
    fn format_then_parse_roundtrips() {
        let crypto = NativeCryptography::new();
        let mut ripe = [0u8; RIPE_LEN];
        ripe[0] = 0;
        ripe[1] = 7;
        ripe[19] = 0xAB;
        let addr = BitmessageAddress::new(4, 1, ripe);

        let text = addr.format(&crypto);
        assert!(text.starts_with("BM-"));

        let parsed = BitmessageAddress::parse(&crypto, &text).unwrap();
        assert_eq!(parsed, addr);
    }

    #[test]
    fn corrupted_checksum_is_detected() {
        let crypto = NativeCryptography::new();
        let addr = BitmessageAddress::new(4, 1, [0x42; RIPE_LEN]);
        let mut text = addr.format(&crypto);
        // Flip the last character, which falls within the base58 checksum tail.
        let last = text.pop().unwrap();
        let replacement = if last == 'a' { 'b' } else { 'a' };
        text.push(replacement);

        let result = BitmessageAddress::parse(&crypto, &text);
        assert!(matches!(
            result,
            Err(BmError::ChecksumMismatch) | Err(BmError::Parse(_))
        ));
    }

    #[test]
    fn missing_prefix_is_rejected() {
        let crypto = NativeCryptography::new();
        assert!(BitmessageAddress::parse(&crypto, "not-an-address").is_err());
    }
}
