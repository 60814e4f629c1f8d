//! Object envelope: `nonce || expiresTime || objectType || version ||
//! stream || payload`, and the inventory vector derived from it (spec §3,
//! §4.1-4.4). Replaces the teacher's `Hash` newtype (`network/protocol.rs`)
//! with a Bitmessage-specific 32-byte content address.

use crate::codec::{ByteReader, ByteWriter};
use crate::crypto::Cryptography;
use crate::error::BmError;
use crate::object::payload::ObjectPayload;

/// First 32 bytes of `doubleSha512(object_bytes)` — the content address
/// used everywhere an object is referenced without sending its full body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InventoryVector(pub [u8; 32]);

impl InventoryVector {
    pub fn from_object_bytes(crypto: &dyn Cryptography, object_bytes: &[u8]) -> Self {
        let digest = crypto.double_sha512(object_bytes);
        let mut iv = [0u8; 32];
        iv.copy_from_slice(&digest[..32]);
        InventoryVector(iv)
    }
}

impl std::fmt::Display for InventoryVector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    GetPubkey,
    Pubkey,
    Msg,
    Broadcast,
}

impl ObjectType {
    pub fn to_u32(self) -> u32 {
        match self {
            ObjectType::GetPubkey => 0,
            ObjectType::Pubkey => 1,
            ObjectType::Msg => 2,
            ObjectType::Broadcast => 3,
        }
    }

    pub fn from_u32(v: u32) -> Result<Self, BmError> {
        match v {
            0 => Ok(ObjectType::GetPubkey),
            1 => Ok(ObjectType::Pubkey),
            2 => Ok(ObjectType::Msg),
            3 => Ok(ObjectType::Broadcast),
            other => Err(BmError::Parse(format!("unknown object type {other}"))),
        }
    }

    /// Maximum time-to-live this object type may request, per spec §3.
    pub fn max_ttl_secs(self) -> u64 {
        match self {
            ObjectType::Pubkey => 28 * 24 * 3600,
            ObjectType::Msg => (2.5 * 24.0 * 3600.0) as u64,
            ObjectType::Broadcast => 2 * 24 * 3600,
            ObjectType::GetPubkey => 2 * 24 * 3600,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectHeader {
    pub nonce: u64,
    pub expires_time: u64,
    pub object_type: ObjectType,
    pub version: u64,
    pub stream: u64,
}

#[derive(Debug, Clone)]
pub struct Object {
    pub header: ObjectHeader,
    pub payload: ObjectPayload,
}

impl Object {
    /// Serializes everything except the nonce: `expiresTime || objectType
    /// || version || stream || payload`. This is the body whose SHA-512
    /// forms the proof-of-work `initialHash`.
    pub fn encode_without_nonce(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_u64_be(self.header.expires_time);
        w.write_u32_be(self.header.object_type.to_u32());
        w.write_var_int(self.header.version);
        w.write_var_int(self.header.stream);
        let header_bytes = w.into_bytes();

        let mut out = header_bytes;
        out.extend_from_slice(&self.payload.encode());
        out
    }

    /// The 32-byte proof-of-work initial hash for this object, per spec
    /// §4.2: a truncated SHA-512 of the envelope and payload minus the
    /// nonce.
    pub fn initial_hash(&self, crypto: &dyn Cryptography) -> [u8; 32] {
        let digest = crypto.sha512(&self.encode_without_nonce());
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest[..32]);
        out
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_u64_be(self.header.nonce);
        let mut out = w.into_bytes();
        out.extend_from_slice(&self.encode_without_nonce());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BmError> {
        let mut r = ByteReader::new(bytes);
        let nonce = r.read_u64_be()?;
        let expires_time = r.read_u64_be()?;
        let object_type = ObjectType::from_u32(r.read_u32_be()?)?;
        let version = r.read_var_int()?;
        let stream = r.read_var_int()?;
        let payload = ObjectPayload::decode(&mut r, object_type, version)?;

        Ok(Object {
            header: ObjectHeader {
                nonce,
                expires_time,
                object_type,
                version,
                stream,
            },
            payload,
        })
    }

    pub fn inventory_vector(&self, crypto: &dyn Cryptography) -> InventoryVector {
        InventoryVector::from_object_bytes(crypto, &self.encode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::native::NativeCryptography;
    use crate::object::payload::ObjectPayload;

    fn sample_object(nonce: u64) -> Object {
        Object {
            header: ObjectHeader {
                nonce,
                expires_time: 1_700_000_000,
                object_type: ObjectType::GetPubkey,
                version: 3,
                stream: 1,
            },
            payload: ObjectPayload::GetPubkey {
                ripe: Some([0x11; 20]),
                tag: None,
            },
        }
    }

    #[test]
    fn encode_decode_roundtrip() {
        let obj = sample_object(42);
        let bytes = obj.encode();
        let decoded = Object::decode(&bytes).unwrap();
        assert_eq!(decoded.header, obj.header);
        assert_eq!(decoded.encode(), bytes);
    }

    #[test]
    fn iv_is_truncated_double_sha512() {
        let crypto = NativeCryptography::new();
        let obj = sample_object(7);
        let bytes = obj.encode();
        let expected = crypto.double_sha512(&bytes);
        let iv = obj.inventory_vector(&crypto);
        assert_eq!(&iv.0[..], &expected[..32]);
    }

    #[test]
    fn changing_nonce_changes_iv_but_not_initial_hash() {
        let crypto = NativeCryptography::new();
        let a = sample_object(1);
        let b = sample_object(2);
        assert_eq!(a.initial_hash(&crypto), b.initial_hash(&crypto));
        assert_ne!(a.inventory_vector(&crypto), b.inventory_vector(&crypto));
    }
}
