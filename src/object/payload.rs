//! Typed object payloads. A tagged enum stands in for the deep
//! `ObjectPayload → Pubkey → V2/V3/V4Pubkey` inheritance chain the original
//! draws (design note in spec §9); each variant carries its own canonical
//! (de)serialization, and the AES/ECDH envelope for v4 pubkeys, msg, and
//! broadcast bodies is built from the [`Cryptography`] capability rather
//! than a concrete primitive.

use crate::codec::{ByteReader, ByteWriter};
use crate::crypto::Cryptography;
use crate::error::BmError;
use crate::object::envelope::ObjectType;

fn read_fixed<'a>(r: &mut ByteReader<'a>, n: usize) -> Result<&'a [u8], BmError> {
    r.read_bytes(n)
}

/// The plaintext body shared by pubkey versions 2 and 3.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubkeyV2Body {
    pub behavior: u32,
    pub signing_key: [u8; 64],
    pub encryption_key: [u8; 64],
}

impl PubkeyV2Body {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_u32_be(self.behavior);
        w.write_bytes(&self.signing_key);
        w.write_bytes(&self.encryption_key);
        w.into_bytes()
    }

    pub fn decode(r: &mut ByteReader) -> Result<Self, BmError> {
        let behavior = r.read_u32_be()?;
        let signing_key = read_fixed(r, 64)?.try_into().unwrap();
        let encryption_key = read_fixed(r, 64)?.try_into().unwrap();
        Ok(Self {
            behavior,
            signing_key,
            encryption_key,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubkeyV3Body {
    pub v2: PubkeyV2Body,
    pub nonce_trials_per_byte: u64,
    pub extra_bytes: u64,
    pub signature: Vec<u8>,
}

impl PubkeyV3Body {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_bytes(&self.v2.encode());
        w.write_var_int(self.nonce_trials_per_byte);
        w.write_var_int(self.extra_bytes);
        w.write_var_bytes(&self.signature);
        w.into_bytes()
    }

    pub fn decode(r: &mut ByteReader) -> Result<Self, BmError> {
        let v2 = PubkeyV2Body::decode(r)?;
        let nonce_trials_per_byte = r.read_var_int()?;
        let extra_bytes = r.read_var_int()?;
        let signature = r.read_var_bytes()?.to_vec();
        Ok(Self {
            v2,
            nonce_trials_per_byte,
            extra_bytes,
            signature,
        })
    }

    /// Data covered by the signature: the object header from `expiresTime`
    /// through `stream`, followed by the v3 body fields preceding the
    /// signature itself (spec §4.4).
    pub fn signed_data(header_bytes: &[u8], v2: &PubkeyV2Body, ntpb: u64, eb: u64) -> Vec<u8> {
        let mut out = header_bytes.to_vec();
        out.extend_from_slice(&v2.encode());
        let mut w = ByteWriter::new();
        w.write_var_int(ntpb);
        w.write_var_int(eb);
        out.extend_from_slice(&w.into_bytes());
        out
    }
}

/// Derives the tag/key pair a v4 pubkey (and a `getpubkey` v4 request) is
/// keyed by: `doubleSha512`/`sha512` of the owning address's
/// version/stream/ripe, the same two-stage derivation
/// `pipeline::broadcast_key_material` uses for broadcasts — letting anyone
/// who already knows the target address compute the tag and, if it's
/// theirs to decrypt, the key, with no ECDH exchange involved.
pub fn derive_pubkey_v4_key_material(
    crypto: &dyn Cryptography,
    address_version: u64,
    stream: u64,
    ripe: &[u8; 20],
) -> ([u8; 32], [u8; 32]) {
    let mut w = ByteWriter::new();
    w.write_var_int(address_version);
    w.write_var_int(stream);
    w.write_bytes(ripe);
    let identity = crypto.double_sha512(&w.into_bytes());
    let tag: [u8; 32] = identity[..32].try_into().unwrap();
    let derived = crypto.sha512(&identity);
    let key: [u8; 32] = derived[..32].try_into().unwrap();
    (tag, key)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubkeyV4Body {
    pub tag: [u8; 32],
    pub encrypted: Vec<u8>,
}

impl PubkeyV4Body {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_bytes(&self.tag);
        w.write_bytes(&self.encrypted);
        w.into_bytes()
    }

    pub fn decode(r: &mut ByteReader) -> Result<Self, BmError> {
        let tag = read_fixed(r, 32)?.try_into().unwrap();
        let encrypted = r.read_bytes(r.remaining())?.to_vec();
        Ok(Self { tag, encrypted })
    }

    /// Encrypts a v3 body under the key derived from the owning address
    /// (`derive_pubkey_v4_key_material`), tagging with the same derivation
    /// so a requester can match it without decrypting every candidate
    /// pubkey. A fresh iv is generated and prepended to the ciphertext.
    pub fn encrypt(
        crypto: &dyn Cryptography,
        address_version: u64,
        stream: u64,
        ripe: &[u8; 20],
        body: &PubkeyV3Body,
    ) -> Self {
        let (tag, key) = derive_pubkey_v4_key_material(crypto, address_version, stream, ripe);
        let iv: [u8; 16] = crypto.random_bytes(16).try_into().unwrap();
        let ciphertext = crypto.aes256_cbc_encrypt(&key, &iv, &body.encode());
        let mut encrypted = Vec::with_capacity(16 + ciphertext.len());
        encrypted.extend_from_slice(&iv);
        encrypted.extend_from_slice(&ciphertext);
        Self { tag, encrypted }
    }

    /// Decrypts against the key derived from `address_version`/`stream`/
    /// `ripe` — the candidate address a requester is trying to resolve.
    pub fn decrypt(
        &self,
        crypto: &dyn Cryptography,
        address_version: u64,
        stream: u64,
        ripe: &[u8; 20],
    ) -> Result<PubkeyV3Body, BmError> {
        if self.encrypted.len() < 16 {
            return Err(BmError::DecryptionFailed);
        }
        let (_, key) = derive_pubkey_v4_key_material(crypto, address_version, stream, ripe);
        let iv: [u8; 16] = self.encrypted[..16].try_into().unwrap();
        let plaintext = crypto.aes256_cbc_decrypt(&key, &iv, &self.encrypted[16..])?;
        let mut r = ByteReader::new(&plaintext);
        PubkeyV3Body::decode(&mut r)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PubkeyVariant {
    V2(PubkeyV2Body),
    V3(PubkeyV3Body),
    V4(PubkeyV4Body),
}

/// The decrypted plaintext body of a `msg` object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MsgBody {
    pub msg_version: u64,
    pub address_version: u64,
    pub stream: u64,
    pub behavior: u32,
    pub signing_key: [u8; 64],
    pub encryption_key: [u8; 64],
    pub nonce_trials_per_byte: Option<u64>,
    pub extra_bytes: Option<u64>,
    pub destination_ripe: [u8; 20],
    pub encoding: u64,
    pub message: Vec<u8>,
    pub ack_data: Vec<u8>,
    pub signature: Vec<u8>,
}

impl MsgBody {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_var_int(self.msg_version);
        w.write_var_int(self.address_version);
        w.write_var_int(self.stream);
        w.write_u32_be(self.behavior);
        w.write_bytes(&self.signing_key);
        w.write_bytes(&self.encryption_key);
        if self.address_version >= 3 {
            w.write_var_int(self.nonce_trials_per_byte.unwrap_or(0));
            w.write_var_int(self.extra_bytes.unwrap_or(0));
        }
        w.write_bytes(&self.destination_ripe);
        w.write_var_int(self.encoding);
        w.write_var_bytes(&self.message);
        w.write_var_bytes(&self.ack_data);
        w.write_var_bytes(&self.signature);
        w.into_bytes()
    }

    pub fn decode(r: &mut ByteReader) -> Result<Self, BmError> {
        let msg_version = r.read_var_int()?;
        let address_version = r.read_var_int()?;
        let stream = r.read_var_int()?;
        let behavior = r.read_u32_be()?;
        let signing_key = read_fixed(r, 64)?.try_into().unwrap();
        let encryption_key = read_fixed(r, 64)?.try_into().unwrap();
        let (nonce_trials_per_byte, extra_bytes) = if address_version >= 3 {
            (Some(r.read_var_int()?), Some(r.read_var_int()?))
        } else {
            (None, None)
        };
        let destination_ripe = read_fixed(r, 20)?.try_into().unwrap();
        let encoding = r.read_var_int()?;
        let message = r.read_var_bytes()?.to_vec();
        let ack_data = r.read_var_bytes()?.to_vec();
        let signature = r.read_var_bytes()?.to_vec();

        Ok(Self {
            msg_version,
            address_version,
            stream,
            behavior,
            signing_key,
            encryption_key,
            nonce_trials_per_byte,
            extra_bytes,
            destination_ripe,
            encoding,
            message,
            ack_data,
            signature,
        })
    }

    /// Everything preceding the signature — the data the signature must
    /// cover, prefixed by the object header bytes from `expiresTime`
    /// through `stream`.
    pub fn signed_data(&self, header_bytes: &[u8]) -> Vec<u8> {
        let mut body = self.clone();
        body.signature.clear();
        let mut encoded = body.encode();
        // `encode` wrote a zero-length var_bytes for the cleared signature;
        // strip that trailing tag byte so the signed region matches the
        // real wire layout (signature is appended only after signing).
        encoded.pop();
        let mut out = header_bytes.to_vec();
        out.extend_from_slice(&encoded);
        out
    }
}

/// The decrypted plaintext body of a `broadcast` object: like a msg body
/// but with no destination (everyone in the stream can attempt decrypt)
/// and no ack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastBody {
    pub broadcast_version: u64,
    pub address_version: u64,
    pub stream: u64,
    pub behavior: u32,
    pub signing_key: [u8; 64],
    pub encryption_key: [u8; 64],
    pub nonce_trials_per_byte: Option<u64>,
    pub extra_bytes: Option<u64>,
    pub encoding: u64,
    pub message: Vec<u8>,
    pub signature: Vec<u8>,
}

impl BroadcastBody {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_var_int(self.broadcast_version);
        w.write_var_int(self.address_version);
        w.write_var_int(self.stream);
        w.write_u32_be(self.behavior);
        w.write_bytes(&self.signing_key);
        w.write_bytes(&self.encryption_key);
        if self.address_version >= 3 {
            w.write_var_int(self.nonce_trials_per_byte.unwrap_or(0));
            w.write_var_int(self.extra_bytes.unwrap_or(0));
        }
        w.write_var_int(self.encoding);
        w.write_var_bytes(&self.message);
        w.write_var_bytes(&self.signature);
        w.into_bytes()
    }

    pub fn decode(r: &mut ByteReader) -> Result<Self, BmError> {
        let broadcast_version = r.read_var_int()?;
        let address_version = r.read_var_int()?;
        let stream = r.read_var_int()?;
        let behavior = r.read_u32_be()?;
        let signing_key = read_fixed(r, 64)?.try_into().unwrap();
        let encryption_key = read_fixed(r, 64)?.try_into().unwrap();
        let (nonce_trials_per_byte, extra_bytes) = if address_version >= 3 {
            (Some(r.read_var_int()?), Some(r.read_var_int()?))
        } else {
            (None, None)
        };
        let encoding = r.read_var_int()?;
        let message = r.read_var_bytes()?.to_vec();
        let signature = r.read_var_bytes()?.to_vec();

        Ok(Self {
            broadcast_version,
            address_version,
            stream,
            behavior,
            signing_key,
            encryption_key,
            nonce_trials_per_byte,
            extra_bytes,
            encoding,
            message,
            signature,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectPayload {
    GetPubkey {
        ripe: Option<[u8; 20]>,
        tag: Option<[u8; 32]>,
    },
    Pubkey(PubkeyVariant),
    Msg {
        encrypted: Vec<u8>,
    },
    Broadcast {
        tag: Option<[u8; 32]>,
        encrypted: Vec<u8>,
    },
}

impl ObjectPayload {
    pub fn kind(&self) -> ObjectType {
        match self {
            ObjectPayload::GetPubkey { .. } => ObjectType::GetPubkey,
            ObjectPayload::Pubkey(_) => ObjectType::Pubkey,
            ObjectPayload::Msg { .. } => ObjectType::Msg,
            ObjectPayload::Broadcast { .. } => ObjectType::Broadcast,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            ObjectPayload::GetPubkey { ripe, tag } => {
                let mut w = ByteWriter::new();
                if let Some(ripe) = ripe {
                    w.write_bytes(ripe);
                } else if let Some(tag) = tag {
                    w.write_bytes(tag);
                }
                w.into_bytes()
            }
            ObjectPayload::Pubkey(variant) => match variant {
                PubkeyVariant::V2(b) => b.encode(),
                PubkeyVariant::V3(b) => b.encode(),
                PubkeyVariant::V4(b) => b.encode(),
            },
            ObjectPayload::Msg { encrypted } => encrypted.clone(),
            ObjectPayload::Broadcast { tag, encrypted } => {
                let mut w = ByteWriter::new();
                if let Some(tag) = tag {
                    w.write_bytes(tag);
                }
                w.write_bytes(encrypted);
                w.into_bytes()
            }
        }
    }

    pub fn decode(
        r: &mut ByteReader,
        object_type: ObjectType,
        version: u64,
    ) -> Result<Self, BmError> {
        match object_type {
            ObjectType::GetPubkey => {
                if version >= 4 {
                    let tag = read_fixed(r, 32)?.try_into().unwrap();
                    Ok(ObjectPayload::GetPubkey {
                        ripe: None,
                        tag: Some(tag),
                    })
                } else {
                    let ripe = read_fixed(r, 20)?.try_into().unwrap();
                    Ok(ObjectPayload::GetPubkey {
                        ripe: Some(ripe),
                        tag: None,
                    })
                }
            }
            ObjectType::Pubkey => match version {
                2 => Ok(ObjectPayload::Pubkey(PubkeyVariant::V2(
                    PubkeyV2Body::decode(r)?,
                ))),
                3 => Ok(ObjectPayload::Pubkey(PubkeyVariant::V3(
                    PubkeyV3Body::decode(r)?,
                ))),
                4 => Ok(ObjectPayload::Pubkey(PubkeyVariant::V4(
                    PubkeyV4Body::decode(r)?,
                ))),
                other => Err(BmError::Parse(format!("unsupported pubkey version {other}"))),
            },
            ObjectType::Msg => {
                let encrypted = r.read_bytes(r.remaining())?.to_vec();
                Ok(ObjectPayload::Msg { encrypted })
            }
            ObjectType::Broadcast => {
                let tag = if version >= 5 {
                    Some(read_fixed(r, 32)?.try_into().unwrap())
                } else {
                    None
                };
                let encrypted = r.read_bytes(r.remaining())?.to_vec();
                Ok(ObjectPayload::Broadcast { tag, encrypted })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::native::NativeCryptography;

    #[test]
    fn get_pubkey_v3_roundtrips_with_ripe() {
        let payload = ObjectPayload::GetPubkey {
            ripe: Some([0x05; 20]),
            tag: None,
        };
        let bytes = payload.encode();
        let mut r = ByteReader::new(&bytes);
        let decoded = ObjectPayload::decode(&mut r, ObjectType::GetPubkey, 3).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn get_pubkey_v4_roundtrips_with_tag() {
        let payload = ObjectPayload::GetPubkey {
            ripe: None,
            tag: Some([0x09; 32]),
        };
        let bytes = payload.encode();
        let mut r = ByteReader::new(&bytes);
        let decoded = ObjectPayload::decode(&mut r, ObjectType::GetPubkey, 4).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn pubkey_v3_roundtrips() {
        let body = PubkeyV3Body {
            v2: PubkeyV2Body {
                behavior: 3,
                signing_key: [0x01; 64],
                encryption_key: [0x02; 64],
            },
            nonce_trials_per_byte: 1000,
            extra_bytes: 1000,
            signature: vec![0xAA, 0xBB, 0xCC],
        };
        let payload = ObjectPayload::Pubkey(PubkeyVariant::V3(body.clone()));
        let bytes = payload.encode();
        let mut r = ByteReader::new(&bytes);
        let decoded = ObjectPayload::decode(&mut r, ObjectType::Pubkey, 3).unwrap();
        assert_eq!(decoded, ObjectPayload::Pubkey(PubkeyVariant::V3(body)));
    }

    #[test]
    fn pubkey_v4_encrypt_decrypt_roundtrip() {
        let crypto = NativeCryptography::new();
        let ripe = [0x07u8; 20];
        let body = PubkeyV3Body {
            v2: PubkeyV2Body {
                behavior: 0,
                signing_key: [0x05; 64],
                encryption_key: [0x06; 64],
            },
            nonce_trials_per_byte: 1000,
            extra_bytes: 1000,
            signature: vec![0x01, 0x02],
        };
        let encrypted = PubkeyV4Body::encrypt(&crypto, 4, 1, &ripe, &body);
        let (expected_tag, _) = derive_pubkey_v4_key_material(&crypto, 4, 1, &ripe);
        assert_eq!(encrypted.tag, expected_tag);
        let decrypted = encrypted.decrypt(&crypto, 4, 1, &ripe).unwrap();
        assert_eq!(decrypted, body);
    }

    #[test]
    fn pubkey_v4_decrypt_fails_for_wrong_address() {
        let crypto = NativeCryptography::new();
        let body = PubkeyV3Body {
            v2: PubkeyV2Body {
                behavior: 0,
                signing_key: [0x05; 64],
                encryption_key: [0x06; 64],
            },
            nonce_trials_per_byte: 1000,
            extra_bytes: 1000,
            signature: vec![0x01, 0x02],
        };
        let encrypted = PubkeyV4Body::encrypt(&crypto, 4, 1, &[0x07; 20], &body);
        assert!(encrypted.decrypt(&crypto, 4, 1, &[0x09; 20]).is_err());
    }

    #[test]
    fn msg_body_roundtrips() {
        let body = MsgBody {
            msg_version: 1,
            address_version: 4,
            stream: 1,
            behavior: 0,
            signing_key: [0x10; 64],
            encryption_key: [0x11; 64],
            nonce_trials_per_byte: Some(1000),
            extra_bytes: Some(1000),
            destination_ripe: [0x20; 20],
            encoding: 2,
            message: b"hello".to_vec(),
            ack_data: vec![0u8; 32],
            signature: vec![0xDE, 0xAD],
        };
        let bytes = body.encode();
        let mut r = ByteReader::new(&bytes);
        let decoded = MsgBody::decode(&mut r).unwrap();
        assert_eq!(decoded, body);
    }

    #[test]
    fn broadcast_body_roundtrips() {
        let body = BroadcastBody {
            broadcast_version: 5,
            address_version: 4,
            stream: 1,
            behavior: 0,
            signing_key: [0x30; 64],
            encryption_key: [0x31; 64],
            nonce_trials_per_byte: Some(1000),
            extra_bytes: Some(1000),
            encoding: 2,
            message: b"broadcast hello".to_vec(),
            signature: vec![0x01],
        };
        let bytes = body.encode();
        let mut r = ByteReader::new(&bytes);
        let decoded = BroadcastBody::decode(&mut r).unwrap();
        assert_eq!(decoded, body);
    }
}
