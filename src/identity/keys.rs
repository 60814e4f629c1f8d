//! Private/public key material and the deterministic nonce-pair key search
//! (spec §3 "PrivateKey", §8 invariants 4/5). Bit layout for the behavior
//! bitfield is counted from the MSB, per spec §3: bit 30 = destination
//! inclusion, bit 31 = ack request — the two lowest-order bits of a
//! normal `u32`.

use crate::codec::ByteWriter;
use crate::crypto::{Cryptography, PrivateKeyBytes};
use crate::error::BmError;
use crate::identity::address::BitmessageAddress;

/// Bit 31 counted from the MSB: request an acknowledgement.
pub const DOES_ACK: u32 = 1 << 0;
/// Bit 30 counted from the MSB: include the destination address ripe.
pub const INCLUDE_DESTINATION: u32 = 1 << 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BehaviorBitfield(pub u32);

impl BehaviorBitfield {
    pub fn new() -> Self {
        Self(0)
    }

    pub fn with(mut self, flag: u32) -> Self {
        self.0 |= flag;
        self
    }

    pub fn has(&self, flag: u32) -> bool {
        self.0 & flag == flag
    }

    pub fn does_ack(&self) -> bool {
        self.has(DOES_ACK)
    }

    pub fn include_destination(&self) -> bool {
        self.has(INCLUDE_DESTINATION)
    }
}

/// Signing + encryption public key pair, with version-dependent fields
/// present from v3 onward. Signing/encryption keys are stored as the
/// 64-byte X/Y coordinate pairs (the leading `0x04` uncompressed-point tag
/// is not part of the wire representation, per spec §4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pubkey {
    pub version: u64,
    pub stream: u64,
    pub behavior: BehaviorBitfield,
    pub signing_key: [u8; 64],
    pub encryption_key: [u8; 64],
    pub nonce_trials_per_byte: Option<u64>,
    pub extra_bytes: Option<u64>,
}

fn strip_uncompressed_tag(pub65: &[u8; 65]) -> [u8; 64] {
    let mut out = [0u8; 64];
    out.copy_from_slice(&pub65[1..]);
    out
}

pub fn unstrip_uncompressed_tag(pub64: &[u8; 64]) -> [u8; 65] {
    let mut out = [0u8; 65];
    out[0] = 0x04;
    out[1..].copy_from_slice(pub64);
    out
}

/// A generated identity: two secp256k1 keypairs plus the derived Pubkey
/// and address.
#[derive(Clone)]
pub struct PrivateKey {
    pub signing_key: PrivateKeyBytes,
    pub encryption_key: PrivateKeyBytes,
    pub pubkey: Pubkey,
    pub address: BitmessageAddress,
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrivateKey")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl Drop for PrivateKey {
    fn drop(&mut self) {
        use zeroize::Zeroize;
        self.signing_key.zeroize();
        self.encryption_key.zeroize();
    }
}

/// One search round of the nonce-pair key derivation: `(sNonce, eNonce) =
/// (n, n+1)`.
struct Candidate {
    signing_key: PrivateKeyBytes,
    encryption_key: PrivateKeyBytes,
    pubkey_signing: [u8; 64],
    pubkey_encryption: [u8; 64],
    ripe: [u8; 20],
}

fn trunc32(digest: &[u8; 64]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest[..32]);
    out
}

fn try_nonce_pair(
    crypto: &dyn Cryptography,
    seed: &[u8],
    s_nonce: u64,
    e_nonce: u64,
) -> Result<Candidate, BmError> {
    let mut signing_input = seed.to_vec();
    let mut w = ByteWriter::new();
    w.write_var_int(s_nonce);
    signing_input.extend_from_slice(&w.into_bytes());
    let signing_key = trunc32(&crypto.sha512(&signing_input));

    let mut encryption_input = seed.to_vec();
    let mut w = ByteWriter::new();
    w.write_var_int(e_nonce);
    encryption_input.extend_from_slice(&w.into_bytes());
    let encryption_key = trunc32(&crypto.sha512(&encryption_input));

    let pubkey_signing = strip_uncompressed_tag(&crypto.create_public_key(&signing_key)?);
    let pubkey_encryption = strip_uncompressed_tag(&crypto.create_public_key(&encryption_key)?);

    let mut concat = Vec::with_capacity(128);
    concat.extend_from_slice(&pubkey_signing);
    concat.extend_from_slice(&pubkey_encryption);
    let ripe = crypto.ripemd160(&crypto.sha512(&concat));

    Ok(Candidate {
        signing_key,
        encryption_key,
        pubkey_signing,
        pubkey_encryption,
        ripe,
    })
}

fn accepts(ripe: &[u8; 20], shorter: bool) -> bool {
    if ripe[0] != 0 {
        return false;
    }
    if shorter && ripe[1] != 0 {
        return false;
    }
    true
}

impl PrivateKey {
    /// Searches nonce pairs starting at `start_nonce`, returning the
    /// accepted key and the nonce to resume the search from (one past the
    /// accepted pair) — the "nonce cursor advances across successful
    /// acceptances" behavior in spec §4.3.
    fn derive_one(
        crypto: &dyn Cryptography,
        seed: &[u8],
        start_nonce: u64,
        version: u64,
        stream: u64,
        shorter: bool,
        behavior: BehaviorBitfield,
        ntpb: Option<u64>,
        eb: Option<u64>,
    ) -> Result<(Self, u64), BmError> {
        let mut n = start_nonce;
        loop {
            let candidate = try_nonce_pair(crypto, seed, n, n + 1)?;
            if accepts(&candidate.ripe, shorter) {
                let pubkey = Pubkey {
                    version,
                    stream,
                    behavior,
                    signing_key: candidate.pubkey_signing,
                    encryption_key: candidate.pubkey_encryption,
                    nonce_trials_per_byte: ntpb,
                    extra_bytes: eb,
                };
                let address = BitmessageAddress::new(version, stream, candidate.ripe);
                let key = PrivateKey {
                    signing_key: candidate.signing_key,
                    encryption_key: candidate.encryption_key,
                    pubkey,
                    address,
                };
                return Ok((key, n + 2));
            }
            n += 2;
        }
    }

    /// Generates a fresh random identity (spec §8 invariant 4).
    #[allow(clippy::too_many_arguments)]
    pub fn generate_random(
        crypto: &dyn Cryptography,
        version: u64,
        stream: u64,
        shorter: bool,
        behavior: BehaviorBitfield,
        ntpb: Option<u64>,
        eb: Option<u64>,
    ) -> Result<Self, BmError> {
        let seed = crypto.random_bytes(1024);
        let (key, _next_nonce) =
            Self::derive_one(crypto, &seed, 0, version, stream, shorter, behavior, ntpb, eb)?;
        Ok(key)
    }

    /// Deterministically derives `count` identities from `passphrase`,
    /// pure in its arguments (spec §8 invariant 5): the nonce cursor
    /// starts at zero and advances past each accepted key.
    #[allow(clippy::too_many_arguments)]
    pub fn generate_deterministic(
        crypto: &dyn Cryptography,
        passphrase: &[u8],
        count: usize,
        version: u64,
        stream: u64,
        shorter: bool,
        behavior: BehaviorBitfield,
        ntpb: Option<u64>,
        eb: Option<u64>,
    ) -> Result<Vec<Self>, BmError> {
        let mut keys = Vec::with_capacity(count);
        let mut nonce = 0u64;
        for _ in 0..count {
            let (key, next_nonce) = Self::derive_one(
                crypto, passphrase, nonce, version, stream, shorter, behavior, ntpb, eb,
            )?;
            nonce = next_nonce;
            keys.push(key);
        }
        Ok(keys)
    }

    pub fn public_signing_point(&self) -> [u8; 65] {
        unstrip_uncompressed_tag(&self.pubkey.signing_key)
    }

    pub fn public_encryption_point(&self) -> [u8; 65] {
        unstrip_uncompressed_tag(&self.pubkey.encryption_key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::native::NativeCryptography;

    #[test]
    fn s1_address_derivation_from_passphrase() {
        let crypto = NativeCryptography::new();
        let keys = PrivateKey::generate_deterministic(
            &crypto,
            b"test",
            1,
            4,
            1,
            false,
            BehaviorBitfield::new(),
            Some(1000),
            Some(1000),
        )
        .unwrap();

        assert_eq!(keys.len(), 1);
        let key = &keys[0];
        assert_eq!(key.address.ripe[0], 0);
        let text = key.address.format(&crypto);
        assert!(text.starts_with("BM-"));
    }

    #[test]
    fn deterministic_generation_is_pure() {
        let crypto = NativeCryptography::new();
        let first = PrivateKey::generate_deterministic(
            &crypto,
            b"reusable passphrase",
            3,
            4,
            1,
            false,
            BehaviorBitfield::new(),
            Some(1000),
            Some(1000),
        )
        .unwrap();
        let second = PrivateKey::generate_deterministic(
            &crypto,
            b"reusable passphrase",
            3,
            4,
            1,
            false,
            BehaviorBitfield::new(),
            Some(1000),
            Some(1000),
        )
        .unwrap();

        assert_eq!(first.len(), second.len());
        for (a, b) in first.iter().zip(second.iter()) {
            assert_eq!(a.signing_key, b.signing_key);
            assert_eq!(a.encryption_key, b.encryption_key);
            assert_eq!(a.address, b.address);
        }
    }

    #[test]
    fn shorter_address_requires_two_zero_bytes() {
        let crypto = NativeCryptography::new();
        let keys = PrivateKey::generate_deterministic(
            &crypto,
            b"shorter-address-test",
            1,
            4,
            1,
            true,
            BehaviorBitfield::new(),
            Some(1000),
            Some(1000),
        )
        .unwrap();
        assert_eq!(keys[0].address.ripe[0], 0);
        assert_eq!(keys[0].address.ripe[1], 0);
    }

    #[test]
    fn generated_public_keys_match_private_keys() {
        let crypto = NativeCryptography::new();
        let key = PrivateKey::generate_random(
            &crypto,
            4,
            1,
            false,
            BehaviorBitfield::new(),
            Some(1000),
            Some(1000),
        )
        .unwrap();

        assert_eq!(
            crypto.create_public_key(&key.signing_key).unwrap(),
            key.public_signing_point()
        );
        assert_eq!(
            crypto.create_public_key(&key.encryption_key).unwrap(),
            key.public_encryption_point()
        );
    }

    #[test]
    fn behavior_bitfield_roundtrips_feature_subsets() {
        let subsets = [
            0u32,
            DOES_ACK,
            INCLUDE_DESTINATION,
            DOES_ACK | INCLUDE_DESTINATION,
        ];
        for &s in &subsets {
            let bf = BehaviorBitfield(s);
            assert_eq!(bf.does_ack(), s & DOES_ACK == DOES_ACK);
            assert_eq!(
                bf.include_destination(),
                s & INCLUDE_DESTINATION == INCLUDE_DESTINATION
            );
        }
    }
}
