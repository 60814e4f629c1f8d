//! Cryptography capability: the explicit value passed into constructors
//! in place of the `Singleton.cryptography()` global (design note in
//! spec §9). The core never reaches for a concrete primitive directly —
//! everything goes through this trait, so a host can substitute a
//! hardware-backed or test double implementation.

pub mod native;
pub mod pow;

use crate::error::BmError;

/// An uncompressed secp256k1 public key: a leading `0x04` byte followed by
/// the 64-byte X/Y coordinate pair.
pub type PublicKeyBytes = [u8; 65];
pub type PrivateKeyBytes = [u8; 32];

pub trait Cryptography: Send + Sync {
    fn sha512(&self, data: &[u8]) -> [u8; 64];
    fn double_sha512(&self, data: &[u8]) -> [u8; 64] {
        self.sha512(&self.sha512(data))
    }
    fn ripemd160(&self, data: &[u8]) -> [u8; 20];
    fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> [u8; 32];

    fn random_bytes(&self, n: usize) -> Vec<u8>;
    fn random_nonce(&self) -> u64;

    fn create_public_key(&self, private_key: &PrivateKeyBytes) -> Result<PublicKeyBytes, BmError>;
    fn sign(&self, private_key: &PrivateKeyBytes, data: &[u8]) -> Result<Vec<u8>, BmError>;
    fn verify(&self, public_key: &PublicKeyBytes, signature: &[u8], data: &[u8]) -> bool;

    /// ECDH: scale `public` by `private`, returning the resulting point in
    /// the same uncompressed form.
    fn ecdh_multiply(
        &self,
        public_key: &PublicKeyBytes,
        private_key: &PrivateKeyBytes,
    ) -> Result<PublicKeyBytes, BmError>;

    fn aes256_cbc_encrypt(&self, key: &[u8; 32], iv: &[u8; 16], plaintext: &[u8]) -> Vec<u8>;
    fn aes256_cbc_decrypt(
        &self,
        key: &[u8; 32],
        iv: &[u8; 16],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, BmError>;
}
