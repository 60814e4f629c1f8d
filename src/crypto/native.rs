//! Concrete [`Cryptography`] implementation: SHA-512/RIPEMD-160/HMAC-SHA256
//! hashing, secp256k1 signing and ECDH, and AES-256-CBC, the way the
//! teacher's `crypto::signatures` wires up `ed25519-dalek` — swapped here
//! for the secp256k1 curve the Bitmessage wire protocol actually uses.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use libsecp256k1::{Message, PublicKey, SecretKey, Signature};
use rand::RngCore;
use ripemd::Ripemd160;
use sha2::{Digest, Sha256, Sha512};

use super::{Cryptography, PrivateKeyBytes, PublicKeyBytes};
use crate::error::BmError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

#[derive(Debug, Default, Clone, Copy)]
pub struct NativeCryptography;

impl NativeCryptography {
    pub fn new() -> Self {
        Self
    }
}

impl Cryptography for NativeCryptography {
    fn sha512(&self, data: &[u8]) -> [u8; 64] {
        let mut hasher = Sha512::new();
        hasher.update(data);
        hasher.finalize().into()
    }

    fn ripemd160(&self, data: &[u8]) -> [u8; 20] {
        let mut hasher = Ripemd160::new();
        hasher.update(data);
        hasher.finalize().into()
    }

    fn hmac_sha256(&self, key: &[u8], data: &[u8]) -> [u8; 32] {
        let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC accepts any key length");
        mac.update(data);
        mac.finalize().into_bytes().into()
    }

    fn random_bytes(&self, n: usize) -> Vec<u8> {
        let mut out = vec![0u8; n];
        rand::thread_rng().fill_bytes(&mut out);
        out
    }

    fn random_nonce(&self) -> u64 {
        rand::thread_rng().next_u64()
    }

    fn create_public_key(&self, private_key: &PrivateKeyBytes) -> Result<PublicKeyBytes, BmError> {
        let secret = SecretKey::parse(private_key)
            .map_err(|e| BmError::ProtocolViolation(format!("invalid private key: {e:?}")))?;
        let public = PublicKey::from_secret_key(&secret);
        Ok(public.serialize())
    }

    fn sign(&self, private_key: &PrivateKeyBytes, data: &[u8]) -> Result<Vec<u8>, BmError> {
        let secret = SecretKey::parse(private_key)
            .map_err(|e| BmError::ProtocolViolation(format!("invalid private key: {e:?}")))?;
        let digest = self.sha512(data);
        let message = Message::parse_slice(&digest[..32])
            .map_err(|e| BmError::ProtocolViolation(format!("invalid message digest: {e:?}")))?;
        let (signature, _recovery_id) = libsecp256k1::sign(&message, &secret);
        Ok(signature.serialize_der().as_ref().to_vec())
    }

    fn verify(&self, public_key: &PublicKeyBytes, signature: &[u8], data: &[u8]) -> bool {
        let Ok(public) = PublicKey::parse(public_key) else {
            return false;
        };
        let Ok(signature) = Signature::parse_der(signature) else {
            return false;
        };
        let digest = self.sha512(data);
        let Ok(message) = Message::parse_slice(&digest[..32]) else {
            return false;
        };
        libsecp256k1::verify(&message, &signature, &public)
    }

    fn ecdh_multiply(
        &self,
        public_key: &PublicKeyBytes,
        private_key: &PrivateKeyBytes,
    ) -> Result<PublicKeyBytes, BmError> {
        let mut public = PublicKey::parse(public_key)
            .map_err(|e| BmError::ProtocolViolation(format!("invalid public key: {e:?}")))?;
        let secret = SecretKey::parse(private_key)
            .map_err(|e| BmError::ProtocolViolation(format!("invalid private key: {e:?}")))?;
        public
            .tweak_mul_assign(&secret)
            .map_err(|e| BmError::ProtocolViolation(format!("ECDH multiply failed: {e:?}")))?;
        Ok(public.serialize())
    }

    fn aes256_cbc_encrypt(&self, key: &[u8; 32], iv: &[u8; 16], plaintext: &[u8]) -> Vec<u8> {
        Aes256CbcEnc::new(key.into(), iv.into()).encrypt_padded_vec_mut::<Pkcs7>(plaintext)
    }

    fn aes256_cbc_decrypt(
        &self,
        key: &[u8; 32],
        iv: &[u8; 16],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, BmError> {
        Aes256CbcDec::new(key.into(), iv.into())
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|_| BmError::DecryptionFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha512_is_64_bytes() {
        let c = NativeCryptography::new();
        assert_eq!(c.sha512(b"test").len(), 64);
    }

    #[test]
    fn double_sha512_hashes_twice() {
        let c = NativeCryptography::new();
        let once = c.sha512(b"test");
        let twice_manual = c.sha512(&once);
        assert_eq!(c.double_sha512(b"test"), twice_manual);
    }

    #[test]
    fn ripemd160_is_20_bytes() {
        let c = NativeCryptography::new();
        assert_eq!(c.ripemd160(b"test").len(), 20);
    }

    #[test]
    fn sign_then_verify_roundtrip() {
        let c = NativeCryptography::new();
        let mut priv_key = [0u8; 32];
        priv_key[31] = 0x01;
        let pub_key = c.create_public_key(&priv_key).unwrap();
        let sig = c.sign(&priv_key, b"hello bitmessage").unwrap();
        assert!(c.verify(&pub_key, &sig, b"hello bitmessage"));
        assert!(!c.verify(&pub_key, &sig, b"tampered"));
    }

    #[test]
    fn ecdh_is_symmetric() {
        let c = NativeCryptography::new();
        let mut a_priv = [0u8; 32];
        a_priv[31] = 0x02;
        let mut b_priv = [0u8; 32];
        b_priv[31] = 0x03;
        let a_pub = c.create_public_key(&a_priv).unwrap();
        let b_pub = c.create_public_key(&b_priv).unwrap();

        let shared_from_a = c.ecdh_multiply(&b_pub, &a_priv).unwrap();
        let shared_from_b = c.ecdh_multiply(&a_pub, &b_priv).unwrap();
        assert_eq!(shared_from_a, shared_from_b);
    }

    #[test]
    fn aes_cbc_roundtrip() {
        let c = NativeCryptography::new();
        let key = [0x11u8; 32];
        let iv = [0x22u8; 16];
        let plaintext = b"a bitmessage plaintext body that spans multiple blocks of 16";
        let ciphertext = c.aes256_cbc_encrypt(&key, &iv, plaintext);
        let decrypted = c.aes256_cbc_decrypt(&key, &iv, &ciphertext).unwrap();
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn aes_cbc_decrypt_with_wrong_key_fails() {
        let c = NativeCryptography::new();
        let key = [0x11u8; 32];
        let wrong_key = [0x99u8; 32];
        let iv = [0x22u8; 16];
        let ciphertext = c.aes256_cbc_encrypt(&key, &iv, b"secret message");
        assert!(c.aes256_cbc_decrypt(&wrong_key, &iv, &ciphertext).is_err());
    }
}
