//! Cryptographic identity: address derivation and private/public key
//! generation. Grounded in the teacher's `crypto::signatures` module for
//! the shape of key material, generalized to Bitmessage's two-keypair
//! identity and its deterministic nonce-pair search.

pub mod address;
pub mod keys;

pub use address::BitmessageAddress;
pub use keys::{BehaviorBitfield, Pubkey, PrivateKey, DOES_ACK, INCLUDE_DESTINATION};
