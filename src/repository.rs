//! Repository interfaces the core consumes but never implements for
//! production use (spec §6) — persistence is an external collaborator.
//! Shaped like the teacher's `UTXOStorage` trait (`database/utxo_set.rs`):
//! a small `Send + Sync` trait object, I/O-bearing methods behind
//! `async_trait` (a teacher dependency otherwise unused in its
//! compiling tree, put to direct use here).

use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::SystemTime;

use crate::error::BmError;
use crate::identity::{BitmessageAddress, Pubkey};
use crate::message::plaintext::{Label, Plaintext};
use crate::object::{InventoryVector, Object};

#[async_trait]
pub trait InventoryRepository: Send + Sync {
    async fn get_inventory(&self, stream: u64) -> Result<Vec<InventoryVector>, BmError>;
    async fn get_missing(
        &self,
        offered: &[InventoryVector],
        ours: &[InventoryVector],
    ) -> Result<Vec<InventoryVector>, BmError>;
    async fn get_object(&self, iv: &InventoryVector) -> Result<Option<Object>, BmError>;
    async fn store_object(&self, iv: InventoryVector, object: Object) -> Result<(), BmError>;
    async fn contains(&self, iv: &InventoryVector) -> Result<bool, BmError>;
    async fn cleanup(&self, now: SystemTime) -> Result<usize, BmError>;
    /// Marks `iv` as rejected or expired so it isn't re-validated before
    /// `until` elapses (spec §4.5 rule 5).
    async fn suppress(&self, iv: InventoryVector, until: SystemTime) -> Result<(), BmError>;
    async fn is_suppressed(&self, iv: &InventoryVector, now: SystemTime) -> Result<bool, BmError>;
}

#[async_trait]
pub trait MessageRepository: Send + Sync {
    async fn save(&self, message: Plaintext) -> Result<(), BmError>;
    async fn remove(&self, id: u64) -> Result<(), BmError>;
    async fn get_message(&self, id: u64) -> Result<Option<Plaintext>, BmError>;
    async fn get_message_by_initial_hash(
        &self,
        initial_hash: &[u8; 32],
    ) -> Result<Option<Plaintext>, BmError>;
    async fn find_messages_to_resend(&self, now: SystemTime) -> Result<Vec<Plaintext>, BmError>;
    async fn get_message_for_ack(&self, ack_data: &[u8]) -> Result<Option<Plaintext>, BmError>;
    async fn save_label(&self, label: Label) -> Result<(), BmError>;
    async fn remove_label(&self, id: u64) -> Result<(), BmError>;
    async fn count_unread(&self, label: u64) -> Result<u64, BmError>;
}

#[async_trait]
pub trait AddressRepository: Send + Sync {
    async fn find(&self, address: &BitmessageAddress) -> Result<Option<BitmessageAddress>, BmError>;
    async fn save(&self, address: BitmessageAddress) -> Result<(), BmError>;
    /// The `Pubkey` last learned for `address`, if the getpubkey/pubkey
    /// exchange has completed at least once (spec §4.9 step 1).
    async fn find_pubkey(&self, address: &BitmessageAddress) -> Result<Option<Pubkey>, BmError>;
    /// Persists a learned or re-announced `Pubkey` against `address`,
    /// upserting over whatever was previously attached.
    async fn attach_pubkey(&self, address: BitmessageAddress, pubkey: Pubkey) -> Result<(), BmError>;
}

#[derive(Debug, Clone)]
pub struct KnownNode {
    pub addr: SocketAddr,
    pub stream: u64,
    pub services: u64,
    pub last_seen: SystemTime,
}

#[async_trait]
pub trait NodeRegistry: Send + Sync {
    async fn known_nodes(&self, stream: u64, limit: usize) -> Result<Vec<KnownNode>, BmError>;
    async fn offer(&self, node: KnownNode) -> Result<(), BmError>;
}

#[derive(Debug, Clone)]
pub struct PowJob {
    pub initial_hash: [u8; 32],
    pub target: u64,
    pub object_ref: InventoryVector,
}

#[async_trait]
pub trait ProofOfWorkRepository: Send + Sync {
    async fn enqueue(&self, job: PowJob) -> Result<(), BmError>;
    async fn next(&self) -> Result<Option<PowJob>, BmError>;
    async fn remove(&self, object_ref: &InventoryVector) -> Result<(), BmError>;
}
