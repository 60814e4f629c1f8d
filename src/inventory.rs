//! Content-addressed object store with TTL-based expiry and per-stream
//! indexing (spec §4.5). `MemoryInventoryRepository` is the in-memory
//! reference implementation, grounded in the teacher's
//! `MemoryUTXOStorage` (`database/utxo_set.rs`): a plain map behind a
//! lock, swapped here for `parking_lot::RwLock` (already a teacher
//! dependency) and a `dashmap` secondary index instead of scanning the
//! whole map per stream. `Inventory` is the acceptance-rule façade in
//! front of any `InventoryRepository`, the same wrapper role the
//! teacher's `UTXOSet` plays in front of `UTXOStorage`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;

use crate::crypto::Cryptography;
use crate::error::BmError;
use crate::object::envelope::ObjectType;
use crate::object::payload::{ObjectPayload, PubkeyVariant};
use crate::object::{InventoryVector, Object};
use crate::repository::InventoryRepository;

const ACCEPT_PAST_SLACK: Duration = Duration::from_secs(5 * 60);
const ACCEPT_FUTURE_SLACK: Duration = Duration::from_secs(3 * 3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOutcome {
    Accepted,
    Duplicate,
    Rejected,
}

/// In-memory `InventoryRepository`: a map of live objects plus a
/// suppression set of IVs recently rejected or pruned, so flood-fill
/// never re-requests them before their original TTL elapses.
#[derive(Default)]
pub struct MemoryInventoryRepository {
    objects: RwLock<HashMap<InventoryVector, (Object, SystemTime)>>,
    by_stream: DashMap<u64, Vec<InventoryVector>>,
    suppressed_until: RwLock<HashMap<InventoryVector, SystemTime>>,
}

impl MemoryInventoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, iv: InventoryVector, object: Object, expires_at: SystemTime) -> bool {
        let mut objects = self.objects.write();
        if objects.contains_key(&iv) {
            return false;
        }
        let stream = object.header.stream;
        objects.insert(iv, (object, expires_at));
        drop(objects);
        self.by_stream.entry(stream).or_default().push(iv);
        true
    }
}

#[async_trait]
impl InventoryRepository for MemoryInventoryRepository {
    async fn get_inventory(&self, stream: u64) -> Result<Vec<InventoryVector>, BmError> {
        Ok(self
            .by_stream
            .get(&stream)
            .map(|entries| entries.clone())
            .unwrap_or_default())
    }

    async fn get_missing(
        &self,
        offered: &[InventoryVector],
        ours: &[InventoryVector],
    ) -> Result<Vec<InventoryVector>, BmError> {
        let ours: std::collections::HashSet<_> = ours.iter().collect();
        Ok(offered
            .iter()
            .filter(|iv| !ours.contains(iv))
            .copied()
            .collect())
    }

    async fn get_object(&self, iv: &InventoryVector) -> Result<Option<Object>, BmError> {
        Ok(self.objects.read().get(iv).map(|(obj, _)| obj.clone()))
    }

    async fn store_object(&self, iv: InventoryVector, object: Object) -> Result<(), BmError> {
        let expires_at = SystemTime::UNIX_EPOCH + Duration::from_secs(object.header.expires_time);
        self.insert(iv, object, expires_at);
        Ok(())
    }

    async fn contains(&self, iv: &InventoryVector) -> Result<bool, BmError> {
        Ok(self.objects.read().contains_key(iv))
    }

    async fn cleanup(&self, now: SystemTime) -> Result<usize, BmError> {
        let mut objects = self.objects.write();
        let expired: Vec<InventoryVector> = objects
            .iter()
            .filter(|(_, (_, expires_at))| *expires_at < now)
            .map(|(iv, _)| *iv)
            .collect();
        for iv in &expired {
            if let Some((object, _)) = objects.remove(iv) {
                let ttl = object.header.object_type.max_ttl_secs();
                self.suppressed_until
                    .write()
                    .insert(*iv, now + Duration::from_secs(ttl));
            }
        }
        drop(objects);
        for entries in self.by_stream.iter_mut() {
            entries.retain(|iv| !expired.contains(iv));
        }
        Ok(expired.len())
    }

    async fn suppress(&self, iv: InventoryVector, until: SystemTime) -> Result<(), BmError> {
        self.suppressed_until.write().insert(iv, until);
        Ok(())
    }

    async fn is_suppressed(&self, iv: &InventoryVector, now: SystemTime) -> Result<bool, BmError> {
        Ok(self
            .suppressed_until
            .read()
            .get(iv)
            .is_some_and(|until| now < *until))
    }
}

/// Acceptance-rule façade: validates a candidate object against the five
/// rules in spec §4.5 before delegating storage to the wrapped
/// repository.
pub struct Inventory {
    repo: Arc<dyn InventoryRepository>,
    crypto: Arc<dyn Cryptography>,
    network_ntpb: u64,
    network_eb: u64,
}

impl Inventory {
    pub fn new(
        repo: Arc<dyn InventoryRepository>,
        crypto: Arc<dyn Cryptography>,
        network_ntpb: u64,
        network_eb: u64,
    ) -> Self {
        Self {
            repo,
            crypto,
            network_ntpb,
            network_eb,
        }
    }

    /// Validates and, if accepted, stores `object`. PoW is checked against
    /// the announcing pubkey's own nonce-trials-per-byte/extra-bytes when
    /// the payload carries one (pubkey v3+), falling back to the network
    /// defaults otherwise.
    pub async fn accept(&self, object: Object, now: SystemTime) -> Result<StoreOutcome, BmError> {
        let object_bytes = object.encode();
        let iv = InventoryVector::from_object_bytes(&*self.crypto, &object_bytes);

        if self.repo.contains(&iv).await? {
            return Ok(StoreOutcome::Duplicate);
        }
        if self.repo.is_suppressed(&iv, now).await? {
            return Ok(StoreOutcome::Rejected);
        }

        let expires_at = SystemTime::UNIX_EPOCH + Duration::from_secs(object.header.expires_time);
        let earliest = now.checked_sub(ACCEPT_PAST_SLACK).unwrap_or(SystemTime::UNIX_EPOCH);
        let latest = now
            + Duration::from_secs(object.header.object_type.max_ttl_secs())
            + ACCEPT_FUTURE_SLACK;
        if expires_at < earliest || expires_at > latest {
            self.reject(iv, &object, now).await?;
            return Ok(StoreOutcome::Rejected);
        }

        let (ntpb, eb) = self.pow_parameters(&object.payload);
        let initial_hash = object.initial_hash(&*self.crypto);
        let target =
            crate::crypto::pow::calculate_target(object_bytes.len() as u64 - 8, object.header.expires_time, ntpb, eb);
        if !crate::crypto::pow::check_pow(&*self.crypto, object.header.nonce, &initial_hash, target) {
            self.reject(iv, &object, now).await?;
            return Ok(StoreOutcome::Rejected);
        }

        if !self.verify_signature(&object) {
            self.reject(iv, &object, now).await?;
            return Ok(StoreOutcome::Rejected);
        }

        self.repo.store_object(iv, object).await?;
        Ok(StoreOutcome::Accepted)
    }

    /// Suppresses `iv` from rebroadcast for the rejected object's own max
    /// TTL (spec §4.5 rule 5), so a known-bad resubmission is a cheap
    /// lookup instead of a full PoW/signature re-check.
    async fn reject(&self, iv: InventoryVector, object: &Object, now: SystemTime) -> Result<(), BmError> {
        let ttl = object.header.object_type.max_ttl_secs();
        self.repo.suppress(iv, now + Duration::from_secs(ttl)).await
    }

    pub async fn contains(&self, iv: &InventoryVector) -> Result<bool, BmError> {
        self.repo.contains(iv).await
    }

    pub async fn get_object_if_present(&self, iv: &InventoryVector) -> Result<Option<Object>, BmError> {
        self.repo.get_object(iv).await
    }

    pub async fn get_inventory(&self, stream: u64) -> Result<Vec<InventoryVector>, BmError> {
        self.repo.get_inventory(stream).await
    }

    fn pow_parameters(&self, payload: &ObjectPayload) -> (u64, u64) {
        if let ObjectPayload::Pubkey(PubkeyVariant::V3(body)) = payload {
            (body.nonce_trials_per_byte, body.extra_bytes)
        } else {
            (self.network_ntpb, self.network_eb)
        }
    }

    /// Verifies the signature carried by pubkey/msg/broadcast payloads.
    /// `getpubkey` carries no signature and always passes.
    fn verify_signature(&self, object: &Object) -> bool {
        match object.payload.kind() {
            ObjectType::GetPubkey => true,
            ObjectType::Pubkey => match &object.payload {
                ObjectPayload::Pubkey(PubkeyVariant::V2(_)) => true,
                ObjectPayload::Pubkey(PubkeyVariant::V3(body)) => {
                    let header = header_bytes_for_signing(object);
                    let signed = crate::object::payload::PubkeyV3Body::signed_data(
                        &header,
                        &body.v2,
                        body.nonce_trials_per_byte,
                        body.extra_bytes,
                    );
                    self.crypto.verify(
                        &crate::identity::keys::unstrip_uncompressed_tag(&body.v2.signing_key),
                        &body.signature,
                        &signed,
                    )
                }
                // v4 pubkeys are encrypted; signature verification happens
                // after a subscriber decrypts, in the message pipeline.
                ObjectPayload::Pubkey(PubkeyVariant::V4(_)) => true,
                _ => unreachable!(),
            },
            // msg/broadcast signatures are inside the encrypted payload
            // and are checked after decryption, not at inventory-accept
            // time (the inventory never holds a decryption key).
            ObjectType::Msg | ObjectType::Broadcast => true,
        }
    }
}

fn header_bytes_for_signing(object: &Object) -> Vec<u8> {
    use crate::codec::ByteWriter;
    let mut w = ByteWriter::new();
    w.write_u64_be(object.header.expires_time);
    w.write_u32_be(object.header.object_type.to_u32());
    w.write_var_int(object.header.version);
    w.write_var_int(object.header.stream);
    w.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::native::NativeCryptography;
    use crate::object::envelope::{ObjectHeader, ObjectType};
    use std::time::Duration;

    fn crypto() -> Arc<dyn Cryptography> {
        Arc::new(NativeCryptography::new())
    }

    fn now_secs() -> u64 {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap()
            .as_secs()
    }

    fn unsolved_getpubkey(now: u64) -> Object {
        Object {
            header: ObjectHeader {
                nonce: 0,
                expires_time: now + 2 * 24 * 3600,
                object_type: ObjectType::GetPubkey,
                version: 3,
                stream: 1,
            },
            payload: ObjectPayload::GetPubkey {
                ripe: Some([0x01; 20]),
                tag: None,
            },
        }
    }

    #[tokio::test]
    async fn s4_pow_reject() {
        let repo = Arc::new(MemoryInventoryRepository::new());
        let inventory = Inventory::new(repo, crypto(), 1000, 1000);
        let object = unsolved_getpubkey(now_secs());

        let outcome = inventory
            .accept(object, SystemTime::now())
            .await
            .unwrap();
        assert_eq!(outcome, StoreOutcome::Rejected);
    }

    #[tokio::test]
    async fn expired_object_is_rejected() {
        let repo = Arc::new(MemoryInventoryRepository::new());
        let inventory = Inventory::new(repo, crypto(), 1000, 1000);
        let mut object = unsolved_getpubkey(now_secs());
        object.header.expires_time = 10; // far in the past

        let outcome = inventory
            .accept(object, SystemTime::now())
            .await
            .unwrap();
        assert_eq!(outcome, StoreOutcome::Rejected);
    }

    #[tokio::test]
    async fn i9_idempotent_store() {
        let repo = Arc::new(MemoryInventoryRepository::new());
        let native = NativeCryptography::new();
        let now = now_secs();
        let mut object = unsolved_getpubkey(now);

        let initial_hash = object.initial_hash(&native);
        let target = crate::crypto::pow::calculate_target(
            object.encode().len() as u64 - 8,
            object.header.expires_time,
            1000,
            1000,
        );
        // Generous target keeps this test fast: override via a trivial
        // search bound since the real network target is expensive.
        let nonce = crate::crypto::pow::do_pow(&native, &initial_hash, u64::MAX, || false).unwrap();
        object.header.nonce = nonce;
        let _ = target; // not re-checked here; accept() recomputes it.

        let inventory = Inventory::new(repo, Arc::new(native), 1000, 1000);
        let first = inventory.accept(object.clone(), SystemTime::now()).await.unwrap();
        let second = inventory.accept(object, SystemTime::now()).await.unwrap();

        assert_eq!(first, StoreOutcome::Accepted);
        assert_eq!(second, StoreOutcome::Duplicate);
    }

    #[tokio::test]
    async fn cleanup_suppresses_future_rebroadcast() {
        let repo = Arc::new(MemoryInventoryRepository::new());
        let now = SystemTime::now();
        let object = Object {
            header: ObjectHeader {
                nonce: 0,
                expires_time: now
                    .duration_since(SystemTime::UNIX_EPOCH)
                    .unwrap()
                    .as_secs()
                    .saturating_sub(10),
                object_type: ObjectType::GetPubkey,
                version: 3,
                stream: 1,
            },
            payload: ObjectPayload::GetPubkey {
                ripe: Some([0x02; 20]),
                tag: None,
            },
        };
        let native = NativeCryptography::new();
        let iv = object.inventory_vector(&native);
        repo.store_object(iv, object).await.unwrap();

        let removed = repo.cleanup(now).await.unwrap();
        assert_eq!(removed, 1);
        assert!(repo.is_suppressed(&iv, now).await.unwrap());
    }

    #[tokio::test]
    async fn pow_reject_suppresses_future_rebroadcast() {
        let repo = Arc::new(MemoryInventoryRepository::new());
        let native = NativeCryptography::new();
        let object = unsolved_getpubkey(now_secs());
        let iv = object.inventory_vector(&native);
        let now = SystemTime::now();

        let inventory = Inventory::new(repo.clone(), crypto(), 1000, 1000);
        let outcome = inventory.accept(object.clone(), now).await.unwrap();

        assert_eq!(outcome, StoreOutcome::Rejected);
        assert!(repo.is_suppressed(&iv, now).await.unwrap());

        // A second submission of the exact same bad object is now
        // suppressed without re-running PoW/signature validation.
        let outcome_again = inventory.accept(object, now).await.unwrap();
        assert_eq!(outcome_again, StoreOutcome::Rejected);
    }
}
