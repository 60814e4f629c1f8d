//! Outbound compose/encrypt/PoW and inbound decrypt/ack processing (spec
//! §4.9). The encryption envelope is ECIES over secp256k1 — ephemeral
//! keypair, ECDH with the recipient's encryption key, SHA-512-derived
//! AES/HMAC keys — built from the [`Cryptography`] capability the same
//! way `PubkeyV4Body`'s encrypt/decrypt pair is in `object::payload`.
//! Broadcasts use a symmetric variant keyed off the sender's address
//! alone, so any subscriber who knows the address can decrypt without a
//! private ECDH exchange.

use std::time::{Duration, SystemTime};

use crate::codec::ByteWriter;
use crate::crypto::{Cryptography, PrivateKeyBytes, PublicKeyBytes};
use crate::error::BmError;
use crate::identity::keys::{unstrip_uncompressed_tag, BehaviorBitfield, Pubkey};
use crate::identity::{BitmessageAddress, PrivateKey};
use crate::object::envelope::{Object, ObjectHeader, ObjectType};
use crate::object::payload::{
    derive_pubkey_v4_key_material, BroadcastBody, MsgBody, ObjectPayload, PubkeyV2Body,
    PubkeyV3Body, PubkeyVariant,
};
use crate::pow_service::PowServiceHandle;

use super::plaintext::{MessageKind, MessageStatus, Plaintext, MAX_RETRIES};

const ECIES_OVERHEAD: usize = 16 + 65 + 32; // iv + ephemeral pubkey + mac

fn header_bytes(expires_time: u64, object_type: ObjectType, version: u64, stream: u64) -> Vec<u8> {
    let mut w = ByteWriter::new();
    w.write_u64_be(expires_time);
    w.write_u32_be(object_type.to_u32());
    w.write_var_int(version);
    w.write_var_int(stream);
    w.into_bytes()
}

fn ecies_encrypt(
    crypto: &dyn Cryptography,
    recipient_pub: &PublicKeyBytes,
    plaintext: &[u8],
) -> Result<Vec<u8>, BmError> {
    let ephemeral_priv: PrivateKeyBytes = crypto
        .random_bytes(32)
        .try_into()
        .map_err(|_| BmError::Parse("short ephemeral key material".into()))?;
    let ephemeral_pub = crypto.create_public_key(&ephemeral_priv)?;
    let shared = crypto.ecdh_multiply(recipient_pub, &ephemeral_priv)?;
    let key_material = crypto.sha512(&shared[1..33]);
    let key_e: [u8; 32] = key_material[..32].try_into().unwrap();
    let key_m: [u8; 32] = key_material[32..].try_into().unwrap();
    let iv: [u8; 16] = crypto.random_bytes(16).try_into().unwrap();

    let ciphertext = crypto.aes256_cbc_encrypt(&key_e, &iv, plaintext);

    let mut mac_input = Vec::with_capacity(16 + 65 + ciphertext.len());
    mac_input.extend_from_slice(&iv);
    mac_input.extend_from_slice(&ephemeral_pub);
    mac_input.extend_from_slice(&ciphertext);
    let mac = crypto.hmac_sha256(&key_m, &mac_input);

    let mut out = Vec::with_capacity(mac_input.len() + 32);
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ephemeral_pub);
    out.extend_from_slice(&ciphertext);
    out.extend_from_slice(&mac);
    Ok(out)
}

/// Attempts ECIES decryption with `recipient_priv`. Returns
/// `BmError::DecryptionFailed` both for a corrupted envelope and for one
/// that simply wasn't addressed to this key — the caller treats both the
/// same way (try the next candidate identity, or give up).
fn ecies_decrypt(
    crypto: &dyn Cryptography,
    recipient_priv: &PrivateKeyBytes,
    encrypted: &[u8],
) -> Result<Vec<u8>, BmError> {
    if encrypted.len() < ECIES_OVERHEAD {
        return Err(BmError::DecryptionFailed);
    }
    let iv: [u8; 16] = encrypted[0..16].try_into().unwrap();
    let ephemeral_pub: [u8; 65] = encrypted[16..81].try_into().unwrap();
    let mac_start = encrypted.len() - 32;
    let ciphertext = &encrypted[81..mac_start];
    let mac = &encrypted[mac_start..];

    let shared = crypto.ecdh_multiply(&ephemeral_pub, recipient_priv)?;
    let key_material = crypto.sha512(&shared[1..33]);
    let key_e: [u8; 32] = key_material[..32].try_into().unwrap();
    let key_m: [u8; 32] = key_material[32..].try_into().unwrap();

    let mut mac_input = Vec::with_capacity(16 + 65 + ciphertext.len());
    mac_input.extend_from_slice(&iv);
    mac_input.extend_from_slice(&ephemeral_pub);
    mac_input.extend_from_slice(ciphertext);
    let expected_mac = crypto.hmac_sha256(&key_m, &mac_input);
    if expected_mac != mac {
        return Err(BmError::DecryptionFailed);
    }

    crypto.aes256_cbc_decrypt(&key_e, &iv, ciphertext)
}

/// Key material for broadcast encryption: derived from the sender's
/// address alone (version/stream/ripe), so any subscriber who knows the
/// address can decrypt without an ECDH exchange. `tag` lets a subscriber
/// skip decrypting broadcasts from addresses they don't follow.
fn broadcast_key_material(crypto: &dyn Cryptography, address: &BitmessageAddress) -> ([u8; 32], [u8; 32]) {
    let mut w = ByteWriter::new();
    w.write_var_int(address.version);
    w.write_var_int(address.stream);
    w.write_bytes(&address.ripe);
    let identity = crypto.double_sha512(&w.into_bytes());
    let tag: [u8; 32] = identity[..32].try_into().unwrap();
    let derived = crypto.sha512(&identity);
    let key: [u8; 32] = derived[..32].try_into().unwrap();
    (tag, key)
}

fn symmetric_encrypt(crypto: &dyn Cryptography, key: &[u8; 32], plaintext: &[u8]) -> Vec<u8> {
    let iv: [u8; 16] = crypto.random_bytes(16).try_into().unwrap();
    let ciphertext = crypto.aes256_cbc_encrypt(key, &iv, plaintext);
    let mut out = Vec::with_capacity(16 + ciphertext.len());
    out.extend_from_slice(&iv);
    out.extend_from_slice(&ciphertext);
    out
}

fn symmetric_decrypt(crypto: &dyn Cryptography, key: &[u8; 32], encrypted: &[u8]) -> Result<Vec<u8>, BmError> {
    if encrypted.len() < 16 {
        return Err(BmError::DecryptionFailed);
    }
    let iv: [u8; 16] = encrypted[0..16].try_into().unwrap();
    crypto.aes256_cbc_decrypt(key, &iv, &encrypted[16..])
}

/// Builds, PoW-solves, and returns a tiny standalone `msg` object whose
/// encrypted payload is `token` — embedded whole as `ackData`. The sender
/// finishes its proof-of-work up front, so the recipient can resubmit it
/// to the network unmodified with no extra work (spec §4.9 step 5).
async fn build_ack_object(
    crypto: &dyn Cryptography,
    pow: &PowServiceHandle,
    job_id: u64,
    stream: u64,
    ttl: Duration,
    now: SystemTime,
    ntpb: u64,
    eb: u64,
) -> Result<Object, BmError> {
    let token = crypto.random_bytes(32);
    let expires_time = now
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        + ttl.as_secs();
    let mut object = Object {
        header: ObjectHeader {
            nonce: 0,
            expires_time,
            object_type: ObjectType::Msg,
            version: 1,
            stream,
        },
        payload: ObjectPayload::Msg { encrypted: token },
    };
    let initial_hash = object.initial_hash(crypto);
    let target = crate::crypto::pow::calculate_target(
        object.encode().len() as u64 - 8,
        expires_time,
        ntpb,
        eb,
    );
    let nonce = pow
        .solve(job_id, initial_hash, target)
        .await
        .ok_or(BmError::Timeout)?;
    object.header.nonce = nonce;
    Ok(object)
}

/// Pubkey-acquisition retry backoff (spec §4.9 step 1): the first retry
/// waits 2 days, then doubles each subsequent attempt, capped at 28 days.
pub const PUBKEY_REQUEST_INITIAL_BACKOFF: Duration = Duration::from_secs(2 * 24 * 3600);
pub const PUBKEY_REQUEST_MAX_BACKOFF: Duration = Duration::from_secs(28 * 24 * 3600);

/// Tracks an in-flight attempt to learn `address`'s `Pubkey` via the
/// getpubkey/pubkey exchange, independent of any one `Plaintext` — several
/// drafts addressed to the same unknown recipient share one request.
#[derive(Debug, Clone)]
pub struct PubkeyRequest {
    pub address: BitmessageAddress,
    pub attempts: u32,
    pub next_try: SystemTime,
}

impl PubkeyRequest {
    pub fn new(address: BitmessageAddress, now: SystemTime) -> Self {
        Self {
            address,
            attempts: 0,
            next_try: now,
        }
    }
}

pub fn pubkey_request_due(request: &PubkeyRequest, now: SystemTime) -> bool {
    now >= request.next_try
}

/// Advances the attempt counter and schedules the next getpubkey retry
/// with doubling backoff starting at `PUBKEY_REQUEST_INITIAL_BACKOFF` and
/// capped at `PUBKEY_REQUEST_MAX_BACKOFF`.
pub fn schedule_next_pubkey_request(request: &mut PubkeyRequest, now: SystemTime) {
    request.attempts += 1;
    let backoff = PUBKEY_REQUEST_INITIAL_BACKOFF
        .saturating_mul(2u32.saturating_pow(request.attempts.saturating_sub(1)))
        .min(PUBKEY_REQUEST_MAX_BACKOFF);
    request.next_try = now + backoff;
}

/// Builds and PoW-solves a `getpubkey` object for `address` — v4 addresses
/// are requested by tag (so the request itself reveals nothing but the
/// tag to onlookers), earlier versions by plain ripe.
pub async fn build_get_pubkey_request(
    crypto: &dyn Cryptography,
    pow: &PowServiceHandle,
    job_id: u64,
    address: &BitmessageAddress,
    now: SystemTime,
    network_ntpb: u64,
    network_eb: u64,
) -> Result<Object, BmError> {
    let expires_time = now
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        + ObjectType::GetPubkey.max_ttl_secs();

    let version = if address.version >= 4 { 4 } else { 3 };
    let payload = if version >= 4 {
        let (tag, _) =
            derive_pubkey_v4_key_material(crypto, address.version, address.stream, &address.ripe);
        ObjectPayload::GetPubkey {
            ripe: None,
            tag: Some(tag),
        }
    } else {
        ObjectPayload::GetPubkey {
            ripe: Some(address.ripe),
            tag: None,
        }
    };

    let mut object = Object {
        header: ObjectHeader {
            nonce: 0,
            expires_time,
            object_type: ObjectType::GetPubkey,
            version,
            stream: address.stream,
        },
        payload,
    };
    let initial_hash = object.initial_hash(crypto);
    let target =
        crate::crypto::pow::calculate_target(object.encode().len() as u64 - 8, expires_time, network_ntpb, network_eb);
    let nonce = pow.solve(job_id, initial_hash, target).await.ok_or(BmError::Timeout)?;
    object.header.nonce = nonce;
    Ok(object)
}

/// Starts the pubkey-acquisition workflow for a draft whose recipient's
/// `Pubkey` isn't known yet (spec §4.9 step 1): returns a PoW-solved
/// `getpubkey` object to announce, a draft `Plaintext` parked in
/// `PubkeyRequested`, and the retry state the caller re-checks with
/// `pubkey_request_due`/`schedule_next_pubkey_request` until the pubkey
/// arrives (via [`try_receive_pubkey`]) and `compose_msg` can proceed.
#[allow(clippy::too_many_arguments)]
pub async fn request_pubkey(
    crypto: &dyn Cryptography,
    pow: &PowServiceHandle,
    job_id: u64,
    message_id: u64,
    sender: &BitmessageAddress,
    recipient_address: &BitmessageAddress,
    encoding: u64,
    message: Vec<u8>,
    ttl: Duration,
    now: SystemTime,
    network_ntpb: u64,
    network_eb: u64,
) -> Result<(Plaintext, Object, PubkeyRequest), BmError> {
    let get_pubkey_object =
        build_get_pubkey_request(crypto, pow, job_id, recipient_address, now, network_ntpb, network_eb).await?;

    let mut plaintext = Plaintext::new_draft(
        message_id,
        MessageKind::Msg,
        *sender,
        Some(*recipient_address),
        encoding,
        message,
        ttl,
    );
    plaintext.status = MessageStatus::PubkeyRequested;

    let request = PubkeyRequest::new(*recipient_address, now);
    Ok((plaintext, get_pubkey_object, request))
}

/// True when an inbound `getpubkey` object is addressed to `identity`,
/// whether by plain ripe (pre-v4) or by the tag only `identity`'s own
/// address could have produced (v4).
pub fn matches_get_pubkey_request(crypto: &dyn Cryptography, object: &Object, identity: &PrivateKey) -> bool {
    let ObjectPayload::GetPubkey { ripe, tag } = &object.payload else {
        return false;
    };
    if let Some(ripe) = ripe {
        return *ripe == identity.address.ripe;
    }
    if let Some(tag) = tag {
        let (expected_tag, _) = derive_pubkey_v4_key_material(
            crypto,
            identity.address.version,
            identity.address.stream,
            &identity.address.ripe,
        );
        return *tag == expected_tag;
    }
    false
}

/// Builds this node's own v4 pubkey object in reply to a matched inbound
/// `getpubkey` (the inverse of [`request_pubkey`]): every node answers a
/// request for its own address by (re)announcing its pubkey, encrypted
/// under the key only that address could derive.
#[allow(clippy::too_many_arguments)]
pub async fn build_pubkey_response(
    crypto: &dyn Cryptography,
    pow: &PowServiceHandle,
    job_id: u64,
    identity: &PrivateKey,
    ttl: Duration,
    now: SystemTime,
    network_ntpb: u64,
    network_eb: u64,
) -> Result<Object, BmError> {
    let expires_time = now
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        + ttl.as_secs();
    let header = header_bytes(expires_time, ObjectType::Pubkey, 4, identity.pubkey.stream);

    let ntpb = identity.pubkey.nonce_trials_per_byte.unwrap_or(network_ntpb);
    let eb = identity.pubkey.extra_bytes.unwrap_or(network_eb);
    let mut v3 = PubkeyV3Body {
        v2: PubkeyV2Body {
            behavior: identity.pubkey.behavior.0,
            signing_key: identity.pubkey.signing_key,
            encryption_key: identity.pubkey.encryption_key,
        },
        nonce_trials_per_byte: ntpb,
        extra_bytes: eb,
        signature: Vec::new(),
    };
    let signed_data = PubkeyV3Body::signed_data(&header, &v3.v2, ntpb, eb);
    v3.signature = crypto.sign(&identity.signing_key, &signed_data)?;

    let v4 = crate::object::payload::PubkeyV4Body::encrypt(
        crypto,
        identity.address.version,
        identity.address.stream,
        &identity.address.ripe,
        &v3,
    );

    let mut object = Object {
        header: ObjectHeader {
            nonce: 0,
            expires_time,
            object_type: ObjectType::Pubkey,
            version: 4,
            stream: identity.pubkey.stream,
        },
        payload: ObjectPayload::Pubkey(PubkeyVariant::V4(v4)),
    };
    let initial_hash = object.initial_hash(crypto);
    let target =
        crate::crypto::pow::calculate_target(object.encode().len() as u64 - 8, expires_time, network_ntpb, network_eb);
    let nonce = pow.solve(job_id, initial_hash, target).await.ok_or(BmError::Timeout)?;
    object.header.nonce = nonce;
    Ok(object)
}

/// Decrypts and verifies an inbound v4 pubkey object against `candidate`,
/// returning the learned [`Pubkey`] once the tag matches, decryption
/// succeeds, the self-certifying ripe check passes, and the signature
/// verifies. `Ok(None)` means this object simply isn't for `candidate`.
pub fn try_receive_pubkey(
    crypto: &dyn Cryptography,
    candidate: &BitmessageAddress,
    object: &Object,
) -> Result<Option<Pubkey>, BmError> {
    let ObjectPayload::Pubkey(PubkeyVariant::V4(v4)) = &object.payload else {
        return Ok(None);
    };
    let (expected_tag, _) =
        derive_pubkey_v4_key_material(crypto, candidate.version, candidate.stream, &candidate.ripe);
    if v4.tag != expected_tag {
        return Ok(None);
    }
    let v3 = match v4.decrypt(crypto, candidate.version, candidate.stream, &candidate.ripe) {
        Ok(v3) => v3,
        Err(_) => return Ok(None),
    };

    let ripe = crypto.ripemd160(&crypto.sha512(
        &[&v3.v2.signing_key[..], &v3.v2.encryption_key[..]].concat(),
    ));
    if ripe != candidate.ripe {
        return Ok(None);
    }

    let header = header_bytes(object.header.expires_time, ObjectType::Pubkey, object.header.version, object.header.stream);
    let signed_data = PubkeyV3Body::signed_data(&header, &v3.v2, v3.nonce_trials_per_byte, v3.extra_bytes);
    let signing_key = unstrip_uncompressed_tag(&v3.v2.signing_key);
    if !crypto.verify(&signing_key, &v3.signature, &signed_data) {
        return Err(BmError::SignatureInvalid);
    }

    Ok(Some(Pubkey {
        version: 4,
        stream: object.header.stream,
        behavior: BehaviorBitfield(v3.v2.behavior),
        signing_key: v3.v2.signing_key,
        encryption_key: v3.v2.encryption_key,
        nonce_trials_per_byte: Some(v3.nonce_trials_per_byte),
        extra_bytes: Some(v3.extra_bytes),
    }))
}

/// Composes, signs, encrypts, and PoW-solves an outbound `msg` object.
/// `ntpb`/`eb` are the recipient's own announced difficulty (falling back
/// to the network default when the recipient's pubkey doesn't carry one),
/// per the same rule `Inventory::accept` applies on the receiving side.
#[allow(clippy::too_many_arguments)]
pub async fn compose_msg(
    crypto: &dyn Cryptography,
    pow: &PowServiceHandle,
    job_id: u64,
    message_id: u64,
    sender: &PrivateKey,
    recipient: &Pubkey,
    recipient_address: &BitmessageAddress,
    encoding: u64,
    message: Vec<u8>,
    request_ack: bool,
    ttl: Duration,
    network_ntpb: u64,
    network_eb: u64,
    now: SystemTime,
) -> Result<(Plaintext, Object), BmError> {
    let ntpb = recipient.nonce_trials_per_byte.unwrap_or(network_ntpb);
    let eb = recipient.extra_bytes.unwrap_or(network_eb);

    let ack_data = if request_ack {
        build_ack_object(crypto, pow, job_id.wrapping_add(1), recipient.stream, ttl, now, network_ntpb, network_eb)
            .await?
            .encode()
    } else {
        Vec::new()
    };

    let expires_time = now
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        + ttl.as_secs();
    let header = header_bytes(expires_time, ObjectType::Msg, 1, recipient.stream);

    let mut body = MsgBody {
        msg_version: 1,
        address_version: sender.pubkey.version,
        stream: sender.pubkey.stream,
        behavior: sender.pubkey.behavior.0,
        signing_key: sender.pubkey.signing_key,
        encryption_key: sender.pubkey.encryption_key,
        nonce_trials_per_byte: sender.pubkey.nonce_trials_per_byte,
        extra_bytes: sender.pubkey.extra_bytes,
        destination_ripe: recipient_address.ripe,
        encoding,
        message: message.clone(),
        ack_data: ack_data.clone(),
        signature: Vec::new(),
    };
    let signed_data = body.signed_data(&header);
    body.signature = crypto.sign(&sender.signing_key, &signed_data)?;

    let recipient_pub = unstrip_uncompressed_tag(&recipient.encryption_key);
    let encrypted = ecies_encrypt(crypto, &recipient_pub, &body.encode())?;

    let mut object = Object {
        header: ObjectHeader {
            nonce: 0,
            expires_time,
            object_type: ObjectType::Msg,
            version: 1,
            stream: recipient.stream,
        },
        payload: ObjectPayload::Msg { encrypted },
    };
    let initial_hash = object.initial_hash(crypto);
    let target = crate::crypto::pow::calculate_target(object.encode().len() as u64 - 8, expires_time, ntpb, eb);
    let nonce = pow.solve(job_id, initial_hash, target).await.ok_or(BmError::Timeout)?;
    object.header.nonce = nonce;

    let mut plaintext = Plaintext::new_draft(
        message_id,
        MessageKind::Msg,
        sender.address,
        Some(*recipient_address),
        encoding,
        message,
        ttl,
    );
    plaintext.ack_data = ack_data;
    plaintext.status = MessageStatus::Sent;
    plaintext.sent = Some(now);
    plaintext.signature = body.signature;

    Ok((plaintext, object))
}

/// Attempts to decrypt an incoming `msg` object with `recipient`. Returns
/// `Ok(None)` when the object simply wasn't addressed to this key —
/// every other subscribed identity still gets a turn — and `Err` only for
/// a decryptable-but-invalid payload (bad signature).
pub fn try_receive_msg(
    crypto: &dyn Cryptography,
    recipient: &PrivateKey,
    object: &Object,
    now: SystemTime,
) -> Result<Option<(MsgBody, Plaintext)>, BmError> {
    let ObjectPayload::Msg { encrypted } = &object.payload else {
        return Ok(None);
    };
    let plaintext_bytes = match ecies_decrypt(crypto, &recipient.encryption_key, encrypted) {
        Ok(bytes) => bytes,
        Err(_) => return Ok(None),
    };
    let mut r = crate::codec::ByteReader::new(&plaintext_bytes);
    let body = MsgBody::decode(&mut r)?;

    let header = header_bytes(object.header.expires_time, ObjectType::Msg, object.header.version, object.header.stream);
    let signed_data = body.signed_data(&header);
    let signing_key = unstrip_uncompressed_tag(&body.signing_key);
    if !crypto.verify(&signing_key, &body.signature, &signed_data) {
        return Err(BmError::SignatureInvalid);
    }

    let sender_ripe = crypto.ripemd160(&crypto.sha512(
        &[&body.signing_key[..], &body.encryption_key[..]].concat(),
    ));
    let from = BitmessageAddress::new(body.address_version, body.stream, sender_ripe);

    let mut message = Plaintext::new_draft(
        0,
        MessageKind::Msg,
        from,
        Some(recipient.address),
        body.encoding,
        body.message.clone(),
        Duration::from_secs(object.header.expires_time.saturating_sub(
            now.duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default().as_secs(),
        )),
    );
    message.ack_data = body.ack_data.clone();
    message.status = MessageStatus::Received;
    message.received = Some(now);
    message.signature = body.signature.clone();
    message.iv = Some(object.inventory_vector(crypto));

    Ok(Some((body, message)))
}

/// Decodes the object embedded in `body.ack_data`, ready for the caller to
/// submit into inventory/flood unmodified (spec §4.9 step 5).
pub fn extract_ack_object(body: &MsgBody) -> Option<Object> {
    if body.ack_data.is_empty() {
        return None;
    }
    Object::decode(&body.ack_data).ok()
}

/// True when `incoming` is the ack this outbound message is waiting for.
pub fn is_matching_ack(plaintext: &Plaintext, incoming_object_bytes: &[u8]) -> bool {
    !plaintext.ack_data.is_empty() && plaintext.ack_data == incoming_object_bytes
}

/// Composes, signs, and symmetrically encrypts an outbound `broadcast`
/// object. Broadcasts carry no PoW target beyond the network default,
/// since there's no specific recipient to set a higher bar.
#[allow(clippy::too_many_arguments)]
pub async fn compose_broadcast(
    crypto: &dyn Cryptography,
    pow: &PowServiceHandle,
    job_id: u64,
    message_id: u64,
    sender: &PrivateKey,
    encoding: u64,
    message: Vec<u8>,
    ttl: Duration,
    network_ntpb: u64,
    network_eb: u64,
    now: SystemTime,
) -> Result<(Plaintext, Object), BmError> {
    let expires_time = now
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
        + ttl.as_secs();
    let header = header_bytes(expires_time, ObjectType::Broadcast, 5, sender.pubkey.stream);

    let mut body = BroadcastBody {
        broadcast_version: 5,
        address_version: sender.pubkey.version,
        stream: sender.pubkey.stream,
        behavior: sender.pubkey.behavior.0,
        signing_key: sender.pubkey.signing_key,
        encryption_key: sender.pubkey.encryption_key,
        nonce_trials_per_byte: sender.pubkey.nonce_trials_per_byte,
        extra_bytes: sender.pubkey.extra_bytes,
        encoding,
        message: message.clone(),
        signature: Vec::new(),
    };
    let mut signed_data = header.clone();
    let mut unsigned = body.encode();
    unsigned.pop(); // drop the empty var_bytes signature tag, as in MsgBody::signed_data
    signed_data.extend_from_slice(&unsigned);
    body.signature = crypto.sign(&sender.signing_key, &signed_data)?;

    let (tag, key) = broadcast_key_material(crypto, &sender.address);
    let encrypted = symmetric_encrypt(crypto, &key, &body.encode());

    let mut object = Object {
        header: ObjectHeader {
            nonce: 0,
            expires_time,
            object_type: ObjectType::Broadcast,
            version: 5,
            stream: sender.pubkey.stream,
        },
        payload: ObjectPayload::Broadcast { tag: Some(tag), encrypted },
    };
    let initial_hash = object.initial_hash(crypto);
    let target =
        crate::crypto::pow::calculate_target(object.encode().len() as u64 - 8, expires_time, network_ntpb, network_eb);
    let nonce = pow.solve(job_id, initial_hash, target).await.ok_or(BmError::Timeout)?;
    object.header.nonce = nonce;

    let mut plaintext = Plaintext::new_draft(
        message_id,
        MessageKind::Broadcast,
        sender.address,
        None,
        encoding,
        message,
        ttl,
    );
    plaintext.status = MessageStatus::Sent;
    plaintext.sent = Some(now);
    plaintext.signature = body.signature;

    Ok((plaintext, object))
}

/// Tries every address in `subscriptions` against a broadcast's tag, then
/// decrypts and verifies the one that matches — the "I know this address,
/// so I can follow it" flow (spec §4.9, broadcast branch).
pub fn try_receive_broadcast(
    crypto: &dyn Cryptography,
    subscriptions: &[BitmessageAddress],
    object: &Object,
    now: SystemTime,
) -> Result<Option<(BroadcastBody, Plaintext)>, BmError> {
    let ObjectPayload::Broadcast { tag, encrypted } = &object.payload else {
        return Ok(None);
    };

    for address in subscriptions {
        let (candidate_tag, key) = broadcast_key_material(crypto, address);
        if let Some(tag) = tag {
            if *tag != candidate_tag {
                continue;
            }
        }
        let Ok(plaintext_bytes) = symmetric_decrypt(crypto, &key, encrypted) else {
            continue;
        };
        let mut r = crate::codec::ByteReader::new(&plaintext_bytes);
        let Ok(body) = BroadcastBody::decode(&mut r) else {
            continue;
        };

        let ripe = crypto.ripemd160(&crypto.sha512(
            &[&body.signing_key[..], &body.encryption_key[..]].concat(),
        ));
        if ripe != address.ripe {
            continue;
        }

        let mut header_signed = header_bytes(object.header.expires_time, ObjectType::Broadcast, object.header.version, object.header.stream);
        let mut unsigned = body.encode();
        unsigned.pop();
        header_signed.extend_from_slice(&unsigned);
        let signing_key = unstrip_uncompressed_tag(&body.signing_key);
        if !crypto.verify(&signing_key, &body.signature, &header_signed) {
            continue;
        }

        let mut message = Plaintext::new_draft(
            0,
            MessageKind::Broadcast,
            *address,
            None,
            body.encoding,
            body.message.clone(),
            Duration::from_secs(object.header.expires_time.saturating_sub(
                now.duration_since(SystemTime::UNIX_EPOCH).unwrap_or_default().as_secs(),
            )),
        );
        message.status = MessageStatus::Received;
        message.received = Some(now);
        message.signature = body.signature.clone();
        message.iv = Some(object.inventory_vector(crypto));
        return Ok(Some((body, message)));
    }
    Ok(None)
}

/// True once `plaintext` has waited long enough since its last send
/// attempt to be due for another (spec §4.9 step 5 / scenario S6): half
/// the TTL after the first send, then the doubling backoff schedule set
/// by [`schedule_next_retry`].
pub fn due_for_resend(plaintext: &Plaintext, now: SystemTime) -> bool {
    if plaintext.status != MessageStatus::Sent || plaintext.retries >= MAX_RETRIES {
        return false;
    }
    match (plaintext.next_try, plaintext.sent) {
        (Some(next_try), _) => now >= next_try,
        (None, Some(sent)) => now >= sent + plaintext.ttl / 2,
        (None, None) => false,
    }
}

/// Advances the retry counter and schedules the next attempt with
/// exponentially growing backoff (`ttl * 2^retries`, matching S6's
/// `ttl=100s → nextTry=now+200s` at `retries=1`). Once `MAX_RETRIES` is
/// reached, [`due_for_resend`] stops firing and the message sits in
/// `Sent` until acknowledged or manually abandoned.
pub fn schedule_next_retry(plaintext: &mut Plaintext, now: SystemTime) {
    plaintext.retries += 1;
    let backoff = plaintext.ttl * 2u32.saturating_pow(plaintext.retries);
    plaintext.next_try = Some(now + backoff);
}
