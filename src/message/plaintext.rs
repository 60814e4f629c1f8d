//! The application-level message and its lifecycle (spec §3). `Label`
//! gets a `system()` constructor supplementing the distilled spec per
//! `SPEC_FULL.md` §3 — the well-known Inbox/Sent/Trash/Unread/Broadcast
//! labels a client needs without inventing ids by hand.

use std::time::{Duration, SystemTime};

use crate::crypto::Cryptography;
use crate::identity::BitmessageAddress;
use crate::object::InventoryVector;

/// Retries exhaust after this many resend attempts (spec §4.9 step 5 /
/// scenario S6).
pub const MAX_RETRIES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Msg,
    Broadcast,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    New,
    Draft,
    PubkeyRequested,
    DoingProofOfWork,
    Sent,
    SentAcknowledged,
    Received,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelType {
    Inbox,
    Draft,
    Outbox,
    Sent,
    Unread,
    Trash,
    Broadcast,
    Muted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    pub id: u64,
    pub name: String,
    pub label_type: Option<LabelType>,
    pub color: u32,
}

impl Label {
    pub fn new(id: u64, name: impl Into<String>, color: u32) -> Self {
        Self {
            id,
            name: name.into(),
            label_type: None,
            color,
        }
    }

    /// A well-known system label: fixes `(type, name)` so a client does
    /// not need to invent its own id/name pair for Inbox/Sent/etc.
    pub fn system(id: u64, label_type: LabelType) -> Self {
        let name = match label_type {
            LabelType::Inbox => "Inbox",
            LabelType::Draft => "Drafts",
            LabelType::Outbox => "Outbox",
            LabelType::Sent => "Sent",
            LabelType::Unread => "Unread",
            LabelType::Trash => "Trash",
            LabelType::Broadcast => "Broadcasts",
            LabelType::Muted => "Muted",
        };
        Self {
            id,
            name: name.to_string(),
            label_type: Some(label_type),
            color: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Plaintext {
    pub id: u64,
    pub kind: MessageKind,
    pub from: BitmessageAddress,
    pub to: Option<BitmessageAddress>,
    /// 0 = ignore, 1 = trivial, 2 = simple UTF-8 with subject/body.
    pub encoding: u64,
    pub message: Vec<u8>,
    pub ack_data: Vec<u8>,
    pub iv: Option<InventoryVector>,
    pub status: MessageStatus,
    pub sent: Option<SystemTime>,
    pub received: Option<SystemTime>,
    pub ttl: Duration,
    pub retries: u32,
    pub next_try: Option<SystemTime>,
    pub labels: Vec<u64>,
    pub signature: Vec<u8>,
}

impl Plaintext {
    pub fn new_draft(
        id: u64,
        kind: MessageKind,
        from: BitmessageAddress,
        to: Option<BitmessageAddress>,
        encoding: u64,
        message: Vec<u8>,
        ttl: Duration,
    ) -> Self {
        Self {
            id,
            kind,
            from,
            to,
            encoding,
            message,
            ack_data: Vec::new(),
            iv: None,
            status: MessageStatus::Draft,
            sent: None,
            received: None,
            ttl,
            retries: 0,
            next_try: None,
            labels: Vec::new(),
            signature: Vec::new(),
        }
    }

    /// A stable content hash of the pre-encryption plaintext, usable as a
    /// `MessageRepository` lookup key before PoW assigns the object's IV
    /// (spec's Design Notes/`SPEC_FULL.md` §3 supplement).
    pub fn initial_hash(&self, crypto: &dyn Cryptography) -> [u8; 32] {
        let mut data = Vec::new();
        data.extend_from_slice(&self.from.ripe);
        if let Some(to) = &self.to {
            data.extend_from_slice(&to.ripe);
        }
        data.extend_from_slice(&self.encoding.to_be_bytes());
        data.extend_from_slice(&self.message);
        let digest = crypto.sha512(&data);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest[..32]);
        out
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            MessageStatus::SentAcknowledged | MessageStatus::Received
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::native::NativeCryptography;

    #[test]
    fn system_label_fixes_name() {
        let label = Label::system(1, LabelType::Inbox);
        assert_eq!(label.name, "Inbox");
        assert_eq!(label.label_type, Some(LabelType::Inbox));
    }

    #[test]
    fn initial_hash_is_stable_before_iv_assigned() {
        let crypto = NativeCryptography::new();
        let from = BitmessageAddress::new(4, 1, [0x01; 20]);
        let msg = Plaintext::new_draft(
            1,
            MessageKind::Msg,
            from,
            None,
            2,
            b"hello".to_vec(),
            Duration::from_secs(3600),
        );
        let a = msg.initial_hash(&crypto);
        let b = msg.initial_hash(&crypto);
        assert_eq!(a, b);
    }

    #[test]
    fn terminal_statuses() {
        let from = BitmessageAddress::new(4, 1, [0x01; 20]);
        let mut msg = Plaintext::new_draft(
            1,
            MessageKind::Msg,
            from,
            None,
            2,
            b"hi".to_vec(),
            Duration::from_secs(60),
        );
        assert!(!msg.is_terminal());
        msg.status = MessageStatus::SentAcknowledged;
        assert!(msg.is_terminal());
    }
}
