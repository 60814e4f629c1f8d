//! Per-connection wire state machine (spec §4.7). The
//! `CONNECTING → VERSION_RECEIVED → ACTIVE → DISCONNECTED` shape and its
//! handshake guard rails are grounded in
//! `bitmagier-p2p-bitcoin-handshake`'s `HandshakeInitConversationTopic`
//! state machine, generalized from Bitcoin's version/verack exchange to
//! Bitmessage's (spec also drops Bitcoin's `getaddr`/`sendheaders` extras).
//! Frame I/O itself follows the teacher's `MessageHeader`/`FramedMessage`
//! read-then-dispatch shape in `network/protocol.rs`.

use std::time::{Duration, Instant, SystemTime};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

use crate::crypto::Cryptography;
use crate::error::BmError;
use crate::inventory::{Inventory, StoreOutcome};
use crate::network::frame::{self, Frame, MAGIC};
use crate::network::messages::{
    AddrMessage, GetDataMessage, InvMessage, NetworkAddress, VerackMessage, VersionMessage,
    MAX_ADDR_ENTRIES, MAX_INV_ENTRIES, SERVICE_NODE_NETWORK,
};
use crate::object::{InventoryVector, Object};

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const MIN_PROTOCOL_VERSION: u32 = 3;
const MAX_TIMESTAMP_SKEW: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connecting,
    VersionReceived,
    Active,
    Disconnected,
}

/// Handshake-local bookkeeping, separate from the open-ended `Active`
/// gossip loop.
pub struct HandshakeContext {
    pub our_nonce: u64,
    pub our_version: VersionMessage,
    pub their_version: Option<VersionMessage>,
    pub sent_verack: bool,
    pub received_verack: bool,
    pub deadline: Instant,
}

impl HandshakeContext {
    pub fn new(our_nonce: u64, our_version: VersionMessage) -> Self {
        Self {
            our_nonce,
            our_version,
            their_version: None,
            sent_verack: false,
            received_verack: false,
            deadline: Instant::now() + HANDSHAKE_TIMEOUT,
        }
    }
}

/// Validates an inbound `version` message against the handshake rules in
/// spec §4.7: minimum protocol version, self-connection detection via
/// nonce equality, and clock skew.
pub fn validate_version(
    ours: &VersionMessage,
    theirs: &VersionMessage,
    now: SystemTime,
) -> Result<(), BmError> {
    if theirs.protocol_version < MIN_PROTOCOL_VERSION {
        return Err(BmError::ProtocolViolation(format!(
            "peer protocol version {} below minimum {MIN_PROTOCOL_VERSION}",
            theirs.protocol_version
        )));
    }
    if theirs.nonce == ours.nonce {
        return Err(BmError::ProtocolViolation("self-connection".into()));
    }
    let their_time = SystemTime::UNIX_EPOCH + Duration::from_secs(theirs.timestamp);
    let skew = now
        .duration_since(their_time)
        .or_else(|_| their_time.duration_since(now))
        .unwrap_or(Duration::ZERO);
    if skew > MAX_TIMESTAMP_SKEW {
        return Err(BmError::ProtocolViolation(format!(
            "peer timestamp skew {skew:?} exceeds {MAX_TIMESTAMP_SKEW:?}"
        )));
    }
    Ok(())
}

/// Inventory vectors known to a peer since the last announce round, used
/// to compute the next INV batch (at most [`MAX_INV_ENTRIES`]).
pub fn diff_for_announce(
    all_known: &[InventoryVector],
    already_announced: &std::collections::HashSet<InventoryVector>,
) -> Vec<InventoryVector> {
    all_known
        .iter()
        .filter(|iv| !already_announced.contains(iv))
        .copied()
        .take(MAX_INV_ENTRIES)
        .collect()
}

/// Reads one frame from an async stream: header first (to learn the
/// payload length), then exactly that many payload bytes.
pub async fn read_frame<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Frame, BmError> {
    let mut header_buf = [0u8; 4 + 12 + 4 + 4];
    stream.read_exact(&mut header_buf).await?;
    let mut reader = crate::codec::ByteReader::new(&header_buf);
    let header = frame::read_header(&mut reader)?;

    if header.length as usize > frame::MAX_PAYLOAD_SIZE {
        return Err(BmError::Oversize);
    }
    let mut payload = vec![0u8; header.length as usize];
    stream.read_exact(&mut payload).await?;

    Ok(Frame { header, payload })
}

pub async fn write_frame<W: AsyncWrite + Unpin>(stream: &mut W, frame: &Frame) -> Result<(), BmError> {
    stream.write_all(&frame.encode()).await?;
    Ok(())
}

/// Events a session hands up to the network agent so it can update the
/// shared connection pool and inventory without the session needing a
/// reference back to it.
pub enum SessionEvent {
    Active,
    NewObject(InventoryVector, Object),
    AddrReceived(Vec<NetworkAddress>),
    Disconnected(BmError),
}

/// Drives the handshake and the steady-state gossip loop for one
/// connection. Generic over the transport so it can run over a
/// `TcpStream` or an in-memory duplex pipe in tests.
pub struct PeerSession<S> {
    stream: S,
    state: PeerState,
    crypto: std::sync::Arc<dyn Cryptography>,
    inventory: std::sync::Arc<Inventory>,
    events: mpsc::UnboundedSender<SessionEvent>,
    announced: std::collections::HashSet<InventoryVector>,
    outstanding_getdata: bool,
}

impl<S: AsyncRead + AsyncWrite + Unpin> PeerSession<S> {
    pub fn new(
        stream: S,
        crypto: std::sync::Arc<dyn Cryptography>,
        inventory: std::sync::Arc<Inventory>,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        Self {
            stream,
            state: PeerState::Connecting,
            crypto,
            inventory,
            events,
            announced: std::collections::HashSet::new(),
            outstanding_getdata: false,
        }
    }

    pub fn state(&self) -> PeerState {
        self.state
    }

    /// Performs the version/verack exchange. On success, transitions
    /// through `VersionReceived` into `Active`; on any protocol violation
    /// or timeout, transitions to `Disconnected` and returns the error.
    pub async fn handshake(&mut self, mut ctx: HandshakeContext) -> Result<(), BmError> {
        let version_frame = Frame::build(&*self.crypto, "version", ctx.our_version.encode())?;
        write_frame(&mut self.stream, &version_frame).await?;

        let result = tokio::time::timeout(HANDSHAKE_TIMEOUT, self.handshake_inner(&mut ctx)).await;
        match result {
            Ok(Ok(())) => {
                self.state = PeerState::Active;
                let _ = self.events.send(SessionEvent::Active);
                Ok(())
            }
            Ok(Err(e)) => {
                self.state = PeerState::Disconnected;
                let _ = self.events.send(SessionEvent::Disconnected(
                    BmError::ProtocolViolation(e.to_string()),
                ));
                Err(e)
            }
            Err(_) => {
                self.state = PeerState::Disconnected;
                let _ = self.events.send(SessionEvent::Disconnected(BmError::Timeout));
                Err(BmError::Timeout)
            }
        }
    }

    async fn handshake_inner(&mut self, ctx: &mut HandshakeContext) -> Result<(), BmError> {
        loop {
            let frame = read_frame(&mut self.stream).await?;
            if !frame.verify_checksum(&*self.crypto) {
                return Err(BmError::ChecksumMismatch);
            }
            match frame.header.command_str() {
                "version" => {
                    let theirs = VersionMessage::decode(&frame.payload)?;
                    validate_version(&ctx.our_version, &theirs, SystemTime::now())?;
                    ctx.their_version = Some(theirs);
                    self.state = PeerState::VersionReceived;

                    let verack = Frame::build(&*self.crypto, "verack", VerackMessage.encode())?;
                    write_frame(&mut self.stream, &verack).await?;
                    ctx.sent_verack = true;
                }
                "verack" => {
                    VerackMessage::decode(&frame.payload)?;
                    ctx.received_verack = true;
                }
                other => {
                    return Err(BmError::ProtocolViolation(format!(
                        "unexpected command '{other}' during handshake"
                    )))
                }
            }

            if ctx.their_version.is_some() && ctx.sent_verack && ctx.received_verack {
                return Ok(());
            }
        }
    }

    /// Steady-state loop once `Active`: handles inv/getdata/object/addr
    /// frames, idle timeout, and the one-outstanding-getdata-batch rule
    /// (spec §4.7 rate policy).
    pub async fn run_active_loop(&mut self) -> Result<(), BmError> {
        loop {
            let frame = match tokio::time::timeout(IDLE_TIMEOUT, read_frame(&mut self.stream)).await {
                Ok(result) => result?,
                Err(_) => return Err(BmError::Timeout),
            };
            if !frame.verify_checksum(&*self.crypto) {
                continue; // drop frame, do not disconnect on a single bad checksum
            }

            match frame.header.command_str() {
                "inv" => {
                    let inv = InvMessage::decode(&frame.payload)?;
                    let missing = self
                        .inventory_missing(&inv.inventory)
                        .await?;
                    if !missing.is_empty() && !self.outstanding_getdata {
                        let getdata = GetDataMessage {
                            inventory: missing.into_iter().take(MAX_INV_ENTRIES).collect(),
                        };
                        let out = Frame::build(&*self.crypto, "getdata", getdata.encode())?;
                        write_frame(&mut self.stream, &out).await?;
                        self.outstanding_getdata = true;
                    }
                }
                "getdata" => {
                    let request = GetDataMessage::decode(&frame.payload)?;
                    for iv in request.inventory {
                        if let Some(object) = self.inventory.get_object_if_present(&iv).await? {
                            let out = Frame::build(&*self.crypto, "object", object.encode())?;
                            write_frame(&mut self.stream, &out).await?;
                        }
                    }
                }
                "object" => {
                    self.outstanding_getdata = false;
                    let object = Object::decode(&frame.payload)?;
                    let iv = object.inventory_vector(&*self.crypto);
                    let outcome = self.inventory.accept(object.clone(), SystemTime::now()).await?;
                    if outcome == StoreOutcome::Accepted {
                        let _ = self.events.send(SessionEvent::NewObject(iv, object));
                    }
                }
                "addr" => {
                    let addr = AddrMessage::decode(&frame.payload)?;
                    if addr.addresses.len() > MAX_ADDR_ENTRIES {
                        return Err(BmError::ProtocolViolation("addr batch too large".into()));
                    }
                    let _ = self.events.send(SessionEvent::AddrReceived(addr.addresses));
                }
                other => {
                    return Err(BmError::ProtocolViolation(format!(
                        "unexpected command '{other}'"
                    )))
                }
            }
        }
    }

    async fn inventory_missing(&self, offered: &[InventoryVector]) -> Result<Vec<InventoryVector>, BmError> {
        let mut missing = Vec::new();
        for iv in offered {
            if !self.inventory.contains(iv).await? {
                missing.push(*iv);
            }
        }
        Ok(missing)
    }

    pub async fn send_inv(&mut self, ivs: &[InventoryVector]) -> Result<(), BmError> {
        let msg = InvMessage {
            inventory: ivs.to_vec(),
        };
        let frame = Frame::build(&*self.crypto, "inv", msg.encode())?;
        write_frame(&mut self.stream, &frame).await?;
        self.announced.extend(ivs.iter().copied());
        Ok(())
    }
}

pub fn default_version_message(
    our_nonce: u64,
    user_agent: String,
    streams: Vec<u64>,
    now: SystemTime,
) -> VersionMessage {
    VersionMessage {
        protocol_version: MIN_PROTOCOL_VERSION,
        services: SERVICE_NODE_NETWORK,
        timestamp: now
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs(),
        nonce: our_nonce,
        user_agent,
        streams,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_below_minimum_version() {
        let ours = default_version_message(1, "test".into(), vec![1], SystemTime::now());
        let mut theirs = ours.clone();
        theirs.protocol_version = 2;
        theirs.nonce = 2;
        assert!(validate_version(&ours, &theirs, SystemTime::now()).is_err());
    }

    #[test]
    fn rejects_self_connection() {
        let ours = default_version_message(7, "test".into(), vec![1], SystemTime::now());
        let theirs = ours.clone();
        assert!(validate_version(&ours, &theirs, SystemTime::now()).is_err());
    }

    #[test]
    fn rejects_large_clock_skew() {
        let now = SystemTime::now();
        let ours = default_version_message(1, "test".into(), vec![1], now);
        let mut theirs = default_version_message(2, "test".into(), vec![1], now);
        theirs.timestamp = theirs.timestamp.saturating_sub(7200);
        assert!(validate_version(&ours, &theirs, now).is_err());
    }

    #[test]
    fn accepts_well_formed_handshake_partner() {
        let now = SystemTime::now();
        let ours = default_version_message(1, "test".into(), vec![1], now);
        let theirs = default_version_message(2, "test".into(), vec![1], now);
        assert!(validate_version(&ours, &theirs, now).is_ok());
    }

    #[test]
    fn announce_diff_excludes_already_announced() {
        let all = vec![InventoryVector([1; 32]), InventoryVector([2; 32])];
        let mut announced = std::collections::HashSet::new();
        announced.insert(all[0]);
        let diff = diff_for_announce(&all, &announced);
        assert_eq!(diff, vec![all[1]]);
    }
}
