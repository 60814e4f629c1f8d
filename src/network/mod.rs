//! Network module: wire framing, message payloads, the per-connection
//! state machine, and the peer-pool agent (spec §4.7/§4.8).

pub mod agent;
pub mod frame;
pub mod messages;
pub mod session;

pub use agent::NetworkAgent;
pub use frame::{Frame, FrameHeader, MAGIC};
pub use messages::{AddrMessage, GetDataMessage, InvMessage, NetworkAddress, VerackMessage, VersionMessage};
pub use session::{PeerSession, PeerState};
