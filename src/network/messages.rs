//! Payloads carried inside a [`crate::network::frame::Frame`]: `version`,
//! `verack`, `inv`, `getdata`, `addr` (spec §4.7/§6).

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::codec::{ByteReader, ByteWriter};
use crate::error::BmError;
use crate::object::InventoryVector;

/// Bounds from spec §4.7/§4.8: at most 50,000 inventory vectors per
/// inv/getdata batch, at most 1,000 node entries per addr exchange.
pub const MAX_INV_ENTRIES: usize = 50_000;
pub const MAX_ADDR_ENTRIES: usize = 1_000;

pub const SERVICE_NODE_NETWORK: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMessage {
    pub protocol_version: u32,
    pub services: u64,
    pub timestamp: u64,
    pub nonce: u64,
    pub user_agent: String,
    pub streams: Vec<u64>,
}

impl VersionMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_u32_be(self.protocol_version);
        w.write_u64_be(self.services);
        w.write_u64_be(self.timestamp);
        w.write_u64_be(self.nonce);
        w.write_var_string(&self.user_agent);
        w.write_var_int(self.streams.len() as u64);
        for stream in &self.streams {
            w.write_var_int(*stream);
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BmError> {
        let mut r = ByteReader::new(bytes);
        let protocol_version = r.read_u32_be()?;
        let services = r.read_u64_be()?;
        let timestamp = r.read_u64_be()?;
        let nonce = r.read_u64_be()?;
        let user_agent = r.read_var_string()?;
        let stream_count = r.read_var_int()? as usize;
        let mut streams = Vec::with_capacity(stream_count.min(MAX_ADDR_ENTRIES));
        for _ in 0..stream_count {
            streams.push(r.read_var_int()?);
        }
        Ok(Self {
            protocol_version,
            services,
            timestamp,
            nonce,
            user_agent,
            streams,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerackMessage;

impl VerackMessage {
    pub fn encode(&self) -> Vec<u8> {
        Vec::new()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BmError> {
        if !bytes.is_empty() {
            return Err(BmError::Parse("verack payload must be empty".into()));
        }
        Ok(Self)
    }
}

fn encode_iv_list(ivs: &[InventoryVector]) -> Vec<u8> {
    let mut w = ByteWriter::new();
    w.write_var_int(ivs.len() as u64);
    for iv in ivs {
        w.write_bytes(&iv.0);
    }
    w.into_bytes()
}

fn decode_iv_list(bytes: &[u8], max: usize) -> Result<Vec<InventoryVector>, BmError> {
    let mut r = ByteReader::new(bytes);
    let count = r.read_var_int()? as usize;
    if count > max {
        return Err(BmError::ProtocolViolation(format!(
            "inventory list of {count} exceeds max {max}"
        )));
    }
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        let bytes: [u8; 32] = r.read_bytes(32)?.try_into().unwrap();
        out.push(InventoryVector(bytes));
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvMessage {
    pub inventory: Vec<InventoryVector>,
}

impl InvMessage {
    pub fn encode(&self) -> Vec<u8> {
        encode_iv_list(&self.inventory)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BmError> {
        Ok(Self {
            inventory: decode_iv_list(bytes, MAX_INV_ENTRIES)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GetDataMessage {
    pub inventory: Vec<InventoryVector>,
}

impl GetDataMessage {
    pub fn encode(&self) -> Vec<u8> {
        encode_iv_list(&self.inventory)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BmError> {
        Ok(Self {
            inventory: decode_iv_list(bytes, MAX_INV_ENTRIES)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkAddress {
    pub services: u64,
    pub ip: IpAddr,
    pub port: u16,
    pub stream: u64,
    pub last_seen: u64,
}

impl NetworkAddress {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    fn encode(&self, w: &mut ByteWriter) {
        w.write_u64_be(self.last_seen);
        w.write_u64_be(self.stream);
        w.write_u64_be(self.services);
        match self.ip {
            IpAddr::V4(v4) => {
                w.write_u8(4);
                w.write_bytes(&v4.octets());
            }
            IpAddr::V6(v6) => {
                w.write_u8(6);
                w.write_bytes(&v6.octets());
            }
        }
        w.write_u32_be(self.port as u32);
    }

    fn decode(r: &mut ByteReader) -> Result<Self, BmError> {
        let last_seen = r.read_u64_be()?;
        let stream = r.read_u64_be()?;
        let services = r.read_u64_be()?;
        let ip_version = r.read_u8()?;
        let ip = match ip_version {
            4 => {
                let octets: [u8; 4] = r.read_bytes(4)?.try_into().unwrap();
                IpAddr::V4(Ipv4Addr::from(octets))
            }
            6 => {
                let octets: [u8; 16] = r.read_bytes(16)?.try_into().unwrap();
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            other => return Err(BmError::Parse(format!("unknown IP version tag {other}"))),
        };
        let port = r.read_u32_be()? as u16;
        Ok(Self {
            services,
            ip,
            port,
            stream,
            last_seen,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddrMessage {
    pub addresses: Vec<NetworkAddress>,
}

impl AddrMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = ByteWriter::new();
        w.write_var_int(self.addresses.len() as u64);
        for addr in &self.addresses {
            addr.encode(&mut w);
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, BmError> {
        let mut r = ByteReader::new(bytes);
        let count = r.read_var_int()? as usize;
        if count > MAX_ADDR_ENTRIES {
            return Err(BmError::ProtocolViolation(format!(
                "addr list of {count} exceeds max {MAX_ADDR_ENTRIES}"
            )));
        }
        let mut addresses = Vec::with_capacity(count);
        for _ in 0..count {
            addresses.push(NetworkAddress::decode(&mut r)?);
        }
        Ok(Self { addresses })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_roundtrip() {
        let msg = VersionMessage {
            protocol_version: 3,
            services: SERVICE_NODE_NETWORK,
            timestamp: 1_700_000_000,
            nonce: 0xDEAD_BEEF,
            user_agent: "/bitmessage-core:0.1.0/".to_string(),
            streams: vec![1, 2],
        };
        let bytes = msg.encode();
        assert_eq!(VersionMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn verack_rejects_nonempty_payload() {
        assert!(VerackMessage::decode(&[0x01]).is_err());
        assert!(VerackMessage::decode(&[]).is_ok());
    }

    #[test]
    fn inv_roundtrip() {
        let msg = InvMessage {
            inventory: vec![InventoryVector([0x01; 32]), InventoryVector([0x02; 32])],
        };
        let bytes = msg.encode();
        assert_eq!(InvMessage::decode(&bytes).unwrap(), msg);
    }

    #[test]
    fn inv_over_max_is_rejected() {
        let mut w = ByteWriter::new();
        w.write_var_int((MAX_INV_ENTRIES + 1) as u64);
        let bytes = w.into_bytes();
        assert!(InvMessage::decode(&bytes).is_err());
    }

    #[test]
    fn addr_roundtrip() {
        let msg = AddrMessage {
            addresses: vec![NetworkAddress {
                services: SERVICE_NODE_NETWORK,
                ip: IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)),
                port: 8444,
                stream: 1,
                last_seen: 1_700_000_000,
            }],
        };
        let bytes = msg.encode();
        assert_eq!(AddrMessage::decode(&bytes).unwrap(), msg);
    }
}
