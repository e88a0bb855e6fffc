//! Binary wire format for transport messages.
//!
//! Ping/PingReq/Ack/Gossip travel as single UDP datagrams; PushPull is the
//! body of a length-prefixed TCP frame. All multi-byte integers are
//! little-endian; strings and blobs are length-prefixed.

use std::io::{self, Read};
use std::net::SocketAddr;

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Maximum number of updates, members or payloads in one message.
/// Prevents allocation bombs from crafted messages.
const MAX_COLLECTION_COUNT: usize = 1024;

/// Maximum length of a node name on the wire.
const MAX_NAME_LEN: usize = 512;

/// Maximum length of a metadata, state or payload blob on the wire.
const MAX_BLOB_LEN: usize = 16 * 1024 * 1024;

// Safe read helpers that return io::Error instead of panicking on
// truncated input.

fn safe_get_u8(buf: &mut &[u8]) -> io::Result<u8> {
    if buf.is_empty() {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "need 1 byte"));
    }
    Ok(buf.get_u8())
}

fn safe_get_u16_le(buf: &mut &[u8]) -> io::Result<u16> {
    if buf.len() < 2 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "need 2 bytes"));
    }
    Ok(buf.get_u16_le())
}

fn safe_get_u32_le(buf: &mut &[u8]) -> io::Result<u32> {
    if buf.len() < 4 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "need 4 bytes"));
    }
    Ok(buf.get_u32_le())
}

fn safe_get_u64_le(buf: &mut &[u8]) -> io::Result<u64> {
    if buf.len() < 8 {
        return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "need 8 bytes"));
    }
    Ok(buf.get_u64_le())
}

/// Transport messages.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Direct probe to check if a node is alive.
    Ping {
        seq: u64,
        from: String,
        /// Piggybacked membership updates.
        updates: Vec<MemberUpdate>,
    },

    /// Request another node to probe a target on our behalf.
    PingReq {
        seq: u64,
        from: String,
        target: String,
        target_addr: SocketAddr,
    },

    /// Response to a Ping or forwarded PingReq.
    Ack {
        seq: u64,
        from: String,
        /// Piggybacked membership updates.
        updates: Vec<MemberUpdate>,
    },

    /// Periodic dissemination round: membership updates plus queued
    /// application broadcasts.
    Gossip {
        updates: Vec<MemberUpdate>,
        payloads: Vec<Bytes>,
    },

    /// Full state exchange over TCP. Sent by both sides of a push/pull
    /// connection; `join` marks an exchange that bootstraps a new node.
    PushPull {
        join: bool,
        members: Vec<MemberSnapshot>,
        state: Bytes,
    },
}

/// A membership transition disseminated through the cluster.
#[derive(Debug, Clone, PartialEq)]
pub enum MemberUpdate {
    /// Node is alive with the given incarnation number.
    Alive {
        name: String,
        addr: SocketAddr,
        incarnation: u64,
        meta: Bytes,
    },
    /// Node is suspected to be failing.
    Suspect { name: String, incarnation: u64 },
    /// Node has been confirmed dead.
    Dead { name: String, incarnation: u64 },
    /// Node left the cluster gracefully.
    Left { name: String },
}

/// One alive member in a push/pull exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberSnapshot {
    pub name: String,
    pub addr: SocketAddr,
    pub incarnation: u64,
    pub meta: Bytes,
}

// Wire format constants
const MSG_PING: u8 = 1;
const MSG_PING_REQ: u8 = 2;
const MSG_ACK: u8 = 3;
const MSG_GOSSIP: u8 = 4;
const MSG_PUSH_PULL: u8 = 5;

const UPDATE_ALIVE: u8 = 1;
const UPDATE_SUSPECT: u8 = 2;
const UPDATE_DEAD: u8 = 3;
const UPDATE_LEFT: u8 = 4;

impl Message {
    /// Serializes the message to bytes.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(256);
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Serializes the message into the given buffer.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        match self {
            Message::Ping { seq, from, updates } => {
                buf.put_u8(MSG_PING);
                buf.put_u64_le(*seq);
                encode_string(buf, from);
                encode_updates(buf, updates);
            }
            Message::PingReq {
                seq,
                from,
                target,
                target_addr,
            } => {
                buf.put_u8(MSG_PING_REQ);
                buf.put_u64_le(*seq);
                encode_string(buf, from);
                encode_string(buf, target);
                encode_socket_addr(buf, target_addr);
            }
            Message::Ack { seq, from, updates } => {
                buf.put_u8(MSG_ACK);
                buf.put_u64_le(*seq);
                encode_string(buf, from);
                encode_updates(buf, updates);
            }
            Message::Gossip { updates, payloads } => {
                buf.put_u8(MSG_GOSSIP);
                encode_updates(buf, updates);
                let count = payloads.len().min(MAX_COLLECTION_COUNT);
                buf.put_u16_le(count as u16);
                for payload in &payloads[..count] {
                    encode_blob(buf, payload);
                }
            }
            Message::PushPull {
                join,
                members,
                state,
            } => {
                buf.put_u8(MSG_PUSH_PULL);
                buf.put_u8(u8::from(*join));
                let count = members.len().min(MAX_COLLECTION_COUNT);
                buf.put_u16_le(count as u16);
                for member in &members[..count] {
                    encode_member_snapshot(buf, member);
                }
                encode_blob(buf, state);
            }
        }
    }

    /// Deserializes a message from bytes.
    pub fn decode(mut buf: &[u8]) -> io::Result<Self> {
        if buf.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "empty message",
            ));
        }

        let msg_type = safe_get_u8(&mut buf)?;
        match msg_type {
            MSG_PING => {
                let seq = safe_get_u64_le(&mut buf)?;
                let from = decode_string(&mut buf)?;
                let updates = decode_updates(&mut buf)?;
                Ok(Message::Ping { seq, from, updates })
            }
            MSG_PING_REQ => {
                let seq = safe_get_u64_le(&mut buf)?;
                let from = decode_string(&mut buf)?;
                let target = decode_string(&mut buf)?;
                let target_addr = decode_socket_addr(&mut buf)?;
                Ok(Message::PingReq {
                    seq,
                    from,
                    target,
                    target_addr,
                })
            }
            MSG_ACK => {
                let seq = safe_get_u64_le(&mut buf)?;
                let from = decode_string(&mut buf)?;
                let updates = decode_updates(&mut buf)?;
                Ok(Message::Ack { seq, from, updates })
            }
            MSG_GOSSIP => {
                let updates = decode_updates(&mut buf)?;
                let count = safe_get_u16_le(&mut buf)? as usize;
                if count > MAX_COLLECTION_COUNT {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("payload count {count} exceeds limit"),
                    ));
                }
                let mut payloads = Vec::with_capacity(count);
                for _ in 0..count {
                    payloads.push(decode_blob(&mut buf)?);
                }
                Ok(Message::Gossip { updates, payloads })
            }
            MSG_PUSH_PULL => {
                let join = safe_get_u8(&mut buf)? != 0;
                let count = safe_get_u16_le(&mut buf)? as usize;
                if count > MAX_COLLECTION_COUNT {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("member count {count} exceeds limit"),
                    ));
                }
                let mut members = Vec::with_capacity(count);
                for _ in 0..count {
                    members.push(decode_member_snapshot(&mut buf)?);
                }
                let state = decode_blob(&mut buf)?;
                Ok(Message::PushPull {
                    join,
                    members,
                    state,
                })
            }
            other => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unknown message type: {other}"),
            )),
        }
    }
}

fn encode_string(buf: &mut BytesMut, s: &str) {
    let len = s.len().min(MAX_NAME_LEN);
    buf.put_u16_le(len as u16);
    buf.put_slice(&s.as_bytes()[..len]);
}

fn decode_string(buf: &mut &[u8]) -> io::Result<String> {
    let len = safe_get_u16_le(buf)? as usize;
    if len > MAX_NAME_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("name length {len} exceeds limit"),
        ));
    }
    if buf.len() < len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "not enough bytes for string",
        ));
    }
    let mut bytes = vec![0u8; len];
    buf.read_exact(&mut bytes)?;
    String::from_utf8(bytes)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "string is not utf-8"))
}

fn encode_blob(buf: &mut BytesMut, blob: &[u8]) {
    let len = blob.len().min(MAX_BLOB_LEN);
    buf.put_u32_le(len as u32);
    buf.put_slice(&blob[..len]);
}

fn decode_blob(buf: &mut &[u8]) -> io::Result<Bytes> {
    let len = safe_get_u32_le(buf)? as usize;
    if len > MAX_BLOB_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("blob length {len} exceeds limit"),
        ));
    }
    if buf.len() < len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "not enough bytes for blob",
        ));
    }
    let blob = Bytes::copy_from_slice(&buf[..len]);
    buf.advance(len);
    Ok(blob)
}

fn encode_socket_addr(buf: &mut BytesMut, addr: &SocketAddr) {
    match addr {
        SocketAddr::V4(v4) => {
            buf.put_u8(4);
            buf.put_slice(&v4.ip().octets());
            buf.put_u16_le(v4.port());
        }
        SocketAddr::V6(v6) => {
            buf.put_u8(6);
            buf.put_slice(&v6.ip().octets());
            buf.put_u16_le(v6.port());
        }
    }
}

fn decode_socket_addr(buf: &mut &[u8]) -> io::Result<SocketAddr> {
    let addr_type = safe_get_u8(buf)?;
    match addr_type {
        4 => {
            if buf.len() < 6 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "not enough bytes for ipv4 address",
                ));
            }
            let mut octets = [0u8; 4];
            buf.read_exact(&mut octets)?;
            let port = buf.get_u16_le();
            Ok(SocketAddr::from((octets, port)))
        }
        6 => {
            if buf.len() < 18 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "not enough bytes for ipv6 address",
                ));
            }
            let mut octets = [0u8; 16];
            buf.read_exact(&mut octets)?;
            let port = buf.get_u16_le();
            Ok(SocketAddr::from((octets, port)))
        }
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown address type: {other}"),
        )),
    }
}

fn encode_updates(buf: &mut BytesMut, updates: &[MemberUpdate]) {
    let count = updates.len().min(MAX_COLLECTION_COUNT);
    buf.put_u16_le(count as u16);
    for update in &updates[..count] {
        encode_update(buf, update);
    }
}

fn encode_update(buf: &mut BytesMut, update: &MemberUpdate) {
    match update {
        MemberUpdate::Alive {
            name,
            addr,
            incarnation,
            meta,
        } => {
            buf.put_u8(UPDATE_ALIVE);
            encode_string(buf, name);
            encode_socket_addr(buf, addr);
            buf.put_u64_le(*incarnation);
            encode_blob(buf, meta);
        }
        MemberUpdate::Suspect { name, incarnation } => {
            buf.put_u8(UPDATE_SUSPECT);
            encode_string(buf, name);
            buf.put_u64_le(*incarnation);
        }
        MemberUpdate::Dead { name, incarnation } => {
            buf.put_u8(UPDATE_DEAD);
            encode_string(buf, name);
            buf.put_u64_le(*incarnation);
        }
        MemberUpdate::Left { name } => {
            buf.put_u8(UPDATE_LEFT);
            encode_string(buf, name);
        }
    }
}

fn decode_updates(buf: &mut &[u8]) -> io::Result<Vec<MemberUpdate>> {
    let count = safe_get_u16_le(buf)? as usize;
    if count > MAX_COLLECTION_COUNT {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("update count {count} exceeds limit"),
        ));
    }
    let mut updates = Vec::with_capacity(count);
    for _ in 0..count {
        updates.push(decode_update(buf)?);
    }
    Ok(updates)
}

fn decode_update(buf: &mut &[u8]) -> io::Result<MemberUpdate> {
    let update_type = safe_get_u8(buf)?;
    match update_type {
        UPDATE_ALIVE => {
            let name = decode_string(buf)?;
            let addr = decode_socket_addr(buf)?;
            let incarnation = safe_get_u64_le(buf)?;
            let meta = decode_blob(buf)?;
            Ok(MemberUpdate::Alive {
                name,
                addr,
                incarnation,
                meta,
            })
        }
        UPDATE_SUSPECT => {
            let name = decode_string(buf)?;
            let incarnation = safe_get_u64_le(buf)?;
            Ok(MemberUpdate::Suspect { name, incarnation })
        }
        UPDATE_DEAD => {
            let name = decode_string(buf)?;
            let incarnation = safe_get_u64_le(buf)?;
            Ok(MemberUpdate::Dead { name, incarnation })
        }
        UPDATE_LEFT => {
            let name = decode_string(buf)?;
            Ok(MemberUpdate::Left { name })
        }
        other => Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("unknown update type: {other}"),
        )),
    }
}

fn encode_member_snapshot(buf: &mut BytesMut, member: &MemberSnapshot) {
    encode_string(buf, &member.name);
    encode_socket_addr(buf, &member.addr);
    buf.put_u64_le(member.incarnation);
    encode_blob(buf, &member.meta);
}

fn decode_member_snapshot(buf: &mut &[u8]) -> io::Result<MemberSnapshot> {
    let name = decode_string(buf)?;
    let addr = decode_socket_addr(buf)?;
    let incarnation = safe_get_u64_le(buf)?;
    let meta = decode_blob(buf)?;
    Ok(MemberSnapshot {
        name,
        addr,
        incarnation,
        meta,
    })
}
