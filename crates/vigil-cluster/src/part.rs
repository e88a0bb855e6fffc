//! The application-layer envelope carried over the gossip transport.
//!
//! Every replicated payload travels as a `Part { key, data }`: the key
//! names the registered state the bytes belong to, the data is opaque to
//! this layer. Encoding is a length-delimited record format (little-endian
//! prefixes); a Part-list is simply records back to back, which is what a
//! push/pull state snapshot contains.

use std::io::{self, Read};

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Longest accepted state key.
const MAX_KEY_LEN: usize = 256;

/// Largest accepted payload in one Part.
const MAX_DATA_LEN: usize = 64 * 1024 * 1024;

/// One keyed payload on the broadcast or push/pull path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    pub key: String,
    pub data: Bytes,
}

impl Part {
    pub fn new(key: impl Into<String>, data: impl Into<Bytes>) -> Self {
        Self {
            key: key.into(),
            data: data.into(),
        }
    }

    /// Serializes the Part to bytes.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(2 + self.key.len() + 4 + self.data.len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    fn encode_into(&self, buf: &mut BytesMut) {
        let key_len = self.key.len().min(MAX_KEY_LEN);
        buf.put_u16_le(key_len as u16);
        buf.put_slice(&self.key.as_bytes()[..key_len]);
        let data_len = self.data.len().min(MAX_DATA_LEN);
        buf.put_u32_le(data_len as u32);
        buf.put_slice(&self.data[..data_len]);
    }

    /// Deserializes a single Part, consuming it from the front of `buf`.
    pub fn decode(buf: &mut &[u8]) -> io::Result<Self> {
        if buf.len() < 2 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "need 2 bytes for key length",
            ));
        }
        let key_len = buf.get_u16_le() as usize;
        if key_len > MAX_KEY_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("key length {key_len} exceeds limit"),
            ));
        }
        if buf.len() < key_len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "not enough bytes for key",
            ));
        }
        let mut key_bytes = vec![0u8; key_len];
        buf.read_exact(&mut key_bytes)?;
        let key = String::from_utf8(key_bytes)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "key is not utf-8"))?;

        if buf.len() < 4 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "need 4 bytes for data length",
            ));
        }
        let data_len = buf.get_u32_le() as usize;
        if data_len > MAX_DATA_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("data length {data_len} exceeds limit"),
            ));
        }
        if buf.len() < data_len {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "not enough bytes for data",
            ));
        }
        let data = Bytes::copy_from_slice(&buf[..data_len]);
        buf.advance(data_len);

        Ok(Part { key, data })
    }
}

/// Encodes a Part-list: records back to back.
pub(crate) fn encode_parts(parts: &[Part]) -> Bytes {
    let mut buf = BytesMut::new();
    for part in parts {
        part.encode_into(&mut buf);
    }
    buf.freeze()
}

/// Decodes a Part-list until the buffer is exhausted.
pub(crate) fn decode_parts(mut buf: &[u8]) -> io::Result<Vec<Part>> {
    let mut parts = Vec::new();
    while !buf.is_empty() {
        parts.push(Part::decode(&mut buf)?);
    }
    Ok(parts)
}
