use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::chunk::{ChunkHash, HASH_LEN};

/// Width of the fixed header: `type:1 | header_len:1 | total_len:2 | seq:4 | ack:4`.
pub const HEADER_LEN: usize = 12;
/// Largest payload carried by a single packet.
pub const MAX_PAYLOAD: usize = 1024;
/// Receive buffer size; comfortably larger than `HEADER_LEN + MAX_PAYLOAD`.
pub const BUF_SIZE: usize = 1400;
/// Number of digests that fit into one discovery or offer packet.
pub const HASHES_PER_PACKET: usize = MAX_PAYLOAD / HASH_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    WhoHas = 0,
    IHave = 1,
    Get = 2,
    Data = 3,
    Ack = 4,
    Denied = 5,
}

impl TryFrom<u8> for PacketType {
    type Error = MalformedPacket;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => PacketType::WhoHas,
            1 => PacketType::IHave,
            2 => PacketType::Get,
            3 => PacketType::Data,
            4 => PacketType::Ack,
            5 => PacketType::Denied,
            other => return Err(MalformedPacket::UnknownType(other)),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedPacket {
    #[error("datagram of {0} bytes is shorter than the {header}-byte header", header = HEADER_LEN)]
    Truncated(usize),
    #[error("unknown packet type {0}")]
    UnknownType(u8),
    #[error("header claims lengths {header_len}/{total_len} but datagram has {actual} bytes")]
    BadLength {
        header_len: u8,
        total_len: u16,
        actual: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub kind: PacketType,
    /// Always `HEADER_LEN` for packets we build; honoured as the payload offset on decode.
    pub header_len: u8,
    /// Header plus payload, in bytes.
    pub total_len: u16,
    /// Segment number of a DATA packet (1-based). Zero elsewhere.
    pub seq: u32,
    /// Segment being acknowledged by an ACK packet. Zero elsewhere.
    pub ack: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: Header,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(kind: PacketType, seq: u32, ack: u32, payload: Bytes) -> Self {
        debug_assert!(payload.len() <= MAX_PAYLOAD, "payload exceeds MAX_PAYLOAD");
        Self {
            header: Header {
                kind,
                header_len: HEADER_LEN as u8,
                total_len: (HEADER_LEN + payload.len()) as u16,
                seq,
                ack,
            },
            payload,
        }
    }

    pub fn data(seq: u32, payload: Bytes) -> Self {
        Self::new(PacketType::Data, seq, 0, payload)
    }

    pub fn ack(ack: u32) -> Self {
        Self::new(PacketType::Ack, 0, ack, Bytes::new())
    }

    pub fn denied() -> Self {
        Self::new(PacketType::Denied, 0, 0, Bytes::new())
    }

    pub fn get(hash: &ChunkHash) -> Self {
        Self::new(
            PacketType::Get,
            0,
            0,
            Bytes::copy_from_slice(hash.as_bytes()),
        )
    }

    /// Build WHOHAS or IHAVE packets listing `hashes`, split so that no payload
    /// exceeds `MAX_PAYLOAD`. Returns no packets for an empty list.
    pub fn hash_list(kind: PacketType, hashes: &[ChunkHash]) -> Vec<Packet> {
        hashes
            .chunks(HASHES_PER_PACKET)
            .map(|group| {
                let mut payload = BytesMut::with_capacity(group.len() * HASH_LEN);
                for hash in group {
                    payload.put_slice(hash.as_bytes());
                }
                Self::new(kind, 0, 0, payload.freeze())
            })
            .collect()
    }

    pub fn kind(&self) -> PacketType {
        self.header.kind
    }

    /// Interpret the payload as a list of digests. Trailing bytes that do not
    /// form a whole digest are ignored.
    pub fn hashes(&self) -> impl Iterator<Item = ChunkHash> + '_ {
        self.payload
            .chunks_exact(HASH_LEN)
            .filter_map(|raw| ChunkHash::from_slice(raw))
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.payload.len());
        buf.put_u8(self.header.kind as u8);
        buf.put_u8(self.header.header_len);
        buf.put_u16(self.header.total_len);
        buf.put_u32(self.header.seq);
        buf.put_u32(self.header.ack);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    pub fn decode(datagram: &[u8]) -> Result<Packet, MalformedPacket> {
        if datagram.len() < HEADER_LEN {
            return Err(MalformedPacket::Truncated(datagram.len()));
        }
        let mut buf = datagram;
        let kind = PacketType::try_from(buf.get_u8())?;
        let header_len = buf.get_u8();
        let total_len = buf.get_u16();
        let seq = buf.get_u32();
        let ack = buf.get_u32();

        let (start, end) = (header_len as usize, total_len as usize);
        if start < HEADER_LEN || end < start || end > datagram.len() {
            return Err(MalformedPacket::BadLength {
                header_len,
                total_len,
                actual: datagram.len(),
            });
        }

        Ok(Packet {
            header: Header {
                kind,
                header_len,
                total_len,
                seq,
                ack,
            },
            payload: Bytes::copy_from_slice(&datagram[start..end]),
        })
    }
}
