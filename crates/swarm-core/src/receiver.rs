use std::net::SocketAddr;

use bytes::{Bytes, BytesMut};
use swarm_abstract::ChunkHash;

/// Download side of a chunk transfer. Accepts segments strictly in order;
/// anything else is dropped without an ack and left to the sender's timers.
#[derive(Debug)]
pub struct ReceiverSession {
    chunk_hash: ChunkHash,
    peer: SocketAddr,
    expected_seq: u32,
    data: BytesMut,
    chunk_size: usize,
    completed: bool,
}

impl ReceiverSession {
    pub fn new(chunk_hash: ChunkHash, peer: SocketAddr, chunk_size: usize) -> Self {
        Self {
            chunk_hash,
            peer,
            expected_seq: 1,
            data: BytesMut::with_capacity(chunk_size),
            chunk_size,
            completed: false,
        }
    }

    pub fn chunk_hash(&self) -> &ChunkHash {
        &self.chunk_hash
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn expected_seq(&self) -> u32 {
        self.expected_seq
    }

    pub fn received_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn is_complete(&self) -> bool {
        self.completed
    }

    /// Returns true if the segment was the next one expected and was appended;
    /// the caller then acks `seq`.
    pub fn add_data(&mut self, seq: u32, payload: &[u8]) -> bool {
        if seq != self.expected_seq {
            return false;
        }
        self.data.extend_from_slice(payload);
        self.expected_seq += 1;
        if self.data.len() >= self.chunk_size {
            self.completed = true;
        }
        true
    }

    pub fn into_bytes(self) -> Bytes {
        self.data.freeze()
    }
}
