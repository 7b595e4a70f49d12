use std::collections::BTreeMap;
use std::net::SocketAddr;

use bytes::Bytes;

use crate::chunk::ChunkHash;
use crate::packet::Packet;

/// Result of a finished DOWNLOAD: every requested chunk, plus the peer that
/// supplied each one that was fetched over the network.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletedDownload {
    pub chunks: BTreeMap<ChunkHash, Bytes>,
    /// Chunks that were already held locally have no entry here.
    pub sources: BTreeMap<ChunkHash, SocketAddr>,
}

/// The environment a node runs in: an unreliable datagram channel, a clock
/// and a place to hand finished downloads to.
///
/// Implemented by the real UDP event loop and by the simulator; the protocol
/// core only ever talks to this trait.
pub trait NodeContext {
    /// Queue a packet for the (possibly lossy) channel.
    fn send_packet(&mut self, to: SocketAddr, packet: Packet);

    /// Milliseconds on a monotonic clock. Only differences are meaningful.
    fn now(&self) -> u64;

    /// Called once when every chunk of the active download has been assembled.
    fn deliver_download(&mut self, download: CompletedDownload);

    /// Record a numeric sample (e.g. cwnd) for later inspection.
    fn record_metric(&mut self, _name: &str, _value: f64) {
        // Default no-op so environments without a metrics sink don't need to care.
    }
}
