use std::net::SocketAddr;

use swarm_abstract::{CompletedDownload, NodeContext, Packet, PacketType};

/// `NodeContext` double: a hand-driven clock and a log of everything sent.
#[derive(Default)]
pub struct RecordingContext {
    pub now: u64,
    pub sent: Vec<(SocketAddr, Packet)>,
    pub downloads: Vec<CompletedDownload>,
    pub metrics: Vec<(String, f64)>,
}

impl RecordingContext {
    pub fn advance(&mut self, ms: u64) {
        self.now += ms;
    }

    pub fn take_sent(&mut self) -> Vec<(SocketAddr, Packet)> {
        std::mem::take(&mut self.sent)
    }

    pub fn sent_of(&self, kind: PacketType) -> Vec<&(SocketAddr, Packet)> {
        self.sent.iter().filter(|(_, p)| p.kind() == kind).collect()
    }

    pub fn data_seqs(&self) -> Vec<u32> {
        self.sent_of(PacketType::Data)
            .into_iter()
            .map(|(_, p)| p.header.seq)
            .collect()
    }
}

impl NodeContext for RecordingContext {
    fn send_packet(&mut self, to: SocketAddr, packet: Packet) {
        self.sent.push((to, packet));
    }

    fn now(&self) -> u64 {
        self.now
    }

    fn deliver_download(&mut self, download: CompletedDownload) {
        self.downloads.push(download);
    }

    fn record_metric(&mut self, name: &str, value: f64) {
        self.metrics.push((name.to_string(), value));
    }
}

pub fn addr(port: u16) -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], port))
}
