//! Routes inbound protocol messages to sessions and drives multi-source
//! acquisition of the chunks an operator asked for.
//!
//! The dispatcher owns every piece of mutable node state: the local inventory,
//! upload sessions (keyed by requesting peer), download sessions (keyed by
//! source peer) and one [`AcquisitionRecord`] per chunk still needed. At most
//! one session of each direction exists per remote peer; in particular a peer
//! is never sent a second GET while a download from it is pending.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::net::SocketAddr;

use bytes::Bytes;
use swarm_abstract::{
    ChunkHash, CompletedDownload, NodeContext, Packet, PacketType, TransferConfig,
};
use tracing::{debug, info, warn};

use crate::acquisition::{AcquisitionRecord, AcquisitionStatus};
use crate::error::DispatchError;
use crate::receiver::ReceiverSession;
use crate::rtt::RttEstimator;
use crate::sender::SenderSession;

pub struct Dispatcher {
    local: SocketAddr,
    peers: Vec<SocketAddr>,
    config: TransferConfig,
    inventory: HashMap<ChunkHash, Bytes>,
    uploads: HashMap<SocketAddr, SenderSession>,
    downloads: HashMap<SocketAddr, ReceiverSession>,
    acquisitions: BTreeMap<ChunkHash, AcquisitionRecord>,
    assembled: BTreeMap<ChunkHash, Bytes>,
    sources: BTreeMap<ChunkHash, SocketAddr>,
    last_discovery: u64,
}

impl Dispatcher {
    /// `peers` is the full peer directory; the local address is filtered out.
    pub fn new(
        local: SocketAddr,
        peers: impl IntoIterator<Item = SocketAddr>,
        inventory: HashMap<ChunkHash, Bytes>,
        config: TransferConfig,
    ) -> Self {
        Self {
            local,
            peers: peers.into_iter().filter(|p| *p != local).collect(),
            config,
            inventory,
            uploads: HashMap::new(),
            downloads: HashMap::new(),
            acquisitions: BTreeMap::new(),
            assembled: BTreeMap::new(),
            sources: BTreeMap::new(),
            last_discovery: 0,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    pub fn inventory(&self) -> &HashMap<ChunkHash, Bytes> {
        &self.inventory
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.len()
    }

    pub fn upload(&self, peer: &SocketAddr) -> Option<&SenderSession> {
        self.uploads.get(peer)
    }

    pub fn download_from(&self, peer: &SocketAddr) -> Option<&ReceiverSession> {
        self.downloads.get(peer)
    }

    pub fn is_downloading(&self) -> bool {
        !self.acquisitions.is_empty()
    }

    pub fn acquisition(&self, hash: &ChunkHash) -> Option<&AcquisitionRecord> {
        self.acquisitions.get(hash)
    }

    /// Status of a chunk in the current download; `Done` once it is held locally.
    pub fn acquisition_status(&self, hash: &ChunkHash) -> Option<AcquisitionStatus> {
        match self.acquisitions.get(hash) {
            Some(record) => Some(record.status()),
            None if self.inventory.contains_key(hash) => Some(AcquisitionStatus::Done),
            None => None,
        }
    }

    /// Begin acquiring `hashes`. Chunks already in the inventory count as
    /// assembled straight away. Returns how many chunks must be fetched.
    pub fn start_download(
        &mut self,
        ctx: &mut dyn NodeContext,
        hashes: impl IntoIterator<Item = ChunkHash>,
    ) -> Result<usize, DispatchError> {
        if !self.acquisitions.is_empty() {
            return Err(DispatchError::DownloadInProgress {
                remaining: self.acquisitions.len(),
            });
        }
        let requested: BTreeSet<ChunkHash> = hashes.into_iter().collect();
        if requested.is_empty() {
            return Err(DispatchError::EmptyRequest);
        }

        self.assembled.clear();
        self.sources.clear();
        let now = ctx.now();
        for hash in requested {
            match self.inventory.get(&hash) {
                Some(data) => {
                    self.assembled.insert(hash, data.clone());
                }
                None => {
                    self.acquisitions.insert(hash, AcquisitionRecord::new(now));
                }
            }
        }

        let needed: Vec<ChunkHash> = self.acquisitions.keys().copied().collect();
        info!(
            "download requested: {} chunks to fetch, {} held locally",
            needed.len(),
            self.assembled.len()
        );
        if needed.is_empty() {
            self.finish_download(ctx);
        } else {
            self.broadcast_discovery(ctx, &needed);
        }
        Ok(needed.len())
    }

    /// Entry point for raw datagrams off the channel.
    pub fn on_datagram(&mut self, ctx: &mut dyn NodeContext, from: SocketAddr, datagram: &[u8]) {
        match Packet::decode(datagram) {
            Ok(packet) => self.on_packet(ctx, from, packet),
            Err(err) => debug!("dropping datagram from {from}: {err}"),
        }
    }

    pub fn on_packet(&mut self, ctx: &mut dyn NodeContext, from: SocketAddr, packet: Packet) {
        debug!(
            "recv {:?} from {from} seq={} ack={} len={}",
            packet.kind(),
            packet.header.seq,
            packet.header.ack,
            packet.payload.len()
        );
        match packet.kind() {
            PacketType::WhoHas => self.handle_whohas(ctx, from, &packet),
            PacketType::IHave => self.handle_ihave(ctx, from, &packet),
            PacketType::Get => self.handle_get(ctx, from, &packet),
            PacketType::Data => self.handle_data(ctx, from, &packet),
            PacketType::Ack => self.handle_ack(ctx, from, &packet),
            PacketType::Denied => self.handle_denied(ctx, from),
        }
    }

    /// Periodic work: retransmission timers, stall detection and re-discovery.
    pub fn on_tick(&mut self, ctx: &mut dyn NodeContext) {
        let now = ctx.now();
        let stall_ms = self.config.session_timeout_ms;

        self.uploads.retain(|peer, session| {
            if now.saturating_sub(session.last_progress()) > stall_ms {
                warn!(
                    "upload of {} to {peer} made no progress for {stall_ms} ms, dropping it",
                    session.chunk_hash().short()
                );
                return false;
            }
            session.check_timeout(ctx);
            true
        });

        let stalled: Vec<(ChunkHash, SocketAddr)> = self
            .acquisitions
            .iter()
            .filter(|(_, record)| record.is_stalled(now, stall_ms))
            .filter_map(|(hash, record)| record.active_peer().map(|peer| (*hash, peer)))
            .collect();
        for (hash, peer) in &stalled {
            warn!(
                "chunk {} stalled on {peer} for {stall_ms} ms, trying another source",
                hash.short()
            );
            if let Some(record) = self.acquisitions.get_mut(hash) {
                record.abandon(*peer);
            }
            self.downloads.remove(peer);
        }
        if !stalled.is_empty() {
            self.schedule_requests(ctx);
        }

        self.rediscover(ctx);
    }

    fn handle_whohas(&mut self, ctx: &mut dyn NodeContext, from: SocketAddr, packet: &Packet) {
        // A peer we already serve holds its slot; its next GET replaces that upload.
        if !self.uploads.contains_key(&from) && self.uploads.len() >= self.config.max_conn {
            debug!(
                "denying {from}: {} uploads at limit {}",
                self.uploads.len(),
                self.config.max_conn
            );
            ctx.send_packet(from, Packet::denied());
            return;
        }
        let held: Vec<ChunkHash> = packet
            .hashes()
            .filter(|hash| self.inventory.contains_key(hash))
            .collect();
        if held.is_empty() {
            return;
        }
        debug!("offering {} chunks to {from}", held.len());
        for offer in Packet::hash_list(PacketType::IHave, &held) {
            ctx.send_packet(from, offer);
        }
    }

    fn handle_ihave(&mut self, ctx: &mut dyn NodeContext, from: SocketAddr, packet: &Packet) {
        for hash in packet.hashes() {
            if let Some(record) = self.acquisitions.get_mut(&hash)
                && record.offer(from)
            {
                debug!("{from} offers chunk {}", hash.short());
            }
        }
        self.schedule_requests(ctx);
    }

    fn handle_get(&mut self, ctx: &mut dyn NodeContext, from: SocketAddr, packet: &Packet) {
        let Some(hash) = packet.hashes().next() else {
            return;
        };
        let Some(data) = self.inventory.get(&hash).cloned() else {
            debug!("{from} asked for chunk {} which we do not hold", hash.short());
            return;
        };
        if let Some(existing) = self.uploads.get(&from) {
            if *existing.chunk_hash() == hash {
                debug!("{from} repeated its GET for {}, ignoring", hash.short());
                return;
            }
            info!(
                "{from} moved on from chunk {}, dropping that upload",
                existing.chunk_hash().short()
            );
            self.uploads.remove(&from);
        }
        if self.uploads.len() >= self.config.max_conn {
            ctx.send_packet(from, Packet::denied());
            return;
        }

        let rtt = RttEstimator::from_override(self.config.fixed_timeout_ms);
        let mut session = SenderSession::new(hash, data, from, rtt, ctx.now());
        session.send_new_packets(ctx);
        if session.is_complete() {
            return;
        }
        info!(
            "uploading chunk {} to {from} ({} segments)",
            hash.short(),
            session.last_segment()
        );
        self.uploads.insert(from, session);
    }

    fn handle_data(&mut self, ctx: &mut dyn NodeContext, from: SocketAddr, packet: &Packet) {
        let Some(session) = self.downloads.get_mut(&from) else {
            return;
        };
        let seq = packet.header.seq;
        if !session.add_data(seq, &packet.payload) {
            debug!(
                "dropping seq {seq} from {from}, expecting {}",
                session.expected_seq()
            );
            return;
        }
        ctx.send_packet(from, Packet::ack(seq));

        let hash = *session.chunk_hash();
        let complete = session.is_complete();
        if let Some(record) = self.acquisitions.get_mut(&hash) {
            record.record_progress(ctx.now());
        }
        if complete && let Some(session) = self.downloads.remove(&from) {
            let data = session.into_bytes();
            if ChunkHash::of(&data) != hash {
                warn!(
                    "chunk {} from {from} failed digest check, trying another source",
                    hash.short()
                );
                if let Some(record) = self.acquisitions.get_mut(&hash) {
                    record.abandon(from);
                }
                self.schedule_requests(ctx);
                return;
            }
            self.complete_chunk(ctx, hash, from, data);
        }
    }

    fn handle_ack(&mut self, ctx: &mut dyn NodeContext, from: SocketAddr, packet: &Packet) {
        let Some(session) = self.uploads.get_mut(&from) else {
            return;
        };
        session.handle_ack(ctx, packet.header.ack);
        if session.is_complete() {
            info!(
                "finished uploading chunk {} to {from}",
                session.chunk_hash().short()
            );
            self.uploads.remove(&from);
        }
    }

    /// DENIED names no chunk, so it can only refuse a GET still waiting for
    /// its first DATA. Transfers already under way are left alone.
    fn handle_denied(&mut self, ctx: &mut dyn NodeContext, from: SocketAddr) {
        let mut refused = false;
        for (hash, record) in self.acquisitions.iter_mut() {
            if record.active_peer() == Some(from)
                && record.status() == AcquisitionStatus::Requesting
                && record.abandon(from)
            {
                info!("{from} refused chunk {}, failing over", hash.short());
                refused = true;
            }
        }
        if refused {
            self.downloads.remove(&from);
        }
        self.schedule_requests(ctx);
        self.rediscover(ctx);
    }

    /// Hand every idle record to its first candidate not already serving us.
    fn schedule_requests(&mut self, ctx: &mut dyn NodeContext) {
        let now = ctx.now();
        for (hash, record) in self.acquisitions.iter_mut() {
            if !record.is_idle() {
                continue;
            }
            let Some(peer) = record.next_candidate(|p| self.downloads.contains_key(p)) else {
                continue;
            };
            debug!("requesting chunk {} from {peer}", hash.short());
            record.begin_request(peer, now);
            self.downloads.insert(
                peer,
                ReceiverSession::new(*hash, peer, self.config.chunk_size),
            );
            ctx.send_packet(peer, Packet::get(hash));
        }
    }

    /// Re-broadcast discovery for chunks nobody has offered, at most once per
    /// `rediscovery_ms`.
    fn rediscover(&mut self, ctx: &mut dyn NodeContext) {
        if ctx.now().saturating_sub(self.last_discovery) < self.config.rediscovery_ms {
            return;
        }
        let orphaned: Vec<ChunkHash> = self
            .acquisitions
            .iter()
            .filter(|(_, record)| record.is_idle() && record.candidates().is_empty())
            .map(|(hash, _)| *hash)
            .collect();
        if orphaned.is_empty() {
            return;
        }
        info!("no sources left for {} chunks, re-broadcasting", orphaned.len());
        self.broadcast_discovery(ctx, &orphaned);
    }

    fn broadcast_discovery(&mut self, ctx: &mut dyn NodeContext, hashes: &[ChunkHash]) {
        let packets = Packet::hash_list(PacketType::WhoHas, hashes);
        for peer in &self.peers {
            for packet in &packets {
                ctx.send_packet(*peer, packet.clone());
            }
        }
        self.last_discovery = ctx.now();
    }

    fn complete_chunk(
        &mut self,
        ctx: &mut dyn NodeContext,
        hash: ChunkHash,
        from: SocketAddr,
        data: Bytes,
    ) {
        info!("completed chunk {} ({} bytes) from {from}", hash.short(), data.len());
        self.acquisitions.remove(&hash);
        self.inventory.insert(hash, data.clone());
        self.assembled.insert(hash, data);
        self.sources.insert(hash, from);

        if self.acquisitions.is_empty() {
            self.finish_download(ctx);
        } else {
            self.schedule_requests(ctx);
        }
    }

    fn finish_download(&mut self, ctx: &mut dyn NodeContext) {
        let download = CompletedDownload {
            chunks: std::mem::take(&mut self.assembled),
            sources: std::mem::take(&mut self.sources),
        };
        info!("download complete: {} chunks", download.chunks.len());
        ctx.deliver_download(download);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{RecordingContext, addr};
    use swarm_abstract::MAX_PAYLOAD;

    const CHUNK_SIZE: usize = MAX_PAYLOAD * 3;

    fn hash(tag: u8) -> ChunkHash {
        ChunkHash::of(&content(tag))
    }

    fn content(tag: u8) -> Bytes {
        Bytes::from(vec![tag; CHUNK_SIZE])
    }

    fn config() -> TransferConfig {
        TransferConfig {
            chunk_size: CHUNK_SIZE,
            max_conn: 2,
            session_timeout_ms: 1_000,
            rediscovery_ms: 500,
            ..Default::default()
        }
    }

    fn node(port: u16, tags: &[u8], peers: &[u16]) -> Dispatcher {
        let inventory = tags.iter().map(|t| (hash(*t), content(*t))).collect();
        Dispatcher::new(
            addr(port),
            peers.iter().map(|p| addr(*p)),
            inventory,
            config(),
        )
    }

    fn hash_packet(kind: PacketType, tags: &[u8]) -> Packet {
        let hashes: Vec<ChunkHash> = tags.iter().map(|t| hash(*t)).collect();
        Packet::hash_list(kind, &hashes).remove(0)
    }

    /// Deliver queued packets between in-memory nodes until the network is quiet.
    fn run_network(nodes: &mut [(Dispatcher, RecordingContext)]) {
        for _ in 0..10_000 {
            let mut in_flight = Vec::new();
            for (dispatcher, ctx) in nodes.iter_mut() {
                let from = dispatcher.local_addr();
                for (to, packet) in ctx.take_sent() {
                    in_flight.push((from, to, packet.encode()));
                }
            }
            if in_flight.is_empty() {
                return;
            }
            for (from, to, wire) in in_flight {
                if let Some((dispatcher, ctx)) =
                    nodes.iter_mut().find(|(d, _)| d.local_addr() == to)
                {
                    ctx.advance(1);
                    dispatcher.on_datagram(ctx, from, &wire);
                }
            }
        }
        panic!("network never went quiet");
    }

    #[test]
    fn start_download_broadcasts_to_every_other_peer() {
        let mut d = node(1, &[], &[1, 2, 3]);
        let mut ctx = RecordingContext::default();
        assert_eq!(d.start_download(&mut ctx, [hash(7), hash(8)]), Ok(2));

        let whohas = ctx.sent_of(PacketType::WhoHas);
        let targets: Vec<SocketAddr> = whohas.iter().map(|(to, _)| *to).collect();
        assert_eq!(targets, vec![addr(2), addr(3)]);
        assert_eq!(whohas[0].1.hashes().count(), 2);
        assert_eq!(
            d.acquisition_status(&hash(7)),
            Some(AcquisitionStatus::Searching)
        );
    }

    #[test]
    fn rejects_empty_and_overlapping_downloads() {
        let mut d = node(1, &[], &[2]);
        let mut ctx = RecordingContext::default();
        assert_eq!(
            d.start_download(&mut ctx, Vec::new()),
            Err(DispatchError::EmptyRequest)
        );
        d.start_download(&mut ctx, [hash(7)]).unwrap();
        assert_eq!(
            d.start_download(&mut ctx, [hash(8)]),
            Err(DispatchError::DownloadInProgress { remaining: 1 })
        );
    }

    #[test]
    fn locally_held_chunks_complete_without_network() {
        let mut d = node(1, &[5], &[2]);
        let mut ctx = RecordingContext::default();
        assert_eq!(d.start_download(&mut ctx, [hash(5)]), Ok(0));
        assert!(ctx.sent.is_empty());
        assert_eq!(ctx.downloads.len(), 1);
        assert_eq!(ctx.downloads[0].chunks[&hash(5)], content(5));
        assert!(ctx.downloads[0].sources.is_empty());
    }

    #[test]
    fn whohas_is_answered_with_held_subset() {
        let mut d = node(1, &[1, 2], &[]);
        let mut ctx = RecordingContext::default();

        d.on_packet(&mut ctx, addr(9), hash_packet(PacketType::WhoHas, &[2, 3]));
        let offers = ctx.sent_of(PacketType::IHave);
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].0, addr(9));
        assert_eq!(offers[0].1.hashes().collect::<Vec<_>>(), vec![hash(2)]);

        ctx.take_sent();
        d.on_packet(&mut ctx, addr(9), hash_packet(PacketType::WhoHas, &[3]));
        assert!(ctx.sent.is_empty());
    }

    #[test]
    fn whohas_is_denied_at_admission_limit() {
        let mut d = node(1, &[1], &[]);
        let mut ctx = RecordingContext::default();
        d.on_packet(&mut ctx, addr(2), Packet::get(&hash(1)));
        d.on_packet(&mut ctx, addr(3), Packet::get(&hash(1)));
        assert_eq!(d.upload_count(), 2);
        ctx.take_sent();

        d.on_packet(&mut ctx, addr(4), hash_packet(PacketType::WhoHas, &[1]));
        assert_eq!(ctx.sent_of(PacketType::Denied).len(), 1);
        assert!(ctx.sent_of(PacketType::IHave).is_empty());
    }

    #[test]
    fn whohas_from_peer_being_served_is_answered_at_limit() {
        let mut d = Dispatcher::new(
            addr(1),
            Vec::new(),
            [(hash(1), content(1)), (hash(2), content(2))].into_iter().collect(),
            TransferConfig {
                max_conn: 1,
                ..config()
            },
        );
        let mut ctx = RecordingContext::default();
        d.on_packet(&mut ctx, addr(2), Packet::get(&hash(1)));
        assert_eq!(d.upload_count(), 1);
        ctx.take_sent();

        d.on_packet(&mut ctx, addr(2), hash_packet(PacketType::WhoHas, &[2]));
        let offers = ctx.sent_of(PacketType::IHave);
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].1.hashes().collect::<Vec<_>>(), vec![hash(2)]);
        assert!(ctx.sent_of(PacketType::Denied).is_empty());

        ctx.take_sent();
        d.on_packet(&mut ctx, addr(3), hash_packet(PacketType::WhoHas, &[2]));
        assert_eq!(ctx.sent_of(PacketType::Denied).len(), 1);
    }

    #[test]
    fn get_starts_upload_once_per_peer() {
        let mut d = node(1, &[1, 2], &[]);
        let mut ctx = RecordingContext::default();

        d.on_packet(&mut ctx, addr(2), Packet::get(&hash(9)));
        assert!(ctx.sent.is_empty());
        assert_eq!(d.upload_count(), 0);

        d.on_packet(&mut ctx, addr(2), Packet::get(&hash(1)));
        assert_eq!(ctx.data_seqs(), vec![1]);
        assert_eq!(d.upload(&addr(2)).map(|s| *s.chunk_hash()), Some(hash(1)));

        d.on_packet(&mut ctx, addr(2), Packet::get(&hash(1)));
        assert_eq!(ctx.data_seqs(), vec![1]);
        assert_eq!(d.upload_count(), 1);
    }

    #[test]
    fn get_for_other_chunk_replaces_upload() {
        let mut d = node(1, &[1, 2], &[]);
        let mut ctx = RecordingContext::default();
        d.on_packet(&mut ctx, addr(2), Packet::get(&hash(1)));
        d.on_packet(&mut ctx, addr(2), Packet::get(&hash(2)));
        assert_eq!(ctx.data_seqs(), vec![1, 1]);
        assert_eq!(d.upload_count(), 1);
        assert_eq!(d.upload(&addr(2)).map(|s| *s.chunk_hash()), Some(hash(2)));
    }

    #[test]
    fn chunk_failing_digest_check_is_discarded() {
        let mut d = Dispatcher::new(
            addr(1),
            [addr(2), addr(3)],
            HashMap::new(),
            TransferConfig {
                chunk_size: 4,
                ..config()
            },
        );
        let wanted = ChunkHash::of(b"good");
        let mut ctx = RecordingContext::default();
        d.start_download(&mut ctx, [wanted]).unwrap();
        let offer = Packet::hash_list(PacketType::IHave, &[wanted]).remove(0);
        d.on_packet(&mut ctx, addr(2), offer.clone());
        d.on_packet(&mut ctx, addr(3), offer);
        ctx.take_sent();

        d.on_packet(&mut ctx, addr(2), Packet::data(1, Bytes::from_static(b"evil")));
        assert!(ctx.downloads.is_empty());
        let gets = ctx.sent_of(PacketType::Get);
        assert_eq!(gets.len(), 1);
        assert_eq!(gets[0].0, addr(3));

        d.on_packet(&mut ctx, addr(3), Packet::data(1, Bytes::from_static(b"good")));
        assert_eq!(ctx.downloads.len(), 1);
        assert_eq!(ctx.downloads[0].sources[&wanted], addr(3));
    }

    #[test]
    fn get_over_limit_is_denied() {
        let mut d = node(1, &[1], &[]);
        let mut ctx = RecordingContext::default();
        for port in [2, 3] {
            d.on_packet(&mut ctx, addr(port), Packet::get(&hash(1)));
        }
        ctx.take_sent();
        d.on_packet(&mut ctx, addr(4), Packet::get(&hash(1)));
        assert_eq!(ctx.sent_of(PacketType::Denied).len(), 1);
        assert_eq!(d.upload_count(), 2);
    }

    #[test]
    fn offers_request_one_chunk_per_peer() {
        let mut d = node(1, &[], &[2]);
        let mut ctx = RecordingContext::default();
        d.start_download(&mut ctx, [hash(1), hash(2)]).unwrap();
        ctx.take_sent();

        d.on_packet(&mut ctx, addr(2), hash_packet(PacketType::IHave, &[1, 2]));
        let gets = ctx.sent_of(PacketType::Get);
        assert_eq!(gets.len(), 1);
        let requested = gets[0].1.hashes().next().unwrap();
        let waiting = if requested == hash(1) { hash(2) } else { hash(1) };
        assert_eq!(
            d.acquisition_status(&requested),
            Some(AcquisitionStatus::Requesting)
        );
        let other = d.acquisition(&waiting).unwrap();
        assert_eq!(other.status(), AcquisitionStatus::Searching);
        assert_eq!(other.candidates(), &[addr(2)]);
    }

    #[test]
    fn offers_for_unneeded_chunks_are_ignored() {
        let mut d = node(1, &[], &[2]);
        let mut ctx = RecordingContext::default();
        d.on_packet(&mut ctx, addr(2), hash_packet(PacketType::IHave, &[1]));
        assert!(ctx.sent.is_empty());
    }

    #[test]
    fn out_of_order_data_is_not_acked() {
        let mut d = node(1, &[], &[2]);
        let mut ctx = RecordingContext::default();
        d.start_download(&mut ctx, [hash(1)]).unwrap();
        d.on_packet(&mut ctx, addr(2), hash_packet(PacketType::IHave, &[1]));
        ctx.take_sent();

        d.on_packet(&mut ctx, addr(2), Packet::data(2, Bytes::from(vec![1; MAX_PAYLOAD])));
        assert!(ctx.sent.is_empty());

        d.on_packet(&mut ctx, addr(2), Packet::data(1, Bytes::from(vec![1; MAX_PAYLOAD])));
        let acks = ctx.sent_of(PacketType::Ack);
        assert_eq!(acks.len(), 1);
        assert_eq!(acks[0].1.header.ack, 1);
        assert_eq!(
            d.acquisition_status(&hash(1)),
            Some(AcquisitionStatus::Transferring)
        );
    }

    #[test]
    fn data_from_unknown_peer_is_ignored() {
        let mut d = node(1, &[], &[2]);
        let mut ctx = RecordingContext::default();
        d.on_packet(&mut ctx, addr(2), Packet::data(1, Bytes::from_static(b"x")));
        assert!(ctx.sent.is_empty());
    }

    #[test]
    fn malformed_datagram_is_dropped_silently() {
        let mut d = node(1, &[1], &[2]);
        let mut ctx = RecordingContext::default();
        d.on_datagram(&mut ctx, addr(2), &[0, 12, 0]);
        d.on_datagram(&mut ctx, addr(2), &[42; 16]);
        assert!(ctx.sent.is_empty());
    }

    #[test]
    fn two_nodes_transfer_a_chunk() {
        let mut nodes = vec![
            (node(1, &[], &[1, 2]), RecordingContext::default()),
            (node(2, &[7], &[1, 2]), RecordingContext::default()),
        ];
        {
            let (d, ctx) = &mut nodes[0];
            d.start_download(ctx, [hash(7)]).unwrap();
        }
        run_network(&mut nodes);

        let (downloader, ctx) = &nodes[0];
        assert_eq!(ctx.downloads.len(), 1);
        assert_eq!(ctx.downloads[0].chunks[&hash(7)], content(7));
        assert_eq!(ctx.downloads[0].sources[&hash(7)], addr(2));
        assert!(!downloader.is_downloading());
        assert!(downloader.inventory().contains_key(&hash(7)));
        assert_eq!(
            downloader.acquisition_status(&hash(7)),
            Some(AcquisitionStatus::Done)
        );
        assert_eq!(nodes[1].0.upload_count(), 0);
    }

    #[test]
    fn chunks_from_two_sources_download_concurrently() {
        let mut nodes = vec![
            (node(1, &[], &[1, 2, 3]), RecordingContext::default()),
            (node(2, &[7], &[1, 2, 3]), RecordingContext::default()),
            (node(3, &[8], &[1, 2, 3]), RecordingContext::default()),
        ];
        {
            let (d, ctx) = &mut nodes[0];
            d.start_download(ctx, [hash(7), hash(8)]).unwrap();
        }
        run_network(&mut nodes);

        let download = &nodes[0].1.downloads[0];
        assert_eq!(download.chunks.len(), 2);
        assert_eq!(download.sources[&hash(7)], addr(2));
        assert_eq!(download.sources[&hash(8)], addr(3));
    }

    #[test]
    fn refusal_fails_over_to_next_candidate() {
        let mut d = node(1, &[], &[2, 3]);
        let mut ctx = RecordingContext::default();
        d.start_download(&mut ctx, [hash(1)]).unwrap();
        d.on_packet(&mut ctx, addr(2), hash_packet(PacketType::IHave, &[1]));
        d.on_packet(&mut ctx, addr(3), hash_packet(PacketType::IHave, &[1]));
        assert_eq!(d.acquisition(&hash(1)).unwrap().active_peer(), Some(addr(2)));
        ctx.take_sent();

        d.on_packet(&mut ctx, addr(2), Packet::denied());
        let gets = ctx.sent_of(PacketType::Get);
        assert_eq!(gets.len(), 1);
        assert_eq!(gets[0].0, addr(3));
        let record = d.acquisition(&hash(1)).unwrap();
        assert_eq!(record.active_peer(), Some(addr(3)));
        assert_eq!(record.candidates(), &[addr(3)]);
        assert!(d.download_from(&addr(2)).is_none());
    }

    #[test]
    fn rediscovery_leaves_running_transfer_alone() {
        let mut uploader = Dispatcher::new(
            addr(2),
            [addr(1)],
            [(hash(7), content(7))].into_iter().collect(),
            TransferConfig {
                max_conn: 1,
                ..config()
            },
        );
        let mut up = RecordingContext::default();
        let mut d = node(1, &[], &[2]);
        let mut ctx = RecordingContext::default();

        d.start_download(&mut ctx, [hash(7), hash(8)]).unwrap();
        for (_, packet) in ctx.take_sent() {
            uploader.on_packet(&mut up, addr(1), packet);
        }
        for (_, packet) in up.take_sent() {
            d.on_packet(&mut ctx, addr(2), packet);
        }
        for (_, packet) in ctx.take_sent() {
            uploader.on_packet(&mut up, addr(1), packet);
        }
        for (_, packet) in up.take_sent() {
            d.on_packet(&mut ctx, addr(2), packet);
        }
        assert_eq!(
            d.acquisition_status(&hash(7)),
            Some(AcquisitionStatus::Transferring)
        );
        assert_eq!(uploader.upload_count(), 1);
        ctx.take_sent();

        ctx.advance(500);
        d.on_tick(&mut ctx);
        let whohas = ctx.sent_of(PacketType::WhoHas);
        assert_eq!(whohas.len(), 1);
        assert_eq!(whohas[0].1.hashes().collect::<Vec<_>>(), vec![hash(8)]);
        for (_, packet) in ctx.take_sent() {
            uploader.on_packet(&mut up, addr(1), packet);
        }
        assert!(up.sent.is_empty());

        // a stray refusal must not tear down the running transfer either
        d.on_packet(&mut ctx, addr(2), Packet::denied());
        let record = d.acquisition(&hash(7)).unwrap();
        assert_eq!(record.status(), AcquisitionStatus::Transferring);
        assert_eq!(record.active_peer(), Some(addr(2)));
        assert_eq!(record.candidates(), &[addr(2)]);
        assert!(d.download_from(&addr(2)).is_some());
        assert!(ctx.sent_of(PacketType::Get).is_empty());
    }

    #[test]
    fn exhausted_candidates_rediscover_after_interval() {
        let mut d = node(1, &[], &[2, 3]);
        let mut ctx = RecordingContext::default();
        d.start_download(&mut ctx, [hash(1)]).unwrap();
        d.on_packet(&mut ctx, addr(2), hash_packet(PacketType::IHave, &[1]));
        ctx.take_sent();

        d.on_packet(&mut ctx, addr(2), Packet::denied());
        assert!(ctx.sent.is_empty());
        assert_eq!(
            d.acquisition_status(&hash(1)),
            Some(AcquisitionStatus::Searching)
        );

        ctx.advance(500);
        d.on_tick(&mut ctx);
        assert_eq!(ctx.sent_of(PacketType::WhoHas).len(), 2);

        ctx.take_sent();
        ctx.advance(100);
        d.on_tick(&mut ctx);
        assert!(ctx.sent.is_empty());
    }

    #[test]
    fn stalled_request_moves_to_next_candidate() {
        let mut d = node(1, &[], &[2, 3]);
        let mut ctx = RecordingContext::default();
        d.start_download(&mut ctx, [hash(1)]).unwrap();
        d.on_packet(&mut ctx, addr(2), hash_packet(PacketType::IHave, &[1]));
        d.on_packet(&mut ctx, addr(3), hash_packet(PacketType::IHave, &[1]));
        ctx.take_sent();

        ctx.advance(1_000);
        d.on_tick(&mut ctx);
        assert!(ctx.sent_of(PacketType::Get).is_empty());

        ctx.advance(1);
        d.on_tick(&mut ctx);
        let gets = ctx.sent_of(PacketType::Get);
        assert_eq!(gets.len(), 1);
        assert_eq!(gets[0].0, addr(3));
    }

    #[test]
    fn tick_retransmits_and_eventually_drops_silent_upload() {
        let mut d = node(1, &[1], &[]);
        let mut ctx = RecordingContext::default();
        d.on_packet(&mut ctx, addr(2), Packet::get(&hash(1)));
        ctx.take_sent();

        ctx.advance(600);
        d.on_tick(&mut ctx);
        assert!(ctx.sent.is_empty());

        ctx.advance(1_000);
        // past the 1.5s initial timeout, but also past the 1s stall limit
        d.on_tick(&mut ctx);
        assert_eq!(d.upload_count(), 0);
    }

    #[test]
    fn tick_retransmits_oldest_segment() {
        let mut d = Dispatcher::new(
            addr(1),
            Vec::new(),
            [(hash(1), content(1))].into_iter().collect(),
            TransferConfig {
                chunk_size: CHUNK_SIZE,
                fixed_timeout_ms: Some(200),
                ..Default::default()
            },
        );
        let mut ctx = RecordingContext::default();
        d.on_packet(&mut ctx, addr(2), Packet::get(&hash(1)));
        ctx.take_sent();

        ctx.advance(201);
        d.on_tick(&mut ctx);
        assert_eq!(ctx.data_seqs(), vec![1]);
        assert_eq!(d.upload_count(), 1);
    }
}
