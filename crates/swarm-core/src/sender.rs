//! Upload side of a chunk transfer.
//!
//! A [`SenderSession`] cuts one chunk into `MAX_PAYLOAD`-sized segments numbered
//! from 1 and pushes them through a congestion-controlled sliding window.
//!
//! ```text
//!  base_seq          next_seq_num
//!     │                  │
//! ────┼──────────────────┼──────────────────▶ segment numbers
//!     │ <── unacked ───▶ │ <── unsent ──────▶
//! ```
//!
//! Acks are per segment: the ack for `base_seq` slides the window by one. Acks
//! below `base_seq` count as duplicates and feed fast retransmit; the oldest
//! outstanding segment is also retransmitted when it outlives the RTO.

use std::collections::BTreeMap;
use std::net::SocketAddr;

use bytes::Bytes;
use swarm_abstract::{ChunkHash, MAX_PAYLOAD, NodeContext, Packet};
use tracing::debug;

use crate::congestion::CongestionController;
use crate::rtt::RttEstimator;

#[derive(Debug, Clone)]
struct InFlight {
    payload: Bytes,
    send_time: u64,
    was_retransmitted: bool,
}

/// What a single ack did to the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The window slid by this many segments.
    Advanced(u32),
    Duplicate,
    /// Third duplicate: the segment at `base_seq` was sent again.
    FastRetransmit,
    Ignored,
}

#[derive(Debug)]
pub struct SenderSession {
    chunk_hash: ChunkHash,
    peer: SocketAddr,
    segments: Vec<Bytes>,
    base_seq: u32,
    next_seq_num: u32,
    unacked: BTreeMap<u32, InFlight>,
    congestion: CongestionController,
    rtt: RttEstimator,
    last_progress: u64,
}

impl SenderSession {
    pub fn new(
        chunk_hash: ChunkHash,
        data: Bytes,
        peer: SocketAddr,
        rtt: RttEstimator,
        now: u64,
    ) -> Self {
        let segments = (0..data.len())
            .step_by(MAX_PAYLOAD)
            .map(|start| data.slice(start..(start + MAX_PAYLOAD).min(data.len())))
            .collect();
        Self {
            chunk_hash,
            peer,
            segments,
            base_seq: 1,
            next_seq_num: 1,
            unacked: BTreeMap::new(),
            congestion: CongestionController::new(),
            rtt,
            last_progress: now,
        }
    }

    pub fn chunk_hash(&self) -> &ChunkHash {
        &self.chunk_hash
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn base_seq(&self) -> u32 {
        self.base_seq
    }

    pub fn next_seq_num(&self) -> u32 {
        self.next_seq_num
    }

    pub fn in_flight(&self) -> u32 {
        self.next_seq_num - self.base_seq
    }

    pub fn congestion(&self) -> &CongestionController {
        &self.congestion
    }

    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    pub fn last_segment(&self) -> u32 {
        self.segments.len() as u32
    }

    pub fn is_complete(&self) -> bool {
        self.base_seq > self.last_segment()
    }

    /// Time of the last ack that moved the window (or session start).
    pub fn last_progress(&self) -> u64 {
        self.last_progress
    }

    pub fn send_new_packets(&mut self, ctx: &mut dyn NodeContext) {
        let window = self.congestion.window();
        while self.in_flight() < window && self.next_seq_num <= self.last_segment() {
            let seq = self.next_seq_num;
            let payload = self.segments[(seq - 1) as usize].clone();
            ctx.send_packet(self.peer, Packet::data(seq, payload.clone()));
            self.unacked.insert(
                seq,
                InFlight {
                    payload,
                    send_time: ctx.now(),
                    was_retransmitted: false,
                },
            );
            self.next_seq_num += 1;
        }
        ctx.record_metric("cwnd", self.congestion.cwnd());
    }

    pub fn handle_ack(&mut self, ctx: &mut dyn NodeContext, ack_num: u32) -> AckOutcome {
        if ack_num < self.base_seq {
            if self.congestion.on_duplicate_ack() {
                debug!(
                    "3 duplicate acks from {}, fast retransmit seq {}",
                    self.peer, self.base_seq
                );
                self.retransmit_base(ctx);
                ctx.record_metric("cwnd", self.congestion.cwnd());
                return AckOutcome::FastRetransmit;
            }
            return AckOutcome::Duplicate;
        }

        // The receiver only accepts segments in order, so an ack for an
        // outstanding segment above the base also covers everything below it.
        if !self.unacked.contains_key(&ack_num) {
            return AckOutcome::Ignored;
        }

        let now = ctx.now();
        let mut released = 0;
        while self.base_seq <= ack_num {
            if let Some(entry) = self.unacked.remove(&self.base_seq)
                && self.base_seq == ack_num
                && !entry.was_retransmitted
            {
                self.rtt
                    .observe(now.saturating_sub(entry.send_time) as f64 / 1000.0);
            }
            self.base_seq += 1;
            self.congestion.on_new_ack();
            released += 1;
        }
        self.last_progress = now;
        self.send_new_packets(ctx);
        AckOutcome::Advanced(released)
    }

    /// Retransmit the oldest outstanding segment if it outlived the RTO.
    /// Returns true when a retransmission happened.
    pub fn check_timeout(&mut self, ctx: &mut dyn NodeContext) -> bool {
        let Some(entry) = self.unacked.get(&self.base_seq) else {
            return false;
        };
        let age = ctx.now().saturating_sub(entry.send_time) as f64 / 1000.0;
        if age <= self.rtt.timeout_interval() {
            return false;
        }
        debug!(
            "timeout on seq {} to {} after {:.3}s (rto {:.3}s)",
            self.base_seq,
            self.peer,
            age,
            self.rtt.timeout_interval()
        );
        self.congestion.on_timeout();
        self.retransmit_base(ctx);
        ctx.record_metric("cwnd", self.congestion.cwnd());
        true
    }

    fn retransmit_base(&mut self, ctx: &mut dyn NodeContext) {
        let seq = self.base_seq;
        if let Some(entry) = self.unacked.get_mut(&seq) {
            ctx.send_packet(self.peer, Packet::data(seq, entry.payload.clone()));
            entry.send_time = ctx.now();
            entry.was_retransmitted = true;
        }
    }
}
