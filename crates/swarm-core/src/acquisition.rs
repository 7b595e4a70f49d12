//! Per-chunk bookkeeping for a download: which peers offered the chunk, which
//! one is being asked right now, and when it last made progress.

use std::net::SocketAddr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquisitionStatus {
    /// Discovery sent; no usable offer yet (or every offering peer is busy).
    Searching,
    /// GET sent to `active_peer`, no data yet.
    Requesting,
    /// Data is flowing from `active_peer`.
    Transferring,
    Done,
}

#[derive(Debug, Clone)]
pub struct AcquisitionRecord {
    candidates: Vec<SocketAddr>,
    active_peer: Option<SocketAddr>,
    status: AcquisitionStatus,
    last_progress: u64,
}

impl AcquisitionRecord {
    pub fn new(now: u64) -> Self {
        Self {
            candidates: Vec::new(),
            active_peer: None,
            status: AcquisitionStatus::Searching,
            last_progress: now,
        }
    }

    pub fn status(&self) -> AcquisitionStatus {
        self.status
    }

    pub fn active_peer(&self) -> Option<SocketAddr> {
        self.active_peer
    }

    pub fn candidates(&self) -> &[SocketAddr] {
        &self.candidates
    }

    pub fn is_idle(&self) -> bool {
        self.active_peer.is_none()
    }

    /// Remember `peer` as a source, in order of first offer.
    pub fn offer(&mut self, peer: SocketAddr) -> bool {
        if self.candidates.contains(&peer) {
            return false;
        }
        self.candidates.push(peer);
        true
    }

    /// First candidate for which `busy` is false.
    pub fn next_candidate(&self, busy: impl Fn(&SocketAddr) -> bool) -> Option<SocketAddr> {
        self.candidates.iter().copied().find(|peer| !busy(peer))
    }

    pub fn begin_request(&mut self, peer: SocketAddr, now: u64) {
        self.active_peer = Some(peer);
        self.status = AcquisitionStatus::Requesting;
        self.last_progress = now;
    }

    pub fn record_progress(&mut self, now: u64) {
        if self.active_peer.is_some() {
            self.status = AcquisitionStatus::Transferring;
            self.last_progress = now;
        }
    }

    pub fn is_stalled(&self, now: u64, timeout_ms: u64) -> bool {
        self.active_peer.is_some() && now.saturating_sub(self.last_progress) > timeout_ms
    }

    /// Forget `peer` entirely. Returns true if it was the active source, in
    /// which case the record falls back to Searching until re-requested.
    pub fn abandon(&mut self, peer: SocketAddr) -> bool {
        self.candidates.retain(|c| *c != peer);
        if self.active_peer == Some(peer) {
            self.active_peer = None;
            self.status = AcquisitionStatus::Searching;
            return true;
        }
        false
    }
}
