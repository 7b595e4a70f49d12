//! TCP-Tahoe style congestion window.
//!
//! Slow start and congestion avoidance are implicit: the controller is in slow
//! start while `cwnd < ssthresh`. Any loss (timeout or the third duplicate ack)
//! halves the threshold and collapses the window back to one segment.

use tracing::debug;

pub const INITIAL_SSTHRESH: u32 = 64;
const MIN_SSTHRESH: u32 = 2;
const FAST_RETRANSMIT_DUP_ACKS: u32 = 3;

#[derive(Debug, Clone)]
pub struct CongestionController {
    cwnd: f64,
    ssthresh: u32,
    dup_ack_count: u32,
}

impl Default for CongestionController {
    fn default() -> Self {
        Self::new()
    }
}

impl CongestionController {
    pub fn new() -> Self {
        Self::with_ssthresh(INITIAL_SSTHRESH)
    }

    pub fn with_ssthresh(ssthresh: u32) -> Self {
        Self {
            cwnd: 1.0,
            ssthresh: ssthresh.max(MIN_SSTHRESH),
            dup_ack_count: 0,
        }
    }

    /// Window in whole segments. Fractional growth from congestion avoidance
    /// stays hidden until it adds up to a full segment.
    pub fn window(&self) -> u32 {
        self.cwnd as u32
    }

    pub fn cwnd(&self) -> f64 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    pub fn dup_ack_count(&self) -> u32 {
        self.dup_ack_count
    }

    pub fn in_slow_start(&self) -> bool {
        self.cwnd < self.ssthresh as f64
    }

    pub fn on_new_ack(&mut self) {
        self.dup_ack_count = 0;
        if self.in_slow_start() {
            self.cwnd += 1.0;
        } else {
            self.cwnd += 1.0 / self.cwnd;
        }
    }

    /// Returns true exactly when this ack is the third duplicate, i.e. the
    /// caller should fast-retransmit now. Further duplicates do not re-trigger
    /// until a new ack resets the count.
    pub fn on_duplicate_ack(&mut self) -> bool {
        self.dup_ack_count += 1;
        if self.dup_ack_count == FAST_RETRANSMIT_DUP_ACKS {
            self.enter_loss_recovery();
            return true;
        }
        false
    }

    pub fn on_timeout(&mut self) {
        self.enter_loss_recovery();
    }

    fn enter_loss_recovery(&mut self) {
        self.ssthresh = ((self.cwnd / 2.0).floor() as u32).max(MIN_SSTHRESH);
        debug!(
            "loss recovery: cwnd {:.2} -> 1, ssthresh -> {}",
            self.cwnd, self.ssthresh
        );
        self.cwnd = 1.0;
    }
}
