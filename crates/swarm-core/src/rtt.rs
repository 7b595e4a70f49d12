//! Retransmission timeout estimation.
//!
//! Karn's rule is enforced by the caller: only segments that were never
//! retransmitted may produce a sample.

const INITIAL_ESTIMATED_RTT: f64 = 0.5;
const INITIAL_DEV_RTT: f64 = 0.25;
const ALPHA: f64 = 0.15;
const BETA: f64 = 0.30;

#[derive(Debug, Clone)]
pub struct RttEstimator {
    estimated_rtt: f64,
    dev_rtt: f64,
    timeout_interval: f64,
    fixed: bool,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl RttEstimator {
    pub fn new() -> Self {
        Self {
            estimated_rtt: INITIAL_ESTIMATED_RTT,
            dev_rtt: INITIAL_DEV_RTT,
            timeout_interval: INITIAL_ESTIMATED_RTT + 4.0 * INITIAL_DEV_RTT,
            fixed: false,
        }
    }

    /// Estimator pinned to an operator-supplied timeout; samples are ignored.
    pub fn fixed(timeout_secs: f64) -> Self {
        Self {
            timeout_interval: timeout_secs,
            fixed: true,
            ..Self::new()
        }
    }

    pub fn from_override(fixed_timeout_ms: Option<u64>) -> Self {
        match fixed_timeout_ms {
            Some(ms) => Self::fixed(ms as f64 / 1000.0),
            None => Self::new(),
        }
    }

    pub fn estimated_rtt(&self) -> f64 {
        self.estimated_rtt
    }

    pub fn dev_rtt(&self) -> f64 {
        self.dev_rtt
    }

    /// Current retransmission timeout in seconds.
    pub fn timeout_interval(&self) -> f64 {
        self.timeout_interval
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed
    }

    pub fn observe(&mut self, sample_secs: f64) {
        if self.fixed {
            return;
        }
        self.estimated_rtt = (1.0 - ALPHA) * self.estimated_rtt + ALPHA * sample_secs;
        // deviation is measured against the freshly updated estimate
        self.dev_rtt =
            (1.0 - BETA) * self.dev_rtt + BETA * (sample_secs - self.estimated_rtt).abs();
        self.timeout_interval = self.estimated_rtt + 4.0 * self.dev_rtt;
    }
}
