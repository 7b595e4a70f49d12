use serde::{Deserialize, Serialize};

use crate::chunk::CHUNK_DATA_SIZE;

/// Tunables of the transfer layer shared by every session a node runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Size of every chunk; a download session completes once this many bytes arrived.
    pub chunk_size: usize,
    /// Maximum number of concurrent upload sessions before requests are DENIED.
    pub max_conn: usize,
    /// Fixed retransmission timeout. When set, RTT samples are ignored.
    pub fixed_timeout_ms: Option<u64>,
    /// A request or transfer without progress for this long abandons its peer.
    pub session_timeout_ms: u64,
    /// Minimum gap between two discovery broadcasts for chunks with no candidates.
    pub rediscovery_ms: u64,
    /// Period of the event-loop tick that drives retransmission checks.
    pub poll_interval_ms: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: CHUNK_DATA_SIZE,
            max_conn: 4,
            fixed_timeout_ms: None,
            session_timeout_ms: 5_000,
            rediscovery_ms: 2_000,
            poll_interval_ms: 20,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferConfigOverride {
    pub chunk_size: Option<usize>,
    pub max_conn: Option<usize>,
    pub fixed_timeout_ms: Option<u64>,
    pub session_timeout_ms: Option<u64>,
    pub rediscovery_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
}

impl TransferConfigOverride {
    pub fn apply_to(&self, config: &mut TransferConfig) {
        if let Some(v) = self.chunk_size {
            config.chunk_size = v;
        }
        if let Some(v) = self.max_conn {
            config.max_conn = v;
        }
        if let Some(v) = self.fixed_timeout_ms {
            config.fixed_timeout_ms = Some(v);
        }
        if let Some(v) = self.session_timeout_ms {
            config.session_timeout_ms = v;
        }
        if let Some(v) = self.rediscovery_ms {
            config.rediscovery_ms = v;
        }
        if let Some(v) = self.poll_interval_ms {
            config.poll_interval_ms = v;
        }
    }
}

/// Behaviour of the simulated channel between nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimConfig {
    pub loss_rate: f64,
    pub corrupt_rate: f64,
    /// Probability that a datagram is delivered twice.
    pub duplicate_rate: f64,
    pub min_latency: u64,
    pub max_latency: u64,
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            corrupt_rate: 0.0,
            duplicate_rate: 0.0,
            min_latency: 10,
            max_latency: 10,
            seed: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SimConfigOverride {
    pub loss_rate: Option<f64>,
    pub corrupt_rate: Option<f64>,
    pub duplicate_rate: Option<f64>,
    pub min_latency: Option<u64>,
    pub max_latency: Option<u64>,
    pub seed: Option<u64>,
}

impl SimConfigOverride {
    pub fn apply_to(&self, config: &mut SimConfig) {
        if let Some(v) = self.loss_rate {
            config.loss_rate = v;
        }
        if let Some(v) = self.corrupt_rate {
            config.corrupt_rate = v;
        }
        if let Some(v) = self.duplicate_rate {
            config.duplicate_rate = v;
        }
        if let Some(v) = self.min_latency {
            config.min_latency = v;
        }
        if let Some(v) = self.max_latency {
            config.max_latency = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
    }
}
