use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use swarm_abstract::{CompletedDownload, SimConfig};

use crate::engine::LinkEventSummary;

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub config: SimConfig,
    pub duration_ms: u64,
    pub packet_count: u64,
    /// Finished downloads keyed by node address.
    pub completed: BTreeMap<String, DownloadSummary>,
    pub metrics: HashMap<String, Vec<(u64, f64)>>,
    pub link_events: Vec<LinkEventSummary>,
}

/// Digest-level view of a finished download; chunk bytes are left out.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadSummary {
    pub total_bytes: usize,
    /// Hex digest of each chunk mapped to the address that supplied it, or
    /// `"local"` for chunks that were already held.
    pub sources: BTreeMap<String, String>,
}

impl From<&CompletedDownload> for DownloadSummary {
    fn from(download: &CompletedDownload) -> Self {
        let sources = download
            .chunks
            .keys()
            .map(|hash| {
                let source = download
                    .sources
                    .get(hash)
                    .map_or_else(|| "local".to_string(), |addr| addr.to_string());
                (hash.to_string(), source)
            })
            .collect();
        Self {
            total_bytes: download.chunks.values().map(|c| c.len()).sum(),
            sources,
        }
    }
}
