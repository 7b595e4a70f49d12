use serde::Deserialize;

use crate::config::{SimConfigOverride, TransferConfigOverride};

#[derive(Deserialize, Debug, Clone)]
pub struct TestScenario {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub config: SimConfigOverride,
    #[serde(default)]
    pub transfer: TransferConfigOverride,
    pub peers: Vec<PeerSpec>,
    pub actions: Vec<TestAction>,
    pub assertions: Vec<TestAssertion>,
}

/// One node of the simulated swarm. Chunks are referred to by index; their
/// content is derived deterministically from the index.
#[derive(Deserialize, Debug, Clone)]
pub struct PeerSpec {
    pub id: u32,
    #[serde(default)]
    pub chunks: Vec<u32>,
    /// Admission limit for this peer, overriding the scenario-wide value.
    pub max_conn: Option<usize>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestAction {
    /// Operator issues DOWNLOAD on `peer` for the listed chunk indices
    Download { time: u64, peer: u32, chunks: Vec<u32> },
    /// Peer process is killed: it stops receiving and ticking
    Crash { time: u64, peer: u32 },
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestAssertion {
    /// The download started on `peer` finished and every chunk matches its digest
    DownloadCompleted { peer: u32 },
    /// The download started on `peer` never finished
    DownloadIncomplete { peer: u32 },
    /// Chunk `chunk` of the download on `peer` was supplied by `source`
    ChunkSourcedFrom { peer: u32, chunk: u32, source: u32 },
    /// Simulation must settle within this many milliseconds
    MaxDuration { ms: u64 },
}
