use anyhow::{Context, anyhow, bail};
use bytes::Bytes;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use swarm_abstract::{
    ChunkHash, SimConfig, TestAction, TestAssertion, TestScenario, TransferConfig,
};
use swarm_core::Dispatcher;
use tracing::info;

use crate::engine::Simulator;
use crate::trace::SimulationReport;

/// Simulated peers listen on `127.0.0.1:(BASE_PORT + id)`.
pub const BASE_PORT: u16 = 10_000;
const DEFAULT_DEADLINE_MS: u64 = 60_000;

pub fn peer_addr(id: u32) -> anyhow::Result<SocketAddr> {
    let port = u16::try_from(id)
        .ok()
        .and_then(|id| BASE_PORT.checked_add(id))
        .ok_or_else(|| anyhow!("peer id {id} does not map to a port"))?;
    Ok(SocketAddr::from(([127, 0, 0, 1], port)))
}

/// Deterministic pseudo-random content for chunk `index`.
pub fn synthetic_chunk(index: u32, size: usize) -> Bytes {
    let mut rng = rand::rngs::StdRng::seed_from_u64(u64::from(index));
    let mut data = vec![0u8; size];
    rng.fill(&mut data[..]);
    Bytes::from(data)
}

/// Lazily materialised chunk contents and digests, by index.
struct ChunkCatalog {
    chunk_size: usize,
    chunks: HashMap<u32, (ChunkHash, Bytes)>,
}

impl ChunkCatalog {
    fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            chunks: HashMap::new(),
        }
    }

    fn get(&mut self, index: u32) -> (ChunkHash, Bytes) {
        let size = self.chunk_size;
        self.chunks
            .entry(index)
            .or_insert_with(|| {
                let data = synthetic_chunk(index, size);
                (ChunkHash::of(&data), data)
            })
            .clone()
    }

    fn hash(&mut self, index: u32) -> ChunkHash {
        self.get(index).0
    }
}

pub fn load_scenario(path: &Path) -> anyhow::Result<TestScenario> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
    let scenario: TestScenario =
        toml::from_str(&content).context("Failed to parse scenario file")?;
    Ok(scenario)
}

pub fn run_scenario(scenario_path: &str) -> anyhow::Result<SimulationReport> {
    let scenario = load_scenario(Path::new(scenario_path))?;
    run(&scenario)
}

pub fn run(scenario: &TestScenario) -> anyhow::Result<SimulationReport> {
    info!("Running Scenario: {}", scenario.name);
    info!("Description: {}", scenario.description);

    let mut config = SimConfig::default();
    scenario.config.apply_to(&mut config);
    let mut transfer = TransferConfig::default();
    scenario.transfer.apply_to(&mut transfer);

    let directory = scenario
        .peers
        .iter()
        .map(|p| peer_addr(p.id))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let known = |id: u32| -> anyhow::Result<SocketAddr> {
        if scenario.peers.iter().any(|p| p.id == id) {
            peer_addr(id)
        } else {
            Err(anyhow!("scenario refers to undeclared peer {id}"))
        }
    };

    let mut catalog = ChunkCatalog::new(transfer.chunk_size);
    let mut sim = Simulator::new(config);
    for (peer, addr) in scenario.peers.iter().zip(&directory) {
        let mut peer_config = transfer.clone();
        if let Some(max_conn) = peer.max_conn {
            peer_config.max_conn = max_conn;
        }
        let inventory = peer.chunks.iter().map(|index| catalog.get(*index)).collect();
        sim.add_node(Dispatcher::new(
            *addr,
            directory.iter().copied(),
            inventory,
            peer_config,
        ));
    }

    let mut requested: HashMap<SocketAddr, Vec<ChunkHash>> = HashMap::new();
    for action in &scenario.actions {
        match action {
            TestAction::Download { time, peer, chunks } => {
                let node = known(*peer)?;
                let hashes: Vec<ChunkHash> = chunks.iter().map(|i| catalog.hash(*i)).collect();
                requested.insert(node, hashes.clone());
                sim.schedule_download(*time, node, hashes);
            }
            TestAction::Crash { time, peer } => {
                sim.schedule_crash(*time, known(*peer)?);
            }
        }
    }

    sim.init();

    let max_duration = scenario.assertions.iter().find_map(|a| {
        if let TestAssertion::MaxDuration { ms } = a {
            Some(*ms)
        } else {
            None
        }
    });

    let settled = sim.run_until(max_duration.unwrap_or(DEFAULT_DEADLINE_MS));
    if !settled && let Some(ms) = max_duration {
        bail!("Test timed out after {} ms", ms);
    }

    for assertion in &scenario.assertions {
        match assertion {
            TestAssertion::DownloadCompleted { peer } => {
                let node = known(*peer)?;
                let download = sim.completed.get(&node).ok_or_else(|| {
                    anyhow!("Assertion Failed: download on peer {peer} did not complete")
                })?;
                for hash in requested.get(&node).into_iter().flatten() {
                    if !download.chunks.contains_key(hash) {
                        bail!("Assertion Failed: peer {peer} is missing chunk {hash}");
                    }
                }
                for (hash, data) in &download.chunks {
                    if ChunkHash::of(data) != *hash {
                        bail!("Assertion Failed: peer {peer} holds corrupt chunk {hash}");
                    }
                }
            }
            TestAssertion::DownloadIncomplete { peer } => {
                if sim.completed.contains_key(&known(*peer)?) {
                    bail!("Assertion Failed: download on peer {peer} completed unexpectedly");
                }
            }
            TestAssertion::ChunkSourcedFrom {
                peer,
                chunk,
                source,
            } => {
                let node = known(*peer)?;
                let expected = known(*source)?;
                let hash = catalog.hash(*chunk);
                let actual = sim
                    .completed
                    .get(&node)
                    .and_then(|d| d.sources.get(&hash))
                    .copied();
                if actual != Some(expected) {
                    bail!(
                        "Assertion Failed: chunk {chunk} on peer {peer} came from {:?}, expected {expected}",
                        actual
                    );
                }
            }
            TestAssertion::MaxDuration { .. } => {} // Already checked
        }
    }

    info!("Test Scenario Passed!");
    Ok(sim.export_report())
}
