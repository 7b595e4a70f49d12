use crate::trace::{DownloadSummary, SimulationReport};
use bytes::{Bytes, BytesMut};
use rand::Rng;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap};
use std::net::SocketAddr;
use swarm_abstract::{ChunkHash, CompletedDownload, NodeContext, Packet, SimConfig};
use swarm_core::Dispatcher;
use tracing::{debug, info, warn};

#[derive(Debug)]
pub enum EventType {
    PacketArrival {
        to: SocketAddr,
        from: SocketAddr,
        datagram: Bytes,
    },
    Tick {
        node: SocketAddr,
    },
    Download {
        node: SocketAddr,
        hashes: Vec<ChunkHash>,
    },
    Crash {
        node: SocketAddr,
    },
}

#[derive(Debug)]
struct Event {
    time: u64,
    event_type: EventType,
    id: u64, // Unique ID to differentiate events at same time
}

// Custom Ord for Min-Heap (smallest time pops first)
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.id == other.id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// A compact textual summary of important link-layer events.
#[derive(Debug, Clone, Serialize)]
pub struct LinkEventSummary {
    pub time: u64,
    pub description: String,
}

/// Actions buffered while a dispatcher handles one event
#[derive(Default)]
struct ActionBuffer {
    outgoing: Vec<(SocketAddr, Packet)>,
    completed: Vec<CompletedDownload>,
    metrics: Vec<(String, f64)>,
}

struct ScopedContext<'a> {
    buffer: &'a mut ActionBuffer,
    now: u64,
}

impl NodeContext for ScopedContext<'_> {
    fn send_packet(&mut self, to: SocketAddr, packet: Packet) {
        self.buffer.outgoing.push((to, packet));
    }

    fn now(&self) -> u64 {
        self.now
    }

    fn deliver_download(&mut self, download: CompletedDownload) {
        self.buffer.completed.push(download);
    }

    fn record_metric(&mut self, name: &str, value: f64) {
        self.buffer.metrics.push((name.to_string(), value));
    }
}

struct SimNode {
    dispatcher: Dispatcher,
    alive: bool,
}

pub struct Simulator {
    time: u64,
    event_queue: BinaryHeap<Event>,
    event_id_counter: u64,

    config: SimConfig,
    rng: rand::rngs::StdRng,

    nodes: BTreeMap<SocketAddr, SimNode>,
    pending_downloads: usize,

    /// Finished downloads, keyed by the node that ran them.
    pub completed: HashMap<SocketAddr, CompletedDownload>,
    pub packet_count: u64,

    /// Time series reported through `NodeContext::record_metric`.
    /// Key: `<name>@<node>`, Value: Vec<(time_ms, value)>
    pub metrics: HashMap<String, Vec<(u64, f64)>>,

    /// Timeline of link events (drops, corruptions, duplicates, crashes).
    pub link_events: Vec<LinkEventSummary>,
}

impl Simulator {
    pub fn new(config: SimConfig) -> Self {
        use rand::SeedableRng;
        let rng = rand::rngs::StdRng::seed_from_u64(config.seed);

        Self {
            time: 0,
            event_queue: BinaryHeap::new(),
            event_id_counter: 0,
            config,
            rng,
            nodes: BTreeMap::new(),
            pending_downloads: 0,
            completed: HashMap::new(),
            packet_count: 0,
            metrics: HashMap::new(),
            link_events: Vec::new(),
        }
    }

    pub fn add_node(&mut self, dispatcher: Dispatcher) {
        let addr = dispatcher.local_addr();
        self.nodes.insert(
            addr,
            SimNode {
                dispatcher,
                alive: true,
            },
        );
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn node(&self, addr: &SocketAddr) -> Option<&Dispatcher> {
        self.nodes.get(addr).map(|n| &n.dispatcher)
    }

    pub fn is_alive(&self, addr: &SocketAddr) -> bool {
        self.nodes.get(addr).is_some_and(|n| n.alive)
    }

    pub fn metric_series(&self, name: &str) -> Option<&[(u64, f64)]> {
        self.metrics.get(name).map(|v| v.as_slice())
    }

    fn push_event(&mut self, time: u64, event_type: EventType) {
        self.event_queue.push(Event {
            time,
            event_type,
            id: self.event_id_counter,
        });
        self.event_id_counter += 1;
    }

    pub fn schedule_download(&mut self, time: u64, node: SocketAddr, hashes: Vec<ChunkHash>) {
        self.pending_downloads += 1;
        self.push_event(time, EventType::Download { node, hashes });
    }

    pub fn schedule_crash(&mut self, time: u64, node: SocketAddr) {
        self.push_event(time, EventType::Crash { node });
    }

    /// Start the periodic tick of every node.
    pub fn init(&mut self) {
        let ticks: Vec<(SocketAddr, u64)> = self
            .nodes
            .iter()
            .map(|(addr, n)| (*addr, n.dispatcher.config().poll_interval_ms.max(1)))
            .collect();
        for (node, interval) in ticks {
            self.push_event(self.time + interval, EventType::Tick { node });
        }
    }

    pub fn peek_next_event_time(&self) -> Option<u64> {
        self.event_queue.peek().map(|e| e.time)
    }

    pub fn current_time(&self) -> u64 {
        self.time
    }

    /// True once no download is scheduled or running on a live node.
    pub fn is_settled(&self) -> bool {
        self.pending_downloads == 0
            && self
                .nodes
                .values()
                .all(|n| !n.alive || !n.dispatcher.is_downloading())
    }

    /// Process the next event. Returns true if an event was processed, false if queue is empty.
    pub fn step(&mut self) -> bool {
        let event = match self.event_queue.pop() {
            Some(e) => e,
            None => return false,
        };

        self.time = event.time;
        debug!("Processing event at {}: {:?}", self.time, event.event_type);

        match event.event_type {
            EventType::PacketArrival { to, from, datagram } => {
                if !self.is_alive(&to) {
                    return true;
                }
                self.with_node(to, |dispatcher, ctx| {
                    dispatcher.on_datagram(ctx, from, &datagram)
                });
            }
            EventType::Tick { node } => {
                if !self.is_alive(&node) {
                    return true;
                }
                self.with_node(node, |dispatcher, ctx| dispatcher.on_tick(ctx));
                if let Some(n) = self.nodes.get(&node) {
                    let interval = n.dispatcher.config().poll_interval_ms.max(1);
                    self.push_event(self.time + interval, EventType::Tick { node });
                }
            }
            EventType::Download { node, hashes } => {
                self.pending_downloads -= 1;
                if !self.is_alive(&node) {
                    warn!("[{node}] DOWNLOAD ignored, node is down");
                    return true;
                }
                self.with_node(node, |dispatcher, ctx| {
                    if let Err(err) = dispatcher.start_download(ctx, hashes) {
                        warn!("[{node}] DOWNLOAD refused: {err}");
                    }
                });
            }
            EventType::Crash { node } => {
                if let Some(n) = self.nodes.get_mut(&node) {
                    n.alive = false;
                    info!("[{node}] crashed at {}", self.time);
                    self.link_events.push(LinkEventSummary {
                        time: self.time,
                        description: format!("[{node}] CRASH"),
                    });
                }
            }
        }
        true
    }

    /// Run until every download settled or simulated time passes `deadline`.
    /// Returns whether the swarm settled.
    pub fn run_until(&mut self, deadline: u64) -> bool {
        while !self.is_settled() {
            match self.peek_next_event_time() {
                Some(t) if t <= deadline => {
                    self.step();
                }
                _ => return false,
            }
        }
        true
    }

    /// Keep processing events for another `ms` of simulated time, so packets
    /// still in flight after settling (the last ACK, say) reach their peers.
    pub fn drain(&mut self, ms: u64) {
        let until = self.time.saturating_add(ms);
        while self.peek_next_event_time().is_some_and(|t| t <= until) {
            self.step();
        }
    }

    /// Produce a serializable snapshot of the current simulation state.
    pub fn export_report(&self) -> SimulationReport {
        let completed = self
            .completed
            .iter()
            .map(|(node, download)| (node.to_string(), DownloadSummary::from(download)))
            .collect();
        SimulationReport {
            config: self.config.clone(),
            duration_ms: self.time,
            packet_count: self.packet_count,
            completed,
            metrics: self.metrics.clone(),
            link_events: self.link_events.clone(),
        }
    }

    fn with_node(&mut self, addr: SocketAddr, f: impl FnOnce(&mut Dispatcher, &mut ScopedContext)) {
        let mut buffer = ActionBuffer::default();
        {
            let Some(node) = self.nodes.get_mut(&addr) else {
                return;
            };
            let mut ctx = ScopedContext {
                buffer: &mut buffer,
                now: self.time,
            };
            f(&mut node.dispatcher, &mut ctx);
        }
        self.process_actions(addr, buffer);
    }

    fn process_actions(&mut self, source: SocketAddr, buffer: ActionBuffer) {
        for (name, value) in buffer.metrics {
            self.metrics
                .entry(format!("{name}@{source}"))
                .or_default()
                .push((self.time, value));
        }

        for download in buffer.completed {
            info!(
                "[{source}] download of {} chunks complete",
                download.chunks.len()
            );
            self.link_events.push(LinkEventSummary {
                time: self.time,
                description: format!("[{source}] COMPLETED {} chunks", download.chunks.len()),
            });
            self.completed.insert(source, download);
        }

        // Channel
        for (to, packet) in buffer.outgoing {
            self.packet_count += 1;
            let kind = packet.kind();

            if !self.nodes.contains_key(&to) {
                debug!("[{source}->{to}] no such node, dropping {kind:?}");
                continue;
            }

            // 1. Check Loss
            if self.rng.random::<f64>() < self.config.loss_rate {
                self.link_events.push(LinkEventSummary {
                    time: self.time,
                    description: format!(
                        "[{source}->{to}] DROP (random loss) {kind:?} seq={} ack={}",
                        packet.header.seq, packet.header.ack
                    ),
                });
                continue;
            }

            let mut datagram = packet.encode();

            // 2. Check Corruption: a garbled type byte is rejected by the codec
            if self.rng.random::<f64>() < self.config.corrupt_rate {
                self.link_events.push(LinkEventSummary {
                    time: self.time,
                    description: format!(
                        "[{source}->{to}] CORRUPT {kind:?} seq={} ack={}",
                        packet.header.seq, packet.header.ack
                    ),
                });
                let mut garbled = BytesMut::from(&datagram[..]);
                garbled[0] = 0xFF;
                datagram = garbled.freeze();
            }

            // 3. Latency, plus an optional duplicate with its own latency
            let copies = if self.rng.random::<f64>() < self.config.duplicate_rate {
                self.link_events.push(LinkEventSummary {
                    time: self.time,
                    description: format!("[{source}->{to}] DUPLICATE {kind:?}"),
                });
                2
            } else {
                1
            };
            for _ in 0..copies {
                let latency = self
                    .rng
                    .random_range(self.config.min_latency..=self.config.max_latency);
                self.push_event(
                    self.time + latency,
                    EventType::PacketArrival {
                        to,
                        from: source,
                        datagram: datagram.clone(),
                    },
                );
            }
        }
    }
}
