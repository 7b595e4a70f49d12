//! The node's event loop. One `select!` multiplexes the UDP socket, operator
//! commands and a poll timer; every dispatcher call happens inside it, and the
//! packets it queues are flushed before the next wait.

use std::fs;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, anyhow, bail};
use swarm_abstract::{BUF_SIZE, CompletedDownload, NodeContext, Packet, parse_chunk_list};
use swarm_core::Dispatcher;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::net::UdpSocket;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::storage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `DOWNLOAD <chunk-list> <output>`
    Download { chunk_list: PathBuf, output: PathBuf },
}

impl Command {
    pub fn parse(line: &str) -> anyhow::Result<Self> {
        let mut words = line.split_whitespace();
        match words.next() {
            Some("DOWNLOAD") => {
                let (Some(chunk_list), Some(output), None) =
                    (words.next(), words.next(), words.next())
                else {
                    bail!("usage: DOWNLOAD <chunk-list> <output>");
                };
                Ok(Command::Download {
                    chunk_list: chunk_list.into(),
                    output: output.into(),
                })
            }
            Some(other) => Err(anyhow!("unknown command '{other}'")),
            None => Err(anyhow!("empty command")),
        }
    }
}

/// `NodeContext` for the live node: queues effects until the loop flushes them.
struct Outbox {
    started: Instant,
    outgoing: Vec<(SocketAddr, Packet)>,
    completed: Vec<CompletedDownload>,
}

impl NodeContext for Outbox {
    fn send_packet(&mut self, to: SocketAddr, packet: Packet) {
        self.outgoing.push((to, packet));
    }

    fn now(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    fn deliver_download(&mut self, download: CompletedDownload) {
        self.completed.push(download);
    }

    fn record_metric(&mut self, name: &str, value: f64) {
        debug!("metric {name}={value}");
    }
}

pub struct Node {
    socket: UdpSocket,
    dispatcher: Dispatcher,
    outbox: Outbox,
    pending_output: Option<PathBuf>,
}

impl Node {
    pub fn new(socket: UdpSocket, dispatcher: Dispatcher) -> Self {
        Self {
            socket,
            dispatcher,
            outbox: Outbox {
                started: Instant::now(),
                outgoing: Vec::new(),
                completed: Vec::new(),
            },
            pending_output: None,
        }
    }

    pub async fn bind(dispatcher: Dispatcher) -> anyhow::Result<Self> {
        let local = dispatcher.local_addr();
        let socket = UdpSocket::bind(local)
            .await
            .with_context(|| format!("Failed to bind {local}"))?;
        Ok(Self::new(socket, dispatcher))
    }

    /// Serve until `shutdown` resolves. Commands are read line by line from
    /// `commands`; end of input just stops command handling.
    pub async fn run<R, S>(mut self, commands: R, shutdown: S) -> anyhow::Result<()>
    where
        R: AsyncBufRead + Unpin,
        S: Future<Output = ()>,
    {
        let mut buf = vec![0u8; BUF_SIZE];
        let mut lines = commands.lines();
        let mut commands_open = true;
        let poll_ms = self.dispatcher.config().poll_interval_ms.max(1);
        let mut poll = time::interval(Duration::from_millis(poll_ms));
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!("node listening on {}", self.socket.local_addr()?);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutting down");
                    break;
                }

                result = self.socket.recv_from(&mut buf) => match result {
                    Ok((len, from)) => {
                        self.dispatcher.on_datagram(&mut self.outbox, from, &buf[..len]);
                    }
                    Err(e) => warn!("recv_from failed: {e}"),
                },

                line = lines.next_line(), if commands_open => match line {
                    Ok(Some(line)) => self.handle_command(&line),
                    Ok(None) => {
                        debug!("command input closed");
                        commands_open = false;
                    }
                    Err(e) => {
                        warn!("reading commands failed: {e}");
                        commands_open = false;
                    }
                },

                _ = poll.tick() => self.dispatcher.on_tick(&mut self.outbox),
            }

            self.flush().await;
        }

        if let Some(output) = &self.pending_output {
            info!(
                "download for {} unfinished at shutdown, nothing written",
                output.display()
            );
        }
        Ok(())
    }

    fn handle_command(&mut self, line: &str) {
        if line.trim().is_empty() {
            return;
        }
        let command = match Command::parse(line) {
            Ok(command) => command,
            Err(e) => {
                warn!("ignoring command {line:?}: {e}");
                return;
            }
        };
        match command {
            Command::Download { chunk_list, output } => {
                let hashes = match fs::read_to_string(&chunk_list)
                    .with_context(|| format!("Failed to read chunk list {}", chunk_list.display()))
                    .and_then(|content| parse_chunk_list(&content).map_err(Into::into))
                {
                    Ok(hashes) => hashes,
                    Err(e) => {
                        warn!("DOWNLOAD refused: {e:#}");
                        return;
                    }
                };
                match self.dispatcher.start_download(&mut self.outbox, hashes) {
                    Ok(fetching) => {
                        info!(
                            "DOWNLOAD {} -> {}: fetching {fetching} chunks",
                            chunk_list.display(),
                            output.display()
                        );
                        self.pending_output = Some(output);
                    }
                    Err(e) => warn!("DOWNLOAD refused: {e}"),
                }
            }
        }
    }

    async fn flush(&mut self) {
        for (to, packet) in std::mem::take(&mut self.outbox.outgoing) {
            if let Err(e) = self.socket.send_to(&packet.encode(), to).await {
                warn!("send to {to} failed: {e}");
            }
        }
        for download in std::mem::take(&mut self.outbox.completed) {
            self.persist(download);
        }
    }

    fn persist(&mut self, download: CompletedDownload) {
        let Some(path) = self.pending_output.take() else {
            return;
        };
        for (hash, source) in &download.sources {
            debug!("chunk {} was supplied by {source}", hash.short());
        }
        match storage::save_chunks(&path, &download.chunks) {
            Ok(()) => println!("GOT {}", path.display()),
            Err(e) => error!("{e:#}"),
        }
    }
}
