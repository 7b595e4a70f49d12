//! Peer directory: one `<id> <host> <port>` entry per line, `#` starts a comment.

use std::fs;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::Path;

use anyhow::{Context, anyhow, bail};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerEntry {
    pub id: u32,
    pub addr: SocketAddr,
}

#[derive(Debug, Clone, Default)]
pub struct PeerDirectory {
    entries: Vec<PeerEntry>,
}

impl PeerDirectory {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read peer file {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid peer file {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let mut entries: Vec<PeerEntry> = Vec::new();
        for (idx, raw) in content.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or_default().trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            let [id, host, port] = fields.as_slice() else {
                bail!("line {}: expected '<id> <host> <port>'", idx + 1);
            };
            let id: u32 = id
                .parse()
                .with_context(|| format!("line {}: bad peer id '{id}'", idx + 1))?;
            let port: u16 = port
                .parse()
                .with_context(|| format!("line {}: bad port '{port}'", idx + 1))?;
            let addr = (*host, port)
                .to_socket_addrs()
                .with_context(|| format!("line {}: cannot resolve '{host}'", idx + 1))?
                .next()
                .ok_or_else(|| anyhow!("line {}: '{host}' has no address", idx + 1))?;
            if entries.iter().any(|e| e.id == id) {
                bail!("line {}: peer {id} listed twice", idx + 1);
            }
            entries.push(PeerEntry { id, addr });
        }
        Ok(Self { entries })
    }

    pub fn lookup(&self, id: u32) -> Option<SocketAddr> {
        self.entries.iter().find(|e| e.id == id).map(|e| e.addr)
    }

    pub fn addrs(&self) -> impl Iterator<Item = SocketAddr> + '_ {
        self.entries.iter().map(|e| e.addr)
    }

    pub fn entries(&self) -> &[PeerEntry] {
        &self.entries
    }
}
