//! Chunk files on disk: a JSON object mapping hex digest to base64 bytes.
//! Download output uses the same format, so it can seed another node.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;

use anyhow::{Context, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use swarm_abstract::ChunkHash;

/// Load a chunk file to serve from. Every chunk must be exactly `chunk_size`
/// bytes, since a downloader only completes a session at that length.
pub fn load_inventory(
    path: &Path,
    chunk_size: usize,
) -> anyhow::Result<HashMap<ChunkHash, Bytes>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read chunk file {}", path.display()))?;
    let chunks =
        decode_chunks(&content).with_context(|| format!("Invalid chunk file {}", path.display()))?;
    if let Some((hash, data)) = chunks.iter().find(|(_, data)| data.len() != chunk_size) {
        bail!(
            "chunk {hash} in {} is {} bytes, expected {chunk_size}",
            path.display(),
            data.len()
        );
    }
    Ok(chunks)
}

pub fn decode_chunks(content: &str) -> anyhow::Result<HashMap<ChunkHash, Bytes>> {
    let encoded: BTreeMap<ChunkHash, String> =
        serde_json::from_str(content).context("Failed to parse chunk JSON")?;
    let mut chunks = HashMap::with_capacity(encoded.len());
    for (hash, data) in encoded {
        let data = STANDARD
            .decode(data)
            .with_context(|| format!("chunk {hash} is not valid base64"))?;
        if ChunkHash::of(&data) != hash {
            bail!("chunk {hash} does not match its digest");
        }
        chunks.insert(hash, Bytes::from(data));
    }
    Ok(chunks)
}

pub fn encode_chunks(chunks: &BTreeMap<ChunkHash, Bytes>) -> anyhow::Result<String> {
    let encoded: BTreeMap<&ChunkHash, String> = chunks
        .iter()
        .map(|(hash, data)| (hash, STANDARD.encode(data)))
        .collect();
    serde_json::to_string(&encoded).context("Failed to serialize chunks")
}

pub fn save_chunks(path: &Path, chunks: &BTreeMap<ChunkHash, Bytes>) -> anyhow::Result<()> {
    let content = encode_chunks(chunks)?;
    fs::write(path, content).with_context(|| format!("Failed to write {}", path.display()))
}
