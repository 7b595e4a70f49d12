use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};
use thiserror::Error;

/// Length of a chunk digest in bytes (SHA-1).
pub const HASH_LEN: usize = 20;
/// Size of every chunk unless a node is configured otherwise.
pub const CHUNK_DATA_SIZE: usize = 512 * 1024;

/// Content address of a chunk. Rendered as 40 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkHash([u8; HASH_LEN]);

impl ChunkHash {
    pub fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// SHA-1 of `data`.
    pub fn of(data: &[u8]) -> Self {
        let digest = Sha1::digest(data);
        let mut bytes = [0u8; HASH_LEN];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    pub fn from_slice(raw: &[u8]) -> Option<Self> {
        raw.try_into().ok().map(Self)
    }

    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// First eight hex characters, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ChunkHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChunkHash({})", self.short())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkListError {
    #[error("invalid chunk digest '{0}': expected {len} hex characters", len = HASH_LEN * 2)]
    BadDigest(String),
    #[error("line {line}: expected '<index> <digest>'")]
    BadLine { line: usize },
}

impl FromStr for ChunkHash {
    type Err = ChunkListError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; HASH_LEN];
        hex::decode_to_slice(s.trim(), &mut bytes)
            .map_err(|_| ChunkListError::BadDigest(s.to_string()))?;
        Ok(Self(bytes))
    }
}

impl Serialize for ChunkHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ChunkHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

/// Parse a chunk list: one `<index> <digest>` pair per line. Blank lines are skipped.
pub fn parse_chunk_list(content: &str) -> Result<Vec<ChunkHash>, ChunkListError> {
    let mut hashes = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let mut parts = line.split_whitespace();
        let (Some(_index), Some(digest)) = (parts.next(), parts.next()) else {
            return Err(ChunkListError::BadLine { line: idx + 1 });
        };
        hashes.push(digest.parse()?);
    }
    Ok(hashes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "3b68110847941b84e8d05417a5b2609122a56314";

    #[test]
    fn hex_round_trip_through_display() {
        let hash: ChunkHash = DIGEST.parse().unwrap();
        assert_eq!(hash.to_string(), DIGEST);
        assert_eq!(hash.short(), "3b681108");
    }

    #[test]
    fn digest_is_sha1() {
        assert_eq!(
            ChunkHash::of(b"abc").to_string(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn rejects_short_digest() {
        assert!(matches!(
            "abcd".parse::<ChunkHash>(),
            Err(ChunkListError::BadDigest(_))
        ));
    }

    #[test]
    fn parses_indexed_chunk_list() {
        let content = format!("1 {DIGEST}\n\n2 {}\n", "00".repeat(HASH_LEN));
        let hashes = parse_chunk_list(&content).unwrap();
        assert_eq!(hashes.len(), 2);
        assert_eq!(hashes[0].to_string(), DIGEST);
        assert_eq!(hashes[1].as_bytes(), &[0u8; HASH_LEN]);
    }

    #[test]
    fn line_without_digest_is_reported() {
        assert_eq!(
            parse_chunk_list("1\n").unwrap_err(),
            ChunkListError::BadLine { line: 1 }
        );
    }
}
