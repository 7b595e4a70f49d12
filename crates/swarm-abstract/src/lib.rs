pub mod chunk;
pub mod config;
pub mod interface;
pub mod packet;
pub mod scenario;

pub use chunk::{CHUNK_DATA_SIZE, ChunkHash, ChunkListError, HASH_LEN, parse_chunk_list};
pub use interface::{CompletedDownload, NodeContext};
pub use packet::{
    BUF_SIZE, HASHES_PER_PACKET, HEADER_LEN, Header, MAX_PAYLOAD, MalformedPacket, Packet,
    PacketType,
};

pub use config::{SimConfig, SimConfigOverride, TransferConfig, TransferConfigOverride};
pub use scenario::{PeerSpec, TestAction, TestAssertion, TestScenario};
