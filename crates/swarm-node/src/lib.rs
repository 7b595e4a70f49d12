pub mod peers;
pub mod runtime;
pub mod settings;
pub mod storage;

pub use peers::{PeerDirectory, PeerEntry};
pub use runtime::{Command, Node};
