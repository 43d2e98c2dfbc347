//! # Services Module
//!
//! External capabilities consumed by the vault core.
//!
//! ## Components
//!
//! - **Chain adapter**: the injected blockchain query interface the
//!   recovery scanner depends on; transports (Electrum, Esplora)
//!   live outside the core
//! - **Memory adapter**: deterministic in-memory double for tests

pub mod chain;
pub mod memory;

pub use chain::{with_retry, CancelToken, ChainAdapter};
pub use memory::MemoryChainAdapter;
