//! `webz-hostapi`: the block-data service the sandbox talks to.
//!
//! The wallet never opens sockets itself. Every chain interaction goes
//! through a host-provided [`BlockSource`]:
//!
//! - `BlockSource` trait: fetch the tip, fetch compact block ranges, submit
//!   raw transactions
//! - `MemChain`: in-memory `BlockSource` that mines submitted transactions,
//!   used by tests and local demos
//! - `NetworkError`: transport and service failures, passed through the
//!   sandbox unchanged

pub mod error;
pub mod source;
pub mod mem_chain;

// Re-export commonly used types at the crate root.
pub use error::NetworkError;
pub use mem_chain::MemChain;
pub use source::BlockSource;
