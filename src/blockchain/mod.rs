// Blockchain module
//
// This module contains the consensus core:
// - Content hashing
// - Block structure and proof of work
// - Chain validation and replacement
// - The clock mining reads timestamps from

pub mod block;
pub mod chain;
pub mod clock;
pub mod hash;

// Re-export main components for easier access
pub use block::{Block, BlockData};
pub use chain::{Blockchain, ChainError};
pub use clock::{Clock, SystemClock};
