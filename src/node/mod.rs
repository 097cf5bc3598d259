// Node module
//
// A node ties one chain, one transaction pool and one wallet to a pub/sub
// handle. The HTTP layer, the miner and the sync loop all work through it.

pub mod context;
pub mod miner;
pub mod sync;

pub use context::{Node, NodeError, WalletInfo};
pub use miner::TransactionMiner;
