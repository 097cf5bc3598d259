use log::{info, warn};

use super::context::{Node, NodeError};
use crate::blockchain::{Block, BlockData};

/// Turns pooled transactions into blocks
#[derive(Debug, Clone)]
pub struct TransactionMiner {
    node: Node,
}

impl TransactionMiner {
    pub fn new(node: Node) -> Self {
        TransactionMiner { node }
    }

    /// Mines every valid pooled transaction plus a reward for this node
    ///
    /// The new chain is broadcast, then transactions now recorded in it are
    /// removed from the pool. Transactions that arrived while mining stay,
    /// and sends added to a transaction while it was being mined are issued
    /// again.
    pub async fn mine_transactions(&self) -> Result<Block, NodeError> {
        let mut transactions = self.node.pool().valid_transactions();
        transactions.push(self.node.reward_transaction());

        info!("Mining {} transactions", transactions.len());

        let block = self
            .node
            .mine_block(BlockData::Transactions(transactions))
            .await?;

        let chain = self.node.chain();
        if let Some(reissued) = self.node.settle_pool(&chain) {
            if let Err(err) = self.node.pubsub().broadcast_transaction(&reissued).await {
                warn!("Failed to broadcast transaction {}: {}", reissued.id, err);
            }
        }

        Ok(block)
    }
}
