use std::collections::HashMap;

use log::{debug, info, warn};
use tokio::task::JoinHandle;

use super::context::{Node, NodeError};
use crate::blockchain::{Block, Blockchain};
use crate::pubsub::{Inbound, InboundMessage, SyncMessage};
use crate::wallet::Transaction;

impl Node {
    /// Applies an update published by another node
    ///
    /// A longer valid chain replaces ours and the transactions it records
    /// leave the pool. The chain is checked before the local chain is locked
    /// for writing. A transaction is pooled as is; it is validated when it is
    /// about to be mined.
    pub fn apply_sync_message(&self, message: SyncMessage) {
        match message {
            SyncMessage::Chain(chain) => {
                let current_len = self.blockchain.read().len();
                let result = Blockchain::check_replacement(chain, current_len, true)
                    .and_then(|checked| self.blockchain.write().install(checked));

                if let Err(err) = result {
                    debug!("Kept local chain: {}", err);
                    return;
                }

                if let Some(reissued) = self.settle_pool(&self.chain()) {
                    let pubsub = self.pubsub.clone();
                    tokio::spawn(async move {
                        if let Err(err) = pubsub.broadcast_transaction(&reissued).await {
                            warn!("Failed to broadcast transaction {}: {}", reissued.id, err);
                        }
                    });
                }
            }
            SyncMessage::Transaction(transaction) => {
                debug!("Pooling transaction {} from a peer", transaction.id);
                self.pool.set_transaction(transaction);
            }
        }
    }

    pub fn handle_inbound(&self, message: &InboundMessage) {
        if let Some(update) = self.pubsub.decode(message) {
            self.apply_sync_message(update);
        }
    }

    /// Applies inbound messages in arrival order until the transport closes
    pub fn spawn_sync(&self, mut inbound: Inbound) -> JoinHandle<()> {
        let node = self.clone();

        tokio::spawn(async move {
            while let Some(message) = inbound.recv().await {
                node.handle_inbound(&message);
            }

            warn!("Inbound stream closed, sync stopped");
        })
    }

    /// Copies the chain and the pool of the node at `root_url`
    ///
    /// Used once at startup by nodes that are not the root. The fetched chain
    /// goes through the same checks as a broadcast one, without purging the
    /// pool. Nothing is retried.
    pub async fn bootstrap(&self, root_url: &str) -> Result<(), NodeError> {
        let root_url = root_url.trim_end_matches('/');
        let client = reqwest::Client::new();

        let chain: Vec<Block> = client
            .get(format!("{}/api/blocks", root_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        info!("Fetched {} blocks from {}", chain.len(), root_url);

        let current_len = self.blockchain.read().len();
        let result = Blockchain::check_replacement(chain, current_len, false)
            .and_then(|checked| self.blockchain.write().install(checked));

        if let Err(err) = result {
            info!("Kept local chain after bootstrap: {}", err);
        }

        let transactions: HashMap<String, Transaction> = client
            .get(format!("{}/api/transaction-pool-map", root_url))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        info!("Fetched {} pooled transactions from {}", transactions.len(), root_url);
        self.pool.set_map(transactions);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::context::tests::test_node;
    use crate::node::miner::TransactionMiner;
    use crate::pubsub::memory::MemoryBroker;
    use crate::wallet::{Address, Wallet};

    #[tokio::test]
    async fn test_peer_adopts_mined_chain_and_purges_pool() {
        let broker = MemoryBroker::new();
        let (alice, mut alice_inbound) = test_node(&broker);
        let (bob, mut bob_inbound) = test_node(&broker);

        let transaction = alice
            .transact(Wallet::new().address().clone(), 30)
            .await
            .unwrap();

        // alice hears her own echo, bob the transaction
        alice.handle_inbound(&alice_inbound.recv().await.unwrap());
        bob.handle_inbound(&bob_inbound.recv().await.unwrap());
        assert_eq!(alice.pool().len(), 1);
        assert!(bob.transaction_map().contains_key(&transaction.id));

        TransactionMiner::new(alice.clone())
            .mine_transactions()
            .await
            .unwrap();

        bob.handle_inbound(&bob_inbound.recv().await.unwrap());
        assert_eq!(bob.chain(), alice.chain());
        assert!(bob.pool().is_empty());
    }

    #[tokio::test]
    async fn test_peer_chain_recording_older_version_reissues_added_send() {
        let broker = MemoryBroker::new();
        let (alice, _alice_inbound) = test_node(&broker);
        let (bob, _bob_inbound) = test_node(&broker);
        let first = Address("first-recipient".to_string());
        let second = Address("second-recipient".to_string());

        let recorded = alice.transact(first.clone(), 40).await.unwrap();
        bob.apply_sync_message(SyncMessage::Transaction(recorded.clone()));
        alice.transact(second.clone(), 15).await.unwrap();

        // bob mines the version he heard of
        TransactionMiner::new(bob.clone())
            .mine_transactions()
            .await
            .unwrap();
        alice.apply_sync_message(SyncMessage::Chain(bob.chain()));

        assert_eq!(alice.chain(), bob.chain());
        let pooled: Vec<_> = alice.transaction_map().into_values().collect();
        assert_eq!(pooled.len(), 1);
        assert_ne!(pooled[0].id, recorded.id);
        assert_eq!(pooled[0].output_map[&second], 15);
        assert!(!pooled[0].output_map.contains_key(&first));
        assert!(pooled[0].validate());
    }

    #[tokio::test]
    async fn test_shorter_chain_is_ignored() {
        let broker = MemoryBroker::new();
        let (alice, _alice_inbound) = test_node(&broker);
        let (bob, _bob_inbound) = test_node(&broker);

        bob.mine_raw(serde_json::json!("one")).await.unwrap();
        bob.mine_raw(serde_json::json!("two")).await.unwrap();
        alice.mine_raw(serde_json::json!("other")).await.unwrap();

        let before = bob.chain();
        bob.apply_sync_message(SyncMessage::Chain(alice.chain()));
        assert_eq!(bob.chain(), before);
    }

    #[tokio::test]
    async fn test_chain_with_invalid_transactions_is_ignored() {
        let broker = MemoryBroker::new();
        let (alice, _alice_inbound) = test_node(&broker);
        let (bob, _bob_inbound) = test_node(&broker);

        let mut forged = Wallet::new()
            .create_transaction(Address("foo".to_string()), 10, None)
            .unwrap();
        forged.output_map.insert(Address("foo".to_string()), 900);
        alice
            .mine_block(vec![forged.clone()].into())
            .await
            .unwrap();
        bob.pool().set_transaction(forged.clone());

        bob.apply_sync_message(SyncMessage::Chain(alice.chain()));
        assert_eq!(bob.chain().len(), 1);
        assert!(bob.transaction_map().contains_key(&forged.id));
    }

    #[tokio::test]
    async fn test_spawned_sync_applies_messages() {
        let broker = MemoryBroker::new();
        let (alice, _alice_inbound) = test_node(&broker);
        let (bob, bob_inbound) = test_node(&broker);
        let handle = bob.spawn_sync(bob_inbound);

        alice.mine_raw(serde_json::json!("hello")).await.unwrap();

        for _ in 0..100 {
            if bob.chain().len() == 2 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(bob.chain(), alice.chain());

        handle.abort();
    }
}
