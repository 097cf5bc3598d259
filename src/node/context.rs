use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use utoipa::ToSchema;

use crate::blockchain::{Block, BlockData, Blockchain, ChainError};
use crate::pubsub::{PubSub, PubSubError};
use crate::wallet::{Address, Transaction, TransactionError, TransactionPool, Wallet};

/// Errors that can occur while a node handles a command
#[derive(Debug, Error)]
pub enum NodeError {
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    PubSub(#[from] PubSubError),

    #[error("Mining worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error("Bootstrap request failed: {0}")]
    Bootstrap(#[from] reqwest::Error),
}

/// Address and chain-replayed balance of the node wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct WalletInfo {
    pub address: Address,
    pub balance: u64,
}

/// Everything a running node owns
///
/// Cloning shares the same chain, pool and wallet. A node is created once at
/// startup and handed to the HTTP layer, the miner and the sync loop.
#[derive(Debug, Clone)]
pub struct Node {
    pub(super) blockchain: Arc<RwLock<Blockchain>>,
    pub(super) pool: TransactionPool,
    pub(super) wallet: Arc<Mutex<Wallet>>,
    pub(super) pubsub: PubSub,
}

impl Node {
    pub fn new(blockchain: Blockchain, wallet: Wallet, pubsub: PubSub) -> Self {
        Node {
            blockchain: Arc::new(RwLock::new(blockchain)),
            pool: TransactionPool::new(),
            wallet: Arc::new(Mutex::new(wallet)),
            pubsub,
        }
    }

    pub fn pool(&self) -> &TransactionPool {
        &self.pool
    }

    pub fn pubsub(&self) -> &PubSub {
        &self.pubsub
    }

    /// Snapshot of the local chain
    pub fn chain(&self) -> Vec<Block> {
        self.blockchain.read().chain().to_vec()
    }

    /// Snapshot of the transaction pool
    pub fn transaction_map(&self) -> HashMap<String, Transaction> {
        self.pool.transaction_map()
    }

    /// Checks the local chain with the same rules applied to incoming chains
    pub fn is_chain_valid(&self) -> bool {
        Blockchain::is_valid_chain(self.blockchain.read().chain())
    }

    pub fn wallet_info(&self) -> WalletInfo {
        let address = self.wallet.lock().address().clone();
        let balance = Wallet::calculate_balance(self.blockchain.read().chain(), &address);

        WalletInfo { address, balance }
    }

    /// Reward transaction paying the node wallet
    pub fn reward_transaction(&self) -> Transaction {
        Transaction::reward(&self.wallet.lock())
    }

    /// Drops pooled transactions recorded in `chain`
    ///
    /// When this wallet amended a pooled transaction after an earlier version
    /// of it went into `chain`, the sends the amendment added are issued
    /// again against `chain`. Amended transactions of other senders are
    /// dropped; their own node issues them again.
    ///
    /// # Returns
    ///
    /// The pooled transaction carrying re-issued sends, if any
    pub(super) fn settle_pool(&self, chain: &[Block]) -> Option<Transaction> {
        let mut wallet = self.wallet.lock();
        let mut reissued = None;

        for (recorded, amended) in self.pool.clear_blockchain_transactions(chain) {
            if &amended.input.address != wallet.address() {
                debug!("Dropping amended peer transaction {} already on chain", amended.id);
                continue;
            }

            for (recipient, amount) in amended.outputs_added_since(&recorded) {
                let result = match self.pool.existing_transaction(wallet.address()) {
                    Some(mut transaction) => transaction
                        .update(&wallet, recipient.clone(), amount)
                        .map(|()| transaction),
                    None => wallet.create_transaction(recipient.clone(), amount, Some(chain)),
                };

                match result {
                    Ok(transaction) => {
                        info!("Re-issued send of {} to {} in transaction {}", amount, recipient, transaction.id);
                        self.pool.set_transaction(transaction.clone());
                        reissued = Some(transaction);
                    }
                    Err(err) => warn!(
                        "Dropped send of {} to {} from amended transaction {}: {}",
                        amount, recipient, amended.id, err
                    ),
                }
            }
        }

        reissued
    }

    /// Mines `data` on the current tip, appends the block and broadcasts the chain
    ///
    /// The proof-of-work search runs on a blocking worker and holds no lock.
    /// If the chain was replaced meanwhile, the block no longer fits and
    /// `ChainError::StaleTip` is returned.
    pub async fn mine_block(&self, data: BlockData) -> Result<Block, NodeError> {
        let (tip, clock) = {
            let blockchain = self.blockchain.read();
            (blockchain.last_block().clone(), blockchain.clock())
        };

        let block =
            tokio::task::spawn_blocking(move || Block::mine_block(&tip, data, clock.as_ref()))
                .await?;

        let chain = {
            let mut blockchain = self.blockchain.write();
            blockchain.push_block(block.clone())?;
            blockchain.chain().to_vec()
        };

        info!(
            "Mined block {} at difficulty {} with nonce {}",
            block.hash, block.difficulty, block.nonce
        );

        if let Err(err) = self.pubsub.broadcast_chain(&chain).await {
            warn!("Failed to broadcast chain: {}", err);
        }

        Ok(block)
    }

    /// Mines a block holding arbitrary data
    pub async fn mine_raw(&self, data: Value) -> Result<Block, NodeError> {
        self.mine_block(BlockData::Raw(data)).await
    }

    /// Sends `amount` from the node wallet to `recipient`
    ///
    /// A transaction of this wallet still waiting in the pool is amended;
    /// otherwise a new one is created against the replayed balance. The
    /// result is pooled and broadcast.
    pub async fn transact(
        &self,
        recipient: Address,
        amount: u64,
    ) -> Result<Transaction, NodeError> {
        let transaction = {
            let mut wallet = self.wallet.lock();

            match self.pool.existing_transaction(wallet.address()) {
                Some(mut transaction) => {
                    transaction.update(&wallet, recipient, amount)?;
                    transaction
                }
                None => {
                    let blockchain = self.blockchain.read();
                    wallet.create_transaction(recipient, amount, Some(blockchain.chain()))?
                }
            }
        };

        self.pool.set_transaction(transaction.clone());

        if let Err(err) = self.pubsub.broadcast_transaction(&transaction).await {
            warn!("Failed to broadcast transaction {}: {}", transaction.id, err);
        }

        Ok(transaction)
    }
}
