use std::collections::HashSet;
use std::sync::Arc;

use log::{error, info};
use thiserror::Error;

use super::block::{Block, BlockData};
use super::clock::{Clock, SystemClock};
use super::hash::meets_difficulty;
use crate::config::MINING_REWARD;
use crate::wallet::Wallet;

/// Reasons a chain update is refused
///
/// None of these are fatal: the local chain is left untouched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChainError {
    #[error("The incoming chain must be longer: incoming {incoming}, current {current}")]
    NotLonger { incoming: usize, current: usize },

    #[error("The incoming chain must be valid")]
    InvalidChain,

    #[error("The incoming chain has invalid transaction data")]
    InvalidTransactionData,

    #[error("Block {hash} does not extend the current tip {tip}")]
    StaleTip { hash: String, tip: String },
}

/// Represents the blockchain
#[derive(Debug, Clone)]
pub struct Blockchain {
    /// The chain of blocks, genesis first
    chain: Vec<Block>,

    /// Timestamp source for mining
    clock: Arc<dyn Clock>,
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new()
    }
}

impl Blockchain {
    /// Creates a new blockchain holding only the genesis block
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates a new blockchain that mines with the given clock
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Blockchain {
            chain: vec![Block::genesis()],
            clock,
        }
    }

    /// Gets the blocks of the chain
    pub fn chain(&self) -> &[Block] {
        &self.chain
    }

    /// Gets the clock used for mining
    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Gets the last block in the chain
    pub fn last_block(&self) -> &Block {
        // the chain always holds at least the genesis block
        &self.chain[self.chain.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.chain.len()
    }

    /// Mines a block with `data` on the current tip and appends it
    ///
    /// # Returns
    ///
    /// The newly mined block
    pub fn add_block(&mut self, data: impl Into<BlockData>) -> &Block {
        let block = Block::mine_block(self.last_block(), data.into(), self.clock.as_ref());
        self.chain.push(block);
        self.last_block()
    }

    /// Appends a block mined elsewhere
    ///
    /// Fails when the block does not extend the current tip, which happens
    /// when the chain was replaced while the block was being mined.
    pub fn push_block(&mut self, block: Block) -> Result<(), ChainError> {
        let tip = self.last_block();

        if block.last_hash != tip.hash {
            return Err(ChainError::StaleTip {
                hash: block.hash,
                tip: tip.hash.clone(),
            });
        }

        self.chain.push(block);
        Ok(())
    }

    /// Validates a chain
    ///
    /// The chain must start with the genesis block; every other block must
    /// link to its predecessor, hash to its own fields, carry the proof of
    /// work its difficulty asks for, and differ in difficulty from its
    /// predecessor by at most one.
    pub fn is_valid_chain(chain: &[Block]) -> bool {
        match chain.first() {
            Some(first) if *first == Block::genesis() => {}
            _ => return false,
        }

        for pair in chain.windows(2) {
            let (previous, block) = (&pair[0], &pair[1]);

            if block.last_hash != previous.hash {
                return false;
            }

            if block.hash != block.calculate_hash() {
                return false;
            }

            if block.difficulty == 0 || !meets_difficulty(&block.hash, block.difficulty) {
                return false;
            }

            if previous.difficulty.abs_diff(block.difficulty) > 1 {
                return false;
            }
        }

        true
    }

    /// Validates the transactions of every non-genesis block of a chain
    ///
    /// Balances are replayed against the blocks that precede the block under
    /// inspection in the same chain.
    pub fn valid_transaction_data(chain: &[Block]) -> bool {
        for (index, block) in chain.iter().enumerate().skip(1) {
            let history = &chain[..index];
            let mut seen = HashSet::new();
            let mut reward_count = 0;

            for transaction in block.data.transactions() {
                if transaction.is_reward() {
                    reward_count += 1;

                    if reward_count > 1 {
                        error!("Miner rewards exceed limit in block {}", block.hash);
                        return false;
                    }

                    let mut outputs = transaction.output_map.values();
                    if outputs.len() != 1 || outputs.next() != Some(&MINING_REWARD) {
                        error!("Miner reward amount is invalid in block {}", block.hash);
                        return false;
                    }

                    continue;
                }

                if !transaction.validate() {
                    error!("Invalid transaction {} in block {}", transaction.id, block.hash);
                    return false;
                }

                let true_balance = Wallet::calculate_balance(history, &transaction.input.address);
                if transaction.input.amount != true_balance {
                    error!(
                        "Invalid input amount in transaction {}: claimed {}, replayed {}",
                        transaction.id, transaction.input.amount, true_balance
                    );
                    return false;
                }

                if !seen.insert(transaction.id.as_str()) {
                    error!(
                        "Transaction {} appears more than once in block {}",
                        transaction.id, block.hash
                    );
                    return false;
                }
            }
        }

        true
    }

    /// Checks that `chain` may replace a local chain of `current_len` blocks
    ///
    /// Runs without access to the local chain, so callers sharing a
    /// blockchain behind a lock can validate before locking it for writing.
    ///
    /// # Arguments
    ///
    /// * `chain` - The candidate chain
    /// * `current_len` - Length of the local chain
    /// * `validate_transactions` - Whether the candidate's transactions must be consistent too
    pub fn check_replacement(
        chain: Vec<Block>,
        current_len: usize,
        validate_transactions: bool,
    ) -> Result<CheckedChain, ChainError> {
        if chain.len() <= current_len {
            let err = ChainError::NotLonger {
                incoming: chain.len(),
                current: current_len,
            };
            error!("{}", err);
            return Err(err);
        }

        if !Self::is_valid_chain(&chain) {
            error!("{}", ChainError::InvalidChain);
            return Err(ChainError::InvalidChain);
        }

        if validate_transactions && !Self::valid_transaction_data(&chain) {
            error!("{}", ChainError::InvalidTransactionData);
            return Err(ChainError::InvalidTransactionData);
        }

        Ok(CheckedChain(chain))
    }

    /// Swaps in a checked chain if it is still longer than the local one
    pub fn install(&mut self, checked: CheckedChain) -> Result<(), ChainError> {
        let chain = checked.0;

        if chain.len() <= self.chain.len() {
            let err = ChainError::NotLonger {
                incoming: chain.len(),
                current: self.chain.len(),
            };
            error!("{}", err);
            return Err(err);
        }

        info!("Replacing chain of length {} with {}", self.chain.len(), chain.len());
        self.chain = chain;

        Ok(())
    }

    /// Checks `chain` and installs it in one step
    #[cfg(test)]
    pub fn replace_chain(
        &mut self,
        chain: Vec<Block>,
        validate_transactions: bool,
    ) -> Result<(), ChainError> {
        let checked = Self::check_replacement(chain, self.chain.len(), validate_transactions)?;
        self.install(checked)
    }
}

/// A chain that passed [`Blockchain::check_replacement`]
#[derive(Debug, Clone, PartialEq)]
pub struct CheckedChain(Vec<Block>);

impl CheckedChain {
    pub fn blocks(&self) -> &[Block] {
        &self.0
    }
}
