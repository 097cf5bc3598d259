use dashmap::DashMap;
use log::warn;

use std::collections::HashMap;
use std::sync::Arc;

use super::crypto::Address;
use super::transaction::Transaction;
use crate::blockchain::Block;

/// Unconfirmed transactions keyed by id
///
/// Cloning shares the same underlying pool. Every single operation is
/// atomic with respect to concurrent readers.
#[derive(Debug, Clone, Default)]
pub struct TransactionPool {
    transactions: Arc<DashMap<String, Transaction>>,
}

impl TransactionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a transaction, replacing any previous version with the same id
    pub fn set_transaction(&self, transaction: Transaction) {
        self.transactions.insert(transaction.id.clone(), transaction);
    }

    /// Replaces the whole content of the pool
    pub fn set_map(&self, transactions: HashMap<String, Transaction>) {
        self.transactions.clear();
        for (id, transaction) in transactions {
            self.transactions.insert(id, transaction);
        }
    }

    /// Finds the pending transaction sent by `address`, if any
    pub fn existing_transaction(&self, address: &Address) -> Option<Transaction> {
        self.transactions
            .iter()
            .find(|entry| &entry.value().input.address == address)
            .map(|entry| entry.value().clone())
    }

    /// Gets the pooled transactions that pass validation
    ///
    /// Invalid transactions are reported and left in the pool.
    pub fn valid_transactions(&self) -> Vec<Transaction> {
        self.transactions
            .iter()
            .filter_map(|entry| {
                let transaction = entry.value();
                if transaction.validate() {
                    Some(transaction.clone())
                } else {
                    warn!("Skipping invalid pooled transaction {}", transaction.id);
                    None
                }
            })
            .collect()
    }

    /// Removes every transaction that appears in a non-genesis block of `chain`
    ///
    /// A pooled transaction amended after the recorded version was taken is
    /// removed as well: its input no longer matches the chain. Those are
    /// returned as `(recorded, amended)` pairs so the sends the amendment
    /// added can be issued again.
    pub fn clear_blockchain_transactions(&self, chain: &[Block]) -> Vec<(Transaction, Transaction)> {
        let mut superseded = Vec::new();

        for block in chain.iter().skip(1) {
            for transaction in block.data.transactions() {
                if let Some((_, pooled)) = self.transactions.remove(&transaction.id) {
                    if pooled != *transaction {
                        superseded.push((transaction.clone(), pooled));
                    }
                }
            }
        }

        superseded
    }

    pub fn clear(&self) {
        self.transactions.clear();
    }

    /// Snapshot of the pool keyed by transaction id
    pub fn transaction_map(&self) -> HashMap<String, Transaction> {
        self.transactions
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}
