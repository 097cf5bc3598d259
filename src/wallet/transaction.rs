use std::collections::BTreeMap;

use chrono::Utc;
use log::error;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use super::crypto::{verify_signature, Address, DigitalSignature};
use super::wallet::Wallet;
use crate::config::{MINING_REWARD, REWARD_INPUT_ADDRESS};

/// Errors that can occur during transaction operations
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransactionError {
    #[error("Amount exceeds balance: amount {amount}, balance {balance}")]
    AmountExceedsBalance { amount: u64, balance: u64 },
}

/// Who is spending, how much they own, and their signature over the outputs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TransactionInput {
    /// Unix timestamp in milliseconds at which the input was signed
    pub timestamp: i64,

    /// Balance of the sender when the transaction was created
    pub amount: u64,

    /// Sender's address
    pub address: Address,

    /// Signature of the output map, absent on reward transactions
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<DigitalSignature>,
}

impl TransactionInput {
    fn signed(sender: &Wallet, amount: u64, output_map: &BTreeMap<Address, u64>) -> Self {
        TransactionInput {
            timestamp: Utc::now().timestamp_millis(),
            amount,
            address: sender.address().clone(),
            signature: Some(sender.sign(output_map)),
        }
    }
}

/// Represents a transaction in the blockchain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// Unique identifier for the transaction
    pub id: String,

    /// Amount credited to each address, the sender's remainder included
    #[schema(value_type = Object)]
    pub output_map: BTreeMap<Address, u64>,

    /// Sender input
    pub input: TransactionInput,
}

impl Transaction {
    /// Creates a signed transaction spending from the sender's cached balance
    ///
    /// # Arguments
    ///
    /// * `sender` - The wallet paying and signing
    /// * `recipient` - The address of the recipient
    /// * `amount` - The amount to transfer
    pub fn new(sender: &Wallet, recipient: Address, amount: u64) -> Result<Self, TransactionError> {
        let balance = sender.balance();

        if amount > balance {
            return Err(TransactionError::AmountExceedsBalance { amount, balance });
        }

        let mut output_map = BTreeMap::new();
        *output_map.entry(recipient).or_insert(0) += amount;
        *output_map.entry(sender.address().clone()).or_insert(0) += balance - amount;

        let input = TransactionInput::signed(sender, balance, &output_map);

        Ok(Transaction {
            id: Uuid::new_v4().to_string(),
            output_map,
            input,
        })
    }

    /// Creates the reward transaction of a miner
    ///
    /// Reward transactions are not signed; they are recognised by their
    /// reserved input address.
    pub fn reward(miner_wallet: &Wallet) -> Self {
        let mut output_map = BTreeMap::new();
        output_map.insert(miner_wallet.address().clone(), MINING_REWARD);

        Transaction {
            id: Uuid::new_v4().to_string(),
            output_map,
            input: TransactionInput {
                timestamp: Utc::now().timestamp_millis(),
                amount: MINING_REWARD,
                address: Address(REWARD_INPUT_ADDRESS.to_string()),
                signature: None,
            },
        }
    }

    /// Checks if the transaction is a miner reward
    pub fn is_reward(&self) -> bool {
        self.input.address.0 == REWARD_INPUT_ADDRESS
    }

    /// Sends `amount` more to `recipient` from the sender's remaining output
    ///
    /// Lets a pending transaction absorb several sends before it is mined.
    /// The transaction is signed again afterwards.
    pub fn update(
        &mut self,
        sender: &Wallet,
        recipient: Address,
        amount: u64,
    ) -> Result<(), TransactionError> {
        let remaining = self.output_map.get(sender.address()).copied().unwrap_or(0);

        if amount > remaining {
            return Err(TransactionError::AmountExceedsBalance {
                amount,
                balance: remaining,
            });
        }

        *self.output_map.entry(recipient).or_insert(0) += amount;
        if let Some(remaining) = self.output_map.get_mut(sender.address()) {
            *remaining -= amount;
        }

        self.input = TransactionInput::signed(sender, self.input.amount, &self.output_map);

        Ok(())
    }

    /// Validates the transaction
    ///
    /// The outputs must add up to the input amount and the signature must
    /// match the output map and the input address.
    pub fn validate(&self) -> bool {
        let total = self
            .output_map
            .values()
            .try_fold(0u64, |total, amount| total.checked_add(*amount));

        if total != Some(self.input.amount) {
            error!("Invalid transaction from {}: outputs do not add up to the input", self.input.address);
            return false;
        }

        let verified = self
            .input
            .signature
            .as_ref()
            .map(|signature| verify_signature(&self.input.address, &self.output_map, signature))
            .unwrap_or(false);

        if !verified {
            error!("Invalid signature from {}", self.input.address);
            return false;
        }

        true
    }

    /// Outputs this transaction pays beyond `earlier`, a previous version of it
    ///
    /// The sender's own remainder is left out.
    pub fn outputs_added_since(&self, earlier: &Transaction) -> Vec<(Address, u64)> {
        self.output_map
            .iter()
            .filter(|(address, _)| **address != self.input.address)
            .filter_map(|(address, amount)| {
                let before = earlier.output_map.get(address).copied().unwrap_or(0);
                (*amount > before).then(|| (address.clone(), amount - before))
            })
            .collect()
    }
}
