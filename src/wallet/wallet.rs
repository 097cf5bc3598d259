use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use serde::Serialize;

use super::crypto::{signing_payload, Address, DigitalSignature};
use super::transaction::{Transaction, TransactionError};
use crate::blockchain::Block;
use crate::config::STARTING_BALANCE;

/// Represents a wallet with a keypair
///
/// `balance` is a cache of what the chain says the wallet owns; it is
/// refreshed by replaying the chain whenever one is at hand.
#[derive(Debug, Clone)]
pub struct Wallet {
    signing_key: SigningKey,
    address: Address,
    balance: u64,
}

impl Default for Wallet {
    fn default() -> Self {
        Self::new()
    }
}

impl Wallet {
    /// Creates a new wallet with a random keypair and the starting balance
    pub fn new() -> Self {
        let mut csprng = OsRng;
        let signing_key = SigningKey::generate(&mut csprng);
        Self::from_signing_key(signing_key)
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = Address::from_public_key(&VerifyingKey::from(&signing_key));

        Wallet {
            signing_key,
            address,
            balance: STARTING_BALANCE,
        }
    }

    /// Gets the wallet's address
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Gets the cached balance
    pub fn balance(&self) -> u64 {
        self.balance
    }

    /// Signs the content hash of `data` with the wallet's private key
    pub fn sign<T: Serialize>(&self, data: &T) -> DigitalSignature {
        let signature = self.signing_key.sign(signing_payload(data).as_bytes());
        DigitalSignature::from_signature(&signature)
    }

    /// Creates a signed transaction sending `amount` to `recipient`
    ///
    /// # Arguments
    ///
    /// * `recipient` - The address to credit
    /// * `amount` - The amount to send
    /// * `chain` - When given, the cached balance is refreshed from it first
    ///
    /// # Returns
    ///
    /// The signed transaction, or `AmountExceedsBalance`
    pub fn create_transaction(
        &mut self,
        recipient: Address,
        amount: u64,
        chain: Option<&[Block]>,
    ) -> Result<Transaction, TransactionError> {
        if let Some(chain) = chain {
            self.balance = Self::calculate_balance(chain, &self.address);
        }

        Transaction::new(self, recipient, amount)
    }

    /// Replays a chain to find the balance of `address`
    ///
    /// Blocks are scanned from newest to oldest, summing every output
    /// credited to the address. The scan stops after the most recent block
    /// in which the address spent: its remainder output there is the base
    /// of the balance. An address that never spent starts from
    /// `STARTING_BALANCE`.
    pub fn calculate_balance(chain: &[Block], address: &Address) -> u64 {
        let mut has_conducted_transaction = false;
        let mut outputs_total: u64 = 0;

        for block in chain.iter().skip(1).rev() {
            for transaction in block.data.transactions() {
                if &transaction.input.address == address {
                    has_conducted_transaction = true;
                }

                if let Some(output) = transaction.output_map.get(address) {
                    outputs_total = outputs_total.saturating_add(*output);
                }
            }

            if has_conducted_transaction {
                break;
            }
        }

        if has_conducted_transaction {
            outputs_total
        } else {
            STARTING_BALANCE.saturating_add(outputs_total)
        }
    }
}
