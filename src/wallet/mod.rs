// Wallet module
//
// Keys, signatures, transactions and the pool of transactions waiting to be
// mined.

pub mod crypto;
pub mod pool;
pub mod transaction;
#[allow(clippy::module_inception)]
pub mod wallet;

pub use crypto::{Address, DigitalSignature};
pub use pool::TransactionPool;
pub use transaction::{Transaction, TransactionError, TransactionInput};
pub use wallet::Wallet;
