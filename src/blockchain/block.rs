use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use utoipa::ToSchema;

use super::clock::Clock;
use super::hash::{crypto_hash, meets_difficulty};
use crate::config::{
    GENESIS_HASH, GENESIS_LAST_HASH, GENESIS_TIMESTAMP, INITIAL_DIFFICULTY, MINE_RATE,
};
use crate::wallet::Transaction;

/// Payload of a block
///
/// Serialized untagged, so a block carries either a plain JSON array of
/// transactions or whatever raw value it was mined with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BlockData {
    Transactions(Vec<Transaction>),
    Raw(Value),
}

impl BlockData {
    /// Transactions carried by the block, empty for raw data
    pub fn transactions(&self) -> &[Transaction] {
        match self {
            BlockData::Transactions(transactions) => transactions,
            BlockData::Raw(_) => &[],
        }
    }
}

impl From<Vec<Transaction>> for BlockData {
    fn from(transactions: Vec<Transaction>) -> Self {
        BlockData::Transactions(transactions)
    }
}

/// Represents a block in the blockchain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    /// Unix timestamp in milliseconds at which the block was mined
    pub timestamp: i64,

    /// Hash of the previous block
    pub last_hash: String,

    /// Hash of this block
    pub hash: String,

    /// Transactions or raw data stored in the block
    #[schema(value_type = Object)]
    pub data: BlockData,

    /// Proof-of-work solution
    pub nonce: u64,

    /// Number of leading zero bits the hash had to carry
    pub difficulty: u32,
}

impl Block {
    /// The hard-coded first block of every chain
    pub fn genesis() -> Self {
        Block {
            timestamp: GENESIS_TIMESTAMP,
            last_hash: GENESIS_LAST_HASH.to_string(),
            hash: GENESIS_HASH.to_string(),
            data: BlockData::Transactions(Vec::new()),
            nonce: 0,
            difficulty: INITIAL_DIFFICULTY,
        }
    }

    /// Mines a block on top of `last_block`
    ///
    /// Tries nonces 1, 2, 3, ... re-reading the clock and re-adjusting the
    /// difficulty for each attempt, until the hash carries enough leading
    /// zero bits. There is no upper bound on the number of attempts.
    pub fn mine_block(last_block: &Block, data: BlockData, clock: &dyn Clock) -> Block {
        let data_value = json!(data);
        let mut nonce = 0;

        loop {
            nonce += 1;
            if let Some((timestamp, difficulty, hash)) =
                Self::attempt(last_block, &data_value, nonce, clock)
            {
                return Block {
                    timestamp,
                    last_hash: last_block.hash.clone(),
                    hash,
                    data,
                    nonce,
                    difficulty,
                };
            }
        }
    }

    /// Same search as [`Block::mine_block`], giving up after `max_attempts` nonces
    #[cfg(test)]
    pub fn mine_block_bounded(
        last_block: &Block,
        data: BlockData,
        clock: &dyn Clock,
        max_attempts: u64,
    ) -> Option<Block> {
        let data_value = json!(data);

        (1..=max_attempts).find_map(|nonce| {
            Self::attempt(last_block, &data_value, nonce, clock).map(
                |(timestamp, difficulty, hash)| Block {
                    timestamp,
                    last_hash: last_block.hash.clone(),
                    hash,
                    data: data.clone(),
                    nonce,
                    difficulty,
                },
            )
        })
    }

    fn attempt(
        last_block: &Block,
        data: &Value,
        nonce: u64,
        clock: &dyn Clock,
    ) -> Option<(i64, u32, String)> {
        let timestamp = clock.now_millis();
        let difficulty = Self::adjust_difficulty(last_block, timestamp);
        let hash = Self::hash_fields(timestamp, &last_block.hash, data, nonce, difficulty);

        meets_difficulty(&hash, difficulty).then_some((timestamp, difficulty, hash))
    }

    /// Computes the difficulty of a block mined at `timestamp` after `original_block`
    ///
    /// Raised by one when the block came faster than `MINE_RATE`, lowered by
    /// one otherwise, never below 1.
    pub fn adjust_difficulty(original_block: &Block, timestamp: i64) -> u32 {
        let difficulty = original_block.difficulty;

        if difficulty < 2 {
            return 1;
        }

        if timestamp.saturating_sub(original_block.timestamp) > MINE_RATE {
            difficulty - 1
        } else {
            difficulty + 1
        }
    }

    /// Recomputes the hash of the block from its own fields
    pub fn calculate_hash(&self) -> String {
        Self::hash_fields(
            self.timestamp,
            &self.last_hash,
            &json!(self.data),
            self.nonce,
            self.difficulty,
        )
    }

    fn hash_fields(
        timestamp: i64,
        last_hash: &str,
        data: &Value,
        nonce: u64,
        difficulty: u32,
    ) -> String {
        crypto_hash(&[
            json!(timestamp),
            json!(last_hash),
            data.clone(),
            json!(nonce),
            json!(difficulty),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::clock::ManualClock;
    use crate::blockchain::hash::leading_zero_bits;

    fn raw(value: &str) -> BlockData {
        BlockData::Raw(json!(value))
    }

    #[test]
    fn test_genesis_block() {
        let genesis = Block::genesis();

        assert_eq!(genesis.timestamp, GENESIS_TIMESTAMP);
        assert_eq!(genesis.last_hash, GENESIS_LAST_HASH);
        assert_eq!(genesis.hash, GENESIS_HASH);
        assert!(genesis.data.transactions().is_empty());
        assert_eq!(genesis.nonce, 0);
        assert_eq!(genesis.difficulty, INITIAL_DIFFICULTY);
    }

    #[test]
    fn test_mine_block() {
        let last_block = Block::genesis();
        let clock = ManualClock::slow();
        let block = Block::mine_block(&last_block, raw("mined data"), &clock);

        assert_eq!(block.last_hash, last_block.hash);
        assert_eq!(block.data, raw("mined data"));
        assert_eq!(block.hash, block.calculate_hash());
        assert!(leading_zero_bits(&block.hash) >= block.difficulty);
    }

    #[test]
    fn test_mine_block_raises_difficulty_when_fast() {
        let last_block = Block::genesis();
        let clock = ManualClock::fixed(last_block.timestamp + 1);
        let block = Block::mine_block(&last_block, raw("fast"), &clock);

        assert_eq!(block.difficulty, last_block.difficulty + 1);
        assert!(leading_zero_bits(&block.hash) >= block.difficulty);
    }

    #[test]
    fn test_mine_block_bounded_gives_up() {
        let mut last_block = Block::genesis();
        // 200 leading zero bits are out of reach for a handful of attempts
        last_block.difficulty = 199;
        let clock = ManualClock::fixed(last_block.timestamp + 1);

        assert!(Block::mine_block_bounded(&last_block, raw("x"), &clock, 16).is_none());
    }

    #[test]
    fn test_mine_block_bounded_finds_easy_block() {
        let mut last_block = Block::genesis();
        last_block.difficulty = 1;
        let clock = ManualClock::slow();

        let block = Block::mine_block_bounded(&last_block, raw("x"), &clock, 10_000)
            .expect("difficulty 1 is found within a few attempts");
        assert_eq!(block.difficulty, 1);
        assert_eq!(block.hash, block.calculate_hash());
    }

    #[test]
    fn test_adjust_difficulty() {
        let mut block = Block::genesis();
        block.timestamp = 10_000;
        block.difficulty = 5;

        assert_eq!(Block::adjust_difficulty(&block, block.timestamp + MINE_RATE - 100), 6);
        assert_eq!(Block::adjust_difficulty(&block, block.timestamp + MINE_RATE + 100), 4);
    }

    #[test]
    fn test_adjust_difficulty_floor() {
        let mut block = Block::genesis();
        block.difficulty = 1;
        assert_eq!(Block::adjust_difficulty(&block, block.timestamp + 1), 1);
        assert_eq!(Block::adjust_difficulty(&block, block.timestamp + MINE_RATE * 10), 1);

        block.difficulty = 0;
        assert_eq!(Block::adjust_difficulty(&block, block.timestamp + 1), 1);
    }

    #[test]
    fn test_adjust_difficulty_with_extreme_timestamps() {
        let mut block = Block::genesis();
        block.difficulty = 3;

        block.timestamp = i64::MIN;
        assert_eq!(Block::adjust_difficulty(&block, 1_700_000_000_000), 2);

        block.timestamp = i64::MAX;
        assert_eq!(Block::adjust_difficulty(&block, i64::MIN), 4);
    }

    #[test]
    fn test_mine_on_tip_with_extreme_timestamp() {
        let mut tip = Block::genesis();
        tip.timestamp = i64::MIN;
        let clock = ManualClock::slow();

        let block = Block::mine_block(&tip, raw("after"), &clock);
        assert_eq!(block.difficulty, tip.difficulty - 1);
        assert_eq!(block.last_hash, tip.hash);
    }

    #[test]
    fn test_calculate_hash_depends_on_fields() {
        let clock = ManualClock::slow();
        let block = Block::mine_block(&Block::genesis(), raw("data"), &clock);

        let mut tampered = block.clone();
        tampered.nonce += 1;
        assert_ne!(tampered.calculate_hash(), block.hash);

        let mut tampered = block.clone();
        tampered.data = raw("other data");
        assert_ne!(tampered.calculate_hash(), block.hash);
    }

    #[test]
    fn test_block_json_round_trip() {
        let clock = ManualClock::slow();
        let block = Block::mine_block(&Block::genesis(), raw("data"), &clock);

        let encoded = serde_json::to_string(&block).unwrap();
        assert!(encoded.contains("\"lastHash\""));

        let decoded: Block = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(decoded.calculate_hash(), block.hash);
    }
}
