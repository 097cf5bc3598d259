use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hashes a list of values independently of their order
///
/// Each value is rendered as compact JSON, the renderings are sorted and
/// joined with a space, and the result is hashed with SHA-256.
///
/// # Returns
///
/// The digest as a lowercase hexadecimal string
pub fn crypto_hash(inputs: &[Value]) -> String {
    let mut rendered: Vec<String> = inputs.iter().map(Value::to_string).collect();
    rendered.sort();

    let mut hasher = Sha256::new();
    hasher.update(rendered.join(" ").as_bytes());

    hex::encode(hasher.finalize())
}

/// Counts the leading zero bits of a hexadecimal digest
pub fn leading_zero_bits(hex_hash: &str) -> u32 {
    let mut bits = 0;

    for digit in hex_hash.chars().map(|c| c.to_digit(16)) {
        match digit {
            Some(0) => bits += 4,
            // a nibble occupies the low four bits of a u8
            Some(nibble) => {
                bits += (nibble as u8).leading_zeros() - 4;
                break;
            }
            None => break,
        }
    }

    bits
}

/// Checks that a digest carries at least `difficulty` leading zero bits
pub fn meets_difficulty(hex_hash: &str, difficulty: u32) -> bool {
    leading_zero_bits(hex_hash) >= difficulty
}
