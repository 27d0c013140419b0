// src/core/hash.rs

//! SHA-256 helpers shared by key hashing, cache-key salting, and log
//! fingerprints.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 digest of the input.
pub fn sha256_hex(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// Short fingerprint: the first 32 hex characters of the SHA-256 digest.
/// Used wherever a value must be identifiable in logs without being
/// recoverable (cache keys, admin tokens).
pub fn fingerprint(input: &str) -> String {
    let mut digest = sha256_hex(input);
    digest.truncate(32);
    digest
}

/// Constant-time byte comparison. Standard `==` short-circuits on the first
/// differing byte; XOR-accumulation keeps comparison time independent of
/// where the inputs diverge. The length check leaks only length, which for
/// the admin bearer check is not secret.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
