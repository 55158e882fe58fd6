//! Canonical serialization for conversation fingerprints.
//!
//! Values are serialized to compact JSON in declaration order and hashed
//! with xxh64. Only sequences and plain structs are hashed here; maps would
//! need a `BTreeMap` to keep the output stable.

use serde::Serialize;
use xxhash_rust::xxh64::xxh64;

/// Serialize a value to canonical JSON bytes for hashing.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    // Fingerprinted values are integers, options and tuples of them.
    serde_json::to_vec(value).expect("canonical serialization of plain data cannot fail")
}

/// Compute canonical hash of a serializable value.
pub fn canonical_hash<T: Serialize>(value: &T) -> u64 {
    xxh64(&to_canonical_bytes(value), 0)
}

/// Compute canonical hash and return as hex string.
pub fn canonical_hash_hex<T: Serialize>(value: &T) -> String {
    format!("{:016x}", canonical_hash(value))
}
