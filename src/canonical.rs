//! Canonical serialization for deterministic hashing and comparison.
//!
//! Snapshot stamps and the merge tiebreaker both reduce rows to canonical
//! bytes, so the same content must always produce the same bytes.
//!
//! ## Determinism Guarantees
//!
//! - Stable field order: struct fields serialize in declaration order
//! - Stable Vec order: vectors serialize in index order
//! - No HashMap allowed: use BTreeMap for maps in hashed data
//! - Stable Option format: `None` serializes as `null`, never omitted

use serde::Serialize;
use std::cmp::Ordering;
use xxhash_rust::xxh64::xxh64;

/// Serialize a value to canonical JSON bytes.
///
/// Deterministic for the same input; the single permitted panic point in the
/// crate, since serialization of these plain data types cannot fail.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    serde_json::to_vec(value).expect("canonical serialization failed")
}

/// Compute the canonical hash of a serializable value.
pub fn canonical_hash<T: Serialize>(value: &T) -> u64 {
    let bytes = to_canonical_bytes(value);
    xxh64(&bytes, 0)
}

/// Compute the canonical hash and return it as a hex string.
pub fn canonical_hash_hex<T: Serialize>(value: &T) -> String {
    format!("{:016x}", canonical_hash(value))
}

/// Compare two values by their canonical bytes.
///
/// Symmetric in its arguments, which is what makes the merge's
/// equal-timestamp tiebreak order-independent: whichever side a row arrives
/// on, the same content loses to the same content.
pub fn canonical_cmp<T: Serialize>(a: &T, b: &T) -> Ordering {
    to_canonical_bytes(a).cmp(&to_canonical_bytes(b))
}
