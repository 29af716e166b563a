//! Savepoint identifiers
//!
//! Ids are [`ID_BYTES`] bytes from the thread-local CSPRNG, hex-encoded in
//! lowercase. No uniqueness check is made against existing savepoints; with a
//! 32-bit id space, collisions become plausible after tens of thousands of
//! savepoints in one store.

use rand::RngCore;

/// Number of random bytes in an id
pub const ID_BYTES: usize = 4;

/// Length of an id in characters
pub const ID_LEN: usize = ID_BYTES * 2;

/// Generate a new random savepoint id
pub fn generate_id() -> String {
    let mut bytes = [0u8; ID_BYTES];
    rand::rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Whether `candidate` has the shape of a generated id
pub fn is_valid_id(candidate: &str) -> bool {
    candidate.len() == ID_LEN
        && candidate
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
