//! Deterministic record identity.
//!
//! An identity is the hex SHA-256 digest of a normalized projection of an
//! item's immutable fields. Cosmetic differences (case, runs of whitespace)
//! collapse to the same identity; any other difference in a projected field
//! yields a different one.
//!
//! The full 256-bit digest is kept. For `n` distinct postings the chance of
//! any two colliding is roughly `n^2 / 2^257`, which stays below `1e-59` even
//! for a billion records, so collisions are treated as impossible in practice
//! rather than handled.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// One item of a scraped batch, as emitted by the agent.
pub type RawItem = Map<String, Value>;

/// Fields projected into the identity when the config does not override them.
pub const DEFAULT_IDENTITY_FIELDS: [&str; 4] = ["title", "company", "location", "job_id"];

const FIELD_SEPARATOR: char = '\u{1f}';

/// Compute the identity of `item` over `fields`, in the given order.
pub fn identity_of(item: &RawItem, fields: &[String]) -> String {
    let projection = fields
        .iter()
        .map(|field| format!("{field}={}", normalize_value(item.get(field))))
        .collect::<Vec<_>>()
        .join(&FIELD_SEPARATOR.to_string());
    hex::encode(Sha256::digest(projection.as_bytes()))
}

/// Lowercase, collapse whitespace runs, trim.
pub fn normalize_text(input: &str) -> String {
    input
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn normalize_value(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => normalize_text(text),
        Some(other) => other.to_string(),
    }
}
