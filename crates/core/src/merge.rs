//! Recursive merging of contributor mappings.
//!
//! When both the existing and the incoming value under a key are mappings
//! they are merged key by key; any other collision is resolved in favour of
//! the incoming value, so contributor order is the tie-break.

use serde_json::Value;

use crate::types::Mapping;

/// Deep-merge `incoming` into `target`.
pub fn deep_merge(target: &mut Mapping, incoming: Mapping) {
    for (key, value) in incoming {
        match (target.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(nested)) => {
                deep_merge(existing, nested);
            }
            (Some(existing), value) => {
                if *existing != value {
                    tracing::debug!(key = %key, "Overwriting earlier contributor value");
                }
                *existing = value;
            }
            (None, value) => {
                target.insert(key, value);
            }
        }
    }
}

/// Merge an ordered sequence of mappings into a fresh one.
pub fn merge_all<I>(mappings: I) -> Mapping
where
    I: IntoIterator<Item = Mapping>,
{
    let mut merged = Mapping::new();
    for mapping in mappings {
        deep_merge(&mut merged, mapping);
    }
    merged
}
