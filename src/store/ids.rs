//! Content-derived identifiers.
//!
//! A document's id is the first 16 bytes of the SHA-256 digest of its canonical JSON form
//! (object keys sorted at every level), rendered as a hyphenated UUID. Identical content
//! always maps to the identical id, whatever the key order of the input.

use serde_json::Value;
use sha2::{Digest, Sha256};
use uuid::Uuid;

/// Rebuild `value` with object keys sorted at every depth.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<_> = map.iter().collect();
            entries.sort_by(|left, right| left.0.cmp(right.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(key, value)| (key.clone(), canonicalize(value)))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Deterministic identifier for a document's content.
pub fn content_id(value: &Value) -> String {
    let canonical = canonicalize(value);
    digest_uuid(canonical.to_string().as_bytes())
}

/// Normalize a caller-supplied id into a store-compatible UUID.
///
/// UUIDs in any accepted textual form (including the 32-hex ids emitted by the partitioner)
/// keep their value; anything else is mapped through SHA-256 so it stays stable.
pub fn point_id(explicit: &str) -> String {
    let trimmed = explicit.trim();
    match Uuid::parse_str(trimmed) {
        Ok(uuid) => uuid.hyphenated().to_string(),
        Err(_) => digest_uuid(trimmed.as_bytes()),
    }
}

fn digest_uuid(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut head = [0_u8; 16];
    head.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(head).hyphenated().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_id_ignores_key_order() {
        let left = json!({ "type": "text", "content": "LHC", "nested": { "b": 1, "a": 2 } });
        let right = json!({ "nested": { "a": 2, "b": 1 }, "content": "LHC", "type": "text" });
        assert_eq!(content_id(&left), content_id(&right));
    }

    #[test]
    fn content_id_changes_with_content() {
        let left = json!({ "type": "text", "content": "LHC" });
        let right = json!({ "type": "text", "content": "SPS" });
        assert_ne!(content_id(&left), content_id(&right));
    }

    #[test]
    fn content_id_matches_truncated_hex_digest() {
        let value = json!({ "content": "x", "type": "text" });
        let digest = hex::encode(Sha256::digest(value.to_string().as_bytes()));
        let id = content_id(&value).replace('-', "");
        assert_eq!(id, digest[..32]);
    }

    #[test]
    fn point_id_keeps_uuid_values() {
        let simple = "0b7e6d6a2c5b4a5f9e3d1c2b3a4f5e6d";
        assert_eq!(point_id(simple), "0b7e6d6a-2c5b-4a5f-9e3d-1c2b3a4f5e6d");
        assert_eq!(point_id("0B7E6D6A-2C5B-4A5F-9E3D-1C2B3A4F5E6D"), point_id(simple));
    }

    #[test]
    fn point_id_hashes_other_values_stably() {
        let id = point_id("figure-3.png");
        assert_eq!(id, point_id("figure-3.png"));
        assert!(Uuid::parse_str(&id).is_ok());
        assert_ne!(id, point_id("figure-4.png"));
    }
}
