//! Deterministic content hashing of contact payloads.
//!
//! The sync engine compares these digests to decide whether a contact really
//! changed. Two payloads that differ only in child ordering or in
//! store-assigned child ids must therefore hash identically.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::contact::ContactFields;

/// Fields a child element is identified by, in order of preference. Elements
/// without any of them sort by their whole canonical form.
const CHILD_KEY_FIELDS: [&str; 10] = [
    "number", "address", "url", "handle", "key", "date", "related_uid", "latitude", "value",
    "label",
];

/// SHA-256 over the canonical serialization of `fields`, as lowercase hex.
///
/// The canonical form has object keys in sorted order, child arrays sorted by
/// a stable identifying key, ids stripped, and dates already in `YYYY-MM-DD`
/// (how `NaiveDate` serializes).
pub fn content_hash(fields: &ContactFields) -> String {
    let mut value = serde_json::to_value(fields)
        .unwrap(/* this cannot panic: serializing a plain data struct to a Value is infallible */);
    strip_ids(&mut value);
    sort_arrays(&mut value);

    // serde_json maps are BTreeMaps, so keys come out sorted
    let canonical = value.to_string();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

fn strip_ids(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.remove("id");
            for child in map.values_mut() {
                strip_ids(child);
            }
        }
        Value::Array(items) => {
            for child in items.iter_mut() {
                strip_ids(child);
            }
        }
        _ => {}
    }
}

fn sort_arrays(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for child in map.values_mut() {
                sort_arrays(child);
            }
        }
        Value::Array(items) => {
            for child in items.iter_mut() {
                sort_arrays(child);
            }
            items.sort_by_cached_key(element_sort_key);
        }
        _ => {}
    }
}

fn element_sort_key(element: &Value) -> (String, String) {
    let primary = match element {
        Value::Object(map) => CHILD_KEY_FIELDS
            .iter()
            .find_map(|key| map.get(*key))
            .map(plain_string)
            .unwrap_or_default(),
        other => plain_string(other),
    };
    (primary, element.to_string())
}

fn plain_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::{Email, Phone};

    fn sample_fields() -> ContactFields {
        let mut fields = ContactFields::default();
        fields.first_name = Some("Ada".to_string());
        fields.last_name = Some("Lovelace".to_string());
        fields.phones = vec![
            Phone { id: None, number: "+44 1 2345".to_string(), label: Some("home".to_string()) },
            Phone { id: None, number: "+44 9 9999".to_string(), label: Some("work".to_string()) },
        ];
        fields.emails = vec![
            Email { id: None, address: "ada@example.com".to_string(), label: None },
        ];
        fields.groups = vec!["Mathematicians".to_string(), "Friends".to_string()];
        fields
    }

    #[test]
    fn reordering_children_does_not_change_the_hash() {
        let fields = sample_fields();
        let mut shuffled = fields.clone();
        shuffled.phones.reverse();
        shuffled.groups.reverse();

        assert_eq!(content_hash(&fields), content_hash(&shuffled));
    }

    #[test]
    fn assigning_store_ids_does_not_change_the_hash() {
        let fields = sample_fields();
        let mut stored = fields.clone();
        for (n, phone) in stored.phones.iter_mut().enumerate() {
            phone.id = Some(n as i64 + 100);
        }
        stored.emails[0].id = Some(7);

        assert_eq!(content_hash(&fields), content_hash(&stored));
    }

    #[test]
    fn any_value_change_changes_the_hash() {
        let fields = sample_fields();

        let mut edited = fields.clone();
        edited.phones[0].number = "+44 1 2346".to_string();
        assert_ne!(content_hash(&fields), content_hash(&edited));

        let mut edited = fields.clone();
        edited.first_name = Some("Augusta".to_string());
        assert_ne!(content_hash(&fields), content_hash(&edited));

        let mut edited = fields.clone();
        edited.phones.pop();
        assert_ne!(content_hash(&fields), content_hash(&edited));
    }

    #[test]
    fn the_digest_is_lowercase_hex() {
        let digest = content_hash(&sample_fields());
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
