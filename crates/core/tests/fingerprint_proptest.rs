//! Property-based tests for request fingerprinting.
//!
//! Properties:
//! - Determinism: same payload, same key
//! - Object key order and whitespace never change the key
//! - Changing a selected value changes the key
//! - Keys are `"{scope}#{hex}"` with the digest length of the hash function

#![forbid(clippy::unwrap_used)]
#![deny(clippy::expect_used)]

use std::collections::BTreeMap;

use proptest::prelude::*;
use serde_json::{json, Value};

use idem_core::fingerprint::to_canonical_string;
use idem_core::{Fingerprinter, HashFunction, IdempotencyConfig};

fn hash_function() -> impl Strategy<Value = HashFunction> {
    prop_oneof![
        Just(HashFunction::Md5),
        Just(HashFunction::Sha256),
        Just(HashFunction::Sha512),
    ]
}

fn fields() -> impl Strategy<Value = BTreeMap<String, i64>> {
    prop::collection::btree_map("[a-z]{1,8}", any::<i64>(), 1..8)
}

/// Render an object by hand, in the given entry order, with loose spacing.
fn render(entries: &[(&String, &i64)]) -> String {
    let body: Vec<String> = entries
        .iter()
        .map(|(k, v)| format!("  \"{k}\" :  {v}"))
        .collect();
    format!("{{\n{}\n}}", body.join(",\n"))
}

fn key(fingerprinter: &Fingerprinter, scope: &str, payload: &Value) -> Option<String> {
    fingerprinter
        .fingerprint(scope, payload)
        .ok()
        .flatten()
        .map(|f| f.key)
}

proptest! {
    #[test]
    fn prop_key_is_deterministic(fields in fields(), function in hash_function()) {
        let fingerprinter = Fingerprinter::from_config(
            &IdempotencyConfig::default().with_hash_function(function),
        );
        prop_assert!(fingerprinter.is_ok());
        let Ok(fingerprinter) = fingerprinter else { return Ok(()); };

        let payload = json!(fields);
        let first = key(&fingerprinter, "scope", &payload);
        prop_assert!(first.is_some());
        prop_assert_eq!(first, key(&fingerprinter, "scope", &payload));
    }

    #[test]
    fn prop_key_order_is_irrelevant(fields in fields()) {
        let forward: Vec<_> = fields.iter().collect();
        let backward: Vec<_> = fields.iter().rev().collect();

        let a: Result<Value, _> = serde_json::from_str(&render(&forward));
        let b: Result<Value, _> = serde_json::from_str(&render(&backward));
        prop_assert!(a.is_ok() && b.is_ok());
        let (Ok(a), Ok(b)) = (a, b) else { return Ok(()); };

        prop_assert_eq!(to_canonical_string(&a), to_canonical_string(&b));

        let fingerprinter = Fingerprinter::from_config(&IdempotencyConfig::default());
        let Ok(fingerprinter) = fingerprinter else { return Ok(()); };
        prop_assert_eq!(key(&fingerprinter, "s", &a), key(&fingerprinter, "s", &b));
    }

    #[test]
    fn prop_selected_value_changes_key(id_a in any::<i64>(), id_b in any::<i64>(), noise in any::<u32>()) {
        prop_assume!(id_a != id_b);
        let config = IdempotencyConfig::default().with_event_key_jmespath("id");
        let Ok(fingerprinter) = Fingerprinter::from_config(&config) else { return Ok(()); };

        let a = key(&fingerprinter, "s", &json!({"id": id_a, "noise": noise}));
        let a_again = key(&fingerprinter, "s", &json!({"id": id_a, "noise": noise.wrapping_add(1)}));
        let b = key(&fingerprinter, "s", &json!({"id": id_b, "noise": noise}));

        prop_assert_eq!(&a, &a_again);
        prop_assert_ne!(a, b);
    }

    #[test]
    fn prop_key_shape(scope in "[a-zA-Z0-9_-]{1,16}", fields in fields(), function in hash_function()) {
        let config = IdempotencyConfig::default().with_hash_function(function);
        let Ok(fingerprinter) = Fingerprinter::from_config(&config) else { return Ok(()); };

        let key = key(&fingerprinter, &scope, &json!(fields)).unwrap_or_default();
        let (prefix, digest) = key.split_once('#').unwrap_or_default();
        prop_assert_eq!(prefix, scope.as_str());
        prop_assert_eq!(digest.len(), function.hex_len());
        prop_assert!(digest.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
