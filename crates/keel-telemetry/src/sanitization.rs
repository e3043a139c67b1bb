//! Recursive redaction of structured values
//!
//! Sanitizing never fails: anything the engine cannot classify, and anything
//! nested deeper than the configured maximum depth, comes back as the
//! redaction marker.

use crate::classifier::{is_sensitive_header, SensitiveFieldCache, SensitiveFieldSet};
use crate::Fields;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Shape of a value, decided once per node before dispatch.
#[derive(Debug)]
pub enum ValueKind<'a> {
    /// String, number, boolean or null
    Scalar(&'a Value),
    /// Ordered sequence; elements carry no field name
    Sequence(&'a [Value]),
    /// String-keyed mapping; keys are classified
    Mapping(&'a Fields),
}

impl<'a> ValueKind<'a> {
    pub fn classify(value: &'a Value) -> Self {
        match value {
            Value::Array(items) => ValueKind::Sequence(items),
            Value::Object(map) => ValueKind::Mapping(map),
            scalar => ValueKind::Scalar(scalar),
        }
    }
}

/// Positional or named parameter set passed alongside a SQL statement.
#[derive(Debug)]
enum SqlParams<'a> {
    Named(&'a Fields),
    Positional,
    Unknown,
}

impl<'a> SqlParams<'a> {
    fn classify(params: &'a Value) -> Self {
        match ValueKind::classify(params) {
            ValueKind::Mapping(map) => SqlParams::Named(map),
            ValueKind::Sequence(_) => SqlParams::Positional,
            ValueKind::Scalar(_) => SqlParams::Unknown,
        }
    }
}

/// Redaction engine bound to one compiled [`SensitiveFieldSet`].
#[derive(Debug, Clone)]
pub struct Sanitizer {
    fields: Arc<SensitiveFieldSet>,
}

impl Sanitizer {
    pub fn new(fields: Arc<SensitiveFieldSet>) -> Self {
        Self { fields }
    }

    /// Sanitizer over the current snapshot of `cache`.
    pub fn from_cache(cache: &SensitiveFieldCache) -> Self {
        Self::new(cache.current())
    }

    /// Sanitizer over the process-wide snapshot.
    pub fn current() -> Self {
        Self::from_cache(SensitiveFieldCache::global())
    }

    pub fn marker(&self) -> &str {
        self.fields.marker()
    }

    fn redacted(&self) -> Value {
        Value::String(self.fields.marker().to_string())
    }

    /// Sanitize `value` found under `field_name` at recursion depth `depth`.
    pub fn sanitize(&self, value: &Value, field_name: Option<&str>, depth: usize) -> Value {
        if field_name.map_or(false, |name| self.fields.is_sensitive(name)) {
            return self.redacted();
        }

        match ValueKind::classify(value) {
            ValueKind::Scalar(Value::String(text)) => match self.fields.scan_value(text) {
                Some(scanned) => Value::String(scanned),
                None => value.clone(),
            },
            ValueKind::Scalar(scalar) => scalar.clone(),
            ValueKind::Mapping(map) if depth < self.fields.max_depth() => {
                Value::Object(self.sanitize_entries(map, depth + 1))
            }
            ValueKind::Sequence(items) if depth < self.fields.max_depth() => Value::Array(
                items
                    .iter()
                    .map(|item| self.sanitize(item, None, depth + 1))
                    .collect(),
            ),
            ValueKind::Mapping(_) | ValueKind::Sequence(_) => self.redacted(),
        }
    }

    fn sanitize_entries(&self, map: &Fields, depth: usize) -> Fields {
        map.iter()
            .map(|(key, value)| (key.clone(), self.sanitize(value, Some(key), depth)))
            .collect()
    }

    /// Sanitize a top-level mapping.
    pub fn sanitize_dict(&self, map: &Fields) -> Fields {
        if self.fields.max_depth() == 0 {
            return map.keys().map(|key| (key.clone(), self.redacted())).collect();
        }
        self.sanitize_entries(map, 1)
    }

    /// Sanitize any serializable value.
    ///
    /// Values that cannot be represented as a string-keyed tree (for example maps
    /// keyed by tuples) are redacted outright.
    pub fn sanitize_serializable<T: Serialize + ?Sized>(
        &self,
        value: &T,
        field_name: Option<&str>,
    ) -> Value {
        match serde_json::to_value(value) {
            Ok(value) => self.sanitize(&value, field_name, 0),
            Err(_) => self.redacted(),
        }
    }

    /// Sanitize HTTP headers using the credential header set.
    pub fn sanitize_headers<I, K, V>(&self, headers: I) -> Fields
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        headers
            .into_iter()
            .map(|(name, value)| {
                let name = name.as_ref();
                let value = if is_sensitive_header(name) {
                    self.redacted()
                } else {
                    Value::String(value.as_ref().to_string())
                };
                (name.to_string(), value)
            })
            .collect()
    }

    /// Sanitize SQL statement parameters.
    ///
    /// Named parameters are sanitized like any mapping. Positional parameters
    /// carry no names to classify and pass through. Anything else is redacted.
    pub fn sanitize_sql_params(&self, params: &Value) -> Value {
        match SqlParams::classify(params) {
            SqlParams::Named(map) => Value::Object(self.sanitize_dict(map)),
            SqlParams::Positional => params.clone(),
            SqlParams::Unknown => self.redacted(),
        }
    }
}

/// Sanitize a value with the process-wide configuration.
pub fn sanitize(value: &Value) -> Value {
    Sanitizer::current().sanitize(value, None, 0)
}

/// Sanitize a mapping with the process-wide configuration.
pub fn sanitize_dict(map: &Fields) -> Fields {
    Sanitizer::current().sanitize_dict(map)
}

/// Sanitize HTTP headers with the process-wide configuration.
pub fn sanitize_headers<I, K, V>(headers: I) -> Fields
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: AsRef<str>,
{
    Sanitizer::current().sanitize_headers(headers)
}

/// Sanitize SQL parameters with the process-wide configuration.
pub fn sanitize_sql_params(params: &Value) -> Value {
    Sanitizer::current().sanitize_sql_params(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PrivacyConfig;
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn sanitizer() -> Sanitizer {
        Sanitizer::new(Arc::new(
            SensitiveFieldSet::compile(&PrivacyConfig::default()).0,
        ))
    }

    fn nested(levels: usize) -> Value {
        (0..levels).fold(json!("leaf"), |inner, _| json!({ "level": inner }))
    }

    #[test]
    fn test_redacts_sensitive_keys() {
        let s = sanitizer();
        assert_eq!(
            s.sanitize(&json!({"password": "x"}), None, 0),
            json!({"password": "[REDACTED]"})
        );
        assert_eq!(
            s.sanitize(&json!({"user": "john", "token": "abc"}), None, 0),
            json!({"user": "john", "token": "[REDACTED]"})
        );
    }

    #[test]
    fn test_field_name_overrides_structure() {
        let s = sanitizer();
        let value = json!({
            "credentials": {"user": "john", "pass": "x"},
            "api_keys": ["k1", "k2"],
            "profile": {"name": "John", "card_number": 4111111111111111u64}
        });

        assert_eq!(
            s.sanitize(&value, None, 0),
            json!({
                "credentials": "[REDACTED]",
                "api_keys": "[REDACTED]",
                "profile": {"name": "John", "card_number": "[REDACTED]"}
            })
        );
    }

    #[test]
    fn test_sequence_elements_are_unnamed() {
        let s = sanitizer();
        let value = json!(["password", {"secret": 1, "id": 2}, [true, null]]);

        assert_eq!(
            s.sanitize(&value, None, 0),
            json!(["password", {"secret": "[REDACTED]", "id": 2}, [true, null]])
        );
    }

    #[test]
    fn test_depth_boundary() {
        let s = sanitizer();

        let shallow = nested(9);
        assert_eq!(s.sanitize(&shallow, None, 0), shallow);

        let at_limit = nested(10);
        assert_eq!(s.sanitize(&at_limit, None, 0), at_limit);

        let deep = s.sanitize(&nested(11), None, 0);
        let mut cursor = &deep;
        for _ in 0..10 {
            cursor = &cursor["level"];
        }
        assert_eq!(cursor, &json!("[REDACTED]"));
    }

    #[test]
    fn test_sanitize_dict_matches_sanitize() {
        let s = sanitizer();
        let map = json!({"a": {"secret": 1}, "b": [1, 2]});
        let map = map.as_object().unwrap();

        assert_eq!(
            Value::Object(s.sanitize_dict(map)),
            s.sanitize(&Value::Object(map.clone()), None, 0)
        );
    }

    #[test]
    fn test_unrepresentable_values_are_redacted() {
        let s = sanitizer();
        let mut keyed_by_tuple = BTreeMap::new();
        keyed_by_tuple.insert((1, 2), "value");

        assert_eq!(s.sanitize_serializable(&keyed_by_tuple, None), json!("[REDACTED]"));
        assert_eq!(
            s.sanitize_serializable(&("ok", 3), None),
            json!(["ok", 3])
        );
    }

    #[test]
    fn test_sanitize_headers() {
        let s = sanitizer();
        let headers = vec![
            ("Authorization", "Bearer abc"),
            ("Content-Type", "application/json"),
            ("X-Api-Key", "k"),
        ];

        let sanitized = s.sanitize_headers(headers);
        assert_eq!(sanitized["Authorization"], "[REDACTED]");
        assert_eq!(sanitized["Content-Type"], "application/json");
        assert_eq!(sanitized["X-Api-Key"], "[REDACTED]");
    }

    #[test]
    fn test_sanitize_sql_params() {
        let s = sanitizer();
        assert_eq!(
            s.sanitize_sql_params(&json!({"email": "a@b.c", "password_hash": "x"})),
            json!({"email": "a@b.c", "password_hash": "[REDACTED]"})
        );
        assert_eq!(
            s.sanitize_sql_params(&json!(["a@b.c", "hunter2"])),
            json!(["a@b.c", "hunter2"])
        );
        assert_eq!(s.sanitize_sql_params(&json!("raw")), json!("[REDACTED]"));
    }

    #[test]
    fn test_value_detection_scrubs_strings() {
        let config = PrivacyConfig {
            sensitive_value_detection: true,
            ..PrivacyConfig::default()
        };
        let s = Sanitizer::new(Arc::new(SensitiveFieldSet::compile(&config).0));

        assert_eq!(
            s.sanitize(&json!({"note": "ssn 123-45-6789 on file"}), None, 0),
            json!({"note": "ssn [REDACTED] on file"})
        );
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            "[a-z ]{0,12}".prop_map(Value::String),
        ];
        leaf.prop_recursive(14, 64, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                prop::collection::btree_map(
                    prop_oneof![
                        Just("password".to_string()),
                        Just("token".to_string()),
                        "[a-z]{1,8}"
                    ],
                    inner,
                    0..4
                )
                .prop_map(|map| Value::Object(map.into_iter().collect())),
            ]
        })
    }

    fn same_shape(input: &Value, output: &Value) -> bool {
        match (input, output) {
            (Value::Object(a), Value::Object(b)) => {
                a.len() == b.len() && a.keys().zip(b.keys()).all(|(x, y)| x == y)
            }
            (Value::Array(a), Value::Array(b)) => a.len() == b.len(),
            (Value::Object(_) | Value::Array(_), _) => false,
            _ => true,
        }
    }

    proptest! {
        #[test]
        fn prop_sanitize_is_idempotent(value in arb_value()) {
            let s = sanitizer();
            let once = s.sanitize(&value, None, 0);
            prop_assert_eq!(s.sanitize(&once, None, 0), once);
        }

        #[test]
        fn prop_sanitize_preserves_top_level_shape(value in arb_value()) {
            let s = sanitizer();
            let output = s.sanitize(&value, None, 0);
            prop_assert!(same_shape(&value, &output));
        }
    }
}
