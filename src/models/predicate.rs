//! Predicate Module
//!
//! Serializable filter expressions evaluated against the JSON form of an entity.
//! Being plain data, a predicate has a canonical serialization that the cache
//! uses to derive keys for filtered lookups.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

// == Predicate ==
/// Filter over the fields of an entity.
///
/// Field names may use dots to reach nested objects (`address.city`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    /// Matches every entity
    Always,
    Eq { field: String, value: Value },
    Ne { field: String, value: Value },
    Lt { field: String, value: Value },
    Le { field: String, value: Value },
    Gt { field: String, value: Value },
    Ge { field: String, value: Value },
    /// Substring match on a string field
    Contains { field: String, needle: String },
    And { all: Vec<Predicate> },
    Or { any: Vec<Predicate> },
    Not { inner: Box<Predicate> },
}

impl Predicate {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Ne {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Lt {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Le {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Gt {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::Ge {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn contains(field: impl Into<String>, needle: impl Into<String>) -> Self {
        Predicate::Contains {
            field: field.into(),
            needle: needle.into(),
        }
    }

    /// Conjunction of `self` and `other`.
    pub fn and(self, other: Predicate) -> Self {
        match self {
            Predicate::And { mut all } => {
                all.push(other);
                Predicate::And { all }
            }
            first => Predicate::And {
                all: vec![first, other],
            },
        }
    }

    /// Disjunction of `self` and `other`.
    pub fn or(self, other: Predicate) -> Self {
        match self {
            Predicate::Or { mut any } => {
                any.push(other);
                Predicate::Or { any }
            }
            first => Predicate::Or {
                any: vec![first, other],
            },
        }
    }

    /// Negation of `self`.
    pub fn negate(self) -> Self {
        Predicate::Not {
            inner: Box::new(self),
        }
    }

    // == Evaluation ==
    /// Evaluates the predicate against the JSON form of an entity.
    ///
    /// A missing field never matches a comparison; comparisons between
    /// values of different JSON types are false.
    pub fn matches(&self, record: &Value) -> bool {
        match self {
            Predicate::Always => true,
            Predicate::Eq { field, value } => lookup(record, field) == Some(value),
            Predicate::Ne { field, value } => {
                lookup(record, field).is_some_and(|found| found != value)
            }
            Predicate::Lt { field, value } => ordering(record, field, value) == Some(Ordering::Less),
            Predicate::Le { field, value } => matches!(
                ordering(record, field, value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            Predicate::Gt { field, value } => {
                ordering(record, field, value) == Some(Ordering::Greater)
            }
            Predicate::Ge { field, value } => matches!(
                ordering(record, field, value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            Predicate::Contains { field, needle } => lookup(record, field)
                .and_then(Value::as_str)
                .is_some_and(|s| s.contains(needle.as_str())),
            Predicate::And { all } => all.iter().all(|p| p.matches(record)),
            Predicate::Or { any } => any.iter().any(|p| p.matches(record)),
            Predicate::Not { inner } => !inner.matches(record),
        }
    }

    // == Fingerprint ==
    /// Stable SHA-256 hex digest of the canonical JSON form.
    ///
    /// serde_json keeps object keys sorted, so equal predicates always produce
    /// the same digest.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_else(|_| format!("{:?}", self));
        hex::encode(Sha256::digest(canonical.as_bytes()))
    }
}

impl Default for Predicate {
    fn default() -> Self {
        Predicate::Always
    }
}

fn lookup<'a>(record: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(record, |current, segment| current.get(segment))
}

fn ordering(record: &Value, field: &str, value: &Value) -> Option<Ordering> {
    let found = lookup(record, field)?;
    match (found, value) {
        (Value::Number(a), Value::Number(b)) => {
            if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
                Some(a.cmp(&b))
            } else {
                a.as_f64()?.partial_cmp(&b.as_f64()?)
            }
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn customer() -> Value {
        json!({
            "id": 7,
            "name": "Ada Lovelace",
            "active": true,
            "balance": 12.5,
            "address": { "city": "London" }
        })
    }

    #[test]
    fn test_comparisons() {
        let record = customer();
        assert!(Predicate::eq("id", 7).matches(&record));
        assert!(Predicate::ne("id", 8).matches(&record));
        assert!(Predicate::lt("id", 10).matches(&record));
        assert!(Predicate::le("id", 7).matches(&record));
        assert!(Predicate::gt("balance", 12.0).matches(&record));
        assert!(Predicate::ge("name", "Ada").matches(&record));
        assert!(!Predicate::gt("id", 7).matches(&record));
    }

    #[test]
    fn test_missing_field_and_type_mismatch() {
        let record = customer();
        assert!(!Predicate::eq("email", "ada@example.com").matches(&record));
        assert!(!Predicate::ne("email", "x").matches(&record));
        assert!(!Predicate::lt("name", 3).matches(&record));
    }

    #[test]
    fn test_nested_field_and_contains() {
        let record = customer();
        assert!(Predicate::eq("address.city", "London").matches(&record));
        assert!(Predicate::contains("name", "Love").matches(&record));
        assert!(!Predicate::contains("id", "7").matches(&record));
    }

    #[test]
    fn test_combinators() {
        let record = customer();
        let p = Predicate::eq("active", true).and(Predicate::gt("id", 5));
        assert!(p.matches(&record));

        let q = Predicate::eq("id", 1).or(Predicate::eq("id", 7));
        assert!(q.matches(&record));

        assert!(!Predicate::Always.negate().matches(&record));
    }

    #[test]
    fn test_fingerprint_is_stable_and_distinct() {
        let a = Predicate::eq("name", "Ada").and(Predicate::gt("id", 1));
        let b = Predicate::eq("name", "Ada").and(Predicate::gt("id", 1));
        let c = Predicate::eq("name", "Ada").and(Predicate::gt("id", 2));

        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_ne!(a.fingerprint(), c.fingerprint());
        assert_eq!(a.fingerprint().len(), 64);
    }
}
