//! Cache key derivation
//!
//! Keys have the form `{prefix}:{operation}:{param}`. All keys of one
//! repository share the prefix, so namespaces never collide across entities.

use std::fmt::Debug;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::models::Predicate;

/// Identifier params longer than this are replaced by their SHA-256 hex.
const MAX_INLINE_PARAM: usize = 64;

// == Cache Keys ==
/// Builds the keys one repository reads and invalidates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeys {
    prefix: String,
}

impl CacheKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Key shared by every materializing full-collection read.
    pub fn all(&self) -> String {
        format!("{}:all", self.prefix)
    }

    /// Key for a point lookup by identifier.
    pub fn by_id<I>(&self, id: &I) -> String
    where
        I: Serialize + Debug + ?Sized,
    {
        let param = serde_json::to_string(id).unwrap_or_else(|_| format!("{:?}", id));
        if param.len() > MAX_INLINE_PARAM {
            format!("{}:id:{}", self.prefix, hash_hex(param.as_bytes()))
        } else {
            format!("{}:id:{}", self.prefix, param)
        }
    }

    /// Key for a filtered read.
    pub fn find(&self, predicate: &Predicate) -> String {
        format!("{}{}", self.find_namespace(), predicate.fingerprint())
    }

    /// Common prefix of every filtered-read key.
    pub fn find_namespace(&self) -> String {
        format!("{}:find:", self.prefix)
    }
}

fn hash_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}
