//! Protocol fields carried in request and response headers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Keys of request fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RequestFieldKey {
    /// Application context entries.
    Context,
    /// Remaining time budget in milliseconds (`u64` LE).
    Deadline,
    /// The operation may be retried safely.
    Idempotent,
    /// Distributed tracing context.
    TraceContext,
    /// Payload compression format.
    CompressionFormat,
}

/// Keys of response fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ResponseFieldKey {
    /// Server-provided retry hint.
    RetryPolicy,
    /// Payload compression format.
    CompressionFormat,
}

/// Field table: raw values keyed by `K`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fields<K: Ord> {
    entries: BTreeMap<K, Vec<u8>>,
}

impl<K: Ord + Copy> Fields<K> {
    /// An empty table.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Set `key`, returning the previous value.
    pub fn set(&mut self, key: K, value: impl Into<Vec<u8>>) -> Option<Vec<u8>> {
        self.entries.insert(key, value.into())
    }

    /// Value of `key`.
    pub fn get(&self, key: K) -> Option<&[u8]> {
        self.entries.get(&key).map(Vec::as_slice)
    }

    /// Set `key` to a little-endian `u64`.
    pub fn set_u64(&mut self, key: K, value: u64) {
        self.entries.insert(key, value.to_le_bytes().to_vec());
    }

    /// Value of `key` read as a little-endian `u64`; `None` if absent or malformed.
    pub fn get_u64(&self, key: K) -> Option<u64> {
        let bytes: [u8; 8] = self.get(key)?.try_into().ok()?;
        Some(u64::from_le_bytes(bytes))
    }

    /// Remove `key`.
    pub fn remove(&mut self, key: K) -> Option<Vec<u8>> {
        self.entries.remove(&key)
    }

    /// Whether `key` is set.
    pub fn contains(&self, key: K) -> bool {
        self.entries.contains_key(&key)
    }

    /// Entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (K, &[u8])> + '_ {
        self.entries.iter().map(|(k, v)| (*k, v.as_slice()))
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Ord + Copy> Default for Fields<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u64_fields() {
        let mut fields = Fields::new();
        fields.set_u64(RequestFieldKey::Deadline, 1500);
        fields.set(RequestFieldKey::Idempotent, vec![1]);
        assert_eq!(fields.get_u64(RequestFieldKey::Deadline), Some(1500));
        // wrong width is not a u64
        assert_eq!(fields.get_u64(RequestFieldKey::Idempotent), None);
        assert_eq!(fields.len(), 2);
        assert_eq!(fields.remove(RequestFieldKey::Idempotent), Some(vec![1]));
        assert!(!fields.contains(RequestFieldKey::Idempotent));
    }

    #[test]
    fn test_fields_survive_json_headers() {
        let mut fields = Fields::new();
        fields.set(ResponseFieldKey::RetryPolicy, b"after:100".to_vec());
        let json = serde_json::to_string(&fields).expect("encode");
        let decoded: Fields<ResponseFieldKey> = serde_json::from_str(&json).expect("decode");
        assert_eq!(decoded, fields);
        assert_eq!(
            decoded.iter().map(|(k, _)| k).collect::<Vec<_>>(),
            vec![ResponseFieldKey::RetryPolicy]
        );
    }
}
