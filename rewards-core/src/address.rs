use std::fmt;
use std::str::FromStr;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Opaque on-chain identifier: a canonical base58-style string plus its raw
/// bytes. Only the canonical string participates in equality/ordering/hash —
/// callers never need to compare raw byte encodings directly.
///
/// Serializes as a bare string (its `canonical` form), not as a struct —
/// required so it can key a `BTreeMap` serialized to a JSON object, in
/// `StoredDelegationState.balances` and the HTTP responses that carry it.
#[derive(Clone, Debug, Eq)]
pub struct Address {
    canonical: String,
    raw: Vec<u8>,
}

impl Address {
    pub fn new(canonical: impl Into<String>) -> Self {
        let canonical = canonical.into();
        let raw = canonical.as_bytes().to_vec();
        Self { canonical, raw }
    }

    pub fn with_raw(canonical: impl Into<String>, raw: Vec<u8>) -> Self {
        Self {
            canonical: canonical.into(),
            raw,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    pub fn raw(&self) -> &[u8] {
        &self.raw
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.canonical)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let canonical = String::deserialize(deserializer)?;
        if canonical.is_empty() {
            return Err(D::Error::custom("address must not be empty"));
        }
        Ok(Address::new(canonical))
    }
}

impl FromStr for Address {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Address::new(s))
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.canonical == other.canonical
    }
}

impl std::hash::Hash for Address {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.canonical.hash(state);
    }
}

impl PartialOrd for Address {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Address {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.canonical.cmp(&other.canonical)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Address::new(s)
    }
}

impl From<String> for Address {
    fn from(s: String) -> Self {
        Address::new(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn equality_ignores_raw_bytes() {
        let a = Address::with_raw("tz1KqT", vec![1, 2, 3]);
        let b = Address::with_raw("tz1KqT", vec![9]);
        assert_eq!(a, b);
    }

    #[test]
    fn keys_a_hashmap() {
        let mut m = HashMap::new();
        m.insert(Address::new("tz1A"), 1);
        assert_eq!(m.get(&Address::new("tz1A")), Some(&1));
    }

    #[test]
    fn orders_lexicographically() {
        let mut v = vec![Address::new("tz1B"), Address::new("tz1A")];
        v.sort();
        assert_eq!(v[0].as_str(), "tz1A");
    }
}
