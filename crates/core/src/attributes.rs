//! Attribute values, their classification, and the destinations they route to.

use std::collections::BTreeMap;
use std::ops::{BitOr, BitOrAssign};

use serde::{Deserialize, Serialize};

/// Byte cap applied to user attribute keys/values and request parameters.
pub const MAX_ATTRIBUTE_BYTES: usize = 255;

/// Bit set over the wire outputs an attribute may be written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Destinations(u8);

impl Destinations {
    pub const NONE: Self = Self(0);
    pub const TRANSACTION_EVENT: Self = Self(1 << 0);
    pub const TRANSACTION_TRACE: Self = Self(1 << 1);
    pub const ERROR_EVENT: Self = Self(1 << 2);
    pub const ERROR_TRACE: Self = Self(1 << 3);
    pub const SQL_TRACE: Self = Self(1 << 4);
    pub const SPAN_EVENT: Self = Self(1 << 5);
    pub const CUSTOM_EVENT: Self = Self(1 << 6);
    pub const ALL: Self = Self(0x7f);
    pub const ALL_TRACES_AND_EVENTS: Self = Self::TRANSACTION_EVENT
        .union(Self::TRANSACTION_TRACE)
        .union(Self::ERROR_EVENT)
        .union(Self::ERROR_TRACE)
        .union(Self::SQL_TRACE);

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for Destinations {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.union(rhs)
    }
}

impl BitOrAssign for Destinations {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Intrinsic,
    Agent,
    User,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for AttributeValue {
    fn from(value: u64) -> Self {
        Self::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

impl From<u16> for AttributeValue {
    fn from(value: u16) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f32> for AttributeValue {
    fn from(value: f32) -> Self {
        Self::Float(f64::from(value))
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    pub key: String,
    pub value: AttributeValue,
    pub classification: Classification,
    pub destinations: Destinations,
}

impl Attribute {
    pub fn intrinsic(
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
        destinations: Destinations,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            classification: Classification::Intrinsic,
            destinations,
        }
    }

    pub fn agent(
        key: impl Into<String>,
        value: impl Into<AttributeValue>,
        destinations: Destinations,
    ) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            classification: Classification::Agent,
            destinations,
        }
    }

    /// User-supplied attribute, routed everywhere. Keys and string values are
    /// cut to [`MAX_ATTRIBUTE_BYTES`].
    pub fn user(key: &str, value: AttributeValue) -> Self {
        Self::user_with(key, value, Destinations::ALL)
    }

    /// User attribute attached to a noticed error.
    pub fn user_error(key: &str, value: AttributeValue) -> Self {
        Self::user_with(
            key,
            value,
            Destinations::ERROR_EVENT | Destinations::ERROR_TRACE,
        )
    }

    fn user_with(key: &str, value: AttributeValue, destinations: Destinations) -> Self {
        let value = match value {
            AttributeValue::String(s) => {
                AttributeValue::String(truncate_to_bytes(&s, MAX_ATTRIBUTE_BYTES).to_string())
            }
            other => other,
        };
        Self {
            key: truncate_to_bytes(key, MAX_ATTRIBUTE_BYTES).to_string(),
            value,
            classification: Classification::User,
            destinations,
        }
    }

    pub fn is_for(&self, destination: Destinations) -> bool {
        self.destinations.intersects(destination)
    }
}

/// Insertion-ordered, append-only attribute collection.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Attributes {
    items: Vec<Attribute>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, attribute: Attribute) {
        self.items.push(attribute);
    }

    pub fn add_all(&mut self, attributes: impl IntoIterator<Item = Attribute>) {
        self.items.extend(attributes);
    }

    pub fn count(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Attribute> {
        self.items.iter()
    }

    pub fn intrinsics(&self) -> impl Iterator<Item = &Attribute> {
        self.classified(Classification::Intrinsic)
    }

    pub fn agent_attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.classified(Classification::Agent)
    }

    pub fn user_attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.classified(Classification::User)
    }

    fn classified(&self, classification: Classification) -> impl Iterator<Item = &Attribute> {
        self.items
            .iter()
            .filter(move |a| a.classification == classification)
    }

    /// Copy of the attributes routed to `destination`.
    pub fn filter(&self, destination: Destinations) -> Attributes {
        Attributes {
            items: self
                .items
                .iter()
                .filter(|a| a.is_for(destination))
                .cloned()
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Attribute> {
        self.items.iter().find(|a| a.key == key)
    }

    pub fn get_for(&self, key: &str, destination: Destinations) -> Option<&AttributeValue> {
        self.items
            .iter()
            .find(|a| a.key == key && a.is_for(destination))
            .map(|a| &a.value)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Splits the attributes routed to `destination` into per-classification maps.
    pub fn buckets(&self, destination: Destinations) -> AttributeBuckets {
        let mut out = AttributeBuckets::default();
        for attr in self.items.iter().filter(|a| a.is_for(destination)) {
            let bucket = match attr.classification {
                Classification::Intrinsic => &mut out.intrinsics,
                Classification::Agent => &mut out.agent,
                Classification::User => &mut out.user,
            };
            bucket.insert(attr.key.clone(), attr.value.clone());
        }
        out
    }
}

impl<'a> IntoIterator for &'a Attributes {
    type Item = &'a Attribute;
    type IntoIter = std::slice::Iter<'a, Attribute>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl FromIterator<Attribute> for Attributes {
    fn from_iter<I: IntoIterator<Item = Attribute>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttributeBuckets {
    pub intrinsics: BTreeMap<String, AttributeValue>,
    pub agent: BTreeMap<String, AttributeValue>,
    pub user: BTreeMap<String, AttributeValue>,
}

/// Longest prefix of `s` that fits in `max_bytes` without splitting a character.
pub fn truncate_to_bytes(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
