//! Case-insensitive header cards
//!
//! Replaces the original survey tooling's duck-typed dot-dictionaries with
//! an explicit ordered mapping whose key lookup is case-insensitive.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// One header card value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CardValue {
    Str(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl CardValue {
    /// Value as a float, if numeric
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CardValue::Int(v) => Some(*v as f64),
            CardValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Value as a string slice, if textual
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CardValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for CardValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CardValue::Str(s) => write!(f, "{}", s),
            CardValue::Int(v) => write!(f, "{}", v),
            CardValue::Float(v) => write!(f, "{}", v),
            CardValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

/// Ordered header with case-insensitive key access
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Header {
    cards: Vec<(String, CardValue)>,
    #[serde(skip)]
    index: HashMap<String, usize>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a card, replacing any existing card with the same key
    pub fn insert(&mut self, key: impl Into<String>, value: CardValue) {
        let key = key.into();
        let lower = key.to_lowercase();
        let existing = self
            .cards
            .iter()
            .position(|(k, _)| k.to_lowercase() == lower);
        if let Some(idx) = existing {
            self.cards[idx] = (key, value);
            self.index.insert(lower, idx);
        } else {
            self.index.insert(lower, self.cards.len());
            self.cards.push((key, value));
        }
    }

    /// Case-insensitive lookup
    pub fn get(&self, key: &str) -> Option<&CardValue> {
        // The index is skipped during deserialization, so rebuildable state
        // cannot be assumed; fall back to a scan when it is empty.
        if self.index.len() == self.cards.len() {
            self.index
                .get(&key.to_lowercase())
                .map(|&idx| &self.cards[idx].1)
        } else {
            let lower = key.to_lowercase();
            self.cards
                .iter()
                .find(|(k, _)| k.to_lowercase() == lower)
                .map(|(_, v)| v)
        }
    }

    /// Numeric card lookup
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.get(key).and_then(CardValue::as_f64)
    }

    /// String card lookup
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(CardValue::as_str)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// Cards in insertion order
    pub fn iter(&self) -> std::slice::Iter<'_, (String, CardValue)> {
        self.cards.iter()
    }
}

impl FromIterator<(String, CardValue)> for Header {
    fn from_iter<I: IntoIterator<Item = (String, CardValue)>>(iter: I) -> Self {
        let mut header = Header::new();
        for (key, value) in iter {
            header.insert(key, value);
        }
        header
    }
}
