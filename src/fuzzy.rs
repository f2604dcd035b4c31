//! Fuzzy lookup list
//!
//! An ordered container that resolves a user-given name (possibly
//! abbreviated or misspelled) to exactly one item. Resolution order is
//! exact case-insensitive match, then alias-table match, then similarity
//! match. A similarity query that clears the threshold for more than one
//! key fails instead of silently picking the best candidate.

use crate::error::{MangaError, Result};
use std::collections::HashMap;

/// Minimum Jaro-Winkler similarity for a fuzzy candidate
const SIMILARITY_THRESHOLD: f64 = 0.85;

/// Outcome of a fuzzy query, before conversion into a `Result`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FuzzyMatch {
    /// Exactly one item matched; holds its index in the list.
    Found(usize),
    /// No key cleared the similarity threshold.
    NotFound,
    /// More than one key cleared the threshold; holds the candidate keys.
    Ambiguous(Vec<String>),
}

/// An ordered list of named items with fuzzy name resolution
pub struct FuzzyList<T> {
    items: Vec<T>,
    mapper: fn(&T) -> String,
    aliases: HashMap<String, String>,
}

impl<T> FuzzyList<T> {
    /// Create an empty list with a key-extraction function
    pub fn new(mapper: fn(&T) -> String) -> Self {
        Self {
            items: Vec::new(),
            mapper,
            aliases: HashMap::new(),
        }
    }

    /// Register an alias for a canonical key
    pub fn add_alias(&mut self, alias: impl Into<String>, key: impl Into<String>) {
        self.aliases
            .insert(alias.into().to_lowercase(), key.into().to_lowercase());
    }

    /// Append an item to the end of the list
    pub fn append(&mut self, item: T) {
        self.items.push(item);
    }

    /// Remove the item with the given key, if present. Returns it.
    pub fn remove(&mut self, key: &str) -> Option<T> {
        let lower = key.to_lowercase();
        let idx = self
            .items
            .iter()
            .position(|item| (self.mapper)(item).to_lowercase() == lower)?;
        Some(self.items.remove(idx))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// Keys of all items, in list order
    pub fn keys(&self) -> Vec<String> {
        self.items.iter().map(|item| (self.mapper)(item)).collect()
    }

    /// Resolve a query to a tagged match outcome. Read-only.
    pub fn resolve(&self, query: &str) -> FuzzyMatch {
        let lower = query.to_lowercase();

        // Exact case-insensitive match wins outright.
        if let Some(idx) = self
            .items
            .iter()
            .position(|item| (self.mapper)(item).to_lowercase() == lower)
        {
            return FuzzyMatch::Found(idx);
        }

        // Alias table.
        if let Some(target) = self.aliases.get(&lower) {
            if let Some(idx) = self
                .items
                .iter()
                .position(|item| (self.mapper)(item).to_lowercase() == *target)
            {
                return FuzzyMatch::Found(idx);
            }
        }

        // Similarity pass over all keys.
        let candidates: Vec<(usize, String)> = self
            .items
            .iter()
            .enumerate()
            .filter_map(|(idx, item)| {
                let key = (self.mapper)(item);
                let score = strsim::jaro_winkler(&lower, &key.to_lowercase());
                if score >= SIMILARITY_THRESHOLD {
                    Some((idx, key))
                } else {
                    None
                }
            })
            .collect();

        match candidates.len() {
            0 => FuzzyMatch::NotFound,
            1 => FuzzyMatch::Found(candidates[0].0),
            _ => FuzzyMatch::Ambiguous(candidates.into_iter().map(|(_, key)| key).collect()),
        }
    }

    /// Resolve a query to a single item or fail
    pub fn find(&self, query: &str) -> Result<&T> {
        match self.resolve(query) {
            FuzzyMatch::Found(idx) => Ok(&self.items[idx]),
            FuzzyMatch::NotFound => Err(MangaError::NotFound(format!(
                "no match found for {:?}",
                query
            ))),
            FuzzyMatch::Ambiguous(_) => Err(MangaError::Ambiguous(query.to_string())),
        }
    }

    /// Whether a query resolves to exactly one item
    pub fn contains(&self, query: &str) -> bool {
        matches!(self.resolve(query), FuzzyMatch::Found(_))
    }
}
