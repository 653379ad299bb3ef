// Document model - the todo list that gets synchronized
//
// A Document is replaced wholesale on every change; the helpers here build
// the next version instead of editing in place.

use chrono::Utc;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Characters used for generated ids (URL-safe)
const ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";

/// Length of generated ids
pub const ID_LENGTH: usize = 21;

/// How far ahead of our wall clock a remote timestamp may be (one day)
pub const MAX_CLOCK_SKEW_MS: u64 = 24 * 60 * 60 * 1000;

/// Generate a random, URL-safe identifier
pub fn generate_id() -> String {
    let mut rng = rand::thread_rng();
    (0..ID_LENGTH)
        .map(|_| ID_ALPHABET[rng.gen_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

/// Errors about document structure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    #[error("Duplicate item id: {0}")]
    DuplicateItemId(String),

    #[error("Item not found: {0}")]
    ItemNotFound(String),

    #[error("Item {id} is timestamped {updated_at}, past the limit {limit}")]
    TimestampTooFarAhead { id: String, updated_at: u64, limit: u64 },
}

/// One entry in the list
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Globally unique, never reused
    pub id: String,
    /// Milliseconds since the Unix epoch of the last change
    #[serde(rename = "lastUpdated")]
    pub updated_at: u64,
    pub text: String,
    pub completed: bool,
}

impl Item {
    /// Create a new, uncompleted item with a fresh id
    pub fn new(text: impl Into<String>, updated_at: u64) -> Self {
        Self {
            id: generate_id(),
            updated_at,
            text: text.into(),
            completed: false,
        }
    }
}

/// The synchronized document
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Stable for the lifetime of the list
    pub id: String,
    pub items: Vec<Item>,
}

impl Document {
    /// Create an empty document with a fresh id
    pub fn new() -> Self {
        Self::with_id(generate_id())
    }

    /// Create an empty document with a given id
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            items: Vec::new(),
        }
    }

    /// Number of items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Check if the document has no items
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Look up an item by id
    pub fn item(&self, id: &str) -> Option<&Item> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Set of all item ids
    pub fn item_ids(&self) -> HashSet<&str> {
        self.items.iter().map(|item| item.id.as_str()).collect()
    }

    /// Items with the most recently touched first (ties by id)
    pub fn recent_first(&self) -> Vec<&Item> {
        let mut items: Vec<&Item> = self.items.iter().collect();
        items.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        items
    }

    /// Check that no two items share an id
    pub fn validate(&self) -> Result<(), DocumentError> {
        let mut seen = HashSet::with_capacity(self.items.len());
        for item in &self.items {
            if !seen.insert(item.id.as_str()) {
                return Err(DocumentError::DuplicateItemId(item.id.clone()));
            }
        }
        Ok(())
    }

    /// Check that no item is timestamped after `limit`
    pub fn check_timestamps(&self, limit: u64) -> Result<(), DocumentError> {
        match self.items.iter().find(|item| item.updated_at > limit) {
            Some(item) => Err(DocumentError::TimestampTooFarAhead {
                id: item.id.clone(),
                updated_at: item.updated_at,
                limit,
            }),
            None => Ok(()),
        }
    }

    /// A copy of this document with `item` appended
    pub fn with_item_added(&self, item: Item) -> Self {
        let mut next = self.clone();
        next.items.push(item);
        next
    }

    /// A copy of this document with `id`'s completion flipped and its
    /// timestamp set to `updated_at`. Every other item is left untouched.
    pub fn with_item_toggled(&self, id: &str, updated_at: u64) -> Result<Self, DocumentError> {
        if self.item(id).is_none() {
            return Err(DocumentError::ItemNotFound(id.to_string()));
        }

        let items = self
            .items
            .iter()
            .map(|item| {
                if item.id == id {
                    Item {
                        completed: !item.completed,
                        updated_at,
                        ..item.clone()
                    }
                } else {
                    item.clone()
                }
            })
            .collect();

        Ok(Self {
            id: self.id.clone(),
            items,
        })
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

/// Millisecond clock that never repeats or goes backwards within one instance
#[derive(Clone, Debug, Default)]
pub struct Clock {
    last: u64,
}

impl Clock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current wall-clock time in milliseconds since the Unix epoch
    pub fn wall_ms() -> u64 {
        Utc::now().timestamp_millis().max(0) as u64
    }

    /// Latest timestamp accepted from a peer right now
    pub fn remote_limit() -> u64 {
        Self::wall_ms().saturating_add(MAX_CLOCK_SKEW_MS)
    }

    /// Next timestamp: wall-clock time, bumped past the previous reading
    pub fn now(&mut self) -> u64 {
        self.last = Self::wall_ms().max(self.last.saturating_add(1));
        self.last
    }

    /// Make sure future readings are later than `seen`
    pub fn observe(&mut self, seen: u64) {
        self.last = self.last.max(seen);
    }
}
