//! Address blacklist.
//!
//! Two independent instances exist: one owned by the server context and
//! checked right after accept, and one per domain checked after host
//! resolution. Every accepted connection reads the server list, so the map
//! is a `DashMap` (sharded locks, concurrent reads).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use dashmap::DashMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// What to do with a blacklisted client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Drop the socket without sending anything.
    CloseConnection,
    Send401Unauthorized,
    Send503ServiceUnavailable,
}

impl Action {
    /// Wire value used in configuration files and admin forms.
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::CloseConnection => "close",
            Action::Send401Unauthorized => "401",
            Action::Send503ServiceUnavailable => "503",
        }
    }

    /// Parse a wire value, falling back to [`Action::CloseConnection`].
    ///
    /// Unknown values are logged; they are never rejected.
    pub fn from_wire(value: &str) -> Action {
        value.parse().unwrap_or_else(|_| {
            tracing::error!(value = %value, "Unknown blacklist action, using close");
            Action::CloseConnection
        })
    }

    /// Status code for the minimal rejection response, if one is sent.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Action::CloseConnection => None,
            Action::Send401Unauthorized => Some(401),
            Action::Send503ServiceUnavailable => Some(503),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a wire value is not one of `close`, `401`, `503`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown blacklist action: {0}")]
pub struct UnknownAction(pub String);

impl FromStr for Action {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "close" => Ok(Action::CloseConnection),
            "401" => Ok(Action::Send401Unauthorized),
            "503" => Ok(Action::Send503ServiceUnavailable),
            other => Err(UnknownAction(other.to_string())),
        }
    }
}

impl Serialize for Action {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(Action::from_wire(&value))
    }
}

/// Address → action map.
///
/// Addresses are stored verbatim. Validating that they are real IP addresses
/// is left to the caller (config validation and the admin commands do it).
#[derive(Debug, Default)]
pub struct Blacklist {
    entries: DashMap<String, Action>,
}

impl Blacklist {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: &BTreeMap<String, Action>) -> Self {
        let list = Self::new();
        list.replace_all(entries);
        list
    }

    /// Insert or overwrite the action for `address`.
    pub fn add(&self, address: &str, action: Action) {
        self.entries.insert(address.to_string(), action);
    }

    /// Change the action for `address`. Same effect as [`Blacklist::add`].
    pub fn update(&self, address: &str, action: Action) {
        self.add(address, action);
    }

    /// Remove `address`. Returns the action it had, if any.
    pub fn remove(&self, address: &str) -> Option<Action> {
        self.entries.remove(address).map(|(_, action)| action)
    }

    /// The action for `address`, or `None` when it is not blacklisted.
    pub fn action(&self, address: &str) -> Option<Action> {
        self.entries.get(address).map(|entry| *entry.value())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ordered snapshot, used when saving the configuration and by the admin pages.
    pub fn entries(&self) -> BTreeMap<String, Action> {
        self.entries
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect()
    }

    /// Make `entries` the whole list.
    ///
    /// Entries are upserted before stale ones are dropped, so a concurrent
    /// lookup for an address present in both lists never misses.
    pub fn replace_all(&self, entries: &BTreeMap<String, Action>) {
        for (address, action) in entries {
            self.entries.insert(address.clone(), *action);
        }
        self.entries.retain(|address, _| entries.contains_key(address));
    }
}
