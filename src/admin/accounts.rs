//! Admin account storage seam.
//!
//! Durable account storage and password hashing live outside this crate.
//! The server only needs an opaque identity back from a store.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub uuid: Uuid,
    pub name: String,
}

impl Account {
    pub fn new(name: &str) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: name.to_string(),
        }
    }
}

/// Account lookup and creation.
pub trait AccountStore: Send + Sync {
    /// The account for `name` if `password` is correct.
    fn get_account(&self, name: &str, password: &str) -> Option<Account>;

    /// Create an account. Returns `None` if the name is taken.
    fn new_account(&self, name: &str, password: &str) -> Option<Account>;

    fn contains(&self, name: &str) -> bool;

    fn is_empty(&self) -> bool;
}

/// Volatile store used when no external store is wired in.
#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    accounts: Mutex<HashMap<String, (String, Account)>>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AccountStore for MemoryAccountStore {
    fn get_account(&self, name: &str, password: &str) -> Option<Account> {
        let accounts = self.accounts.lock().unwrap_or_else(PoisonError::into_inner);
        accounts
            .get(name)
            .filter(|(stored, _)| stored == password)
            .map(|(_, account)| account.clone())
    }

    fn new_account(&self, name: &str, password: &str) -> Option<Account> {
        let mut accounts = self.accounts.lock().unwrap_or_else(PoisonError::into_inner);
        if accounts.contains_key(name) {
            return None;
        }
        let account = Account::new(name);
        accounts.insert(name.to_string(), (password.to_string(), account.clone()));
        Some(account)
    }

    fn contains(&self, name: &str) -> bool {
        self.accounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    fn is_empty(&self) -> bool {
        self.accounts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}
