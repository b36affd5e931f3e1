//! Reference-counted registry of open scopes.
//!
//! Equal scopes share one entry (and therefore one live feed). Every entry
//! gets a fresh [`ScopeKey`] that is never reused, so a key doubles as the
//! liveness guard for asynchronous work started on behalf of a scope: once
//! the entry is released, results tagged with its key are discarded.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use crate::scope::Scope;

/// Identity of one activation of a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeKey(u64);

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope#{}", self.0)
    }
}

/// Handle returned by `open`. Single use: closing it twice is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle {
    key: ScopeKey,
    token: u64,
}

impl SubscriptionHandle {
    #[must_use]
    pub const fn key(&self) -> ScopeKey {
        self.key
    }
}

/// What the caller must do after `open`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    /// First consumer of this scope: start one feed for it.
    Started { key: ScopeKey, scope: Scope },
    /// The scope already has a live feed.
    Shared { key: ScopeKey, consumers: usize },
}

/// What the caller must do after `close`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Closure {
    /// Last consumer left: tear the feed down.
    Released { key: ScopeKey, scope: Scope },
    /// Other consumers remain.
    Retained { key: ScopeKey, consumers: usize },
    /// Handle was unknown or already closed.
    Unknown,
}

#[derive(Debug)]
struct Entry {
    scope: Scope,
    tokens: BTreeSet<u64>,
}

#[derive(Debug, Default)]
pub struct ScopeRegistry {
    by_scope: HashMap<Scope, ScopeKey>,
    entries: HashMap<ScopeKey, Entry>,
    next_key: u64,
    next_token: u64,
}

impl ScopeRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, scope: Scope) -> (SubscriptionHandle, Activation) {
        let token = self.next_token;
        self.next_token += 1;

        if let Some(&key) = self.by_scope.get(&scope)
            && let Some(entry) = self.entries.get_mut(&key)
        {
            entry.tokens.insert(token);
            let consumers = entry.tokens.len();
            return (
                SubscriptionHandle { key, token },
                Activation::Shared { key, consumers },
            );
        }

        let key = ScopeKey(self.next_key);
        self.next_key += 1;
        self.by_scope.insert(scope.clone(), key);
        self.entries.insert(
            key,
            Entry {
                scope: scope.clone(),
                tokens: BTreeSet::from([token]),
            },
        );
        (SubscriptionHandle { key, token }, Activation::Started { key, scope })
    }

    pub fn close(&mut self, handle: &SubscriptionHandle) -> Closure {
        let Some(entry) = self.entries.get_mut(&handle.key) else {
            return Closure::Unknown;
        };
        if !entry.tokens.remove(&handle.token) {
            return Closure::Unknown;
        }
        if !entry.tokens.is_empty() {
            return Closure::Retained {
                key: handle.key,
                consumers: entry.tokens.len(),
            };
        }

        let Some(entry) = self.entries.remove(&handle.key) else {
            return Closure::Unknown;
        };
        self.by_scope.remove(&entry.scope);
        Closure::Released {
            key: handle.key,
            scope: entry.scope,
        }
    }

    #[must_use]
    pub fn is_live(&self, key: ScopeKey) -> bool {
        self.entries.contains_key(&key)
    }

    #[must_use]
    pub fn scope(&self, key: ScopeKey) -> Option<&Scope> {
        self.entries.get(&key).map(|entry| &entry.scope)
    }

    #[must_use]
    pub fn key_for(&self, scope: &Scope) -> Option<ScopeKey> {
        self.by_scope.get(scope).copied()
    }

    #[must_use]
    pub fn consumers(&self, key: ScopeKey) -> usize {
        self.entries.get(&key).map_or(0, |entry| entry.tokens.len())
    }

    /// All currently open scopes.
    pub fn scopes(&self) -> impl Iterator<Item = (ScopeKey, &Scope)> {
        self.entries.iter().map(|(key, entry)| (*key, &entry.scope))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
