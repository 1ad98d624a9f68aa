//! Evaluation contexts.
//!
//! A [`Context`] identifies who a migration operation ran for. Only the
//! kind-to-key mapping is needed here: it becomes the `contextKeys` field of
//! the emitted event.

use std::collections::BTreeMap;

/// The context kind used when none is given.
pub const DEFAULT_KIND: &str = "user";

/// An evaluation context: one key per context kind.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Context {
    keys: BTreeMap<String, String>,
}

impl Context {
    /// Creates a single-kind context.
    #[must_use]
    pub fn new(kind: impl Into<String>, key: impl Into<String>) -> Self {
        Self::multi([(kind, key)])
    }

    /// Creates a single-kind context of kind `user`.
    #[must_use]
    pub fn user(key: impl Into<String>) -> Self {
        Self::new(DEFAULT_KIND, key)
    }

    /// Creates a multi-kind context.
    ///
    /// Entries with an empty kind or key are skipped; a later entry for the
    /// same kind replaces an earlier one.
    #[must_use]
    pub fn multi<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let keys = entries
            .into_iter()
            .map(|(kind, key)| (kind.into(), key.into()))
            .filter(|(kind, key)| !kind.is_empty() && !key.is_empty())
            .collect();
        Self { keys }
    }

    /// Returns the key for `kind`, if present.
    #[must_use]
    pub fn key(&self, kind: &str) -> Option<&str> {
        self.keys.get(kind).map(String::as_str)
    }

    /// Returns the kind-to-key map.
    #[must_use]
    pub const fn keys(&self) -> &BTreeMap<String, String> {
        &self.keys
    }

    /// Returns `true` if this is a multi-kind context.
    #[must_use]
    pub fn is_multi(&self) -> bool {
        self.keys.len() > 1
    }

    /// Returns `true` if no kind has a usable key.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}
