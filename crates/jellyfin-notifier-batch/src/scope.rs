// Coalescing keys and library scopes
//
// A refresh request targets one Jellyfin server (credentials) and a set of
// libraries (scope). Keys and scopes compare as sets, so header order and
// duplicate entries never split a batch.

use std::collections::BTreeSet;
use std::fmt;

/// Connection details for one Jellyfin server.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Credentials {
    base_url: String,
    api_key: String,
}

impl Credentials {
    /// Trailing slashes and surrounding whitespace are stripped from the URL so
    /// `http://jf/` and `http://jf` land in the same batch.
    pub fn new(url: impl AsRef<str>, api_key: impl Into<String>) -> Self {
        Self {
            base_url: url.as_ref().trim().trim_end_matches('/').to_string(),
            api_key: api_key.into().trim().to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }
}

// The API key never reaches logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("base_url", &self.base_url)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl fmt::Display for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base_url)
    }
}

/// Explicit library selection: concrete library ids plus collection-type
/// filters. Collection types are kept verbatim; they are only resolved to ids
/// when the batch is flushed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeFilter {
    library_ids: BTreeSet<String>,
    collection_types: BTreeSet<String>,
}

impl ScopeFilter {
    pub fn library_ids(&self) -> impl Iterator<Item = &str> + '_ {
        self.library_ids.iter().map(String::as_str)
    }

    pub fn collection_types(&self) -> impl Iterator<Item = &str> + '_ {
        self.collection_types.iter().map(String::as_str)
    }

    pub fn has_collection_types(&self) -> bool {
        !self.collection_types.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.library_ids.is_empty() && self.collection_types.is_empty()
    }

    fn absorb(&mut self, other: ScopeFilter) {
        self.library_ids.extend(other.library_ids);
        self.collection_types.extend(other.collection_types);
    }
}

/// Libraries a refresh should cover.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum LibraryScope {
    All,
    Filtered(ScopeFilter),
}

impl LibraryScope {
    /// Build a scope from header values. With no ids and no collection types
    /// the request means "refresh everything".
    pub fn from_parts<I, C>(library_ids: I, collection_types: C) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        let filter = ScopeFilter {
            library_ids: library_ids.into_iter().map(Into::into).collect(),
            collection_types: collection_types.into_iter().map(Into::into).collect(),
        };

        if filter.is_empty() {
            LibraryScope::All
        } else {
            LibraryScope::Filtered(filter)
        }
    }

    pub fn library_ids<I>(ids: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<String>,
    {
        Self::from_parts(ids, std::iter::empty::<String>())
    }

    pub fn collection_types<C>(types: C) -> Self
    where
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self::from_parts(std::iter::empty::<String>(), types)
    }

    pub fn is_all(&self) -> bool {
        matches!(self, LibraryScope::All)
    }

    pub fn filter(&self) -> Option<&ScopeFilter> {
        match self {
            LibraryScope::All => None,
            LibraryScope::Filtered(filter) => Some(filter),
        }
    }

    /// Scope union. `All` absorbs everything; filters union both kinds side
    /// by side.
    pub fn union(mut self, other: LibraryScope) -> LibraryScope {
        self.merge(other);
        self
    }

    pub fn merge(&mut self, other: LibraryScope) {
        match (&mut *self, other) {
            (LibraryScope::All, _) => {}
            (this, LibraryScope::All) => *this = LibraryScope::All,
            (LibraryScope::Filtered(mine), LibraryScope::Filtered(theirs)) => mine.absorb(theirs),
        }
    }
}

impl fmt::Display for LibraryScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LibraryScope::All => f.write_str("(all)"),
            LibraryScope::Filtered(filter) => {
                let ids: Vec<&str> = filter.library_ids().collect();
                let types: Vec<&str> = filter.collection_types().collect();
                match (ids.is_empty(), types.is_empty()) {
                    (false, true) => write!(f, "{}", ids.join(", ")),
                    (true, false) => write!(f, "collection_types={}", types.join(", ")),
                    _ => write!(
                        f,
                        "{} collection_types={}",
                        ids.join(", "),
                        types.join(", ")
                    ),
                }
            }
        }
    }
}

/// Second half of a [`ScopeKey`]: either the requested scope itself, or the
/// whole server when scopes are grouped per server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyPartition {
    Server,
    Scope(LibraryScope),
}

/// Identity of a coalescing batch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeKey {
    credentials: Credentials,
    partition: KeyPartition,
}

impl ScopeKey {
    /// One batch per (server, requested scope).
    pub fn for_scope(credentials: Credentials, scope: &LibraryScope) -> Self {
        Self {
            credentials,
            partition: KeyPartition::Scope(scope.clone()),
        }
    }

    /// One batch per server; scopes accumulate through the union.
    pub fn for_server(credentials: Credentials) -> Self {
        Self {
            credentials,
            partition: KeyPartition::Server,
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.partition {
            KeyPartition::Server => write!(f, "{}", self.credentials),
            KeyPartition::Scope(scope) => write!(f, "{} [{}]", self.credentials, scope),
        }
    }
}
