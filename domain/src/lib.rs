//! Domain library for the Notebook service.
//!
//! Holds the note types, the `EntityStore` port, the error taxonomy, and the
//! `NotebookRepository` that maps notes onto store entities. Network adapters
//! (Datastore, auth) live in separate crates; keep IO concerns out of here.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Entity kind under which notes are stored.
pub const NOTE_KIND: &str = "Note";

/// Property holding the note author.
pub const PROP_AUTHOR: &str = "author";

/// Property holding the note body.
pub const PROP_TEXT: &str = "text";

/// Summary view of a note, as returned by listings.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    pub author: String,
}

/// A note with its full text.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NoteWithText {
    /// Numeric string id; blank for a note the store has not seen yet.
    #[serde(default)]
    pub id: String,
    pub author: String,
    pub text: String,
}

impl NoteWithText {
    /// A note without an id; saving it allocates one.
    pub fn new(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: String::new(),
            author: author.into(),
            text: text.into(),
        }
    }

    /// A note addressed at an existing id.
    pub fn with_id(
        id: impl Into<String>,
        author: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            author: author.into(),
            text: text.into(),
        }
    }

    /// Blank ids (empty or whitespace only) ask the store for a fresh key.
    pub fn has_blank_id(&self) -> bool {
        self.id.trim().is_empty()
    }

    pub fn summary(&self) -> Note {
        Note {
            id: self.id.clone(),
            author: self.author.clone(),
        }
    }
}

/// Validated note identifier: a positive 64-bit integer.
///
/// Callers exchange ids as strings; this is the internal form.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NoteId(i64);

impl NoteId {
    pub fn new(id: i64) -> Result<Self, NotebookError> {
        if id <= 0 {
            return Err(NotebookError::InvalidIdentifier {
                id: id.to_string(),
                reason: "must be a positive integer".into(),
            });
        }
        Ok(Self(id))
    }

    /// Parse the external string form. No trimming: `" 7"` is rejected.
    pub fn parse(s: &str) -> Result<Self, NotebookError> {
        let id = s
            .parse::<i64>()
            .map_err(|e| NotebookError::InvalidIdentifier {
                id: s.to_string(),
                reason: e.to_string(),
            })?;
        Self::new(id).map_err(|_| NotebookError::InvalidIdentifier {
            id: s.to_string(),
            reason: "must be a positive integer".into(),
        })
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// Store key for the note with this id.
    pub fn key(&self) -> EntityKey {
        EntityKey::new(NOTE_KIND, self.0)
    }
}

impl Display for NoteId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for NoteId {
    type Err = NotebookError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Store-side key: entity kind plus numeric id.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityKey {
    pub kind: String,
    pub id: i64,
}

impl EntityKey {
    pub fn new(kind: impl Into<String>, id: i64) -> Self {
        Self {
            kind: kind.into(),
            id,
        }
    }
}

impl Display for EntityKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.kind, self.id)
    }
}

/// Typed property value held by a schema-less entity.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PropertyValue {
    Null,
    Boolean(bool),
    Integer(i64),
    String(String),
}

impl PropertyValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// A stored entity: key plus named properties.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entity {
    pub key: EntityKey,
    pub properties: BTreeMap<String, PropertyValue>,
}

impl Entity {
    pub fn new(key: EntityKey) -> Self {
        Self {
            key,
            properties: BTreeMap::new(),
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, value: PropertyValue) -> Self {
        self.properties.insert(name.into(), value);
        self
    }

    pub fn string_property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).and_then(PropertyValue::as_str)
    }
}

/// Port to a schema-less entity store addressed by (kind, numeric id).
///
/// Every method is one round trip to the store. Implementations must be safe
/// to share between threads.
pub trait EntityStore: Send + Sync {
    /// Reserve a fresh id for `kind`. The store never hands it out again.
    fn allocate_id(&self, kind: &str) -> Result<i64, NotebookError>;
    fn lookup(&self, key: &EntityKey) -> Result<Option<Entity>, NotebookError>;
    /// Insert or fully replace the entity at `entity.key`.
    fn put(&self, entity: &Entity) -> Result<(), NotebookError>;
    /// Remove the entity at `key`; an absent key is not an error.
    fn delete(&self, key: &EntityKey) -> Result<(), NotebookError>;
    /// All entities of `kind`, in no particular order.
    ///
    /// Stored entities that cannot be decoded (for example a key with a name
    /// instead of a numeric id) are skipped with a warning rather than
    /// failing the whole query. Callers apply the same rule to entities that
    /// decode but lack properties they need.
    fn query(&self, kind: &str) -> Result<Vec<Entity>, NotebookError>;
}

impl<S: EntityStore + ?Sized> EntityStore for Arc<S> {
    fn allocate_id(&self, kind: &str) -> Result<i64, NotebookError> {
        (**self).allocate_id(kind)
    }

    fn lookup(&self, key: &EntityKey) -> Result<Option<Entity>, NotebookError> {
        (**self).lookup(key)
    }

    fn put(&self, entity: &Entity) -> Result<(), NotebookError> {
        (**self).put(entity)
    }

    fn delete(&self, key: &EntityKey) -> Result<(), NotebookError> {
        (**self).delete(key)
    }

    fn query(&self, kind: &str) -> Result<Vec<Entity>, NotebookError> {
        (**self).query(kind)
    }
}

impl<S: EntityStore + ?Sized> EntityStore for Box<S> {
    fn allocate_id(&self, kind: &str) -> Result<i64, NotebookError> {
        (**self).allocate_id(kind)
    }

    fn lookup(&self, key: &EntityKey) -> Result<Option<Entity>, NotebookError> {
        (**self).lookup(key)
    }

    fn put(&self, entity: &Entity) -> Result<(), NotebookError> {
        (**self).put(entity)
    }

    fn delete(&self, key: &EntityKey) -> Result<(), NotebookError> {
        (**self).delete(key)
    }

    fn query(&self, kind: &str) -> Result<Vec<Entity>, NotebookError> {
        (**self).query(kind)
    }
}

/// Errors surfaced by the repository and its store adapters.
#[derive(Debug, thiserror::Error)]
pub enum NotebookError {
    /// Credentials or settings are missing or malformed.
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("note {0} not found")]
    NotFound(String),
    #[error("invalid note id {id:?}: {reason}")]
    InvalidIdentifier { id: String, reason: String },
    /// Recoverable store or network failure; safe to retry.
    #[error("transient store error: {0}")]
    TransientStore(String),
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("malformed entity {key}: {reason}")]
    MalformedEntity { key: String, reason: String },
}

impl NotebookError {
    pub fn is_transient(&self) -> bool {
        matches!(self, NotebookError::TransientStore(_))
    }
}

/// Return a short about/version line for binaries to print.
pub fn about() -> String {
    let pkg = env!("CARGO_PKG_NAME");
    let ver = env!("CARGO_PKG_VERSION");
    format!("{} v{}", pkg, ver)
}

pub mod adapters;
pub mod repository;
pub mod retry;

pub use repository::NotebookRepository;
pub use retry::RetryPolicy;
