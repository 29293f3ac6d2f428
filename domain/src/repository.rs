//! Note repository: list, get, upsert, and delete notes in an entity store.
//!
//! Notes live as entities of kind [`NOTE_KIND`] with string properties
//! `author` and `text`. Ids cross this boundary as numeric strings and are
//! validated into [`NoteId`] before any store call.

use std::collections::HashSet;
use std::fmt;

use tracing::{debug, info, warn, Dispatch};

use crate::{
    Entity, EntityStore, Note, NoteId, NoteWithText, NotebookError, PropertyValue, RetryPolicy,
    NOTE_KIND, PROP_AUTHOR, PROP_TEXT,
};

/// Repository over any [`EntityStore`].
///
/// Store calls run through the configured [`RetryPolicy`]. Log events go to
/// the injected `Dispatch`, which defaults to the dispatcher that was current
/// when the repository was built.
pub struct NotebookRepository<S: EntityStore> {
    store: S,
    retry: RetryPolicy,
    dispatch: Dispatch,
}

impl<S: EntityStore> fmt::Debug for NotebookRepository<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotebookRepository")
            .field("store", &std::any::type_name::<S>())
            .field("retry", &self.retry)
            .finish()
    }
}

impl<S: EntityStore> NotebookRepository<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
            dispatch: tracing::dispatcher::get_default(|d| d.clone()),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Route this repository's log events to `dispatch`.
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn observed<T>(&self, f: impl FnOnce() -> T) -> T {
        tracing::dispatcher::with_default(&self.dispatch, f)
    }

    /// Summaries of every stored note.
    ///
    /// Entities without a string `author` are skipped with a warning, the
    /// same way stores skip entities they cannot decode.
    pub fn list(&self) -> Result<HashSet<Note>, NotebookError> {
        self.observed(|| {
            let entities = self.retry.run("list", || self.store.query(NOTE_KIND))?;
            let mut notes = HashSet::with_capacity(entities.len());
            for entity in &entities {
                let author = match required_string(entity, PROP_AUTHOR) {
                    Ok(author) => author,
                    Err(e) => {
                        warn!(key = %entity.key, error = %e, "skipping unreadable note");
                        continue;
                    }
                };
                debug!(note_id = entity.key.id, author, "listed note");
                notes.insert(Note {
                    id: entity.key.id.to_string(),
                    author: author.to_string(),
                });
            }
            info!(count = notes.len(), "listed notes");
            Ok(notes)
        })
    }

    pub fn get(&self, note_id: &str) -> Result<NoteWithText, NotebookError> {
        self.observed(|| {
            let id = NoteId::parse(note_id)?;
            let key = id.key();
            let entity = self
                .retry
                .run("get", || self.store.lookup(&key))?
                .ok_or_else(|| NotebookError::NotFound(id.to_string()))?;
            debug!(note_id = %id, "fetched note");
            entity_to_note(&entity)
        })
    }

    /// Create or replace a note. An absent note is returned as absent.
    pub fn upsert(&self, note: Option<NoteWithText>) -> Result<Option<NoteWithText>, NotebookError> {
        match note {
            Some(note) => self.save(note).map(Some),
            None => Ok(None),
        }
    }

    /// Create (blank id) or fully overwrite (existing id) a note.
    ///
    /// Returns the note carrying its id. Author and text are written together
    /// in a single put, replacing whatever the entity held before.
    pub fn save(&self, mut note: NoteWithText) -> Result<NoteWithText, NotebookError> {
        self.observed(|| {
            let id = if note.has_blank_id() {
                let raw = self.retry.run("allocate_id", || self.store.allocate_id(NOTE_KIND))?;
                let id = NoteId::new(raw).map_err(|_| {
                    NotebookError::StoreUnavailable(format!("store allocated invalid id {raw}"))
                })?;
                info!(note_id = %id, "allocated note id");
                note.id = id.to_string();
                id
            } else {
                NoteId::parse(&note.id)?
            };

            let entity = note_to_entity(id, &note);
            self.retry.run("put", || self.store.put(&entity))?;
            debug!(note_id = %id, "stored note");
            Ok(note)
        })
    }

    /// Remove a note. Unknown ids are accepted as a no-op.
    pub fn delete(&self, note_id: &str) -> Result<(), NotebookError> {
        self.observed(|| {
            let id = NoteId::parse(note_id)?;
            let key = id.key();
            self.retry.run("delete", || self.store.delete(&key))?;
            debug!(note_id = %id, "deleted note");
            Ok(())
        })
    }
}

fn note_to_entity(id: NoteId, note: &NoteWithText) -> Entity {
    Entity::new(id.key())
        .with_property(PROP_AUTHOR, PropertyValue::String(note.author.clone()))
        .with_property(PROP_TEXT, PropertyValue::String(note.text.clone()))
}

fn entity_to_note(entity: &Entity) -> Result<NoteWithText, NotebookError> {
    Ok(NoteWithText {
        id: entity.key.id.to_string(),
        author: required_string(entity, PROP_AUTHOR)?.to_string(),
        text: required_string(entity, PROP_TEXT)?.to_string(),
    })
}

fn required_string<'a>(entity: &'a Entity, name: &str) -> Result<&'a str, NotebookError> {
    entity
        .string_property(name)
        .ok_or_else(|| NotebookError::MalformedEntity {
            key: entity.key.to_string(),
            reason: format!("missing string property `{name}`"),
        })
}
