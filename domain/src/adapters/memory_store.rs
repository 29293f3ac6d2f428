use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::{Entity, EntityKey, EntityStore, NotebookError};

/// In-memory entity store for tests and demos.
///
/// Entities are replaced whole under a single mutex, so concurrent puts to
/// one key are last-write-wins and readers never see a mix. Allocated ids
/// skip past any id already written by `put`.
pub struct InMemoryStore {
    entities: Mutex<BTreeMap<EntityKey, Entity>>,
    next_id: AtomicI64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            entities: Mutex::new(BTreeMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    /// Number of stored entities. Still counts after a writer panicked
    /// mid-call; the store methods report that case as `StoreUnavailable`.
    pub fn len(&self) -> usize {
        self.entities
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, BTreeMap<EntityKey, Entity>>, NotebookError> {
        self.entities
            .lock()
            .map_err(|_| NotebookError::StoreUnavailable("mutex poisoned".into()))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntityStore for InMemoryStore {
    fn allocate_id(&self, kind: &str) -> Result<i64, NotebookError> {
        let entities = self.lock()?;
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if !entities.contains_key(&EntityKey::new(kind, id)) {
                return Ok(id);
            }
        }
    }

    fn lookup(&self, key: &EntityKey) -> Result<Option<Entity>, NotebookError> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn put(&self, entity: &Entity) -> Result<(), NotebookError> {
        let mut entities = self.lock()?;
        self.next_id
            .fetch_max(entity.key.id.saturating_add(1), Ordering::Relaxed);
        entities.insert(entity.key.clone(), entity.clone());
        Ok(())
    }

    fn delete(&self, key: &EntityKey) -> Result<(), NotebookError> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn query(&self, kind: &str) -> Result<Vec<Entity>, NotebookError> {
        Ok(self
            .lock()?
            .values()
            .filter(|e| e.key.kind == kind)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PropertyValue, NOTE_KIND};

    fn entity(kind: &str, id: i64, author: &str) -> Entity {
        Entity::new(EntityKey::new(kind, id))
            .with_property("author", PropertyValue::String(author.into()))
    }

    #[test]
    fn allocated_ids_are_unique_and_positive() {
        let store = InMemoryStore::new();
        let a = store.allocate_id(NOTE_KIND).unwrap();
        let b = store.allocate_id(NOTE_KIND).unwrap();
        assert!(a > 0 && b > 0);
        assert_ne!(a, b);
    }

    #[test]
    fn allocation_skips_ids_written_by_callers() {
        let store = InMemoryStore::new();
        store.put(&entity(NOTE_KIND, 1, "Carol")).unwrap();
        store.put(&entity(NOTE_KIND, 2, "Erin")).unwrap();

        let fresh = store.allocate_id(NOTE_KIND).unwrap();
        assert!(fresh > 2, "allocated {fresh}");
        assert_eq!(
            store.lookup(&EntityKey::new(NOTE_KIND, 1)).unwrap().unwrap().string_property("author"),
            Some("Carol")
        );
    }

    #[test]
    fn blank_id_save_after_chosen_id_keeps_both_notes() {
        let repo = crate::NotebookRepository::new(InMemoryStore::new());
        repo.save(crate::NoteWithText::with_id("1", "Carol", "mine")).unwrap();
        let fresh = repo.save(crate::NoteWithText::new("Dave", "new")).unwrap();

        assert_ne!(fresh.id, "1");
        assert_eq!(repo.get("1").unwrap().author, "Carol");
        assert_eq!(repo.get(&fresh.id).unwrap().author, "Dave");
        assert_eq!(repo.store().len(), 2);
    }

    #[test]
    fn poisoned_lock_is_reported_not_hidden() {
        let store = std::sync::Arc::new(InMemoryStore::new());
        store.put(&entity(NOTE_KIND, 1, "a")).unwrap();

        let clone = store.clone();
        let _ = std::thread::spawn(move || {
            let _guard = clone.entities.lock().unwrap();
            panic!("writer died");
        })
        .join();

        assert_eq!(store.len(), 1);
        assert!(!store.is_empty());
        let err = store.lookup(&EntityKey::new(NOTE_KIND, 1)).unwrap_err();
        assert!(matches!(err, NotebookError::StoreUnavailable(_)));
    }

    #[test]
    fn put_replaces_whole_entity() {
        let store = InMemoryStore::new();
        let key = EntityKey::new(NOTE_KIND, 1);
        store
            .put(&entity(NOTE_KIND, 1, "Alice").with_property("text", PropertyValue::String("x".into())))
            .unwrap();
        store.put(&entity(NOTE_KIND, 1, "Bob")).unwrap();

        let got = store.lookup(&key).unwrap().unwrap();
        assert_eq!(got.string_property("author"), Some("Bob"));
        assert!(got.properties.get("text").is_none());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn delete_missing_is_noop() {
        let store = InMemoryStore::new();
        store.delete(&EntityKey::new(NOTE_KIND, 99)).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn query_filters_by_kind() {
        let store = InMemoryStore::new();
        store.put(&entity(NOTE_KIND, 1, "a")).unwrap();
        store.put(&entity(NOTE_KIND, 2, "b")).unwrap();
        store.put(&entity("Other", 3, "c")).unwrap();
        let notes = store.query(NOTE_KIND).unwrap();
        assert_eq!(notes.len(), 2);
        assert!(notes.iter().all(|e| e.key.kind == NOTE_KIND));
    }
}
