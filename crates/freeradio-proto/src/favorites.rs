use crate::store::{SharedBackend, Store, StoreError, FAVORITES_KEY};

/// Persisted set of favorite station ids.  Order of insertion is kept so the
/// stored list stays stable across toggles of other ids.
pub struct Favorites {
    store: Store<Vec<String>>,
}

impl Favorites {
    pub fn new(backend: SharedBackend) -> Self {
        Self {
            store: Store::new(backend, FAVORITES_KEY, Vec::new()),
        }
    }

    pub fn list(&self) -> Vec<String> {
        self.store.load()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.list().iter().any(|f| f == id)
    }

    pub fn add(&self, id: &str) -> Result<(), StoreError> {
        self.store.update(|favs| {
            if !favs.iter().any(|f| f == id) {
                favs.push(id.to_string());
            }
        })
    }

    pub fn remove(&self, id: &str) -> Result<(), StoreError> {
        self.store.update(|favs| favs.retain(|f| f != id))
    }

    /// Returns whether `id` is a favorite after the toggle.
    pub fn toggle(&self, id: &str) -> Result<bool, StoreError> {
        self.store.update(|favs| {
            if let Some(pos) = favs.iter().position(|f| f == id) {
                favs.remove(pos);
                false
            } else {
                favs.push(id.to_string());
                true
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;
    use std::sync::Arc;

    fn favorites() -> Favorites {
        Favorites::new(Arc::new(MemoryBackend::new()))
    }

    #[test]
    fn test_add_is_idempotent() {
        let favs = favorites();
        favs.add("a").unwrap();
        favs.add("a").unwrap();
        assert_eq!(favs.list(), vec!["a".to_string()]);
    }

    #[test]
    fn test_remove_missing_is_noop() {
        let favs = favorites();
        favs.add("a").unwrap();
        favs.remove("b").unwrap();
        favs.remove("a").unwrap();
        favs.remove("a").unwrap();
        assert!(favs.list().is_empty());
    }

    #[test]
    fn test_concurrent_adds_all_persist() {
        let favs = favorites();
        std::thread::scope(|s| {
            for t in 0..8 {
                let favs = &favs;
                s.spawn(move || {
                    for i in 0..200 {
                        favs.add(&format!("station-{}-{}", t, i)).unwrap();
                    }
                });
            }
        });
        assert_eq!(favs.list().len(), 1600);
    }

    #[test]
    fn test_toggle_twice_restores_membership() {
        let favs = favorites();
        favs.add("keep").unwrap();
        let before = favs.list();

        assert!(favs.toggle("x").unwrap());
        assert!(favs.contains("x"));
        assert!(!favs.toggle("x").unwrap());
        assert!(!favs.contains("x"));
        assert_eq!(favs.list(), before);

        assert!(!favs.toggle("keep").unwrap());
        assert!(favs.toggle("keep").unwrap());
        assert!(favs.contains("keep"));
    }
}
