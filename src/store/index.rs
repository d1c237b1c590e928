//! Secondary indexes over a [`super::Store`]'s objects.

use std::collections::{HashMap, HashSet};

/// A key-extraction function: given an object, returns zero or more index
/// keys for it. Boxed so `Indexers` can hold a heterogeneous set by name.
pub type KeyFn<T> = Box<dyn Fn(&T) -> Vec<String> + Send + Sync>;

pub struct Indexer<T> {
    pub(crate) key_fn: KeyFn<T>,
    /// index value -> set of object names
    pub(crate) index: HashMap<String, HashSet<String>>,
}

impl<T> Indexer<T> {
    pub fn new(key_fn: KeyFn<T>) -> Self {
        Self {
            key_fn,
            index: HashMap::new(),
        }
    }

    pub fn add(&mut self, name: &str, obj: &T) {
        for key in (self.key_fn)(obj) {
            self.index.entry(key).or_default().insert(name.to_string());
        }
    }

    pub fn remove(&mut self, name: &str, obj: &T) {
        for key in (self.key_fn)(obj) {
            if let Some(set) = self.index.get_mut(&key) {
                set.remove(name);
                if set.is_empty() {
                    self.index.remove(&key);
                }
            }
        }
    }

    pub fn update(&mut self, name: &str, old: &T, new: &T) {
        self.remove(name, old);
        self.add(name, new);
    }

    pub fn by_value(&self, value: &str) -> HashSet<String> {
        self.index.get(value).cloned().unwrap_or_default()
    }
}
