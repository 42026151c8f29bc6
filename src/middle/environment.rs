use core::hash::Hash;

use hashbrown::HashMap;

/// A scope-stacked symbol table. Lookups search from the innermost scope
/// outwards, so inner bindings shadow outer ones. There is always at least
/// one scope.
#[derive(Debug, Clone)]
pub struct Environment<K, V> {
    scopes: Vec<HashMap<K, V>>,
}

impl<K: Eq + Hash, V> Default for Environment<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash, V> Environment<K, V> {
    pub fn new() -> Self {
        Self {
            scopes: vec![HashMap::new()],
        }
    }

    pub fn begin_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    /// Pops the innermost scope and hands back its bindings. The outermost
    /// scope is never popped; ending it only clears it.
    pub fn end_scope(&mut self) -> HashMap<K, V> {
        if self.scopes.len() == 1 {
            return self.scopes[0].drain().collect();
        }

        self.scopes.pop().unwrap_or_default()
    }

    pub fn depth(&self) -> usize {
        self.scopes.len()
    }

    /// Binds `key` in the innermost scope
    pub fn insert(&mut self, key: K, value: V) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(key, value);
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.scopes.iter().rev().find_map(|scope| scope.get(key))
    }

    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Whether `key` is bound in the innermost scope itself
    pub fn contains_local(&self, key: &K) -> bool {
        self.scopes.last().is_some_and(|scope| scope.contains_key(key))
    }
}

impl<K: Eq + Hash> Environment<K, ()> {
    /// Set-like insertion for environments that only track membership
    pub fn declare(&mut self, key: K) {
        self.insert(key, ())
    }
}
