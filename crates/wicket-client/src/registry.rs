use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Shared-ownership table for one handle kind.
///
/// Registration keeps the object alive; every API call revalidates the
/// handle against the table, so a closed or foreign handle fails instead
/// of touching freed state.
pub(crate) struct Registry<T> {
    table: Mutex<HashMap<u64, Arc<T>>>,
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self {
            table: Mutex::new(HashMap::new()),
        }
    }

    pub fn register(&self, id: u64, value: Arc<T>) {
        self.table.lock().unwrap().insert(id, value);
    }

    pub fn unregister(&self, id: u64) -> Option<Arc<T>> {
        self.table.lock().unwrap().remove(&id)
    }

    pub fn get(&self, id: u64) -> Option<Arc<T>> {
        self.table.lock().unwrap().get(&id).cloned()
    }

    pub fn clear(&self) {
        self.table.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_get_unregister() {
        let reg: Registry<String> = Registry::new();
        reg.register(1, Arc::new("one".to_string()));
        assert_eq!(reg.get(1).as_deref(), Some(&"one".to_string()));
        assert!(reg.get(2).is_none());
        assert!(reg.unregister(1).is_some());
        assert!(reg.get(1).is_none());
        assert!(reg.unregister(1).is_none());
    }
}
