use crate::error::{ImportError, ImportResult};
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

/// One mutex per key, created on demand.
///
/// Entries are dropped again once no caller holds or waits on them.
pub(crate) struct KeyedLocks<K> {
    name: &'static str,
    slots: Mutex<HashMap<K, Arc<Mutex<()>>>>,
}

impl<K: Eq + Hash + Clone> KeyedLocks<K> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slots: Mutex::new(HashMap::new()),
        }
    }

    /// Runs `f` while holding the lock for `key`.
    pub fn with_lock<R>(&self, key: &K, f: impl FnOnce() -> R) -> ImportResult<R> {
        let slot = {
            let mut slots = self.slots()?;
            Arc::clone(slots.entry(key.clone()).or_default())
        };

        let result = {
            let _guard = slot
                .lock()
                .map_err(|e| ImportError::Lock(format!("{} lock: {e}", self.name)))?;
            f()
        };

        let mut slots = self.slots()?;
        // Two references left: the map's and ours.
        if Arc::strong_count(&slot) == 2 {
            slots.remove(key);
        }
        Ok(result)
    }

    fn slots(&self) -> ImportResult<std::sync::MutexGuard<'_, HashMap<K, Arc<Mutex<()>>>>> {
        self.slots
            .lock()
            .map_err(|e| ImportError::Lock(format!("{} table: {e}", self.name)))
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots.lock().map(|s| s.len()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn same_key_is_serialized() {
        let locks = KeyedLocks::new("test");
        let inside = AtomicUsize::new(0);
        let max_seen = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    locks
                        .with_lock(&"sku-1".to_string(), || {
                            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            max_seen.fetch_max(now, Ordering::SeqCst);
                            std::thread::sleep(std::time::Duration::from_millis(2));
                            inside.fetch_sub(1, Ordering::SeqCst);
                        })
                        .unwrap();
                });
            }
        });

        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
        assert_eq!(locks.len(), 0);
    }

    #[test]
    fn returns_closure_result() {
        let locks: KeyedLocks<u32> = KeyedLocks::new("test");
        assert_eq!(locks.with_lock(&1, || 41 + 1).unwrap(), 42);
    }
}
