use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::scoring::domain::CacheKey;

use super::{CacheError, CacheStore, ScoreMap};

/// Process-local store for tests and throwaway runs.
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    mappings: Mutex<HashMap<CacheKey, ScoreMap>>,
    saves: AtomicUsize,
}

impl MemoryCacheStore {
    /// Number of `save` calls so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl CacheStore for MemoryCacheStore {
    fn load(&self, key: &CacheKey) -> Result<ScoreMap, CacheError> {
        let mappings = self.mappings.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(mappings.get(key).cloned().unwrap_or_default())
    }

    fn save(&self, key: &CacheKey, scores: &ScoreMap) -> Result<(), CacheError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        let mut mappings = self.mappings.lock().unwrap_or_else(PoisonError::into_inner);
        mappings.insert(key.clone(), scores.clone());
        Ok(())
    }
}
