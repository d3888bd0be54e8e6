//! Persisted district scores, one mapping per (country, city, topic).
//!
//! The store trait is synchronous: a whole mapping is read or rewritten in one
//! call. [`ScoreCache`] layers per-unit async locks on top so the same district/topic is never
//! scored twice concurrently.

mod file;
mod memory;
mod rankings;

pub use file::FileCacheStore;
pub use memory::MemoryCacheStore;
pub use rankings::{rank_scores, write_rankings_csv, RankingEntry};

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task;
use tracing::warn;

use super::domain::{CacheKey, DistrictScore, ScoreRequest};

/// District name → score, for one cache key.
pub type ScoreMap = BTreeMap<String, DistrictScore>;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache io failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cache file {path} is not a valid score mapping: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("csv export failed: {0}")]
    Csv(#[from] csv::Error),
    #[error("cache task failed: {0}")]
    Task(#[from] task::JoinError),
}

/// Keyed full-mapping persistence.
pub trait CacheStore: Send + Sync {
    /// The stored mapping, or an empty one when nothing has been written for `key`.
    fn load(&self, key: &CacheKey) -> Result<ScoreMap, CacheError>;
    /// Replaces the whole mapping for `key`.
    fn save(&self, key: &CacheKey, scores: &ScoreMap) -> Result<(), CacheError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct UnitKey {
    cache: CacheKey,
    district: String,
}

impl UnitKey {
    fn of(request: &ScoreRequest) -> Self {
        Self {
            cache: request.cache_key(),
            district: request.district.trim().to_string(),
        }
    }
}

type UnitTable = HashMap<UnitKey, Arc<AsyncMutex<()>>>;

pub struct ScoreCache<S> {
    store: Arc<S>,
    units: Arc<Mutex<UnitTable>>,
    writes: Arc<Mutex<()>>,
}

/// Held for the lifetime of one scoring unit's work. The unit's lock entry is dropped from
/// the table once no holder or waiter remains.
pub struct UnitGuard {
    guard: Option<OwnedMutexGuard<()>>,
    key: UnitKey,
    units: Arc<Mutex<UnitTable>>,
}

impl Drop for UnitGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut units = self.units.lock().unwrap_or_else(PoisonError::into_inner);
        if units
            .get(&self.key)
            .is_some_and(|unit| Arc::strong_count(unit) == 1)
        {
            units.remove(&self.key);
        }
    }
}

impl<S: CacheStore + 'static> ScoreCache<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            units: Arc::new(Mutex::new(HashMap::new())),
            writes: Arc::new(Mutex::new(())),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Exclusive hold on one scoring unit. Different units never contend.
    pub async fn lock_unit(&self, request: &ScoreRequest) -> UnitGuard {
        let key = UnitKey::of(request);
        let unit = {
            let mut units = self.units.lock().unwrap_or_else(PoisonError::into_inner);
            // Entries left by waiters that gave up before acquiring.
            units.retain(|_, unit| Arc::strong_count(unit) > 1);
            units.entry(key.clone()).or_default().clone()
        };

        UnitGuard {
            guard: Some(unit.lock_owned().await),
            key,
            units: self.units.clone(),
        }
    }

    /// Cached score for the request's district, if any. An unreadable mapping counts as empty.
    pub async fn get(&self, request: &ScoreRequest) -> Option<DistrictScore> {
        let store = self.store.clone();
        let key = request.cache_key();
        let district = request.district.trim().to_string();

        let loaded = task::spawn_blocking(move || {
            let outcome = store.load(&key).map(|mut scores| scores.remove(&district));
            (key, outcome)
        })
        .await;

        match loaded {
            Ok((_, Ok(score))) => score,
            Ok((key, Err(err))) => {
                warn!(cache = %key, error = %err, "score cache unreadable, treating as empty");
                None
            }
            Err(err) => {
                warn!(error = %err, "score cache read task failed");
                None
            }
        }
    }

    /// Every cached score for `key`. An unreadable mapping counts as empty.
    pub fn scores(&self, key: &CacheKey) -> ScoreMap {
        match self.store.load(key) {
            Ok(scores) => scores,
            Err(err) => {
                warn!(cache = %key, error = %err, "score cache unreadable, treating as empty");
                ScoreMap::new()
            }
        }
    }

    /// Inserts or replaces one district and rewrites the whole mapping.
    ///
    /// A mapping that cannot be read is left untouched and the error returned, so sibling
    /// districts are never overwritten by a partial mapping.
    pub async fn put(&self, request: &ScoreRequest, score: DistrictScore) -> Result<(), CacheError> {
        let store = self.store.clone();
        let writes = self.writes.clone();
        let key = request.cache_key();
        let district = request.district.trim().to_string();

        task::spawn_blocking(move || {
            let _writes = writes.lock().unwrap_or_else(PoisonError::into_inner);
            let mut scores = store.load(&key)?;
            scores.insert(district, score);
            store.save(&key, &scores)
        })
        .await?
    }

    #[cfg(test)]
    fn tracked_units(&self) -> usize {
        self.units.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TopicCatalog;
    use crate::scoring::domain::SignalSet;
    use crate::scoring::normalizer::ScoreNormalizer;
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    fn score(request: &ScoreRequest) -> DistrictScore {
        let normalizer = ScoreNormalizer::new(Arc::new(TopicCatalog::standard()));
        DistrictScore::from_signals(&normalizer, request, SignalSet::new(), Vec::new(), 0.0, 1)
    }

    /// Memory store whose next `load` fails once when armed.
    #[derive(Default)]
    struct FlakyStore {
        inner: MemoryCacheStore,
        fail_next_load: AtomicBool,
    }

    impl CacheStore for FlakyStore {
        fn load(&self, key: &CacheKey) -> Result<ScoreMap, CacheError> {
            if self.fail_next_load.swap(false, Ordering::SeqCst) {
                return Err(CacheError::Io {
                    path: PathBuf::from("taipei_taiwan_safety_scores.json"),
                    source: io::Error::new(io::ErrorKind::Other, "too many open files"),
                });
            }
            self.inner.load(key)
        }

        fn save(&self, key: &CacheKey, scores: &ScoreMap) -> Result<(), CacheError> {
            self.inner.save(key, scores)
        }
    }

    #[tokio::test]
    async fn put_then_get_round_trips_and_keeps_siblings() {
        let cache = ScoreCache::new(Arc::new(MemoryCacheStore::default()));
        let xinyi = ScoreRequest::new("Taiwan", "Taipei", "Xinyi", "safety");
        let beitou = ScoreRequest::new("Taiwan", "Taipei", "Beitou", "safety");

        cache.put(&xinyi, score(&xinyi)).await.expect("save xinyi");
        cache.put(&beitou, score(&beitou)).await.expect("save beitou");

        assert_eq!(cache.get(&xinyi).await.map(|s| s.score()), Some(0.5));
        assert_eq!(cache.scores(&xinyi.cache_key()).len(), 2);
        let other_topic = ScoreRequest::new("Taiwan", "Taipei", "Xinyi", "cleanliness");
        assert!(cache.get(&other_topic).await.is_none());
    }

    #[tokio::test]
    async fn unreadable_mapping_aborts_the_write_and_keeps_siblings() {
        let store = Arc::new(FlakyStore::default());
        let cache = ScoreCache::new(store.clone());
        let xinyi = ScoreRequest::new("Taiwan", "Taipei", "Xinyi", "safety");
        let beitou = ScoreRequest::new("Taiwan", "Taipei", "Beitou", "safety");

        cache.put(&xinyi, score(&xinyi)).await.expect("save xinyi");
        store.fail_next_load.store(true, Ordering::SeqCst);

        let err = cache
            .put(&beitou, score(&beitou))
            .await
            .expect_err("load failure surfaces");
        assert!(matches!(err, CacheError::Io { .. }));
        assert_eq!(store.inner.save_count(), 1);

        let districts: Vec<_> = cache.scores(&xinyi.cache_key()).into_keys().collect();
        assert_eq!(districts, vec!["Xinyi"]);

        cache.put(&beitou, score(&beitou)).await.expect("retry succeeds");
        let districts: Vec<_> = cache.scores(&xinyi.cache_key()).into_keys().collect();
        assert_eq!(districts, vec!["Beitou", "Xinyi"]);
    }

    #[tokio::test]
    async fn released_units_leave_no_lock_entries() {
        let cache = ScoreCache::new(Arc::new(MemoryCacheStore::default()));
        for index in 0..1000 {
            let request = ScoreRequest::new("Taiwan", "Taipei", format!("District {index}"), "safety");
            let _guard = cache.lock_unit(&request).await;
            assert_eq!(cache.tracked_units(), 1);
        }
        assert_eq!(cache.tracked_units(), 0);
    }

    #[tokio::test]
    async fn lock_entry_survives_while_a_waiter_is_queued() {
        let cache = Arc::new(ScoreCache::new(Arc::new(MemoryCacheStore::default())));
        let request = ScoreRequest::new("Taiwan", "Taipei", "Xinyi", "safety");

        let first = cache.lock_unit(&request).await;
        let waiter = {
            let cache = cache.clone();
            let request = request.clone();
            tokio::spawn(async move {
                let _guard = cache.lock_unit(&request).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        drop(first);
        assert_eq!(cache.tracked_units(), 1, "waiter still references the unit");
        waiter.await.expect("waiter finishes");
        assert_eq!(cache.tracked_units(), 0);
    }

    #[tokio::test]
    async fn abandoned_waiters_are_swept_on_next_lock() {
        let cache = ScoreCache::new(Arc::new(MemoryCacheStore::default()));
        let xinyi = ScoreRequest::new("Taiwan", "Taipei", "Xinyi", "safety");

        let held = cache.lock_unit(&xinyi).await;
        let mut waiting = Box::pin(cache.lock_unit(&xinyi));
        let polled = tokio::time::timeout(Duration::from_millis(10), &mut waiting).await;
        assert!(polled.is_err());

        drop(held);
        drop(waiting);
        assert_eq!(cache.tracked_units(), 1, "waiter gave up without releasing");

        let _beitou = cache
            .lock_unit(&ScoreRequest::new("Taiwan", "Taipei", "Beitou", "safety"))
            .await;
        assert_eq!(cache.tracked_units(), 1, "only the held unit remains");
    }

    #[tokio::test]
    async fn same_unit_is_serialised() {
        let cache = Arc::new(ScoreCache::new(Arc::new(MemoryCacheStore::default())));
        let request = ScoreRequest::new("Taiwan", "Taipei", "Xinyi", "safety");

        let guard = cache.lock_unit(&request).await;
        let contender = {
            let cache = cache.clone();
            let request = request.clone();
            tokio::spawn(async move {
                let _guard = cache.lock_unit(&request).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());
        drop(guard);
        contender.await.expect("contender finishes");
    }

    #[tokio::test]
    async fn different_units_do_not_contend() {
        let cache = ScoreCache::new(Arc::new(MemoryCacheStore::default()));
        let _xinyi = cache
            .lock_unit(&ScoreRequest::new("Taiwan", "Taipei", "Xinyi", "safety"))
            .await;
        let beitou = tokio::time::timeout(
            Duration::from_millis(50),
            cache.lock_unit(&ScoreRequest::new("Taiwan", "Taipei", "Beitou", "safety")),
        )
        .await;
        assert!(beitou.is_ok());
    }
}
