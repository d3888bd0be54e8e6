use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::scoring::domain::CacheKey;

use super::{CacheError, CacheStore, ScoreMap};

/// One pretty-printed JSON file per cache key inside `dir`.
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    dir: PathBuf,
}

impl FileCacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `{city}_{country}_{topic}_scores.json`, each part slugified.
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(format!(
            "{}_{}_{}_scores.json",
            slug(&key.city),
            slug(&key.country),
            slug(&key.topic)
        ))
    }
}

impl CacheStore for FileCacheStore {
    fn load(&self, key: &CacheKey) -> Result<ScoreMap, CacheError> {
        let path = self.path_for(key);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(ScoreMap::new()),
            Err(source) => return Err(CacheError::Io { path, source }),
        };
        serde_json::from_str(&raw).map_err(|source| CacheError::Format { path, source })
    }

    fn save(&self, key: &CacheKey, scores: &ScoreMap) -> Result<(), CacheError> {
        let path = self.path_for(key);
        let io_error = |source: std::io::Error| CacheError::Io {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&self.dir).map_err(io_error)?;
        let body = serde_json::to_vec_pretty(scores).map_err(|source| CacheError::Format {
            path: path.clone(),
            source,
        })?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body).map_err(io_error)?;
        fs::rename(&tmp, &path).map_err(io_error)
    }
}

fn slug(raw: &str) -> String {
    let mut slug = String::with_capacity(raw.len());
    for ch in raw.trim().chars().flat_map(char::to_lowercase) {
        if ch.is_alphanumeric() {
            slug.push(ch);
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TopicCatalog;
    use crate::scoring::domain::{DistrictScore, ScoreRequest, SignalSet, SignalValue};
    use crate::scoring::normalizer::ScoreNormalizer;
    use std::sync::Arc;

    fn scores_for(request: &ScoreRequest) -> ScoreMap {
        let normalizer = ScoreNormalizer::new(Arc::new(TopicCatalog::standard()));
        let mut signals = SignalSet::new();
        signals.insert("aqi".to_string(), SignalValue::Numeric(100.0));
        let score =
            DistrictScore::from_signals(&normalizer, request, signals, Vec::new(), 0.7, 2);
        ScoreMap::from([(request.district.clone(), score)])
    }

    #[test]
    fn file_name_is_slugified() {
        let store = FileCacheStore::new("data");
        let key = CacheKey::new("Taiwan", "New Taipei City", "Air Quality");
        assert_eq!(
            store.path_for(&key),
            Path::new("data").join("new_taipei_city_taiwan_air_quality_scores.json")
        );
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileCacheStore::new(dir.path());
        let loaded = store
            .load(&CacheKey::new("Japan", "Tokyo", "safety"))
            .expect("missing file is not an error");
        assert!(loaded.is_empty());
    }

    #[test]
    fn save_replaces_whole_mapping_without_leftovers() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileCacheStore::new(dir.path().join("nested"));
        let request = ScoreRequest::new("Taiwan", "Taipei", "Da'an", "air quality");
        let key = request.cache_key();
        let scores = scores_for(&request);

        store.save(&key, &scores).expect("save");
        let loaded = store.load(&key).expect("load");
        assert_eq!(loaded, scores);

        let entries: Vec<_> = fs::read_dir(store.dir())
            .expect("read dir")
            .filter_map(Result::ok)
            .map(|entry| entry.file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries, vec!["taipei_taiwan_air_quality_scores.json"]);
    }

    #[test]
    fn corrupt_file_surfaces_format_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = FileCacheStore::new(dir.path());
        let key = CacheKey::new("Taiwan", "Taipei", "safety");
        fs::write(store.path_for(&key), "{ not json").expect("write");

        assert!(matches!(store.load(&key), Err(CacheError::Format { .. })));
    }
}
