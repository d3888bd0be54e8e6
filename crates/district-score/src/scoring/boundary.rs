//! District boundary lookup, used to know which district names are valid for a city.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::config::TopicCatalog;

#[derive(Debug, thiserror::Error)]
pub enum BoundaryError {
    #[error("unable to read boundary file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("boundary file {path} is not valid GeoJSON: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// One named district polygon.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistrictBoundary {
    pub name: String,
    pub geometry: Value,
}

/// Polygon set of a city at the administrative level that produced features.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistrictBoundaries {
    pub admin_level: Option<String>,
    pub districts: Vec<DistrictBoundary>,
}

impl DistrictBoundaries {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.districts.iter().map(|district| district.name.as_str())
    }

    /// Case-insensitive membership test on trimmed names.
    pub fn contains(&self, district: &str) -> bool {
        let wanted = district.trim().to_lowercase();
        self.names().any(|name| name.to_lowercase() == wanted)
    }
}

pub trait BoundaryResolver: Send + Sync {
    /// `Ok(None)` when no boundaries are known for the city. May block on file I/O.
    fn resolve(
        &self,
        city: &str,
        country: &str,
    ) -> Result<Option<Arc<DistrictBoundaries>>, BoundaryError>;
}

/// Reads `{city}.geojson` feature collections exported from OpenStreetMap.
///
/// A city's boundaries are parsed once and kept for the life of the resolver. Cities without a
/// usable file are looked up again on every call, so files added later are picked up.
pub struct GeoJsonBoundaryResolver {
    dir: PathBuf,
    catalog: Arc<TopicCatalog>,
    parsed: Mutex<HashMap<(String, String), Arc<DistrictBoundaries>>>,
}

#[derive(Debug, Deserialize)]
struct FeatureCollection {
    #[serde(default)]
    features: Vec<Feature>,
}

#[derive(Debug, Deserialize)]
struct Feature {
    #[serde(default)]
    properties: Option<Map<String, Value>>,
    #[serde(default)]
    geometry: Value,
}

impl Feature {
    fn tag(&self, key: &str) -> Option<String> {
        let properties = self.properties.as_ref()?;
        let tagged = properties
            .get("tags")
            .and_then(Value::as_object)
            .and_then(|tags| tags.get(key));
        tagged.or_else(|| properties.get(key)).and_then(as_label)
    }

    fn name(&self) -> Option<String> {
        let properties = self.properties.as_ref()?;
        let tags = properties.get("tags").and_then(Value::as_object);
        tags.and_then(|tags| tags.get("name:en").and_then(as_label))
            .or_else(|| tags.and_then(|tags| tags.get("name").and_then(as_label)))
            .or_else(|| properties.get("name").and_then(as_label))
    }
}

fn as_label(value: &Value) -> Option<String> {
    let label = match value {
        Value::String(text) => text.trim().to_string(),
        Value::Number(number) => number.to_string(),
        _ => return None,
    };
    (!label.is_empty()).then_some(label)
}

impl GeoJsonBoundaryResolver {
    pub fn new(dir: impl Into<PathBuf>, catalog: Arc<TopicCatalog>) -> Self {
        Self {
            dir: dir.into(),
            catalog,
            parsed: Mutex::new(HashMap::new()),
        }
    }

    fn read(&self, city: &str, country: &str) -> Result<Option<DistrictBoundaries>, BoundaryError> {
        let path = self.dir.join(format!("{city}.geojson"));
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(BoundaryError::Io { path, source }),
        };

        let collection: FeatureCollection = serde_json::from_str(&raw)
            .map_err(|source| BoundaryError::Format {
                path: path.clone(),
                source,
            })?;

        let selected = self.select(country, collection.features);
        if selected.is_none() {
            warn!(city, country, path = %path.display(), "boundary file has no usable districts");
        }
        Ok(selected)
    }

    fn select(&self, country: &str, features: Vec<Feature>) -> Option<DistrictBoundaries> {
        let profile = self.catalog.country(country);

        for level in &profile.district_levels {
            let districts = named(features.iter().filter(|feature| {
                feature.tag("admin_level").as_deref() == Some(level.as_str())
            }));
            if !districts.is_empty() {
                return Some(DistrictBoundaries {
                    admin_level: Some(level.clone()),
                    districts,
                });
            }
            debug!(country, level = %level, "no districts at admin level, falling back");
        }

        let districts = named(
            features
                .iter()
                .filter(|feature| feature.tag("admin_level").is_none()),
        );
        (!districts.is_empty()).then_some(DistrictBoundaries {
            admin_level: None,
            districts,
        })
    }
}

fn named<'a>(features: impl Iterator<Item = &'a Feature>) -> Vec<DistrictBoundary> {
    features
        .filter_map(|feature| {
            feature.name().map(|name| DistrictBoundary {
                name,
                geometry: feature.geometry.clone(),
            })
        })
        .collect()
}

impl BoundaryResolver for GeoJsonBoundaryResolver {
    fn resolve(
        &self,
        city: &str,
        country: &str,
    ) -> Result<Option<Arc<DistrictBoundaries>>, BoundaryError> {
        let key = (city.trim().to_string(), country.trim().to_lowercase());
        if let Some(known) = self
            .parsed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
        {
            return Ok(Some(known.clone()));
        }

        let Some(selected) = self.read(&key.0, country)? else {
            return Ok(None);
        };
        let selected = Arc::new(selected);
        self.parsed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, selected.clone());
        Ok(Some(selected))
    }
}
