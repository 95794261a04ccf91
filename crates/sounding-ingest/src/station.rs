//! Read-only station reference.
//!
//! Loaded once per run and shared by the decoders (identity resolution,
//! missing coordinates) and the summary merge (seeding new stations).

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::Result;

/// Reference data for one registered station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationInfo {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub elevation: f64,
}

/// Station id → reference data.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StationRegistry {
    stations: HashMap<String, StationInfo>,
}

impl StationRegistry {
    /// Parse a JSON object of `id → {name, lat, lon, elevation}`.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let stations: HashMap<String, StationInfo> = serde_json::from_str(json)?;
        Ok(Self { stations })
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let registry = Self::from_json_str(&content)?;
        info!(path = %path.display(), stations = registry.len(), "Loaded station registry");
        Ok(registry)
    }

    pub fn insert(&mut self, id: impl Into<String>, info: StationInfo) {
        self.stations.insert(id.into(), info);
    }

    pub fn get(&self, id: &str) -> Option<&StationInfo> {
        self.stations.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.stations.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.stations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_utils::stations::{OAKLAND, REGISTRY_JSON, VIENNA};

    #[test]
    fn test_from_json_str() {
        let registry = StationRegistry::from_json_str(REGISTRY_JSON).unwrap();
        assert_eq!(registry.len(), 2);
        assert!(registry.contains(VIENNA));
        assert_eq!(registry.get(OAKLAND).unwrap().name, "Oakland");
        assert!(registry.get("00000").is_none());
    }

    #[test]
    fn test_from_json_file() {
        let dir = test_utils::temp_test_dir();
        let path = test_utils::write_file(dir.path(), "stations.json", REGISTRY_JSON.as_bytes());
        let registry = StationRegistry::from_json_file(&path).unwrap();
        assert_eq!(registry.get(VIENNA).unwrap().elevation, 200.0);
    }

    #[test]
    fn test_invalid_json() {
        assert!(StationRegistry::from_json_str("[1, 2]").is_err());
        assert!(StationRegistry::from_json_file(Path::new("/nonexistent/stations.json")).is_err());
    }
}
