//! Minimal GeoJSON types shared by ascent artifacts and the summary.
//!
//! Both documents are point feature collections with typed properties at
//! collection and feature level. Only `Point` geometries are produced.

use serde::{Deserialize, Serialize};

/// A GeoJSON FeatureCollection with collection-level properties.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureCollection<C, F> {
    /// Type identifier (always "FeatureCollection").
    #[serde(rename = "type")]
    pub type_: String,

    pub properties: C,

    pub features: Vec<Feature<F>>,
}

impl<C, F> FeatureCollection<C, F> {
    /// Create an empty collection.
    pub fn new(properties: C) -> Self {
        Self {
            type_: "FeatureCollection".to_string(),
            properties,
            features: Vec::new(),
        }
    }

    /// Add multiple features to the collection.
    pub fn with_features(mut self, features: Vec<Feature<F>>) -> Self {
        self.features.extend(features);
        self
    }
}

/// A GeoJSON Feature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feature<P> {
    /// Type identifier (always "Feature").
    #[serde(rename = "type")]
    pub type_: String,

    pub geometry: Geometry,

    pub properties: P,
}

impl<P> Feature<P> {
    /// Create a point feature.
    pub fn point(coordinates: Vec<f64>, properties: P) -> Self {
        Self {
            type_: "Feature".to_string(),
            geometry: Geometry::Point { coordinates },
            properties,
        }
    }
}

/// GeoJSON geometry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum Geometry {
    /// `[longitude, latitude]` or `[longitude, latitude, height]`.
    Point { coordinates: Vec<f64> },
}

impl Geometry {
    pub fn coordinates(&self) -> &[f64] {
        match self {
            Geometry::Point { coordinates } => coordinates,
        }
    }

    /// Position has 2 or 3 finite values with latitude in [-90, 90].
    pub fn is_valid(&self) -> bool {
        let c = self.coordinates();
        (2..=3).contains(&c.len())
            && c.iter().all(|v| v.is_finite())
            && (-90.0..=90.0).contains(&c[1])
            && (-180.0..=180.0).contains(&c[0])
    }
}
