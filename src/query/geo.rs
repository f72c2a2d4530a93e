//! Geographical queries (`georel`, `geometry`, `coords`).

use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};

/// Spatial relationship between entity locations and the reference shape.
#[derive(Clone, Debug, PartialEq)]
pub enum GeoRelation {
    /// Distance bounds in metres from a point; at least one must be set.
    Near {
        max_distance: Option<f64>,
        min_distance: Option<f64>,
    },
    CoveredBy,
    Intersects,
    Equals,
    Disjoint,
}

/// Shape of the reference geometry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Geometry {
    Point,
    Line,
    Polygon,
    Box,
}

impl Geometry {
    fn as_str(self) -> &'static str {
        match self {
            Geometry::Point => "point",
            Geometry::Line => "line",
            Geometry::Polygon => "polygon",
            Geometry::Box => "box",
        }
    }
}

/// Rendered query parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeoParams {
    pub georel: String,
    pub geometry: String,
    pub coords: String,
}

/// A geo-query over `(latitude, longitude)` coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct GeoQuery {
    pub georel: GeoRelation,
    pub geometry: Geometry,
    pub coords: Vec<(f64, f64)>,
}

impl GeoQuery {
    /// Entities within `max_distance` metres of a point.
    pub fn near_point(lat: f64, lon: f64, max_distance: f64) -> Self {
        Self {
            georel: GeoRelation::Near {
                max_distance: Some(max_distance),
                min_distance: None,
            },
            geometry: Geometry::Point,
            coords: vec![(lat, lon)],
        }
    }

    /// Entities inside a polygon. The ring must be closed.
    pub fn covered_by(polygon: Vec<(f64, f64)>) -> Self {
        Self {
            georel: GeoRelation::CoveredBy,
            geometry: Geometry::Polygon,
            coords: polygon,
        }
    }

    pub fn validate(&self) -> Result<()> {
        let n = self.coords.len();
        let shape_ok = match self.geometry {
            Geometry::Point => n == 1,
            Geometry::Line => n >= 2,
            Geometry::Box => n == 2,
            Geometry::Polygon => n >= 4 && self.coords.first() == self.coords.last(),
        };
        if !shape_ok {
            return Err(geo_error(
                self.geometry.as_str(),
                format!("{} coordinates do not form a valid {}", n, self.geometry.as_str()),
            ));
        }

        for &(lat, lon) in &self.coords {
            if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
                return Err(geo_error(
                    format!("{},{}", lat, lon),
                    "coordinate out of range",
                ));
            }
        }

        if let GeoRelation::Near {
            max_distance,
            min_distance,
        } = self.georel
        {
            if self.geometry != Geometry::Point {
                return Err(geo_error("near", "near requires a point geometry"));
            }
            if max_distance.is_none() && min_distance.is_none() {
                return Err(geo_error("near", "near requires maxDistance or minDistance"));
            }
            for d in [max_distance, min_distance].into_iter().flatten() {
                if !d.is_finite() || d < 0.0 {
                    return Err(geo_error(d.to_string(), "distance must be a non-negative number"));
                }
            }
        }
        Ok(())
    }

    /// Validate and render the three query parameters.
    pub fn to_params(&self) -> Result<GeoParams> {
        self.validate()?;

        let georel = match self.georel {
            GeoRelation::Near {
                max_distance,
                min_distance,
            } => {
                let mut s = String::from("near");
                if let Some(d) = max_distance {
                    s.push_str(&format!(";maxDistance:{}", d));
                }
                if let Some(d) = min_distance {
                    s.push_str(&format!(";minDistance:{}", d));
                }
                s
            }
            GeoRelation::CoveredBy => "coveredBy".to_string(),
            GeoRelation::Intersects => "intersects".to_string(),
            GeoRelation::Equals => "equals".to_string(),
            GeoRelation::Disjoint => "disjoint".to_string(),
        };

        let coords = self
            .coords
            .iter()
            .map(|(lat, lon)| format!("{},{}", lat, lon))
            .collect::<Vec<_>>()
            .join(";");

        Ok(GeoParams {
            georel,
            geometry: self.geometry.as_str().to_string(),
            coords,
        })
    }
}

fn geo_error(token: impl Into<String>, reason: impl Into<String>) -> ClientError {
    ClientError::Grammar {
        term: 0,
        token: token.into(),
        reason: reason.into(),
    }
}
