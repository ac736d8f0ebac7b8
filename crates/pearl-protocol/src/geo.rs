//! Minimal GeoJSON geometry.
//!
//! Only the shapes the session exchanges with the GPU worker are modelled:
//! sample points, sample and AOI polygons, and the per-class collections
//! sent for retraining.

use serde::{Deserialize, Serialize};

/// A `[longitude, latitude]` position.
pub type LngLat = [f64; 2];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point {
        coordinates: LngLat,
    },
    MultiPoint {
        coordinates: Vec<LngLat>,
    },
    Polygon {
        coordinates: Vec<Vec<LngLat>>,
    },
    GeometryCollection {
        geometries: Vec<Geometry>,
    },
}

impl Geometry {
    pub fn empty_multi_point() -> Self {
        Self::MultiPoint {
            coordinates: Vec::new(),
        }
    }

    /// Exterior ring of a polygon, if this is one.
    pub fn exterior_ring(&self) -> Option<&[LngLat]> {
        match self {
            Self::Polygon { coordinates } => coordinates.first().map(Vec::as_slice),
            _ => None,
        }
    }
}

/// Axis-aligned AOI bounds as reported by the map.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub south_west: LngLat,
    pub north_east: LngLat,
}

impl Bounds {
    pub fn new(south_west: LngLat, north_east: LngLat) -> Self {
        Self {
            south_west,
            north_east,
        }
    }

    /// Closed bbox polygon, ring ordered SW, SE, NE, NW, SW.
    pub fn to_polygon(&self) -> Geometry {
        let [min_x, min_y] = self.south_west;
        let [max_x, max_y] = self.north_east;
        Geometry::Polygon {
            coordinates: vec![vec![
                [min_x, min_y],
                [max_x, min_y],
                [max_x, max_y],
                [min_x, max_y],
                [min_x, min_y],
            ]],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bounds_polygon_is_closed_and_counter_clockwise() {
        let polygon = Bounds::new([0.0, 0.0], [1.0, 1.0]).to_polygon();
        let ring = polygon.exterior_ring().unwrap();
        assert_eq!(
            ring,
            &[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]
        );
        assert_eq!(ring.first(), ring.last());
    }

    #[test]
    fn geometry_uses_geojson_type_tag() {
        let value = serde_json::to_value(Geometry::GeometryCollection {
            geometries: vec![Geometry::MultiPoint {
                coordinates: vec![[1.5, 2.5]],
            }],
        })
        .unwrap();
        assert_eq!(
            value,
            json!({
                "type": "GeometryCollection",
                "geometries": [{ "type": "MultiPoint", "coordinates": [[1.5, 2.5]] }]
            })
        );
    }

    #[test]
    fn exterior_ring_is_none_for_points() {
        assert!(Geometry::empty_multi_point().exterior_ring().is_none());
    }
}
