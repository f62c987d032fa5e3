//! `GeoJSON` boundary parsing.
//!
//! Place lookups return boundaries as `GeoJSON` geometries (sometimes
//! wrapped in a `Feature`). Only areal geometries are useful for
//! candidate gridding; points and lines yield `None`.

use geo::MultiPolygon;
use geojson::GeoJson;

/// Parses a `GeoJSON` string into a [`MultiPolygon`].
///
/// Accepts a bare `Polygon`/`MultiPolygon` geometry, a `Feature` holding
/// one, or a `FeatureCollection` (the first areal feature wins).
#[must_use]
pub fn parse_boundary(geojson_str: &str) -> Option<MultiPolygon<f64>> {
    let geojson: GeoJson = geojson_str.parse().ok()?;
    match geojson {
        GeoJson::Geometry(geom) => geometry_to_multipolygon(geom),
        GeoJson::Feature(feature) => feature.geometry.and_then(geometry_to_multipolygon),
        GeoJson::FeatureCollection(collection) => collection
            .features
            .into_iter()
            .filter_map(|f| f.geometry)
            .find_map(geometry_to_multipolygon),
    }
}

fn geometry_to_multipolygon(geom: geojson::Geometry) -> Option<MultiPolygon<f64>> {
    let geo_geom: geo::Geometry<f64> = geom.try_into().ok()?;
    match geo_geom {
        geo::Geometry::MultiPolygon(mp) => Some(mp),
        geo::Geometry::Polygon(p) => Some(MultiPolygon(vec![p])),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_polygon_geometry() {
        let s = r#"{"type":"Polygon","coordinates":[[[-74.0,40.7],[-73.9,40.7],[-73.9,40.8],[-74.0,40.8],[-74.0,40.7]]]}"#;
        let mp = parse_boundary(s).unwrap();
        assert_eq!(mp.0.len(), 1);
    }

    #[test]
    fn parses_feature_with_multipolygon() {
        let s = r#"{"type":"Feature","properties":{},"geometry":{"type":"MultiPolygon","coordinates":[
            [[[0.0,0.0],[1.0,0.0],[1.0,1.0],[0.0,0.0]]],
            [[[2.0,2.0],[3.0,2.0],[3.0,3.0],[2.0,2.0]]]
        ]}}"#;
        let mp = parse_boundary(s).unwrap();
        assert_eq!(mp.0.len(), 2);
    }

    #[test]
    fn rejects_point_and_garbage() {
        assert!(parse_boundary(r#"{"type":"Point","coordinates":[0.0,0.0]}"#).is_none());
        assert!(parse_boundary("not json").is_none());
    }
}
