//! Great-circle distance and meter/degree conversions.

use sitescore_location_models::Coordinate;

/// Mean Earth radius used by the haversine formula.
pub const EARTH_RADIUS_METERS: f64 = 6_371_000.0;

/// Length of one degree of latitude.
pub const METERS_PER_DEGREE_LAT: f64 = 111_320.0;

/// Haversine distance between two coordinates, in meters.
#[must_use]
pub fn distance_meters(a: Coordinate, b: Coordinate) -> f64 {
    let lat1 = a.lat().to_radians();
    let lat2 = b.lat().to_radians();
    let dlat = lat2 - lat1;
    let dlon = (b.lon() - a.lon()).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);

    // Rounding can push h a hair past 1 for antipodal points.
    EARTH_RADIUS_METERS * 2.0 * h.clamp(0.0, 1.0).sqrt().asin()
}

/// Converts a north/south distance to degrees of latitude.
#[must_use]
pub fn meters_to_degrees_lat(meters: f64) -> f64 {
    meters / METERS_PER_DEGREE_LAT
}

/// Converts an east/west distance to degrees of longitude at `at_lat`.
///
/// A degree of longitude narrows by `cos(latitude)`; at the poles it has
/// no width, so the result is capped at a full revolution.
#[must_use]
pub fn meters_to_degrees_lon(meters: f64, at_lat: f64) -> f64 {
    let width = METERS_PER_DEGREE_LAT * at_lat.to_radians().cos().abs();
    if width < 1e-9 {
        return 360.0;
    }
    (meters / width).min(360.0)
}

/// An axis-aligned box in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    /// Southern edge.
    pub min_lat: f64,
    /// Northern edge.
    pub max_lat: f64,
    /// Western edge.
    pub min_lon: f64,
    /// Eastern edge.
    pub max_lon: f64,
}

impl BoundingBox {
    /// Returns `true` if `c` lies inside or on the edge of the box.
    #[must_use]
    pub fn contains(&self, c: Coordinate) -> bool {
        (self.min_lat..=self.max_lat).contains(&c.lat())
            && (self.min_lon..=self.max_lon).contains(&c.lon())
    }
}

/// The box enclosing a disk of `radius_meters` around `center`.
#[must_use]
pub fn bounding_box(center: Coordinate, radius_meters: f64) -> BoundingBox {
    let dlat = meters_to_degrees_lat(radius_meters);
    let dlon = meters_to_degrees_lon(radius_meters, center.lat());
    BoundingBox {
        min_lat: center.lat() - dlat,
        max_lat: center.lat() + dlat,
        min_lon: center.lon() - dlon,
        max_lon: center.lon() + dlon,
    }
}
