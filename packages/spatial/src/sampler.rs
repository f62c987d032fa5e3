//! Region sampling.
//!
//! Two strategies:
//!
//! - [`sample_circle`] covers a disk with a grid of sub-circle centers,
//!   picking the sub-circle radius by binary search so the number of
//!   points never exceeds a cap.
//! - [`sample_within_polygon`] grids a polygon's bounding box and keeps
//!   the points the polygon contains. It has no intrinsic cap; callers
//!   decide how many candidates they want.
//!
//! Both lay grids with spacing `1.5 × radius` and anchor them at the
//! south-west corner of the bounding box.

use geo::{Contains, Coord, LineString, MultiPolygon, Point, Polygon};
use sitescore_location_models::{Coordinate, SampleOrigin, SamplePoint, SampleRegion};

use crate::SamplerError;
use crate::geomath::{
    BoundingBox, bounding_box, distance_meters, meters_to_degrees_lat, meters_to_degrees_lon,
};

/// Grid spacing as a multiple of the sub-circle radius.
pub const GRID_SPACING_FACTOR: f64 = 1.5;

/// Binary search iterations for the sub-circle radius.
pub const RADIUS_SEARCH_ITERATIONS: u32 = 30;

/// Smallest sub-circle radius considered, in meters.
pub const MIN_SUB_RADIUS_METERS: f64 = 1.0;

/// Upper bound on grid size for a single polygon enumeration.
pub const MAX_POLYGON_GRID_POINTS: u64 = 25_000_000;

/// Slack applied to the distance filter so points on the rim survive
/// floating-point noise.
const DISTANCE_TOLERANCE_METERS: f64 = 1e-6;

/// Result of circle sub-sampling.
#[derive(Debug, Clone, PartialEq)]
pub struct CircleSample {
    /// Sub-circle radius the search settled on.
    pub sub_radius_meters: f64,
    /// The emitted points, all within the big radius of the center.
    pub points: Vec<SamplePoint>,
}

/// Covers the disk of `big_radius` meters around `center` with sub-circle
/// centers, never emitting more than `max_points`.
///
/// The sub-circle radius is found by binary search over
/// `[1 m, big_radius]`: a radius is feasible when its grid yields at most
/// `max_points` points inside the disk, and the search converges on the
/// finest feasible radius. A `big_radius` of zero or less yields just
/// the center.
///
/// # Errors
///
/// Returns [`SamplerError::InvalidMaxPoints`] if `max_points` is zero.
pub fn sample_circle(
    center: Coordinate,
    big_radius: f64,
    max_points: usize,
) -> Result<CircleSample, SamplerError> {
    if max_points == 0 {
        return Err(SamplerError::InvalidMaxPoints(max_points));
    }

    if big_radius.is_nan() || big_radius <= 0.0 {
        let origin = SampleOrigin::Circle {
            center,
            radius_meters: 0.0,
            sub_radius_meters: 0.0,
        };
        return Ok(CircleSample {
            sub_radius_meters: 0.0,
            points: vec![SamplePoint::new(center, origin, 0)],
        });
    }

    let sub_radius = search_sub_radius(center, big_radius, max_points);
    let origin = SampleOrigin::Circle {
        center,
        radius_meters: big_radius,
        sub_radius_meters: sub_radius,
    };

    let points = circle_grid(center, big_radius, sub_radius)
        .enumerate()
        .map(|(i, c)| SamplePoint::new(c, origin, i))
        .collect::<Vec<_>>();

    log::debug!(
        "Circle sample at {center}: radius={big_radius}m, sub_radius={sub_radius:.2}m, {} points",
        points.len()
    );

    Ok(CircleSample {
        sub_radius_meters: sub_radius,
        points,
    })
}

/// Counts the grid points within `big_radius` of `center` for a given
/// sub-circle radius, stopping early once the count passes `limit`.
#[must_use]
pub fn count_circle_points(
    center: Coordinate,
    big_radius: f64,
    sub_radius: f64,
    limit: usize,
) -> usize {
    circle_grid(center, big_radius, sub_radius)
        .take(limit.saturating_add(1))
        .count()
}

fn search_sub_radius(center: Coordinate, big_radius: f64, max_points: usize) -> f64 {
    let mut low = MIN_SUB_RADIUS_METERS.min(big_radius);
    let mut high = big_radius;
    // At the full radius the grid holds a single interior point, so the
    // upper bound is always feasible.
    let mut best = high;

    for _ in 0..RADIUS_SEARCH_ITERATIONS {
        let mid = f64::midpoint(low, high);
        if count_circle_points(center, big_radius, mid, max_points) <= max_points {
            best = mid;
            high = mid;
        } else {
            low = mid;
        }
    }

    if count_circle_points(center, big_radius, best, max_points) > max_points {
        best = big_radius;
    }

    best
}

/// Grid points over the disk's bounding box, filtered to those within
/// `big_radius` of `center`.
fn circle_grid(
    center: Coordinate,
    big_radius: f64,
    sub_radius: f64,
) -> impl Iterator<Item = Coordinate> {
    let step = sub_radius * GRID_SPACING_FACTOR;
    let bbox = bounding_box(center, big_radius);
    let lat_step = meters_to_degrees_lat(step);
    let lon_step = meters_to_degrees_lon(step, center.lat());

    grid(bbox, lat_step, lon_step)
        .filter(move |p| distance_meters(center, *p) <= big_radius + DISTANCE_TOLERANCE_METERS)
}

/// Row-major grid over `bbox`, half-open on the north and east edges.
fn grid(bbox: BoundingBox, lat_step: f64, lon_step: f64) -> impl Iterator<Item = Coordinate> {
    let rows = axis_len(bbox.min_lat, bbox.max_lat, lat_step);
    let cols = axis_len(bbox.min_lon, bbox.max_lon, lon_step);

    (0..rows).flat_map(move |i| {
        #[allow(clippy::cast_precision_loss)]
        let lat = bbox.min_lat + (i as f64) * lat_step;
        (0..cols).map(move |j| {
            #[allow(clippy::cast_precision_loss)]
            let lon = bbox.min_lon + (j as f64) * lon_step;
            Coordinate::normalized(lat, lon)
        })
    })
}

/// Number of steps from `min` (inclusive) to `max` (exclusive).
fn axis_len(min: f64, max: f64, step: f64) -> u64 {
    if step.is_nan() || step <= 0.0 || max <= min {
        return 0;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let n = ((max - min) / step).ceil() as u64;
    n
}

/// Grids the bounding box of `ring` at `spacing_meters × 1.5` and keeps
/// the points the polygon contains.
///
/// # Errors
///
/// Returns [`SamplerError`] if the spacing is not positive, the ring is
/// degenerate, or the grid would be too large.
pub fn sample_within_polygon(
    ring: &[Coordinate],
    spacing_meters: f64,
) -> Result<Vec<SamplePoint>, SamplerError> {
    let polygon = ring_to_polygon(ring)?;
    sample_within_multipolygon(&MultiPolygon(vec![polygon]), spacing_meters)
}

/// Like [`sample_within_polygon`], for a multi-part boundary (holes
/// respected). Parts are gridded independently, in order.
///
/// # Errors
///
/// Returns [`SamplerError`] if the spacing is not positive or the grid
/// would be too large.
pub fn sample_within_multipolygon(
    boundary: &MultiPolygon<f64>,
    spacing_meters: f64,
) -> Result<Vec<SamplePoint>, SamplerError> {
    use geo::BoundingRect as _;

    if !spacing_meters.is_finite() || spacing_meters <= 0.0 {
        return Err(SamplerError::InvalidSpacing(spacing_meters));
    }

    let origin = SampleOrigin::Polygon { spacing_meters };
    let step = spacing_meters * GRID_SPACING_FACTOR;
    let mut points = Vec::new();

    for polygon in &boundary.0 {
        let Some(rect) = polygon.bounding_rect() else {
            continue;
        };
        let bbox = BoundingBox {
            min_lat: rect.min().y,
            max_lat: rect.max().y,
            min_lon: rect.min().x,
            max_lon: rect.max().x,
        };
        let mid_lat = f64::midpoint(bbox.min_lat, bbox.max_lat);
        let lat_step = meters_to_degrees_lat(step);
        let lon_step = meters_to_degrees_lon(step, mid_lat);

        let estimated = axis_len(bbox.min_lat, bbox.max_lat, lat_step)
            .saturating_mul(axis_len(bbox.min_lon, bbox.max_lon, lon_step));
        if estimated > MAX_POLYGON_GRID_POINTS {
            return Err(SamplerError::GridTooLarge {
                estimated,
                limit: MAX_POLYGON_GRID_POINTS,
            });
        }

        for c in grid(bbox, lat_step, lon_step) {
            if polygon.contains(&Point::new(c.lon(), c.lat())) {
                let index = points.len();
                points.push(SamplePoint::new(c, origin, index));
            }
        }
    }

    log::debug!(
        "Polygon sample: spacing={spacing_meters}m, {} points",
        points.len()
    );

    Ok(points)
}

/// Samples a region: circles via [`sample_circle`] with `max_points`,
/// polygons via [`sample_within_polygon`] at `spacing_meters`, truncated
/// to `max_points` with a warning when the grid is larger.
///
/// # Errors
///
/// Returns [`SamplerError`] under the same conditions as the underlying
/// strategy.
pub fn sample_region(
    region: &SampleRegion,
    spacing_meters: f64,
    max_points: usize,
) -> Result<Vec<SamplePoint>, SamplerError> {
    if max_points == 0 {
        return Err(SamplerError::InvalidMaxPoints(max_points));
    }

    match region {
        SampleRegion::Circle {
            center,
            radius_meters,
        } => Ok(sample_circle(*center, *radius_meters, max_points)?.points),
        SampleRegion::Polygon { ring } => {
            let mut points = sample_within_polygon(ring, spacing_meters)?;
            if points.len() > max_points {
                log::warn!(
                    "Polygon grid produced {} points; keeping the first {max_points}",
                    points.len()
                );
                points.truncate(max_points);
            }
            Ok(points)
        }
    }
}

/// Builds a `geo` polygon from a ring, closing it if needed.
///
/// # Errors
///
/// Returns [`SamplerError::DegeneratePolygon`] if the ring has fewer than
/// three distinct vertices.
pub fn ring_to_polygon(ring: &[Coordinate]) -> Result<Polygon<f64>, SamplerError> {
    let mut coords: Vec<Coord<f64>> = Vec::with_capacity(ring.len() + 1);
    for c in ring {
        let coord = Coord {
            x: c.lon(),
            y: c.lat(),
        };
        if coords.last() != Some(&coord) {
            coords.push(coord);
        }
    }
    if coords.len() > 1 && coords.first() == coords.last() {
        coords.pop();
    }
    if coords.len() < 3 {
        return Err(SamplerError::DegeneratePolygon);
    }
    Ok(Polygon::new(LineString::from(coords), vec![]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn c(lat: f64, lon: f64) -> Coordinate {
        Coordinate::new(lat, lon).unwrap()
    }

    fn times_square() -> Coordinate {
        c(40.7580, -73.9855)
    }

    #[test]
    fn times_square_sample_respects_radius_and_cap() {
        let sample = sample_circle(times_square(), 500.0, 10).unwrap();
        assert!(!sample.points.is_empty());
        assert!(sample.points.len() <= 10);
        for p in &sample.points {
            let d = distance_meters(times_square(), p.coordinate());
            assert!(d <= 500.0 + 1e-6, "point {} is {d}m away", p.coordinate());
        }
    }

    #[test]
    fn counts_never_exceed_cap_across_caps() {
        for max_points in [1, 2, 3, 5, 10, 25, 60] {
            let sample = sample_circle(times_square(), 1_000.0, max_points).unwrap();
            assert!(!sample.points.is_empty());
            assert!(
                sample.points.len() <= max_points,
                "{} points for cap {max_points}",
                sample.points.len()
            );
        }
    }

    #[test]
    fn larger_cap_uses_finer_grid() {
        let coarse = sample_circle(times_square(), 1_000.0, 5).unwrap();
        let fine = sample_circle(times_square(), 1_000.0, 50).unwrap();
        assert!(fine.sub_radius_meters <= coarse.sub_radius_meters);
        assert!(coarse.points.len() <= 5);
        assert!(fine.points.len() <= 50);
    }

    #[test]
    fn points_are_indexed_and_tagged() {
        let sample = sample_circle(times_square(), 300.0, 8).unwrap();
        for (i, p) in sample.points.iter().enumerate() {
            assert_eq!(p.index(), i);
            match p.origin() {
                SampleOrigin::Circle { radius_meters, .. } => {
                    assert!((radius_meters - 300.0).abs() < f64::EPSILON);
                }
                SampleOrigin::Polygon { .. } => panic!("expected circle origin"),
            }
        }
    }

    #[test]
    fn non_positive_radius_yields_center_only() {
        for radius in [0.0, -10.0] {
            let sample = sample_circle(times_square(), radius, 10).unwrap();
            assert_eq!(sample.points.len(), 1);
            assert_eq!(sample.points[0].coordinate(), times_square());
        }
    }

    #[test]
    fn zero_max_points_is_an_error() {
        assert_eq!(
            sample_circle(times_square(), 500.0, 0),
            Err(SamplerError::InvalidMaxPoints(0))
        );
    }

    #[test]
    fn high_latitude_sample_stays_inside() {
        let center = c(69.6492, 18.9553);
        let sample = sample_circle(center, 2_000.0, 20).unwrap();
        assert!(!sample.points.is_empty());
        for p in &sample.points {
            assert!(distance_meters(center, p.coordinate()) <= 2_000.0 + 1e-6);
        }
    }

    #[test]
    fn polygon_points_are_contained() {
        let ring = vec![
            c(40.70, -74.02),
            c(40.70, -73.97),
            c(40.75, -73.97),
            c(40.75, -74.02),
        ];
        let points = sample_within_polygon(&ring, 500.0).unwrap();
        assert!(!points.is_empty());
        let polygon = ring_to_polygon(&ring).unwrap();
        for p in &points {
            let pt = Point::new(p.coordinate().lon(), p.coordinate().lat());
            assert!(polygon.contains(&pt));
        }
    }

    #[test]
    fn polygon_triangle_excludes_outside_corner() {
        let ring = vec![c(0.0, 0.0), c(0.0, 0.1), c(0.1, 0.0)];
        let points = sample_within_polygon(&ring, 200.0).unwrap();
        assert!(!points.is_empty());
        for p in &points {
            assert!(p.coordinate().lat() + p.coordinate().lon() < 0.1 + 1e-9);
        }
    }

    #[test]
    fn polygon_rejects_bad_input() {
        let ring = vec![c(0.0, 0.0), c(0.0, 0.1), c(0.0, 0.0)];
        assert_eq!(
            sample_within_polygon(&ring, 100.0),
            Err(SamplerError::DegeneratePolygon)
        );
        let square = vec![c(0.0, 0.0), c(0.0, 0.1), c(0.1, 0.1), c(0.1, 0.0)];
        assert_eq!(
            sample_within_polygon(&square, 0.0),
            Err(SamplerError::InvalidSpacing(0.0))
        );
    }

    #[test]
    fn sample_region_caps_polygon_output() {
        let region = SampleRegion::Polygon {
            ring: vec![
                c(40.70, -74.02),
                c(40.70, -73.97),
                c(40.75, -73.97),
                c(40.75, -74.02),
            ],
        };
        let points = sample_region(&region, 100.0, 7).unwrap();
        assert_eq!(points.len(), 7);
    }
}
