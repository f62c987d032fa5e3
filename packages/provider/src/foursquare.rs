//! Foursquare open places, queried locally with `DuckDB`.
//!
//! The places snapshot is a set of Parquet files with `latitude`,
//! `longitude`, and `fsq_category_labels` (a list of `"A > B > C"`
//! strings) columns. Queries prefilter on the bounding box and compute
//! true distances in Rust.
//!
//! `duckdb::Connection` is `Send` but not `Sync`, so the connection is
//! wrapped in a `Mutex` and every query runs on the blocking pool.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use sitescore_location_models::Coordinate;
use sitescore_spatial::geomath::{bounding_box, distance_meters};

use crate::service_registry::{GeoService, ProviderConfig, find_service};
use crate::{MetricSource, ProviderError};

/// Rows pulled from the bounding box when looking for the nearest label.
const CATEGORY_CANDIDATE_LIMIT: u32 = 500;

/// Local Foursquare places index.
#[derive(Clone)]
pub struct FoursquarePlaces {
    conn: Arc<Mutex<duckdb::Connection>>,
    relation: String,
}

impl std::fmt::Debug for FoursquarePlaces {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FoursquarePlaces")
            .field("relation", &self.relation)
            .finish_non_exhaustive()
    }
}

impl FoursquarePlaces {
    /// Opens an in-memory `DuckDB` over the Parquet files of `service`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Config`] if the entry is not a Foursquare
    /// service, or [`ProviderError::DuckDb`] if `DuckDB` fails to start.
    pub fn from_service(service: &GeoService) -> Result<Self, ProviderError> {
        let ProviderConfig::FoursquareParquet { parquet_path } = &service.provider else {
            return Err(ProviderError::config(format!(
                "Service '{}' is {}, not foursquare_parquet",
                service.id,
                service.kind()
            )));
        };
        let conn = duckdb::Connection::open_in_memory()?;
        Ok(Self::with_relation(
            conn,
            format!("read_parquet('{}')", parquet_path.replace('\'', "''")),
        ))
    }

    /// Creates an index from the `foursquare` registry entry.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError`] as in [`Self::from_service`].
    pub fn from_registry() -> Result<Self, ProviderError> {
        Self::from_service(&find_service("foursquare")?)
    }

    /// Queries `relation` (a table name or table function call) on an
    /// existing connection.
    #[must_use]
    pub fn with_relation(conn: duckdb::Connection, relation: String) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            relation,
        }
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, ProviderError>
    where
        T: Send + 'static,
        F: FnOnce(&duckdb::Connection, &str) -> Result<T, duckdb::Error> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let relation = self.relation.clone();
        let result = tokio::task::spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&guard, &relation)
        })
        .await
        .map_err(|e| ProviderError::parse(format!("DuckDB query task failed: {e}")))?;
        Ok(result?)
    }

    /// Counts places inside the bounding box of the disk around `at`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::DuckDb`] if the query fails.
    pub async fn count_within(&self, at: Coordinate, radius_meters: f64) -> Result<u64, ProviderError> {
        let bbox = bounding_box(at, radius_meters);
        let count: i64 = self
            .blocking(move |conn, relation| {
                let sql = format!(
                    "SELECT COUNT(*) FROM {relation} \
                     WHERE latitude BETWEEN ? AND ? AND longitude BETWEEN ? AND ?"
                );
                conn.query_row(
                    &sql,
                    duckdb::params![bbox.min_lat, bbox.max_lat, bbox.min_lon, bbox.max_lon],
                    |row| row.get(0),
                )
            })
            .await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    /// Returns the primary category label of the nearest place within
    /// `radius_meters` of `at`.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::DuckDb`] if the query fails.
    pub async fn category_near(
        &self,
        at: Coordinate,
        radius_meters: f64,
    ) -> Result<Option<String>, ProviderError> {
        let bbox = bounding_box(at, radius_meters);
        let rows: Vec<(Option<String>, f64, f64)> = self
            .blocking(move |conn, relation| {
                let sql = format!(
                    "SELECT fsq_category_labels[1], latitude, longitude FROM {relation} \
                     WHERE latitude BETWEEN ? AND ? AND longitude BETWEEN ? AND ? \
                       AND len(fsq_category_labels) > 0 \
                     LIMIT {CATEGORY_CANDIDATE_LIMIT}"
                );
                let mut stmt = conn.prepare(&sql)?;
                let rows = stmt.query_map(
                    duckdb::params![bbox.min_lat, bbox.max_lat, bbox.min_lon, bbox.max_lon],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )?;
                rows.collect()
            })
            .await?;

        Ok(nearest_label(at, radius_meters, rows))
    }
}

/// Picks the label of the closest row within `radius_meters`.
fn nearest_label(
    at: Coordinate,
    radius_meters: f64,
    rows: Vec<(Option<String>, f64, f64)>,
) -> Option<String> {
    rows.into_iter()
        .filter_map(|(label, lat, lon)| {
            let label = label.filter(|l| !l.trim().is_empty())?;
            let point = Coordinate::new(lat, lon).ok()?;
            let d = distance_meters(at, point);
            (d <= radius_meters).then_some((d, label))
        })
        .min_by(|a, b| a.0.total_cmp(&b.0))
        .map(|(_, label)| label)
}

/// Point-of-interest count metric backed by Foursquare places.
#[derive(Debug, Clone)]
pub struct FoursquarePoiCount(pub FoursquarePlaces);

#[async_trait]
impl MetricSource for FoursquarePoiCount {
    type Value = u64;

    fn name(&self) -> &str {
        "fsq_poi_count"
    }

    async fn fetch(&self, at: Coordinate, radius_meters: f64) -> Result<Option<u64>, ProviderError> {
        self.0.count_within(at, radius_meters).await.map(Some)
    }
}

/// Category label metric backed by Foursquare places.
#[derive(Debug, Clone)]
pub struct FoursquareCategory(pub FoursquarePlaces);

#[async_trait]
impl MetricSource for FoursquareCategory {
    type Value = String;

    fn name(&self) -> &str {
        "fsq_category"
    }

    async fn fetch(
        &self,
        at: Coordinate,
        radius_meters: f64,
    ) -> Result<Option<String>, ProviderError> {
        self.0.category_near(at, radius_meters).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> FoursquarePlaces {
        let conn = duckdb::Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE places (latitude DOUBLE, longitude DOUBLE, fsq_category_labels VARCHAR[]);
             INSERT INTO places VALUES
               (40.7580, -73.9855, ['Dining and Drinking > Cafe']),
               (40.7590, -73.9850, ['Retail > Bookstore']),
               (40.7600, -73.9900, []),
               (41.0000, -74.5000, ['Landmarks > Park']);",
        )
        .unwrap();
        FoursquarePlaces::with_relation(conn, "places".to_string())
    }

    #[tokio::test]
    async fn counts_places_in_box() {
        let places = fixture();
        let at = Coordinate::new(40.7585, -73.9860).unwrap();
        assert_eq!(places.count_within(at, 1_000.0).await.unwrap(), 3);
        assert_eq!(places.count_within(at, 10.0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn nearest_labeled_place_wins() {
        let places = fixture();
        let at = Coordinate::new(40.7589, -73.9851).unwrap();
        let label = places.category_near(at, 500.0).await.unwrap();
        assert_eq!(label.as_deref(), Some("Retail > Bookstore"));

        let far = Coordinate::new(0.0, 0.0).unwrap();
        assert_eq!(places.category_near(far, 500.0).await.unwrap(), None);
    }

    #[test]
    fn nearest_label_respects_true_radius() {
        let at = Coordinate::new(0.0, 0.0).unwrap();
        // Inside the bounding box corner but outside the disk.
        let rows = vec![(Some("Corner".to_string()), 0.0008, 0.0008)];
        assert_eq!(nearest_label(at, 100.0, rows), None);
    }
}
