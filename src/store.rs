/// Personal trip log storage.
///
/// The blender only needs "trips to this destination"; matching is done in
/// Rust with the configured `MatchPolicy` so both backends agree on it.
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use std::str::FromStr;
use std::sync::RwLock;
use tracing::{debug, info};

use crate::config::MatchPolicy;
use crate::models::{Coordinates, TripRecord};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),
    #[error("Invalid trip record: {0}")]
    InvalidRecord(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// Read side of the trip log, all the prediction engine gets to see
#[async_trait]
pub trait TripHistory: Send + Sync {
    /// Logged trips whose destination matches `pattern` under `policy`
    async fn trips_for_destination(
        &self,
        pattern: &str,
        policy: MatchPolicy,
    ) -> Result<Vec<TripRecord>, StoreError>;
}

/// Full trip log, used by the logging endpoints
#[async_trait]
pub trait TripStore: TripHistory {
    async fn insert_trip(&self, trip: &TripRecord) -> Result<(), StoreError>;

    /// Most recent trips first
    async fn list_trips(&self, limit: usize) -> Result<Vec<TripRecord>, StoreError>;
}

fn validate(trip: &TripRecord) -> Result<(), StoreError> {
    if trip.destination.trim().is_empty() {
        return Err(StoreError::InvalidRecord("destination is empty".to_string()));
    }
    if trip.arrival_time <= trip.leave_time {
        return Err(StoreError::InvalidRecord(
            "arrival_time must be after leave_time".to_string(),
        ));
    }
    if !trip.start_coord.is_valid() || !trip.end_coord.is_valid() {
        return Err(StoreError::InvalidRecord("coordinates out of range".to_string()));
    }
    Ok(())
}

/// Trip log kept in memory, for tests and for running without a database
#[derive(Debug, Default)]
pub struct InMemoryTripStore {
    trips: RwLock<Vec<TripRecord>>,
}

impl InMemoryTripStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trips(trips: Vec<TripRecord>) -> Self {
        Self {
            trips: RwLock::new(trips),
        }
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<TripRecord>>, StoreError> {
        self.trips
            .read()
            .map_err(|_| StoreError::Database("trip store lock poisoned".to_string()))
    }
}

#[async_trait]
impl TripHistory for InMemoryTripStore {
    async fn trips_for_destination(
        &self,
        pattern: &str,
        policy: MatchPolicy,
    ) -> Result<Vec<TripRecord>, StoreError> {
        let trips = self.read()?;
        Ok(trips
            .iter()
            .filter(|trip| policy.matches(&trip.destination, pattern))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TripStore for InMemoryTripStore {
    async fn insert_trip(&self, trip: &TripRecord) -> Result<(), StoreError> {
        validate(trip)?;
        self.trips
            .write()
            .map_err(|_| StoreError::Database("trip store lock poisoned".to_string()))?
            .push(trip.clone());
        Ok(())
    }

    async fn list_trips(&self, limit: usize) -> Result<Vec<TripRecord>, StoreError> {
        let mut trips = self.read()?.clone();
        trips.sort_by(|a, b| b.leave_time.cmp(&a.leave_time));
        trips.truncate(limit);
        Ok(trips)
    }
}

/// Internal struct for database row
#[derive(Debug, FromRow)]
struct TripRow {
    destination: String,
    leave_time: String,
    arrival_time: String,
    distance_meters: f64,
    day_of_week: i64,
    hour_of_day: i64,
    is_weekend: bool,
    travel_time_minutes: f64,
    expected_time_minutes: f64,
    was_delayed: bool,
    start_lat: f64,
    start_lon: f64,
    end_lat: f64,
    end_lon: f64,
}

fn parse_stored_time(value: &str) -> Result<DateTime<FixedOffset>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map_err(|e| StoreError::InvalidRecord(format!("stored timestamp '{}': {}", value, e)))
}

impl TryFrom<TripRow> for TripRecord {
    type Error = StoreError;

    fn try_from(row: TripRow) -> Result<Self, Self::Error> {
        Ok(TripRecord {
            destination: row.destination,
            leave_time: parse_stored_time(&row.leave_time)?,
            arrival_time: parse_stored_time(&row.arrival_time)?,
            distance_meters: row.distance_meters,
            day_of_week: u8::try_from(row.day_of_week)
                .map_err(|e| StoreError::InvalidRecord(e.to_string()))?,
            hour_of_day: u8::try_from(row.hour_of_day)
                .map_err(|e| StoreError::InvalidRecord(e.to_string()))?,
            is_weekend: row.is_weekend,
            travel_time_minutes: row.travel_time_minutes,
            expected_time_minutes: row.expected_time_minutes,
            was_delayed: row.was_delayed,
            start_coord: Coordinates::new(row.start_lat, row.start_lon),
            end_coord: Coordinates::new(row.end_lat, row.end_lon),
        })
    }
}

const TRIP_COLUMNS: &str = "destination, leave_time, arrival_time, distance_meters, day_of_week, \
     hour_of_day, is_weekend, travel_time_minutes, expected_time_minutes, was_delayed, \
     start_lat, start_lon, end_lat, end_lon";

/// Trip log persisted in SQLite. Timestamps are stored as RFC 3339 text so
/// the original offset survives the round trip.
#[derive(Debug, Clone)]
pub struct SqliteTripStore {
    pool: SqlitePool,
}

impl SqliteTripStore {
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        // In-memory databases are per connection
        let max_connections = if url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init().await?;
        info!(url = %url, "Connected to trip database");
        Ok(store)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create the schema if it does not exist yet
    pub async fn init(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trips (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                destination TEXT NOT NULL,
                leave_time TEXT NOT NULL,
                arrival_time TEXT NOT NULL,
                distance_meters REAL NOT NULL,
                day_of_week INTEGER NOT NULL,
                hour_of_day INTEGER NOT NULL,
                is_weekend BOOLEAN NOT NULL,
                travel_time_minutes REAL NOT NULL,
                expected_time_minutes REAL NOT NULL,
                was_delayed BOOLEAN NOT NULL,
                start_lat REAL NOT NULL,
                start_lon REAL NOT NULL,
                end_lat REAL NOT NULL,
                end_lon REAL NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_trips_leave_time ON trips (leave_time)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn fetch_all(&self) -> Result<Vec<TripRecord>, StoreError> {
        let rows: Vec<TripRow> = sqlx::query_as(&format!("SELECT {} FROM trips", TRIP_COLUMNS))
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(TripRecord::try_from).collect()
    }
}

#[async_trait]
impl TripHistory for SqliteTripStore {
    async fn trips_for_destination(
        &self,
        pattern: &str,
        policy: MatchPolicy,
    ) -> Result<Vec<TripRecord>, StoreError> {
        let trips: Vec<TripRecord> = self
            .fetch_all()
            .await?
            .into_iter()
            .filter(|trip| policy.matches(&trip.destination, pattern))
            .collect();

        debug!(pattern = %pattern, matched = trips.len(), "Loaded trip history");
        Ok(trips)
    }
}

#[async_trait]
impl TripStore for SqliteTripStore {
    async fn insert_trip(&self, trip: &TripRecord) -> Result<(), StoreError> {
        validate(trip)?;

        sqlx::query(&format!(
            "INSERT INTO trips ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            TRIP_COLUMNS
        ))
        .bind(&trip.destination)
        .bind(trip.leave_time.to_rfc3339())
        .bind(trip.arrival_time.to_rfc3339())
        .bind(trip.distance_meters)
        .bind(i64::from(trip.day_of_week))
        .bind(i64::from(trip.hour_of_day))
        .bind(trip.is_weekend)
        .bind(trip.travel_time_minutes)
        .bind(trip.expected_time_minutes)
        .bind(trip.was_delayed)
        .bind(trip.start_coord.latitude)
        .bind(trip.start_coord.longitude)
        .bind(trip.end_coord.latitude)
        .bind(trip.end_coord.longitude)
        .execute(&self.pool)
        .await?;

        info!(
            destination = %trip.destination,
            minutes = trip.travel_time_minutes,
            delayed = trip.was_delayed,
            "Logged trip"
        );
        Ok(())
    }

    async fn list_trips(&self, limit: usize) -> Result<Vec<TripRecord>, StoreError> {
        // Sorting happens after parsing: text order is wrong across offsets
        let mut trips = self.fetch_all().await?;
        trips.sort_by(|a, b| b.leave_time.cmp(&a.leave_time));
        trips.truncate(limit);
        Ok(trips)
    }
}
