use std::sync::RwLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use mysql::prelude::*;
use mysql::{params, OptsBuilder, Pool, PooledConn, Row, TxOpts};
use tracing::{info, warn};

use crate::config::DatabaseConnectionConfig;
use crate::error::StorageError;
use crate::geo::Position;
use crate::status_publisher::VesselRegistry;
use crate::track_store::TrackStore;
use crate::vessel::{
    Place, StatusUpdate, TrackPoint, TrackWindow, Vessel, VesselId, VesselState, VesselStatusRecord,
};

const DB_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

/// Required schema. Every statement is idempotent.
const SCHEMA: [&str; 3] = [
    r"CREATE TABLE IF NOT EXISTS vessels (
        mmsi VARCHAR(20) NOT NULL PRIMARY KEY,
        name VARCHAR(255),
        company VARCHAR(255),
        fleet VARCHAR(255),
        region VARCHAR(64),
        country VARCHAR(128),
        continent VARCHAR(64),
        admin_region VARCHAR(128),
        locality VARCHAR(128),
        last_latitude DOUBLE,
        last_longitude DOUBLE
    )",
    r"CREATE TABLE IF NOT EXISTS vessel_status (
        mmsi VARCHAR(20) NOT NULL PRIMARY KEY,
        status VARCHAR(16) NOT NULL,
        status_as_of DATETIME(3) NULL COMMENT 'UTC timezone',
        latitude DOUBLE,
        longitude DOUBLE,
        speed_kn DOUBLE,
        heading DOUBLE
    )",
    r"CREATE TABLE IF NOT EXISTS vessel_tracks (
        id BIGINT AUTO_INCREMENT PRIMARY KEY,
        mmsi VARCHAR(20) NOT NULL,
        observed_at DATETIME(3) NOT NULL COMMENT 'UTC timezone',
        latitude DOUBLE NOT NULL,
        longitude DOUBLE NOT NULL,
        speed_kn DOUBLE,
        heading DOUBLE,
        raw_status TEXT NOT NULL,
        UNIQUE KEY uk_mmsi_observed (mmsi, observed_at)
    )",
];

const VESSEL_COLUMNS: &str = "v.mmsi, v.name, v.company, v.fleet, v.region, \
     v.country, v.continent, v.admin_region, v.locality, v.last_latitude, v.last_longitude";

const STATUS_COLUMNS: &str = "s.status, \
     DATE_FORMAT(s.status_as_of, '%Y-%m-%d %H:%i:%S.%f') AS status_ts, \
     s.latitude AS status_latitude, s.longitude AS status_longitude, s.speed_kn, s.heading";

/// MySQL-backed track store and vessel registry.
pub struct FleetDatabase {
    pool: RwLock<Pool>,
    settings: DatabaseConnectionConfig,
    max_points_per_vessel: usize,
}

impl FleetDatabase {
    /// Open the pool and verify it answers. Tables are not touched; call
    /// [`FleetDatabase::ensure_schema`] for that.
    pub fn connect(settings: &DatabaseConnectionConfig, max_points_per_vessel: usize) -> Result<Self, StorageError> {
        let pool = Self::build_pool(settings)?;
        let db = Self {
            pool: RwLock::new(pool),
            settings: settings.clone(),
            max_points_per_vessel: max_points_per_vessel.max(1),
        };
        db.health_check()?;
        Ok(db)
    }

    fn build_pool(settings: &DatabaseConnectionConfig) -> Result<Pool, StorageError> {
        let opts = OptsBuilder::new()
            .ip_or_hostname(Some(settings.host.clone()))
            .tcp_port(settings.port)
            .user(Some(settings.username.clone()))
            .pass(Some(settings.password.clone()))
            .db_name(Some(settings.database_name.clone()))
            .tcp_connect_timeout(Some(settings.connect_timeout()))
            .read_timeout(Some(settings.read_timeout()))
            .write_timeout(Some(settings.write_timeout()));
        Ok(Pool::new(opts)?)
    }

    fn conn(&self) -> Result<PooledConn, StorageError> {
        let pool = self
            .pool
            .read()
            .map_err(|_| StorageError::Unavailable("connection pool lock poisoned".to_string()))?
            .clone();
        Ok(pool.get_conn()?)
    }

    pub fn ensure_schema(&self) -> Result<(), StorageError> {
        let mut conn = self.conn()?;
        for statement in SCHEMA {
            conn.query_drop(statement)?;
        }
        Ok(())
    }

    /// Check database connection health using a simple query
    pub fn health_check(&self) -> Result<(), StorageError> {
        let mut conn = self.conn()?;
        conn.query_drop("SELECT 1")?;
        Ok(())
    }

    /// Replace the pool, retrying with exponential backoff (capped at 30s).
    /// Returns true once a new pool answers.
    pub fn reconnect_with_retry(&self, max_retries: u32) -> bool {
        for attempt in 1..=max_retries {
            warn!("Attempting to reconnect to database (attempt {}/{})...", attempt, max_retries);
            match Self::build_pool(&self.settings).and_then(|pool| {
                pool.get_conn()?.query_drop("SELECT 1")?;
                Ok(pool)
            }) {
                Ok(pool) => {
                    match self.pool.write() {
                        Ok(mut current) => *current = pool,
                        Err(_) => {
                            warn!("Connection pool lock poisoned, cannot swap in the new pool");
                            return false;
                        }
                    }
                    info!("Database reconnection successful");
                    return true;
                }
                Err(e) => {
                    warn!("Database reconnection attempt {} failed: {}", attempt, e);
                    if attempt < max_retries {
                        let wait_time = std::cmp::min(2_u64.pow(attempt - 1), 30);
                        warn!("Waiting {} seconds before retry...", wait_time);
                        std::thread::sleep(Duration::from_secs(wait_time));
                    }
                }
            }
        }
        warn!("Failed to reconnect to database after {} attempts", max_retries);
        false
    }

    fn read_status(
        conn: &mut impl Queryable,
        vessel_id: &VesselId,
        lock: bool,
    ) -> Result<Option<VesselStatusRecord>, StorageError> {
        let query = format!(
            "SELECT {STATUS_COLUMNS}, v.region FROM vessel_status s \
             LEFT JOIN vessels v ON v.mmsi = s.mmsi \
             WHERE s.mmsi = :mmsi{}",
            if lock { " FOR UPDATE" } else { "" }
        );
        let row: Option<Row> = conn.exec_first(query, params! { "mmsi" => vessel_id.as_str() })?;
        match row {
            Some(mut row) => {
                let region: Option<String> = column(&mut row, "region")?;
                status_from_row(&mut row, region)
            }
            None => Ok(None),
        }
    }
}

impl TrackStore for FleetDatabase {
    fn append(&self, point: TrackPoint) -> Result<(), StorageError> {
        let mut conn = self.conn()?;
        let mut tx = conn.start_transaction(TxOpts::default())?;

        tx.exec_drop(
            r"INSERT INTO vessel_tracks
                (mmsi, observed_at, latitude, longitude, speed_kn, heading, raw_status)
                VALUES (:mmsi, :observed_at, :latitude, :longitude, :speed_kn, :heading, :raw_status)
                ON DUPLICATE KEY UPDATE
                    latitude = VALUES(latitude),
                    longitude = VALUES(longitude),
                    speed_kn = VALUES(speed_kn),
                    heading = VALUES(heading),
                    raw_status = VALUES(raw_status)",
            params! {
                "mmsi" => point.vessel_id.as_str(),
                "observed_at" => to_db_timestamp(point.observed_at),
                "latitude" => point.position.latitude,
                "longitude" => point.position.longitude,
                "speed_kn" => point.reported_speed_kn,
                "heading" => point.reported_heading,
                "raw_status" => point.raw_status.as_str(),
            },
        )?;

        // oldest point that survives the trim
        let cutoff: Option<String> = tx.exec_first(
            r"SELECT DATE_FORMAT(observed_at, '%Y-%m-%d %H:%i:%S.%f')
              FROM vessel_tracks
              WHERE mmsi = :mmsi
              ORDER BY observed_at DESC
              LIMIT 1 OFFSET :offset",
            params! {
                "mmsi" => point.vessel_id.as_str(),
                "offset" => (self.max_points_per_vessel - 1) as u64,
            },
        )?;
        if let Some(cutoff) = cutoff {
            tx.exec_drop(
                "DELETE FROM vessel_tracks WHERE mmsi = :mmsi AND observed_at < :cutoff",
                params! {
                    "mmsi" => point.vessel_id.as_str(),
                    "cutoff" => cutoff,
                },
            )?;
        }

        tx.commit()?;
        Ok(())
    }

    fn recent_window(
        &self,
        vessel_id: &VesselId,
        trailing: chrono::Duration,
        max_points: usize,
        now: DateTime<Utc>,
    ) -> Result<TrackWindow, StorageError> {
        if max_points == 0 {
            return Ok(TrackWindow::empty(vessel_id.clone()));
        }
        let mut conn = self.conn()?;
        let rows: Vec<Row> = conn.exec(
            r"SELECT DATE_FORMAT(observed_at, '%Y-%m-%d %H:%i:%S.%f') AS observed_ts,
                     latitude, longitude, speed_kn, heading, raw_status
              FROM vessel_tracks
              WHERE mmsi = :mmsi AND observed_at >= :since
              ORDER BY observed_at DESC
              LIMIT :limit",
            params! {
                "mmsi" => vessel_id.as_str(),
                "since" => to_db_timestamp(now - trailing),
                "limit" => max_points.min(u32::MAX as usize) as u64,
            },
        )?;

        let points = rows
            .into_iter()
            .map(|mut row| {
                let observed_ts: String = column(&mut row, "observed_ts")?;
                Ok(TrackPoint {
                    vessel_id: vessel_id.clone(),
                    position: Position::new(column(&mut row, "latitude")?, column(&mut row, "longitude")?),
                    reported_speed_kn: column(&mut row, "speed_kn")?,
                    reported_heading: column(&mut row, "heading")?,
                    raw_status: column(&mut row, "raw_status")?,
                    observed_at: from_db_timestamp(&observed_ts)?,
                })
            })
            .collect::<Result<Vec<_>, StorageError>>()?;

        Ok(TrackWindow::new(vessel_id.clone(), points))
    }
}

impl VesselRegistry for FleetDatabase {
    fn vessels(&self) -> Result<Vec<Vessel>, StorageError> {
        let mut conn = self.conn()?;
        let rows: Vec<Row> = conn.query(format!("SELECT {VESSEL_COLUMNS} FROM vessels v ORDER BY v.mmsi"))?;
        rows.into_iter().map(|mut row| vessel_from_row(&mut row)).collect()
    }

    fn upsert_vessel(&self, vessel: &Vessel) -> Result<(), StorageError> {
        let mut conn = self.conn()?;
        let place = vessel.place.as_ref();
        conn.exec_drop(
            r"INSERT INTO vessels
                (mmsi, name, company, fleet, region, country, continent, admin_region, locality,
                 last_latitude, last_longitude)
                VALUES (:mmsi, :name, :company, :fleet, :region, :country, :continent, :admin_region,
                        :locality, :last_latitude, :last_longitude)
                ON DUPLICATE KEY UPDATE
                    name = VALUES(name),
                    company = VALUES(company),
                    fleet = VALUES(fleet),
                    region = VALUES(region),
                    country = COALESCE(VALUES(country), country),
                    continent = COALESCE(VALUES(continent), continent),
                    admin_region = COALESCE(VALUES(admin_region), admin_region),
                    locality = COALESCE(VALUES(locality), locality),
                    last_latitude = COALESCE(VALUES(last_latitude), last_latitude),
                    last_longitude = COALESCE(VALUES(last_longitude), last_longitude)",
            params! {
                "mmsi" => vessel.mmsi.as_str(),
                "name" => vessel.name.as_deref(),
                "company" => vessel.company.as_deref(),
                "fleet" => vessel.fleet.as_deref(),
                "region" => vessel.region.as_deref(),
                "country" => place.map(|p| p.country.as_str()),
                "continent" => place.map(|p| p.continent.as_str()),
                "admin_region" => place.map(|p| p.admin_region.as_str()),
                "locality" => place.map(|p| p.locality.as_str()),
                "last_latitude" => vessel.last_location.map(|p| p.latitude),
                "last_longitude" => vessel.last_location.map(|p| p.longitude),
            },
        )?;
        Ok(())
    }

    fn record_sighting(
        &self,
        vessel_id: &VesselId,
        name: Option<&str>,
        location: Position,
        place: Option<&Place>,
    ) -> Result<(), StorageError> {
        let mut conn = self.conn()?;
        let mut tx = conn.start_transaction(TxOpts::default())?;

        let registered: Option<String> = tx.exec_first(
            "SELECT mmsi FROM vessels WHERE mmsi = :mmsi FOR UPDATE",
            params! { "mmsi" => vessel_id.as_str() },
        )?;
        if registered.is_none() {
            return Err(StorageError::Query(format!("vessel {} is not registered", vessel_id)));
        }

        let name = name.map(str::trim).filter(|n| !n.is_empty());
        tx.exec_drop(
            r"UPDATE vessels SET
                name = COALESCE(:name, name),
                last_latitude = :latitude,
                last_longitude = :longitude,
                country = COALESCE(:country, country),
                continent = COALESCE(:continent, continent),
                admin_region = COALESCE(:admin_region, admin_region),
                locality = COALESCE(:locality, locality)
              WHERE mmsi = :mmsi",
            params! {
                "mmsi" => vessel_id.as_str(),
                "name" => name,
                "latitude" => location.latitude,
                "longitude" => location.longitude,
                "country" => place.map(|p| p.country.as_str()),
                "continent" => place.map(|p| p.continent.as_str()),
                "admin_region" => place.map(|p| p.admin_region.as_str()),
                "locality" => place.map(|p| p.locality.as_str()),
            },
        )?;

        tx.commit()?;
        Ok(())
    }

    fn status(&self, vessel_id: &VesselId) -> Result<Option<VesselStatusRecord>, StorageError> {
        let mut conn = self.conn()?;
        Self::read_status(&mut conn, vessel_id, false)
    }

    fn apply_status(&self, vessel_id: &VesselId, update: &StatusUpdate) -> Result<bool, StorageError> {
        let mut conn = self.conn()?;
        let mut tx = conn.start_transaction(TxOpts::default())?;

        let mut record = match Self::read_status(&mut tx, vessel_id, true)? {
            Some(record) => record,
            None => {
                let region: Option<Option<String>> = tx.exec_first(
                    "SELECT region FROM vessels WHERE mmsi = :mmsi",
                    params! { "mmsi" => vessel_id.as_str() },
                )?;
                VesselStatusRecord {
                    region: region.flatten(),
                    ..Default::default()
                }
            }
        };

        // the column keeps milliseconds only
        let mut update = update.clone();
        update.status_as_of = update.status_as_of.map(truncate_to_millis);

        let changed = record.apply(&update);
        if changed {
            tx.exec_drop(
                r"INSERT INTO vessel_status
                    (mmsi, status, status_as_of, latitude, longitude, speed_kn, heading)
                    VALUES (:mmsi, :status, :status_as_of, :latitude, :longitude, :speed_kn, :heading)
                    ON DUPLICATE KEY UPDATE
                        status = VALUES(status),
                        status_as_of = VALUES(status_as_of),
                        latitude = VALUES(latitude),
                        longitude = VALUES(longitude),
                        speed_kn = VALUES(speed_kn),
                        heading = VALUES(heading)",
                params! {
                    "mmsi" => vessel_id.as_str(),
                    "status" => record.status.as_str(),
                    "status_as_of" => record.status_as_of.map(to_db_timestamp),
                    "latitude" => record.location.map(|p| p.latitude),
                    "longitude" => record.location.map(|p| p.longitude),
                    "speed_kn" => record.speed_kn,
                    "heading" => record.heading,
                },
            )?;
        }

        tx.commit()?;
        Ok(changed)
    }

    fn statuses(&self) -> Result<Vec<(Vessel, VesselStatusRecord)>, StorageError> {
        let mut conn = self.conn()?;
        let rows: Vec<Row> = conn.query(format!(
            "SELECT {VESSEL_COLUMNS}, {STATUS_COLUMNS} FROM vessels v \
             LEFT JOIN vessel_status s ON s.mmsi = v.mmsi \
             ORDER BY v.mmsi"
        ))?;

        rows.into_iter()
            .map(|mut row| {
                let vessel = vessel_from_row(&mut row)?;
                let record = status_from_row(&mut row, vessel.region.clone())?.unwrap_or_else(|| {
                    VesselStatusRecord {
                        region: vessel.region.clone(),
                        ..Default::default()
                    }
                });
                Ok((vessel, record))
            })
            .collect()
    }
}

/// Manages database health check timing and execution
pub struct HealthCheckManager {
    last_check: Instant,
    check_interval: Duration,
}

impl HealthCheckManager {
    pub fn new(check_interval: Duration) -> Self {
        Self {
            last_check: Instant::now(),
            check_interval,
        }
    }

    pub fn should_check(&self) -> bool {
        self.last_check.elapsed() >= self.check_interval
    }

    pub fn reset(&mut self) {
        self.last_check = Instant::now();
    }

    /// Run a health check when one is due and reconnect on failure.
    /// Returns whether a check was performed.
    pub fn check_and_reconnect(&mut self, db: &FleetDatabase) -> bool {
        if !self.should_check() {
            return false;
        }

        match db.health_check() {
            Ok(_) => info!("[DB Health] Connection healthy"),
            Err(e) => {
                warn!("[DB Health] Connection check failed: {}", e);
                db.reconnect_with_retry(3);
            }
        }

        self.reset();
        true
    }
}

fn column<T: FromValue>(row: &mut Row, name: &str) -> Result<T, StorageError> {
    match row.take_opt::<T, _>(name) {
        Some(Ok(value)) => Ok(value),
        Some(Err(e)) => Err(StorageError::Corrupt(format!("column {}: {:?}", name, e))),
        None => Err(StorageError::Corrupt(format!("missing column {}", name))),
    }
}

fn vessel_from_row(row: &mut Row) -> Result<Vessel, StorageError> {
    let mmsi: String = column(row, "mmsi")?;
    let place = place_from_columns(
        column(row, "country")?,
        column(row, "continent")?,
        column(row, "admin_region")?,
        column(row, "locality")?,
    );
    let last_location = match (column(row, "last_latitude")?, column(row, "last_longitude")?) {
        (Some(lat), Some(lon)) => Some(Position::new(lat, lon)),
        _ => None,
    };
    Ok(Vessel {
        mmsi: VesselId::new(mmsi),
        name: column(row, "name")?,
        company: column(row, "company")?,
        fleet: column(row, "fleet")?,
        region: column(row, "region")?,
        place,
        last_location,
    })
}

/// None when the row carries no status (no record published yet)
fn status_from_row(row: &mut Row, region: Option<String>) -> Result<Option<VesselStatusRecord>, StorageError> {
    let status: Option<String> = column(row, "status")?;
    let Some(status) = status else {
        return Ok(None);
    };
    let status: VesselState = status.parse().map_err(StorageError::Corrupt)?;
    let status_ts: Option<String> = column(row, "status_ts")?;
    let location = match (column(row, "status_latitude")?, column(row, "status_longitude")?) {
        (Some(lat), Some(lon)) => Some(Position::new(lat, lon)),
        _ => None,
    };
    Ok(Some(VesselStatusRecord {
        status,
        status_as_of: status_ts.as_deref().map(from_db_timestamp).transpose()?,
        location,
        speed_kn: column(row, "speed_kn")?,
        heading: column(row, "heading")?,
        region,
    }))
}

fn place_from_columns(
    country: Option<String>,
    continent: Option<String>,
    admin_region: Option<String>,
    locality: Option<String>,
) -> Option<Place> {
    if country.is_none() && continent.is_none() && admin_region.is_none() && locality.is_none() {
        return None;
    }
    Some(Place {
        country: country.unwrap_or_default(),
        continent: continent.unwrap_or_default(),
        admin_region: admin_region.unwrap_or_default(),
        locality: locality.unwrap_or_default(),
    })
}

fn to_db_timestamp(t: DateTime<Utc>) -> String {
    t.format(DB_TIMESTAMP_FORMAT).to_string()
}

fn from_db_timestamp(s: &str) -> Result<DateTime<Utc>, StorageError> {
    Ok(NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")?.and_utc())
}

fn truncate_to_millis(t: DateTime<Utc>) -> DateTime<Utc> {
    let millis = t.nanosecond() / 1_000_000 * 1_000_000;
    t.with_nanosecond(millis).unwrap_or(t)
}
