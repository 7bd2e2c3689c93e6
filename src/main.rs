use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, warn};

mod app_metrics;
mod classification;
mod config;
mod db;
mod error;
mod geo;
mod geocoder;
mod ingestion;
mod movement_analyzer;
mod position_source;
mod scheduler;
mod speed_estimator;
mod status_classifier;
mod status_publisher;
mod track_store;
mod vessel;
mod web;

use app_metrics::{AppMetrics, MetricsLogger};
use classification::ClassificationJob;
use config::Config;
use db::{FleetDatabase, HealthCheckManager};
use geocoder::{PlaceIndex, ReverseGeocoder};
use ingestion::IngestionJob;
use position_source::FleetApiClient;
use status_publisher::{MemoryRegistry, VesselRegistry};
use track_store::{MemoryTrackStore, TrackStore};
use vessel::Vessel;
use web::api::AppState;

/// How often the housekeeping thread looks at metrics and database health
const HOUSEKEEPING_TICK: Duration = Duration::from_secs(1);

// ========== Logging Setup ==========

fn init_logging(log_config: &config::LogConfig) -> Result<(), Box<dyn Error>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
    use tracing_appender::rolling;

    std::fs::create_dir_all(&log_config.directory)?;

    let file_appender = rolling::daily(&log_config.directory, &log_config.file_prefix);

    // Build subscriber with both console and file output
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .with_timer(fmt::time::OffsetTime::local_rfc_3339().unwrap_or_else(|_| fmt::time::OffsetTime::new(
            time::UtcOffset::UTC,
            time::format_description::well_known::Rfc3339,
        )));

    let console_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_timer(fmt::time::OffsetTime::local_rfc_3339().unwrap_or_else(|_| fmt::time::OffsetTime::new(
            time::UtcOffset::UTC,
            time::format_description::well_known::Rfc3339,
        )));

    // RUST_LOG wins over the configured level
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&log_config.level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}

fn print_help() {
    println!("Dredge Tracker");
    println!();
    println!("USAGE:");
    println!("    dredge_tracker [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --config <path>                      Configuration file (default: config.json)");
    println!("    --import-vessels <file.json>         Upsert vessel registry entries and exit");
    println!("    --validate-config, --validate, -v    Validate configuration and exit");
    println!("    --help, -h                           Show this help message");
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .map(String::as_str)
}

fn print_config_summary(cfg: &Config) {
    println!("✓ Configuration validation successful");
    println!("  Database: {}@{}:{}/{}",
        cfg.database.connection.username,
        cfg.database.connection.host,
        cfg.database.connection.port,
        cfg.database.connection.database_name);
    println!("  Track retention: {} points per vessel", cfg.tracks.max_points_per_vessel());
    println!("  Fleet API: {}", cfg.source.resolved_url().unwrap_or_else(|| "(not configured)".to_string()));
    println!("  Classifier: {:?}, offline after {}h", cfg.classifier.mode, cfg.classifier.offline_hours);
    println!("  Schedule: ingestion every {}s, classification every {}s",
        cfg.schedule.ingestion_interval_seconds,
        cfg.schedule.classification_interval_seconds);
    if cfg.web.enabled {
        println!("  Web: port {}", cfg.web.port);
    } else {
        println!("  Web: disabled");
    }
}

/// Upsert every entry of a JSON array of vessels. Returns how many were imported.
fn import_vessels(path: &str, registry: &dyn VesselRegistry) -> Result<usize, Box<dyn Error>> {
    let contents = std::fs::read_to_string(path)?;
    import_vessel_list(&contents, registry)
}

/// The whole list is decoded before anything is written, so one blank
/// identifier rejects the file without a partial import.
fn import_vessel_list(contents: &str, registry: &dyn VesselRegistry) -> Result<usize, Box<dyn Error>> {
    let vessels: Vec<Vessel> = serde_json::from_str(contents)?;
    for vessel in &vessels {
        registry.upsert_vessel(vessel)?;
    }
    Ok(vessels.len())
}

// ========== Main Application ==========

fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_help();
        std::process::exit(0);
    }

    let validate_only = args.iter().any(|a| a == "--validate-config" || a == "--validate" || a == "-v");
    let config_path = flag_value(&args, "--config").unwrap_or("config.json");
    let import_path = flag_value(&args, "--import-vessels");

    let config = match Config::from_file(config_path) {
        Ok(cfg) => {
            if validate_only {
                print_config_summary(&cfg);
                std::process::exit(0);
            }
            cfg
        }
        Err(e) => {
            if validate_only {
                eprintln!("✗ Configuration validation failed: {}", e);
                std::process::exit(1);
            }
            if let error::ConfigError::Invalid(_) = e {
                eprintln!("Fatal configuration error: {}", e);
                std::process::exit(1);
            }
            eprintln!("Warning: Could not load {}: {}", config_path, e);
            eprintln!("Using default configuration");
            Config::default()
        }
    };

    init_logging(&config.logging)?;
    info!("Dredge Tracker starting...");

    let max_points = config.tracks.max_points_per_vessel();
    let database = match FleetDatabase::connect(&config.database.connection, max_points)
        .and_then(|db| db.ensure_schema().map(|_| db))
    {
        Ok(db) => {
            info!("Database connection established");
            Some(Arc::new(db))
        }
        Err(e) => {
            warn!("Failed to connect to database: {}", e);
            None
        }
    };

    let (store, registry): (Arc<dyn TrackStore>, Arc<dyn VesselRegistry>) = match &database {
        Some(db) => (db.clone() as Arc<dyn TrackStore>, db.clone() as Arc<dyn VesselRegistry>),
        None => {
            warn!("Continuing with in-memory storage, nothing will survive a restart");
            (
                Arc::new(MemoryTrackStore::new(max_points)) as Arc<dyn TrackStore>,
                Arc::new(MemoryRegistry::new()) as Arc<dyn VesselRegistry>,
            )
        }
    };

    // Durable registry: import and exit. In-memory registry: seed it and keep running.
    if let Some(path) = import_path {
        let imported = import_vessels(path, registry.as_ref())?;
        info!("Imported {} vessels from {}", imported, path);
        if database.is_some() {
            return Ok(());
        }
    }

    let geocoder: Option<Arc<dyn ReverseGeocoder>> = match &config.geocoder.places_file {
        Some(path) => match PlaceIndex::load(path) {
            Ok(index) => Some(Arc::new(index) as Arc<dyn ReverseGeocoder>),
            Err(e) => {
                warn!("Reverse geocoding disabled: {}", e);
                None
            }
        },
        None => None,
    };

    let metrics = Arc::new(AppMetrics::new());
    let stop = Arc::new(AtomicBool::new(false));
    let mut handles = Vec::new();

    match config.source.resolved_url() {
        Some(url) => {
            let source = Arc::new(FleetApiClient::new(url, config.source.timeout())?);
            let mut job = IngestionJob::new(source, store.clone(), registry.clone(), metrics.clone());
            if let Some(geocoder) = geocoder {
                job = job.with_geocoder(geocoder);
            }
            handles.push(scheduler::spawn(
                "ingestion",
                config.schedule.ingestion_interval(),
                move || {
                    if let Err(e) = job.run(Utc::now()) {
                        warn!("Ingestion run failed: {}", e);
                    }
                },
                stop.clone(),
            )?);
        }
        None => warn!("No fleet API url configured, ingestion disabled"),
    }

    let classification = ClassificationJob::new(&config.classifier, store.clone(), registry.clone(), metrics.clone());
    handles.push(scheduler::spawn(
        "classification",
        config.schedule.classification_interval(),
        move || {
            if let Err(e) = classification.run(Utc::now()) {
                warn!("Classification run failed: {}", e);
            }
        },
        stop.clone(),
    )?);

    // Application metrics and database health, checked like a main loop would
    let mut metrics_logger = MetricsLogger::new(config.schedule.metrics_interval());
    let mut db_health_check = HealthCheckManager::new(config.schedule.db_health_check_interval());
    let housekeeping_db = database.clone();
    let housekeeping_metrics = metrics.clone();
    handles.push(scheduler::spawn(
        "housekeeping",
        HOUSEKEEPING_TICK,
        move || {
            metrics_logger.check_and_log(&housekeeping_metrics);
            if let Some(db) = housekeeping_db.as_deref() {
                db_health_check.check_and_reconnect(db);
            }
        },
        stop.clone(),
    )?);

    if config.web.enabled {
        let state = AppState {
            store,
            registry,
            active_threshold: config.web.active_threshold(),
        };
        let runtime = tokio::runtime::Runtime::new()?;
        if let Err(e) = runtime.block_on(web::server::start_web_server(state, config.web.port, &config.web.static_dir)) {
            error!("Web server stopped: {}", e);
        }
        stop.store(true, Ordering::Relaxed);
    } else {
        info!("Web server disabled");
    }

    for handle in handles {
        if handle.join().is_err() {
            error!("A scheduled job thread panicked");
        }
    }
    Ok(())
}
