//! Offline reverse geocoding against a table of known places.
//!
//! The index is loaded once at startup (a few hundred milliseconds for a
//! cities-sized table) and then shared read-only by the ingestion job.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::error::GeocoderError;
use crate::geo::Position;
use crate::vessel::Place;

/// Maps a coordinate to the place it belongs to.
pub trait ReverseGeocoder: Send + Sync {
    /// None when nothing sensible is known for the coordinate
    fn locate(&self, position: Position) -> Option<Place>;
}

#[derive(Debug, Deserialize)]
struct PlaceRow {
    lat: f64,
    lon: f64,
    #[serde(default)]
    name: String,
    #[serde(default)]
    admin1: String,
    #[serde(default)]
    cc: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    continent: String,
}

#[derive(Debug, Clone, Copy)]
struct Coordinate(Position);

impl vpsearch::MetricSpace for Coordinate {
    type UserData = ();
    type Distance = f64;

    fn distance(&self, other: &Self, _: &Self::UserData) -> Self::Distance {
        self.0.distance_to(&other.0)
    }
}

/// Nearest-neighbour index over a CSV table with the columns
/// `lat,lon,name,admin1,cc,country,continent` (the last four optional).
pub struct PlaceIndex {
    tree: vpsearch::Tree<Coordinate>,
    /// Same order as the coordinates the tree was built from
    places: Vec<Place>,
}

impl PlaceIndex {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, GeocoderError> {
        let path = path.as_ref();
        let index = Self::from_reader(File::open(path)?)?;
        info!("Loaded {} places for reverse geocoding from {}", index.len(), path.display());
        Ok(index)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, GeocoderError> {
        let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
        let mut coordinates = Vec::new();
        let mut places = Vec::new();
        for row in csv_reader.deserialize::<PlaceRow>() {
            let row = row?;
            let position = Position::new(row.lat, row.lon);
            if !position.is_valid() {
                continue;
            }
            let country = if row.country.is_empty() { row.cc } else { row.country };
            coordinates.push(Coordinate(position));
            places.push(Place {
                country,
                continent: row.continent,
                admin_region: row.admin1,
                locality: row.name,
            });
        }
        if places.is_empty() {
            return Err(GeocoderError::Empty);
        }
        Ok(Self {
            tree: vpsearch::Tree::new(&coordinates),
            places,
        })
    }

    pub fn len(&self) -> usize {
        self.places.len()
    }

    pub fn is_empty(&self) -> bool {
        self.places.is_empty()
    }
}

impl ReverseGeocoder for PlaceIndex {
    fn locate(&self, position: Position) -> Option<Place> {
        if !position.is_valid() {
            return None;
        }
        let (index, _) = self.tree.find_nearest(&Coordinate(position));
        self.places.get(index).cloned()
    }
}
