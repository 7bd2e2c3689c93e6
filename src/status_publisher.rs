use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, info};

use crate::error::StorageError;
use crate::geo::Position;
use crate::vessel::{Place, StatusUpdate, Vessel, VesselId, VesselStatusRecord};

/// Store of vessel identities, metadata and current status records.
pub trait VesselRegistry: Send + Sync {
    /// Every registered vessel, ordered by identifier
    fn vessels(&self) -> Result<Vec<Vessel>, StorageError>;

    /// Insert or refresh registry metadata (name, company, fleet, region).
    /// Place and last location are kept when the incoming entry has none.
    fn upsert_vessel(&self, vessel: &Vessel) -> Result<(), StorageError>;

    /// Remember the last reported location (and its place) of a registered vessel
    fn record_sighting(
        &self,
        vessel_id: &VesselId,
        name: Option<&str>,
        location: Position,
        place: Option<&Place>,
    ) -> Result<(), StorageError>;

    fn status(&self, vessel_id: &VesselId) -> Result<Option<VesselStatusRecord>, StorageError>;

    /// Merge `update` into the stored record (creating it when absent) as one
    /// atomic read-modify-write. Returns whether the stored record changed.
    fn apply_status(&self, vessel_id: &VesselId, update: &StatusUpdate) -> Result<bool, StorageError>;

    /// Every vessel with its status record (default record when none was published yet)
    fn statuses(&self) -> Result<Vec<(Vessel, VesselStatusRecord)>, StorageError>;
}

/// Writes classification results back into the vessel registry.
pub struct StatusPublisher {
    registry: Arc<dyn VesselRegistry>,
}

impl StatusPublisher {
    pub fn new(registry: Arc<dyn VesselRegistry>) -> Self {
        Self { registry }
    }

    /// Upsert the status record. Optional fields left empty keep their stored
    /// value. Returns Ok(true) only when the stored record actually changed.
    pub fn publish(&self, vessel_id: &VesselId, update: &StatusUpdate) -> Result<bool, StorageError> {
        let changed = self.registry.apply_status(vessel_id, update)?;
        if changed {
            info!(
                mmsi = %vessel_id,
                status = %update.status,
                speed_kn = ?update.speed_kn,
                "Vessel status updated"
            );
        } else {
            debug!(mmsi = %vessel_id, status = %update.status, "Vessel status unchanged");
        }
        Ok(changed)
    }
}

#[derive(Default)]
struct RegistryState {
    vessels: BTreeMap<VesselId, Vessel>,
    statuses: BTreeMap<VesselId, VesselStatusRecord>,
}

/// Registry kept in process memory.
#[derive(Default)]
pub struct MemoryRegistry {
    state: Mutex<RegistryState>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_vessels(vessels: impl IntoIterator<Item = Vessel>) -> Self {
        let registry = Self::new();
        if let Ok(mut state) = registry.state.lock() {
            for vessel in vessels {
                state.vessels.insert(vessel.mmsi.clone(), vessel);
            }
        }
        registry
    }

    fn lock(&self) -> Result<MutexGuard<'_, RegistryState>, StorageError> {
        self.state
            .lock()
            .map_err(|_| StorageError::Unavailable("registry lock poisoned".to_string()))
    }
}

impl VesselRegistry for MemoryRegistry {
    fn vessels(&self) -> Result<Vec<Vessel>, StorageError> {
        Ok(self.lock()?.vessels.values().cloned().collect())
    }

    fn upsert_vessel(&self, vessel: &Vessel) -> Result<(), StorageError> {
        let mut state = self.lock()?;
        let entry = state
            .vessels
            .entry(vessel.mmsi.clone())
            .or_insert_with(|| Vessel::new(vessel.mmsi.clone()));
        entry.name = vessel.name.clone();
        entry.company = vessel.company.clone();
        entry.fleet = vessel.fleet.clone();
        entry.region = vessel.region.clone();
        if vessel.place.is_some() {
            entry.place = vessel.place.clone();
        }
        if vessel.last_location.is_some() {
            entry.last_location = vessel.last_location;
        }
        let region = vessel.region.clone();
        if let Some(record) = state.statuses.get_mut(&vessel.mmsi) {
            record.region = region;
        }
        Ok(())
    }

    fn record_sighting(
        &self,
        vessel_id: &VesselId,
        name: Option<&str>,
        location: Position,
        place: Option<&Place>,
    ) -> Result<(), StorageError> {
        let mut state = self.lock()?;
        let Some(vessel) = state.vessels.get_mut(vessel_id) else {
            return Err(StorageError::Query(format!("vessel {} is not registered", vessel_id)));
        };
        if let Some(name) = name.filter(|n| !n.trim().is_empty()) {
            vessel.name = Some(name.trim().to_string());
        }
        vessel.last_location = Some(location);
        if let Some(place) = place {
            vessel.place = Some(place.clone());
        }
        Ok(())
    }

    fn status(&self, vessel_id: &VesselId) -> Result<Option<VesselStatusRecord>, StorageError> {
        Ok(self.lock()?.statuses.get(vessel_id).cloned())
    }

    fn apply_status(&self, vessel_id: &VesselId, update: &StatusUpdate) -> Result<bool, StorageError> {
        let mut state = self.lock()?;
        let region = state.vessels.get(vessel_id).and_then(|v| v.region.clone());
        let record = state.statuses.entry(vessel_id.clone()).or_insert_with(|| VesselStatusRecord {
            region,
            ..Default::default()
        });
        Ok(record.apply(update))
    }

    fn statuses(&self) -> Result<Vec<(Vessel, VesselStatusRecord)>, StorageError> {
        let state = self.lock()?;
        Ok(state
            .vessels
            .values()
            .map(|v| {
                let record = state.statuses.get(&v.mmsi).cloned().unwrap_or_else(|| VesselStatusRecord {
                    region: v.region.clone(),
                    ..Default::default()
                });
                (v.clone(), record)
            })
            .collect())
    }
}
