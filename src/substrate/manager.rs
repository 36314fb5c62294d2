use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::kernel::reservation::Reservation;
use crate::loader::parser::to_json_blob;
use crate::store::{Store, UnitRecord};
use crate::substrate::handler::{Handler, HandlerAction};
use crate::substrate::unit::{Unit, UnitState};
use crate::util::id::{ActorGuid, Rid, UnitId};
use crate::util::properties::{PROP_ACTION_SEQUENCE, PROP_EXCEPTION_MESSAGE, PROP_RESULT_CODE, Properties};

/// Aggregate outcome for a reservation once every one of its units has
/// resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitsOutcome {
    pub rid: Rid,
    pub ok: bool,
    pub message: Option<String>,
}

/// Authority-side bookkeeping of units and their handler traffic. Owned by
/// the actor core; completions arrive as events and are applied here before
/// the kernel hears the reservation-level outcome.
pub struct SubstrateManager {
    actor_guid: ActorGuid,
    store: Arc<dyn Store>,
    handler: Arc<dyn Handler>,
    units: HashMap<UnitId, Unit>,
    by_reservation: HashMap<Rid, Vec<UnitId>>,
}

impl SubstrateManager {
    pub fn new(actor_guid: ActorGuid, store: Arc<dyn Store>, handler: Arc<dyn Handler>) -> Self {
        Self { actor_guid, store, handler, units: HashMap::new(), by_reservation: HashMap::new() }
    }

    pub fn unit(&self, unit_id: &UnitId) -> Option<&Unit> {
        self.units.get(unit_id)
    }

    pub fn units_of(&self, rid: &Rid) -> Vec<&Unit> {
        self.by_reservation.get(rid).map(|ids| ids.iter().filter_map(|id| self.units.get(id)).collect()).unwrap_or_default()
    }

    fn persist_unit(&self, unit: &Unit) -> Result<()> {
        let record = UnitRecord {
            unit_id: unit.unit_id.clone(),
            reservation_id: unit.reservation_id.clone(),
            parent_id: unit.parent_id.clone(),
            state: unit.state.to_string(),
            blob: to_json_blob(unit)?,
        };
        // add_unit upserts; units have no separate insert path.
        self.store.add_unit(record)
    }

    /// Creates one unit per approved resource unit and dispatches the
    /// handler create for each.
    pub fn create_units(&mut self, reservation: &Reservation) -> Result<()> {
        let approved = reservation
            .approved
            .as_ref()
            .ok_or_else(|| Error::InvalidState(format!("reservation {} has no approved resources", reservation.rid)))?;

        if self.by_reservation.get(&reservation.rid).map(|ids| !ids.is_empty()).unwrap_or(false) {
            return Err(Error::InvalidState(format!("reservation {} already has units", reservation.rid)));
        }

        let mut primed = Vec::new();
        for _ in 0..approved.units {
            let mut unit = Unit::new(
                UnitId::generate(),
                reservation.rid.clone(),
                reservation.slice_id.clone(),
                self.actor_guid.clone(),
                approved.resource_type.clone(),
            );
            unit.sliver = approved.sliver.clone();
            unit.start_action(UnitState::Priming)?;
            self.persist_unit(&unit)?;
            primed.push(unit);
        }

        let ids = self.by_reservation.entry(reservation.rid.clone()).or_default();
        for unit in primed {
            ids.push(unit.unit_id.clone());
            self.handler.create(&unit);
            self.units.insert(unit.unit_id.clone(), unit);
        }
        log::info!("Priming {} unit(s) for reservation {}.", approved.units, reservation.rid);
        Ok(())
    }

    /// Dispatches a modify on every unit of the reservation.
    pub fn modify_units(&mut self, reservation: &Reservation) -> Result<()> {
        let ids = self.by_reservation.get(&reservation.rid).cloned().unwrap_or_default();
        if ids.is_empty() {
            return Err(Error::NotFound(format!("no units for reservation {}", reservation.rid)));
        }

        for unit_id in ids {
            let Some(unit) = self.units.get(&unit_id) else { continue };
            let mut updated = unit.clone();
            updated.sliver = reservation.approved.as_ref().and_then(|set| set.sliver.clone());
            updated.start_action(UnitState::Modifying)?;
            self.persist_unit(&updated)?;
            self.handler.modify(&updated);
            self.units.insert(unit_id, updated);
        }
        Ok(())
    }

    /// Dispatches a delete on every unit. A reservation that never primed
    /// any units closes on the spot.
    pub fn delete_units(&mut self, rid: &Rid) -> Result<Option<UnitsOutcome>> {
        let ids = self.by_reservation.get(rid).cloned().unwrap_or_default();
        if ids.is_empty() {
            // Nothing was ever primed; the close completes on the spot.
            return Ok(Some(UnitsOutcome { rid: rid.clone(), ok: true, message: None }));
        }

        for unit_id in ids {
            let Some(unit) = self.units.get(&unit_id) else { continue };
            if unit.state.is_terminal() {
                continue;
            }
            let mut updated = unit.clone();
            updated.start_action(UnitState::Closing)?;
            self.persist_unit(&updated)?;
            self.handler.delete(&updated);
            self.units.insert(unit_id, updated);
        }
        // If every unit had already settled there is nothing to wait for.
        Ok(self.resolve(rid, None))
    }

    /// Applies one handler completion. Returns the reservation-level
    /// outcome once every unit of that reservation has settled.
    pub fn configuration_complete(&mut self, action: HandlerAction, unit_id: &UnitId, properties: &Properties) -> Result<Option<UnitsOutcome>> {
        let unit = self.units.get_mut(unit_id).ok_or_else(|| Error::NotFound(format!("unit {}", unit_id)))?;

        let sequence = properties.get(PROP_ACTION_SEQUENCE).and_then(|raw| raw.parse::<u64>().ok()).unwrap_or(0);
        let result_code = properties.get(PROP_RESULT_CODE).and_then(|raw| raw.parse::<i64>().ok()).unwrap_or(-1);
        let exception = properties.get(PROP_EXCEPTION_MESSAGE).map(String::as_str);

        let applied = unit.complete_action(sequence, result_code, exception)?;
        if !applied {
            return Ok(None);
        }
        log::debug!("Handler {} completed for unit {} with code {}.", action, unit_id, result_code);

        let rid = unit.reservation_id.clone();
        let unit_snapshot = unit.clone();
        self.persist_unit(&unit_snapshot)?;

        Ok(self.resolve(&rid, exception))
    }

    fn resolve(&self, rid: &Rid, exception: Option<&str>) -> Option<UnitsOutcome> {
        let units = self.units_of(rid);

        let in_flight = units.iter().any(|u| matches!(u.state, UnitState::Priming | UnitState::Modifying | UnitState::Closing));
        if in_flight {
            return None;
        }

        let failed = units.iter().any(|u| u.state == UnitState::Failed);
        Some(UnitsOutcome { rid: rid.clone(), ok: !failed, message: failed.then(|| exception.unwrap_or("substrate action failed").to_string()) })
    }

    /// Recovery: restores unit records for the reservations being replayed.
    pub fn revisit(&mut self, rid: &Rid) -> Result<()> {
        for record in self.store.get_units_by_reservation(rid)? {
            let unit: Unit = crate::loader::parser::parse_json_str(&record.blob)?;
            self.by_reservation.entry(rid.clone()).or_default().push(unit.unit_id.clone());
            self.units.insert(unit.unit_id.clone(), unit);
        }
        Ok(())
    }
}
