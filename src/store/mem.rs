use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::store::{
    ActorRecord, ClientRecord, ConfigMappingRecord, DelegationRecord, MiscRecord, ProxyRecord, ReservationRecord, SliceRecord, Store,
    UnitRecord,
};
use crate::util::id::{ActorGuid, DelegationId, GraphNodeId, Rid, SliceId, UnitId};

#[derive(Debug, Default)]
struct StoreInner {
    actors: HashMap<ActorGuid, ActorRecord>,
    slices: HashMap<SliceId, SliceRecord>,
    reservations: HashMap<Rid, ReservationRecord>,
    delegations: HashMap<DelegationId, DelegationRecord>,
    units: HashMap<UnitId, UnitRecord>,
    proxies: Vec<ProxyRecord>,
    clients: Vec<ClientRecord>,
    config_mappings: Vec<ConfigMappingRecord>,
    miscellaneous: HashMap<String, MiscRecord>,

    /// Number of upcoming write operations that should be rejected, used by
    /// tests to exercise the kernel's rollback path.
    fail_next_writes: u32,
}

/// Shared in-memory implementation of the storage seam. Backs tests and
/// single-node runs; real deployments plug a relational store in behind the
/// same trait.
#[derive(Debug, Clone, Default)]
pub struct MemStore {
    inner: Arc<RwLock<StoreInner>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next `count` write operations fail with `StorageFailure`.
    pub fn fail_next_writes(&self, count: u32) {
        self.inner.write().fail_next_writes = count;
    }

    fn check_write(inner: &mut StoreInner, op: &str) -> Result<()> {
        if inner.fail_next_writes > 0 {
            inner.fail_next_writes -= 1;
            return Err(Error::StorageFailure(format!("injected failure during {}", op)));
        }
        Ok(())
    }
}

impl Store for MemStore {
    fn add_actor(&self, record: ActorRecord) -> Result<()> {
        let mut inner = self.inner.write();
        Self::check_write(&mut inner, "add_actor")?;
        inner.actors.insert(record.guid.clone(), record);
        Ok(())
    }

    fn get_actors(&self) -> Result<Vec<ActorRecord>> {
        Ok(self.inner.read().actors.values().cloned().collect())
    }

    fn add_slice(&self, record: SliceRecord) -> Result<()> {
        let mut inner = self.inner.write();
        Self::check_write(&mut inner, "add_slice")?;
        if inner.slices.contains_key(&record.slice_guid) {
            return Err(Error::StorageFailure(format!("slice {} already persisted", record.slice_guid)));
        }
        inner.slices.insert(record.slice_guid.clone(), record);
        Ok(())
    }

    fn update_slice(&self, record: SliceRecord) -> Result<()> {
        let mut inner = self.inner.write();
        Self::check_write(&mut inner, "update_slice")?;
        if !inner.slices.contains_key(&record.slice_guid) {
            return Err(Error::StorageFailure(format!("slice {} not persisted", record.slice_guid)));
        }
        inner.slices.insert(record.slice_guid.clone(), record);
        Ok(())
    }

    fn remove_slice(&self, slice_id: &SliceId) -> Result<()> {
        let mut inner = self.inner.write();
        Self::check_write(&mut inner, "remove_slice")?;
        inner.slices.remove(slice_id);
        Ok(())
    }

    fn get_slice(&self, slice_id: &SliceId) -> Result<Option<SliceRecord>> {
        Ok(self.inner.read().slices.get(slice_id).cloned())
    }

    fn get_slices(&self) -> Result<Vec<SliceRecord>> {
        let mut slices: Vec<SliceRecord> = self.inner.read().slices.values().cloned().collect();
        slices.sort_by(|a, b| a.slice_guid.cmp(&b.slice_guid));
        Ok(slices)
    }

    fn get_slices_by_state(&self, state: &str) -> Result<Vec<SliceRecord>> {
        Ok(self.get_slices()?.into_iter().filter(|s| s.state == state).collect())
    }

    fn add_reservation(&self, record: ReservationRecord) -> Result<()> {
        let mut inner = self.inner.write();
        Self::check_write(&mut inner, "add_reservation")?;
        if inner.reservations.contains_key(&record.rid) {
            return Err(Error::StorageFailure(format!("reservation {} already persisted", record.rid)));
        }
        inner.reservations.insert(record.rid.clone(), record);
        Ok(())
    }

    fn update_reservation(&self, record: ReservationRecord) -> Result<()> {
        let mut inner = self.inner.write();
        Self::check_write(&mut inner, "update_reservation")?;
        if !inner.reservations.contains_key(&record.rid) {
            return Err(Error::StorageFailure(format!("reservation {} not persisted", record.rid)));
        }
        inner.reservations.insert(record.rid.clone(), record);
        Ok(())
    }

    fn remove_reservation(&self, rid: &Rid) -> Result<()> {
        let mut inner = self.inner.write();
        Self::check_write(&mut inner, "remove_reservation")?;
        inner.reservations.remove(rid);
        Ok(())
    }

    fn get_reservation(&self, rid: &Rid) -> Result<Option<ReservationRecord>> {
        Ok(self.inner.read().reservations.get(rid).cloned())
    }

    fn get_reservations(&self) -> Result<Vec<ReservationRecord>> {
        let mut reservations: Vec<ReservationRecord> = self.inner.read().reservations.values().cloned().collect();
        reservations.sort_by(|a, b| a.rid.cmp(&b.rid));
        Ok(reservations)
    }

    fn get_reservations_by_slice(&self, slice_id: &SliceId) -> Result<Vec<ReservationRecord>> {
        Ok(self.get_reservations()?.into_iter().filter(|r| &r.slice_guid == slice_id).collect())
    }

    fn get_reservations_by_state(&self, state: &str) -> Result<Vec<ReservationRecord>> {
        Ok(self.get_reservations()?.into_iter().filter(|r| r.state == state).collect())
    }

    fn get_reservations_by_graph_node(&self, node_id: &GraphNodeId) -> Result<Vec<ReservationRecord>> {
        Ok(self.get_reservations()?.into_iter().filter(|r| r.graph_node_id.as_ref() == Some(node_id)).collect())
    }

    fn add_delegation(&self, record: DelegationRecord) -> Result<()> {
        let mut inner = self.inner.write();
        Self::check_write(&mut inner, "add_delegation")?;
        if inner.delegations.contains_key(&record.did) {
            return Err(Error::StorageFailure(format!("delegation {} already persisted", record.did)));
        }
        inner.delegations.insert(record.did.clone(), record);
        Ok(())
    }

    fn update_delegation(&self, record: DelegationRecord) -> Result<()> {
        let mut inner = self.inner.write();
        Self::check_write(&mut inner, "update_delegation")?;
        if !inner.delegations.contains_key(&record.did) {
            return Err(Error::StorageFailure(format!("delegation {} not persisted", record.did)));
        }
        inner.delegations.insert(record.did.clone(), record);
        Ok(())
    }

    fn remove_delegation(&self, did: &DelegationId) -> Result<()> {
        let mut inner = self.inner.write();
        Self::check_write(&mut inner, "remove_delegation")?;
        inner.delegations.remove(did);
        Ok(())
    }

    fn get_delegation(&self, did: &DelegationId) -> Result<Option<DelegationRecord>> {
        Ok(self.inner.read().delegations.get(did).cloned())
    }

    fn get_delegations_by_slice(&self, slice_id: &SliceId) -> Result<Vec<DelegationRecord>> {
        let mut delegations: Vec<DelegationRecord> =
            self.inner.read().delegations.values().filter(|d| &d.slice_guid == slice_id).cloned().collect();
        delegations.sort_by(|a, b| a.did.cmp(&b.did));
        Ok(delegations)
    }

    fn add_unit(&self, record: UnitRecord) -> Result<()> {
        let mut inner = self.inner.write();
        Self::check_write(&mut inner, "add_unit")?;
        inner.units.insert(record.unit_id.clone(), record);
        Ok(())
    }

    fn update_unit(&self, record: UnitRecord) -> Result<()> {
        let mut inner = self.inner.write();
        Self::check_write(&mut inner, "update_unit")?;
        if !inner.units.contains_key(&record.unit_id) {
            return Err(Error::StorageFailure(format!("unit {} not persisted", record.unit_id)));
        }
        inner.units.insert(record.unit_id.clone(), record);
        Ok(())
    }

    fn remove_unit(&self, unit_id: &UnitId) -> Result<()> {
        let mut inner = self.inner.write();
        Self::check_write(&mut inner, "remove_unit")?;
        inner.units.remove(unit_id);
        Ok(())
    }

    fn get_unit(&self, unit_id: &UnitId) -> Result<Option<UnitRecord>> {
        Ok(self.inner.read().units.get(unit_id).cloned())
    }

    fn get_units_by_reservation(&self, rid: &Rid) -> Result<Vec<UnitRecord>> {
        let mut units: Vec<UnitRecord> = self.inner.read().units.values().filter(|u| &u.reservation_id == rid).cloned().collect();
        units.sort_by(|a, b| a.unit_id.cmp(&b.unit_id));
        Ok(units)
    }

    fn add_proxy(&self, record: ProxyRecord) -> Result<()> {
        let mut inner = self.inner.write();
        Self::check_write(&mut inner, "add_proxy")?;
        inner.proxies.push(record);
        Ok(())
    }

    fn get_proxies(&self, actor_id: &ActorGuid) -> Result<Vec<ProxyRecord>> {
        Ok(self.inner.read().proxies.iter().filter(|p| &p.actor_id == actor_id).cloned().collect())
    }

    fn add_client(&self, record: ClientRecord) -> Result<()> {
        let mut inner = self.inner.write();
        Self::check_write(&mut inner, "add_client")?;
        inner.clients.push(record);
        Ok(())
    }

    fn get_clients(&self, actor_id: &ActorGuid) -> Result<Vec<ClientRecord>> {
        Ok(self.inner.read().clients.iter().filter(|c| &c.actor_id == actor_id).cloned().collect())
    }

    fn add_config_mapping(&self, record: ConfigMappingRecord) -> Result<()> {
        let mut inner = self.inner.write();
        Self::check_write(&mut inner, "add_config_mapping")?;
        inner.config_mappings.push(record);
        Ok(())
    }

    fn get_config_mappings(&self, actor_id: &ActorGuid) -> Result<Vec<ConfigMappingRecord>> {
        Ok(self.inner.read().config_mappings.iter().filter(|m| &m.actor_id == actor_id).cloned().collect())
    }

    fn set_misc(&self, record: MiscRecord) -> Result<()> {
        let mut inner = self.inner.write();
        Self::check_write(&mut inner, "set_misc")?;
        inner.miscellaneous.insert(record.name.clone(), record);
        Ok(())
    }

    fn get_misc(&self, name: &str) -> Result<Option<MiscRecord>> {
        Ok(self.inner.read().miscellaneous.get(name).cloned())
    }

    fn remove_misc(&self, name: &str) -> Result<()> {
        let mut inner = self.inner.write();
        Self::check_write(&mut inner, "remove_misc")?;
        inner.miscellaneous.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slice_record(id: &str, state: &str) -> SliceRecord {
        SliceRecord {
            slice_guid: SliceId::new(id),
            name: id.to_string(),
            slice_type: "client".to_string(),
            state: state.to_string(),
            graph_id: None,
            owner_sub: None,
            email: None,
            lease_start: None,
            lease_end: None,
            project_id: None,
            blob: "{}".to_string(),
        }
    }

    #[test]
    fn duplicate_slice_insert_is_rejected() {
        let store = MemStore::new();
        store.add_slice(slice_record("s-1", "Configuring")).unwrap();
        assert!(store.add_slice(slice_record("s-1", "Configuring")).is_err());
    }

    #[test]
    fn state_filter_matches_only_requested_state() {
        let store = MemStore::new();
        store.add_slice(slice_record("s-1", "Configuring")).unwrap();
        store.add_slice(slice_record("s-2", "Dead")).unwrap();

        let dead = store.get_slices_by_state("Dead").unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].slice_guid, SliceId::new("s-2"));
    }

    #[test]
    fn injected_failure_hits_exactly_next_write() {
        let store = MemStore::new();
        store.fail_next_writes(1);
        assert!(store.add_slice(slice_record("s-1", "Configuring")).is_err());
        assert!(store.add_slice(slice_record("s-1", "Configuring")).is_ok());
    }
}
