use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::util::id::{ActorGuid, DelegationId, GraphId, GraphNodeId, Rid, SliceId, UnitId};

pub mod mem;

pub use mem::MemStore;

/// Row forms of the persisted entities. Typed columns exist for filtering;
/// the `blob` column carries the full serialized entity and is what recovery
/// rehydrates from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SliceRecord {
    pub slice_guid: SliceId,
    pub name: String,
    pub slice_type: String,
    pub state: String,
    pub graph_id: Option<GraphId>,
    pub owner_sub: Option<String>,
    pub email: Option<String>,
    pub lease_start: Option<DateTime<Utc>>,
    pub lease_end: Option<DateTime<Utc>>,
    pub project_id: Option<String>,
    pub blob: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRecord {
    pub rid: Rid,
    pub slice_guid: SliceId,
    pub category: String,
    pub state: String,
    pub pending: String,
    pub joining: String,
    pub graph_node_id: Option<GraphNodeId>,
    pub owner_sub: Option<String>,
    pub email: Option<String>,
    pub blob: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationRecord {
    pub did: DelegationId,
    pub slice_guid: SliceId,
    pub state: String,
    pub blob: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRecord {
    pub unit_id: UnitId,
    pub reservation_id: Rid,
    pub parent_id: Option<UnitId>,
    pub state: String,
    pub blob: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorRecord {
    pub name: String,
    pub guid: ActorGuid,
    pub actor_type: String,
    pub blob: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyRecord {
    pub actor_id: ActorGuid,
    pub name: String,
    pub blob: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientRecord {
    pub actor_id: ActorGuid,
    pub name: String,
    pub guid: ActorGuid,
    pub blob: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigMappingRecord {
    pub key: String,
    pub actor_id: ActorGuid,
    pub blob: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MiscRecord {
    pub name: String,
    pub blob: String,
}

/// Name of the miscellaneous row whose presence marks a clean shutdown.
pub const SUPERBLOCK: &str = "superblock";

/// Persistence seam of the kernel (§ storage interface).
///
/// Writes are synchronous and local; the kernel treats a rejected write as a
/// signal to roll back the in-memory mutation. Implementations must be safe
/// for concurrent writes from one actor thread plus read-only queries from
/// management and export paths.
pub trait Store: Send + Sync {
    fn add_actor(&self, record: ActorRecord) -> Result<()>;
    fn get_actors(&self) -> Result<Vec<ActorRecord>>;

    fn add_slice(&self, record: SliceRecord) -> Result<()>;
    fn update_slice(&self, record: SliceRecord) -> Result<()>;
    fn remove_slice(&self, slice_id: &SliceId) -> Result<()>;
    fn get_slice(&self, slice_id: &SliceId) -> Result<Option<SliceRecord>>;
    fn get_slices(&self) -> Result<Vec<SliceRecord>>;
    fn get_slices_by_state(&self, state: &str) -> Result<Vec<SliceRecord>>;

    fn add_reservation(&self, record: ReservationRecord) -> Result<()>;
    fn update_reservation(&self, record: ReservationRecord) -> Result<()>;
    fn remove_reservation(&self, rid: &Rid) -> Result<()>;
    fn get_reservation(&self, rid: &Rid) -> Result<Option<ReservationRecord>>;
    fn get_reservations(&self) -> Result<Vec<ReservationRecord>>;
    fn get_reservations_by_slice(&self, slice_id: &SliceId) -> Result<Vec<ReservationRecord>>;
    fn get_reservations_by_state(&self, state: &str) -> Result<Vec<ReservationRecord>>;
    fn get_reservations_by_graph_node(&self, node_id: &GraphNodeId) -> Result<Vec<ReservationRecord>>;

    fn add_delegation(&self, record: DelegationRecord) -> Result<()>;
    fn update_delegation(&self, record: DelegationRecord) -> Result<()>;
    fn remove_delegation(&self, did: &DelegationId) -> Result<()>;
    fn get_delegation(&self, did: &DelegationId) -> Result<Option<DelegationRecord>>;
    fn get_delegations_by_slice(&self, slice_id: &SliceId) -> Result<Vec<DelegationRecord>>;

    fn add_unit(&self, record: UnitRecord) -> Result<()>;
    fn update_unit(&self, record: UnitRecord) -> Result<()>;
    fn remove_unit(&self, unit_id: &UnitId) -> Result<()>;
    fn get_unit(&self, unit_id: &UnitId) -> Result<Option<UnitRecord>>;
    fn get_units_by_reservation(&self, rid: &Rid) -> Result<Vec<UnitRecord>>;

    fn add_proxy(&self, record: ProxyRecord) -> Result<()>;
    fn get_proxies(&self, actor_id: &ActorGuid) -> Result<Vec<ProxyRecord>>;

    fn add_client(&self, record: ClientRecord) -> Result<()>;
    fn get_clients(&self, actor_id: &ActorGuid) -> Result<Vec<ClientRecord>>;

    fn add_config_mapping(&self, record: ConfigMappingRecord) -> Result<()>;
    fn get_config_mappings(&self, actor_id: &ActorGuid) -> Result<Vec<ConfigMappingRecord>>;

    fn set_misc(&self, record: MiscRecord) -> Result<()>;
    fn get_misc(&self, name: &str) -> Result<Option<MiscRecord>>;
    fn remove_misc(&self, name: &str) -> Result<()>;
}
