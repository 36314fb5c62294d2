use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::id::{ActorGuid, DelegationId, GraphId, SliceId};
use crate::util::update_data::UpdateData;

pub const DELEGATION_BLOB_VERSION: u32 = 1;

/// Lifecycle of an exported resource pool. `Failed` absorbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DelegationState {
    /// Carved out of the authority's resource graph, not yet claimed.
    Nascent,
    /// Claimed by a broker; visible to its policy as an allocatable pool.
    Delegated,
    /// Taken back by the issuing authority.
    Reclaimed,
    Closed,
    Failed,
}

impl DelegationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DelegationState::Closed | DelegationState::Failed)
    }
}

impl std::fmt::Display for DelegationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A chunk of resources advertised by an authority to a broker. The graph
/// fragment is opaque; `units` is the allocatable capacity the broker policy
/// draws from while the delegation is claimed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delegation {
    pub version: u32,
    pub did: DelegationId,
    pub slice_id: SliceId,
    pub state: DelegationState,
    pub graph_id: Option<GraphId>,
    pub units: u64,
    pub resource_type: Option<crate::util::resource_set::ResourceType>,
    pub issuer: ActorGuid,
    pub holder: Option<ActorGuid>,
    pub sequence_in: u64,
    pub sequence_out: u64,
    pub update_data: UpdateData,
}

impl Delegation {
    pub fn new(did: DelegationId, slice_id: SliceId, issuer: ActorGuid) -> Self {
        Self {
            version: DELEGATION_BLOB_VERSION,
            did,
            slice_id,
            state: DelegationState::Nascent,
            graph_id: None,
            units: 0,
            resource_type: None,
            issuer,
            holder: None,
            sequence_in: 0,
            sequence_out: 0,
            update_data: UpdateData::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_delegated(&self) -> bool {
        self.state == DelegationState::Delegated
    }

    fn transition(&mut self, to: DelegationState) -> Result<()> {
        use DelegationState as D;

        let legal = match (self.state, to) {
            (D::Nascent, D::Delegated) => true,
            (D::Delegated, D::Reclaimed) => true,
            (D::Reclaimed, D::Delegated) => true,
            (D::Nascent | D::Delegated | D::Reclaimed, D::Closed) => true,
            (from, D::Failed) => !from.is_terminal(),
            _ => false,
        };

        if !legal {
            return Err(Error::InvalidState(format!("delegation {} cannot move {} -> {}", self.did, self.state, to)));
        }
        self.state = to;
        Ok(())
    }

    /// Claim by a broker: the pool becomes allocatable on the holder side.
    pub fn claim(&mut self, holder: ActorGuid) -> Result<()> {
        self.transition(DelegationState::Delegated)?;
        self.holder = Some(holder);
        Ok(())
    }

    pub fn reclaim(&mut self) -> Result<()> {
        self.transition(DelegationState::Reclaimed)?;
        self.holder = None;
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        self.transition(DelegationState::Closed)
    }

    /// Failure projection from a FailedRPC bound to this delegation.
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.is_terminal() {
            return;
        }
        let message = message.into();
        log::warn!("Delegation {} failed: {}", self.did, message);
        self.update_data.post_error(message);
        self.state = DelegationState::Failed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delegation() -> Delegation {
        Delegation::new(DelegationId::new("d-1"), SliceId::new("s-inv"), ActorGuid::new("site-a"))
    }

    #[test]
    fn claim_reclaim_close() {
        let mut d = delegation();
        d.claim(ActorGuid::new("broker-1")).unwrap();
        assert!(d.is_delegated());
        d.reclaim().unwrap();
        assert_eq!(d.holder, None);
        d.close().unwrap();
        assert!(d.is_terminal());
    }

    #[test]
    fn claim_from_closed_is_illegal() {
        let mut d = delegation();
        d.close().unwrap();
        assert!(d.claim(ActorGuid::new("broker-1")).is_err());
    }

    #[test]
    fn failed_absorbs() {
        let mut d = delegation();
        d.fail("bus unreachable");
        assert_eq!(d.state, DelegationState::Failed);
        assert!(d.claim(ActorGuid::new("broker-1")).is_err());
        d.fail("second notice");
        assert_eq!(d.update_data.events.len(), 1);
    }
}
