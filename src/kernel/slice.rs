use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::kernel::reservation::{PendingOp, ReservationState};
use crate::util::auth::AuthToken;
use crate::util::id::{DelegationId, GraphId, Rid, SliceId};

pub const SLICE_BLOB_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SliceType {
    /// Authority-side slice holding the substrate inventory and its
    /// delegations.
    Inventory,
    /// User-facing slice created through an orchestrator.
    Client,
    /// Slice a broker maintains for reservations it holds as a client of
    /// another broker.
    BrokerClient,
}

/// Slice-level state, a deterministic function of the child reservation
/// states (`reevaluate`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SliceState {
    Configuring,
    StableOK,
    StableError,
    Modifying,
    ModifyOK,
    ModifyError,
    AllocatedOK,
    AllocatedError,
    Closing,
    Dead,
}

impl std::fmt::Display for SliceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Which kind of operation most recently touched the slice; selects the
/// modify flavor of the derived states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SliceTrigger {
    Configure,
    Modify,
}

/// User-facing container grouping reservations and delegations under one
/// owner and lease window. Children are referenced by id; the kernel
/// resolves them on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slice {
    pub version: u32,
    pub slice_id: SliceId,
    pub name: String,
    pub slice_type: SliceType,
    pub owner: AuthToken,
    pub graph_id: Option<GraphId>,
    pub state: SliceState,
    pub trigger: SliceTrigger,
    pub lease_start: Option<DateTime<Utc>>,
    pub lease_end: Option<DateTime<Utc>>,
    /// Child reservations in creation order; the policy sees them in this
    /// order within a cycle.
    pub reservations: Vec<Rid>,
    pub delegations: Vec<DelegationId>,
    pub project_id: Option<String>,
}

impl Slice {
    pub fn new(slice_id: SliceId, name: impl Into<String>, slice_type: SliceType, owner: AuthToken) -> Self {
        Self {
            version: SLICE_BLOB_VERSION,
            slice_id,
            name: name.into(),
            slice_type,
            owner,
            graph_id: None,
            state: SliceState::Configuring,
            trigger: SliceTrigger::Configure,
            lease_start: None,
            lease_end: None,
            reservations: Vec::new(),
            delegations: Vec::new(),
            project_id: None,
        }
    }

    pub fn is_inventory(&self) -> bool {
        self.slice_type == SliceType::Inventory
    }

    pub fn is_client(&self) -> bool {
        matches!(self.slice_type, SliceType::Client | SliceType::BrokerClient)
    }

    pub fn is_dead(&self) -> bool {
        self.state == SliceState::Dead
    }

    pub fn register(&mut self, rid: Rid) {
        if !self.reservations.contains(&rid) {
            self.reservations.push(rid);
        }
    }

    pub fn unregister(&mut self, rid: &Rid) {
        self.reservations.retain(|r| r != rid);
    }

    pub fn register_delegation(&mut self, did: DelegationId) {
        if !self.delegations.contains(&did) {
            self.delegations.push(did);
        }
    }

    pub fn unregister_delegation(&mut self, did: &DelegationId) {
        self.delegations.retain(|d| d != did);
    }

    pub fn is_empty(&self) -> bool {
        self.reservations.is_empty() && self.delegations.is_empty()
    }

    /// Recomputes the slice state from the child reservation states. Rules
    /// are evaluated top-down; the first match wins, and a slice with no
    /// matching rule keeps its prior state.
    pub fn reevaluate(&mut self, children: &[(ReservationState, PendingOp)]) -> SliceState {
        self.state = derive_state(self.state, self.trigger, children);
        self.state
    }
}

fn derive_state(prior: SliceState, trigger: SliceTrigger, children: &[(ReservationState, PendingOp)]) -> SliceState {
    use ReservationState as S;

    if children.is_empty() {
        return prior;
    }

    let all = |f: &dyn Fn(&(S, PendingOp)) -> bool| children.iter().all(f);
    let any = |f: &dyn Fn(&(S, PendingOp)) -> bool| children.iter().any(f);

    let failed = any(&|(s, _)| *s == S::Failed);
    let modify = trigger == SliceTrigger::Modify;

    // 1. Everything terminal: the slice is dead.
    if all(&|(s, _)| s.is_terminal()) {
        return SliceState::Dead;
    }
    // 2. Anything on its way down drags the slice into Closing.
    if any(&|(s, p)| *p == PendingOp::Closing || *s == S::CloseWait) {
        return SliceState::Closing;
    }
    // 3. Fully leased (closed members no longer count against the slice).
    if !failed && all(&|(s, _)| matches!(s, S::Active | S::ActiveTicketed | S::Closed)) {
        return if modify { SliceState::ModifyOK } else { SliceState::StableOK };
    }
    // 4. Fully ticketed, nothing failed: allocated but not yet redeemed.
    if !failed && all(&|(s, _)| matches!(s, S::Ticketed | S::Closed)) {
        return SliceState::AllocatedOK;
    }
    if failed && all(&|(s, _)| matches!(s, S::Ticketed | S::Failed | S::Closed)) {
        return SliceState::AllocatedError;
    }
    // 5. Settled mix of tickets and leases with at least one failure.
    if failed && all(&|(s, _)| matches!(s, S::Ticketed | S::Active | S::ActiveTicketed | S::Failed | S::Closed)) {
        return if modify { SliceState::ModifyError } else { SliceState::StableError };
    }
    // 6. Work still in flight.
    if any(&|(s, p)| *s == S::Nascent || !p.is_none()) {
        return if modify { SliceState::Modifying } else { SliceState::Configuring };
    }

    prior
}

#[cfg(test)]
mod tests {
    use super::*;
    use PendingOp as P;
    use ReservationState as S;

    fn slice() -> Slice {
        Slice::new(
            SliceId::new("s-1"),
            "test",
            SliceType::Client,
            AuthToken::new("owner", crate::util::id::ActorGuid::new("o-guid")),
        )
    }

    #[test]
    fn all_terminal_children_kill_the_slice() {
        let mut s = slice();
        assert_eq!(s.reevaluate(&[(S::Closed, P::None), (S::Failed, P::None)]), SliceState::Dead);
    }

    #[test]
    fn any_closing_child_wins_over_everything_but_dead() {
        let mut s = slice();
        assert_eq!(s.reevaluate(&[(S::Active, P::None), (S::Active, P::Closing)]), SliceState::Closing);
    }

    #[test]
    fn all_active_is_stable_ok() {
        let mut s = slice();
        assert_eq!(s.reevaluate(&[(S::Active, P::None), (S::ActiveTicketed, P::None)]), SliceState::StableOK);
    }

    #[test]
    fn settled_mix_with_failure_is_stable_error() {
        let mut s = slice();
        assert_eq!(s.reevaluate(&[(S::Ticketed, P::None), (S::Active, P::None), (S::Failed, P::None)]), SliceState::StableError);
    }

    #[test]
    fn nascent_children_keep_configuring() {
        let mut s = slice();
        assert_eq!(s.reevaluate(&[(S::Nascent, P::None), (S::Ticketed, P::None)]), SliceState::Configuring);
    }

    #[test]
    fn modify_trigger_selects_modify_flavors() {
        let mut s = slice();
        s.trigger = SliceTrigger::Modify;
        assert_eq!(s.reevaluate(&[(S::Active, P::ExtendingTicket)]), SliceState::Modifying);
        assert_eq!(s.reevaluate(&[(S::Active, P::None)]), SliceState::ModifyOK);
    }

    #[test]
    fn all_ticketed_is_allocated_ok() {
        let mut s = slice();
        assert_eq!(s.reevaluate(&[(S::Ticketed, P::None), (S::Ticketed, P::None)]), SliceState::AllocatedOK);
    }

    #[test]
    fn empty_slice_retains_prior_state() {
        let mut s = slice();
        s.state = SliceState::StableOK;
        assert_eq!(s.reevaluate(&[]), SliceState::StableOK);
    }
}
