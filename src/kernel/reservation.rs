use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::auth::AuthToken;
use crate::util::id::{ActorGuid, GraphNodeId, Rid, SliceId};
use crate::util::resource_set::ResourceSet;
use crate::util::term::Term;
use crate::util::update_data::UpdateData;

/// Version tag written into every persisted reservation blob.
pub const RESERVATION_BLOB_VERSION: u32 = 1;

/// Lifecycle state of a reservation.
///
/// The happy path is `Nascent -> Ticketed -> Active -> ActiveTicketed ->
/// Closed`; `Failed`, `CloseWait` and `CloseFail` are the off-ramps. The
/// terminal states absorb: once a reservation is Closed, Failed or CloseFail
/// no further state mutation is legal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationState {
    /// Created locally or from an incoming request; nothing granted yet.
    Nascent,
    /// Holds a ticket from a broker.
    Ticketed,
    /// Holds a lease realized on substrate.
    Active,
    /// Active lease plus an extended ticket that has not been redeemed yet.
    ActiveTicketed,
    /// Gone through an orderly close.
    Closed,
    /// Close requested while another operation was still in flight.
    CloseWait,
    /// Terminally failed; the failure notice lives in `update_data`.
    Failed,
    /// Close was attempted and itself failed.
    CloseFail,
}

impl ReservationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReservationState::Closed | ReservationState::Failed | ReservationState::CloseFail)
    }
}

impl std::fmt::Display for ReservationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The in-flight kernel operation on a reservation. A reservation with a
/// pending operation may not start another; pendings serialize per
/// reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PendingOp {
    None,
    Ticketing,
    ExtendingTicket,
    Redeeming,
    ExtendingLease,
    Closing,
    Priming,
}

impl PendingOp {
    pub fn is_none(&self) -> bool {
        matches!(self, PendingOp::None)
    }
}

impl std::fmt::Display for PendingOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Predecessor sequencing state. A reservation with unresolved predecessors
/// is blocked from redeeming until they reach Ticketed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JoinState {
    NoJoin,
    BlockedJoin,
    Joining,
    Joined,
}

/// Which flavor of state machine governs this reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationCategory {
    /// Requests resources from an upstream broker (orchestrator, or a broker
    /// acting as a client of another broker).
    Client,
    /// Grants tickets out of delegated pools.
    Broker,
    /// Realizes leases on physical substrate.
    Authority,
}

impl std::fmt::Display for ReservationCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Outcome of checking an inbound message sequence number against the last
/// one seen from that peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceCheck {
    /// Strictly newer; process it.
    InOrder,
    /// Same number again; idempotent only if a response was already sent.
    Duplicate,
    /// Older than what we already processed; drop it.
    Stale,
}

/// Monotone high-water mark for one inbound peer stream. A client
/// reservation keeps two: the broker's ticket stream and the authority's
/// lease stream advance independently.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceGuard {
    pub last: u64,
    pub answered: bool,
}

impl SequenceGuard {
    pub fn check(&mut self, sequence: u64) -> SequenceCheck {
        if sequence < self.last {
            return SequenceCheck::Stale;
        }
        if sequence == self.last && self.last > 0 {
            return SequenceCheck::Duplicate;
        }
        self.last = sequence;
        self.answered = false;
        SequenceCheck::InOrder
    }

    pub fn mark_answered(&mut self) {
        self.answered = true;
    }
}

/// A request/grant for `units` of a resource type over a term.
///
/// Owned by exactly one actor; peers hold shadow copies updated over RPC.
/// All cross-references are ids resolved through the kernel tables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    pub version: u32,
    pub rid: Rid,
    pub slice_id: SliceId,
    pub category: ReservationCategory,
    pub state: ReservationState,
    pub pending: PendingOp,
    pub join: JoinState,

    /// What the client asked for.
    pub requested: ResourceSet,
    /// What the broker approved. Frozen after Ticketed except via extend.
    pub approved: Option<ResourceSet>,
    /// What the authority bound to substrate.
    pub allocated: Option<ResourceSet>,

    pub term: Term,
    /// Staged term for an extend in flight.
    pub requested_term: Option<Term>,

    /// Inbound ticket-side stream (broker peer, or the client peer on a
    /// broker mirror).
    pub ticket_sequence: SequenceGuard,
    /// Inbound lease-side stream (authority peer, or the client peer on an
    /// authority mirror).
    pub lease_sequence: SequenceGuard,
    pub sequence_out: u64,

    /// Reservations that must reach Ticketed before this one may redeem.
    pub predecessors: Vec<Rid>,
    pub update_data: UpdateData,
    pub graph_node_id: Option<GraphNodeId>,
    pub owner: AuthToken,

    /// Upstream broker this reservation tickets against (client category).
    pub broker: Option<ActorGuid>,
    /// Authority the ticket redeems at.
    pub authority: Option<ActorGuid>,
    /// On a mirror (broker/authority category), the peer actor that sent the
    /// originating request; responses go back to its topic.
    pub caller: Option<ActorGuid>,
    /// Reply topic captured from the originating request, so updates can be
    /// sent long after the request envelope is gone.
    pub caller_topic: Option<String>,
}

impl Reservation {
    pub fn new(rid: Rid, slice_id: SliceId, category: ReservationCategory, requested: ResourceSet, term: Term, owner: AuthToken) -> Self {
        Self {
            version: RESERVATION_BLOB_VERSION,
            rid,
            slice_id,
            category,
            state: ReservationState::Nascent,
            pending: PendingOp::None,
            join: JoinState::NoJoin,
            requested,
            approved: None,
            allocated: None,
            term,
            requested_term: None,
            ticket_sequence: SequenceGuard::default(),
            lease_sequence: SequenceGuard::default(),
            sequence_out: 0,
            predecessors: Vec::new(),
            update_data: UpdateData::new(),
            graph_node_id: None,
            owner,
            broker: None,
            authority: None,
            caller: None,
            caller_topic: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_nascent(&self) -> bool {
        self.state == ReservationState::Nascent
    }

    pub fn is_ticketed(&self) -> bool {
        matches!(self.state, ReservationState::Ticketed | ReservationState::ActiveTicketed)
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, ReservationState::Active | ReservationState::ActiveTicketed)
    }

    pub fn is_failed(&self) -> bool {
        self.state == ReservationState::Failed
    }

    pub fn is_closing(&self) -> bool {
        self.pending == PendingOp::Closing || self.state == ReservationState::CloseWait
    }

    pub fn is_redeeming(&self) -> bool {
        self.pending == PendingOp::Redeeming
    }

    /// Guards the one-pending-operation-at-a-time invariant.
    pub fn check_no_pending(&self) -> Result<()> {
        if !self.pending.is_none() {
            return Err(Error::InvalidState(format!("reservation {} already has pending operation {}", self.rid, self.pending)));
        }
        Ok(())
    }

    /// Next outbound sequence number; strictly ordered per reservation.
    pub fn next_sequence_out(&mut self) -> u64 {
        self.sequence_out += 1;
        self.sequence_out
    }

    /// Stages an extend: validates the new term against the current one and
    /// parks it until the state machine picks it up.
    pub fn stage_extend(&mut self, resources: ResourceSet, term: Term) -> Result<()> {
        if !self.term.extends(&term) {
            return Err(Error::InvalidArgument(format!(
                "term {} does not extend current term {} of reservation {}",
                term, self.term, self.rid
            )));
        }
        self.check_no_pending()?;

        self.requested = resources;
        self.requested_term = Some(term);
        Ok(())
    }

    /// Forces the reservation into Failed with a notice. Bypasses the role
    /// tables; terminal states still absorb.
    pub fn fail(&mut self, message: impl Into<String>) {
        if self.is_terminal() {
            return;
        }
        let message = message.into();
        log::warn!("Reservation {} failed: {}", self.rid, message);
        self.update_data.post_error(message);
        self.state = ReservationState::Failed;
        self.pending = PendingOp::None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::resource_set::ResourceType;
    use chrono::{TimeZone, Utc};

    fn reservation() -> Reservation {
        let term = Term::new(Utc.timestamp_opt(5, 0).unwrap(), Utc.timestamp_opt(10, 0).unwrap()).unwrap();
        Reservation::new(
            Rid::new("r-1"),
            SliceId::new("s-1"),
            ReservationCategory::Client,
            ResourceSet::new(1, ResourceType::new("vm")),
            term,
            AuthToken::new("tester", crate::util::id::ActorGuid::new("t-guid")),
        )
    }

    #[test]
    fn inbound_sequence_ordering() {
        let mut r = reservation();
        assert_eq!(r.ticket_sequence.check(1), SequenceCheck::InOrder);
        assert_eq!(r.ticket_sequence.check(1), SequenceCheck::Duplicate);
        assert_eq!(r.ticket_sequence.check(0), SequenceCheck::Stale);
        assert_eq!(r.ticket_sequence.check(3), SequenceCheck::InOrder);
        assert_eq!(r.ticket_sequence.last, 3);
    }

    #[test]
    fn ticket_and_lease_streams_are_independent() {
        let mut r = reservation();
        assert_eq!(r.ticket_sequence.check(5), SequenceCheck::InOrder);
        // A lease-side message with a smaller number is a different stream.
        assert_eq!(r.lease_sequence.check(1), SequenceCheck::InOrder);
    }

    #[test]
    fn stage_extend_rejects_non_extension() {
        let mut r = reservation();
        let shorter = Term::new(r.term.start, r.term.end - chrono::Duration::seconds(1)).unwrap();
        let resources = r.requested.clone();
        assert!(matches!(r.stage_extend(resources, shorter), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn fail_is_absorbing() {
        let mut r = reservation();
        r.fail("first");
        r.fail("second");
        assert_eq!(r.state, ReservationState::Failed);
        assert_eq!(r.update_data.message, "first");
    }
}
