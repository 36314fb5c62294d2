use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::kernel::reservation::{PendingOp, ReservationCategory, ReservationState};
use crate::kernel::{authority, broker, client};

/// Everything that can drive a reservation state machine forward: policy
/// decisions, peer updates, substrate completions, and failure projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationEvent {
    /// Local demand: start ticketing against the upstream broker.
    Demand,
    /// UpdateTicket arrived from the broker.
    TicketUpdate { success: bool },
    /// Policy decided to redeem the held ticket.
    RedeemDecision,
    /// Policy decided to extend the ticket.
    ExtendTicketDecision,
    /// Policy decided to redeem the extended ticket into the lease.
    ExtendLeaseDecision,
    /// UpdateLease arrived from the authority.
    LeaseUpdate { success: bool, closed: bool },

    /// Broker side: policy allocated resources for the request.
    TicketAllocated,
    /// Broker side: policy rejected the request.
    TicketRejected,
    /// Broker side: client asked to extend an issued ticket.
    ExtendRequest,
    /// Broker side: client returned the ticket.
    Relinquish,

    /// Authority side: redeem request arrived; units are being primed.
    IncomingRedeem,
    /// Authority side: substrate finished creating or modifying all units.
    UnitsReady,
    /// Authority side: substrate failed a unit.
    UnitsFailed,
    /// Authority side: lease modification requested (sliver changed).
    ModifyRequest,
    /// Authority side: lease extension requested (term only).
    ExtendLeaseRequest,

    /// Close requested by owner or kernel.
    CloseRequest,
    /// The close round-trip (peer update or substrate delete) finished.
    CloseComplete,

    /// A bound outbound RPC failed to deliver or timed out.
    FailedRpc,
}

/// Applies one event to a `(state, pending)` pair under the legal-transition
/// rules for the given role. Pure and deterministic; the kernel performs the
/// side effects (RPCs, substrate calls, persistence) around it.
pub fn transition(
    category: ReservationCategory,
    state: ReservationState,
    pending: PendingOp,
    event: ReservationEvent,
) -> Result<(ReservationState, PendingOp)> {
    if state.is_terminal() {
        return Err(Error::InvalidState(format!("terminal state {} admits no event {:?}", state, event)));
    }

    let next = match category {
        ReservationCategory::Client => client::transition(state, pending, event),
        ReservationCategory::Broker => broker::transition(state, pending, event),
        ReservationCategory::Authority => authority::transition(state, pending, event),
    };

    match next {
        Some(pair) => Ok(pair),
        None => Err(Error::InvalidState(format!(
            "no legal {} transition from ({}, {}) on {:?}",
            category, state, pending, event
        ))),
    }
}
