use crate::error::Result;
use crate::kernel::delegation::Delegation;
use crate::kernel::reservation::{JoinState, PendingOp, Reservation, ReservationState};
use crate::substrate::handler::HandlerAction;
use crate::substrate::unit::Unit;
use crate::util::id::Rid;
use crate::util::properties::Properties;

pub mod authority_policy;
pub mod broker_policy;
pub mod client_policy;
pub mod ticket_review;

/// Outcome of consulting the policy about a reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    /// Go ahead: allocate the ticket / redeem / extend now.
    Allocate,
    /// Not yet; the kernel will ask again next cycle.
    Defer,
    /// Refused; the reservation fails with this notice.
    Reject(String),
}

/// Kernel mutation a policy wants performed. Policies never touch the
/// kernel tables; they emit commands which the kernel executes inside the
/// same tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyCommand {
    CloseReservation { rid: Rid, notice: String },
}

/// Read-only view of a sibling reservation in the same slice, enough for
/// gating decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiblingInfo {
    pub rid: Rid,
    pub state: ReservationState,
    pub pending: PendingOp,
    pub join: JoinState,
    /// Whether the sibling ever held a ticket; a failure without one
    /// happened during ticketing.
    pub has_ticket: bool,
}

/// Per-actor pluggable decision module (§ policy interface).
///
/// `prepare`/`finish` bracket a tick; `bind`/`extend`/`close` decide
/// outcomes and may mutate `reservation.approved`; `revisit_*` rebuild
/// derived policy state during recovery. Everything else has a do-nothing
/// default so simple policies stay small.
pub trait Policy: Send {
    fn name(&self) -> &str;

    fn prepare(&mut self, _cycle: i64) {}

    fn finish(&mut self, _cycle: i64) {}

    /// Decide the primary binding step: ticket allocation on a broker,
    /// redemption go-ahead on a client. `siblings` covers the rest of the
    /// reservation's slice, excluding the reservation itself.
    fn bind(&mut self, reservation: &mut Reservation, siblings: &[SiblingInfo]) -> Result<PolicyDecision>;

    /// Decide a staged extension.
    fn extend(&mut self, reservation: &mut Reservation) -> Result<PolicyDecision>;

    /// Notification that the kernel is about to close the reservation.
    fn close(&mut self, _reservation: &Reservation) {}

    /// A claimed delegation became allocatable (broker side).
    fn donate(&mut self, _delegation: &Delegation) {}

    /// A previously allocated reservation released its capacity back.
    fn release(&mut self, _reservation: &Reservation) {}

    fn revisit_reservation(&mut self, _reservation: &Reservation) {}

    fn revisit_delegation(&mut self, _delegation: &Delegation) {}

    /// Handler completion plumbed back from the substrate.
    fn configuration_complete(&mut self, _action: HandlerAction, _unit: &Unit, _properties: &Properties) {}

    /// Introspection queries (e.g. broker model export).
    fn query(&self, _properties: &Properties) -> Properties {
        Properties::new()
    }

    fn recovery_ended(&mut self) {}

    /// Mutations the policy wants applied; drained by the kernel at the end
    /// of every tick.
    fn drain_commands(&mut self) -> Vec<PolicyCommand> {
        Vec::new()
    }
}
