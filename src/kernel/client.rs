use crate::kernel::reservation::PendingOp as P;
use crate::kernel::reservation::ReservationState as S;
use crate::kernel::transition::ReservationEvent as E;

/// Legal transitions for a client reservation: the side that obtains tickets
/// from a broker and redeems them at an authority.
///
/// Returns `None` for illegal `(state, pending, event)` combinations; the
/// caller turns that into an `InvalidState` error.
pub fn transition(state: S, pending: P, event: E) -> Option<(S, P)> {
    match (state, pending, event) {
        // Ticketing round-trip.
        (S::Nascent, P::None, E::Demand) => Some((S::Nascent, P::Ticketing)),
        (S::Nascent, P::Ticketing, E::TicketUpdate { success: true }) => Some((S::Ticketed, P::None)),
        (S::Nascent, P::Ticketing, E::TicketUpdate { success: false }) => Some((S::Failed, P::None)),

        // Redeem round-trip.
        (S::Ticketed, P::None, E::RedeemDecision) => Some((S::Ticketed, P::Redeeming)),
        (S::Ticketed, P::Redeeming, E::LeaseUpdate { success: true, closed: false }) => Some((S::Active, P::None)),
        (S::Ticketed, P::Redeeming, E::LeaseUpdate { success: false, .. }) => Some((S::Failed, P::None)),

        // Ticket extension; an active lease keeps running on the old term
        // until the extended ticket is redeemed.
        (S::Ticketed, P::None, E::ExtendTicketDecision) => Some((S::Ticketed, P::ExtendingTicket)),
        (S::Ticketed, P::ExtendingTicket, E::TicketUpdate { success: true }) => Some((S::Ticketed, P::None)),
        (S::Ticketed, P::ExtendingTicket, E::TicketUpdate { success: false }) => Some((S::Failed, P::None)),
        (S::Active, P::None, E::ExtendTicketDecision) => Some((S::Active, P::ExtendingTicket)),
        (S::Active, P::ExtendingTicket, E::TicketUpdate { success: true }) => Some((S::ActiveTicketed, P::None)),
        (S::Active, P::ExtendingTicket, E::TicketUpdate { success: false }) => Some((S::Failed, P::None)),

        // Lease extension after the extended ticket is in hand.
        (S::ActiveTicketed, P::None, E::ExtendLeaseDecision) => Some((S::ActiveTicketed, P::ExtendingLease)),
        (S::ActiveTicketed, P::ExtendingLease, E::LeaseUpdate { success: true, closed: false }) => Some((S::Active, P::None)),
        (S::ActiveTicketed, P::ExtendingLease, E::LeaseUpdate { success: false, .. }) => Some((S::Failed, P::None)),

        // Close. A Nascent reservation with nothing in flight closes locally
        // without any outbound RPC.
        (S::Nascent, P::None, E::CloseRequest) => Some((S::Closed, P::None)),
        // Close while an operation is in flight parks until it resolves.
        (S::Nascent, P::Ticketing, E::CloseRequest) => Some((S::CloseWait, P::Closing)),
        (S::Ticketed, P::Redeeming | P::ExtendingTicket, E::CloseRequest) => Some((S::CloseWait, P::Closing)),
        (S::Active, P::ExtendingTicket, E::CloseRequest) => Some((S::CloseWait, P::Closing)),
        (S::ActiveTicketed, P::ExtendingLease, E::CloseRequest) => Some((S::CloseWait, P::Closing)),
        // Ticket-only holders relinquish to the broker; lease holders close
        // at the authority. Either way the round-trip ends with
        // CloseComplete.
        (S::Ticketed, P::None, E::CloseRequest) => Some((S::Ticketed, P::Closing)),
        (S::Active | S::ActiveTicketed, P::None, E::CloseRequest) => Some((state, P::Closing)),
        (_, P::Closing, E::CloseComplete) => Some((S::Closed, P::None)),
        (_, P::Closing, E::LeaseUpdate { closed: true, .. }) => Some((S::Closed, P::None)),
        // A response resolving the parked operation completes the close.
        (S::CloseWait, P::Closing, E::TicketUpdate { .. }) => Some((S::Closed, P::None)),
        (S::CloseWait, P::Closing, E::LeaseUpdate { .. }) => Some((S::Closed, P::None)),

        // Failure projection. During a close the failure is recorded as
        // CloseFail instead of plain Failed.
        (_, P::Closing, E::FailedRpc) => Some((S::CloseFail, P::None)),
        (_, _, E::FailedRpc) => Some((S::Failed, P::None)),

        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_to_active() {
        let mut cursor = (S::Nascent, P::None);
        for event in [
            E::Demand,
            E::TicketUpdate { success: true },
            E::RedeemDecision,
            E::LeaseUpdate { success: true, closed: false },
        ] {
            cursor = transition(cursor.0, cursor.1, event).expect("legal transition");
        }
        assert_eq!(cursor, (S::Active, P::None));
    }

    #[test]
    fn extend_cycle_returns_to_active() {
        let mut cursor = (S::Active, P::None);
        for event in [
            E::ExtendTicketDecision,
            E::TicketUpdate { success: true },
            E::ExtendLeaseDecision,
            E::LeaseUpdate { success: true, closed: false },
        ] {
            cursor = transition(cursor.0, cursor.1, event).expect("legal transition");
        }
        assert_eq!(cursor, (S::Active, P::None));
    }

    #[test]
    fn nascent_close_needs_no_rpc() {
        assert_eq!(transition(S::Nascent, P::None, E::CloseRequest), Some((S::Closed, P::None)));
    }

    #[test]
    fn close_during_ticketing_parks_in_close_wait() {
        let parked = transition(S::Nascent, P::Ticketing, E::CloseRequest).unwrap();
        assert_eq!(parked, (S::CloseWait, P::Closing));
        let done = transition(parked.0, parked.1, E::TicketUpdate { success: true }).unwrap();
        assert_eq!(done, (S::Closed, P::None));
    }

    #[test]
    fn failed_rpc_during_close_is_close_fail() {
        assert_eq!(transition(S::Active, P::Closing, E::FailedRpc), Some((S::CloseFail, P::None)));
        assert_eq!(transition(S::Active, P::None, E::FailedRpc), Some((S::Failed, P::None)));
    }

    #[test]
    fn demand_with_pending_operation_is_illegal() {
        assert_eq!(transition(S::Nascent, P::Ticketing, E::Demand), None);
    }
}
