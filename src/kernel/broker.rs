use crate::kernel::reservation::PendingOp as P;
use crate::kernel::reservation::ReservationState as S;
use crate::kernel::transition::ReservationEvent as E;

/// Legal transitions for a broker reservation: the arbiter side of a ticket
/// request, allocating against claimed delegation pools.
///
/// A Nascent broker reservation with no pending operation is a request the
/// policy has deferred; it is re-examined on every tick until allocated,
/// rejected, or closed.
pub fn transition(state: S, pending: P, event: E) -> Option<(S, P)> {
    match (state, pending, event) {
        // Fresh request being weighed by the policy.
        (S::Nascent, P::None, E::TicketAllocated) => Some((S::Ticketed, P::None)),
        (S::Nascent, P::None, E::TicketRejected) => Some((S::Failed, P::None)),

        // Extension of an issued ticket against the same pool.
        (S::Ticketed, P::None, E::ExtendRequest) => Some((S::Ticketed, P::ExtendingTicket)),
        (S::Ticketed, P::ExtendingTicket, E::TicketAllocated) => Some((S::Ticketed, P::None)),
        (S::Ticketed, P::ExtendingTicket, E::TicketRejected) => Some((S::Failed, P::None)),

        // Client returned the ticket; capacity goes back to the pool.
        (S::Nascent | S::Ticketed, _, E::Relinquish) => Some((S::Closed, P::None)),

        (S::Nascent, P::None, E::CloseRequest) => Some((S::Closed, P::None)),
        (S::Ticketed, P::None, E::CloseRequest) => Some((S::Closed, P::None)),
        (S::Ticketed, P::ExtendingTicket, E::CloseRequest) => Some((S::Closed, P::None)),

        (_, _, E::FailedRpc) => Some((S::Failed, P::None)),

        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_issues_ticket() {
        assert_eq!(transition(S::Nascent, P::None, E::TicketAllocated), Some((S::Ticketed, P::None)));
        assert_eq!(transition(S::Nascent, P::None, E::TicketRejected), Some((S::Failed, P::None)));
    }

    #[test]
    fn relinquish_closes_from_any_stage() {
        assert_eq!(transition(S::Ticketed, P::None, E::Relinquish), Some((S::Closed, P::None)));
        assert_eq!(transition(S::Nascent, P::None, E::Relinquish), Some((S::Closed, P::None)));
    }

    #[test]
    fn extend_follows_the_ticket_pattern() {
        let staged = transition(S::Ticketed, P::None, E::ExtendRequest).unwrap();
        assert_eq!(staged, (S::Ticketed, P::ExtendingTicket));
        assert_eq!(transition(staged.0, staged.1, E::TicketAllocated), Some((S::Ticketed, P::None)));
    }

    #[test]
    fn redeem_events_are_not_broker_business() {
        assert_eq!(transition(S::Ticketed, P::None, E::RedeemDecision), None);
    }
}
