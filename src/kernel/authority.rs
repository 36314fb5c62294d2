use crate::kernel::reservation::PendingOp as P;
use crate::kernel::reservation::ReservationState as S;
use crate::kernel::transition::ReservationEvent as E;

/// Legal transitions for an authority reservation: the side that binds a
/// redeemed ticket onto physical substrate through the handler plugin.
///
/// Priming covers the window where a substrate create or modify is in
/// flight; the unit completions (`UnitsReady`/`UnitsFailed`) resolve it.
pub fn transition(state: S, pending: P, event: E) -> Option<(S, P)> {
    match (state, pending, event) {
        // Redeem arrives; the policy assigns units and the handler starts
        // creating them.
        (S::Nascent, P::None, E::IncomingRedeem) => Some((S::Nascent, P::Priming)),
        (S::Nascent, P::Priming, E::UnitsReady) => Some((S::Active, P::None)),
        (S::Nascent, P::Priming, E::UnitsFailed) => Some((S::Failed, P::None)),

        // Term-only change: extend the lease, substrate modify semantics.
        (S::Active, P::None, E::ExtendLeaseRequest) => Some((S::Active, P::ExtendingLease)),
        (S::Active, P::ExtendingLease, E::UnitsReady) => Some((S::Active, P::None)),
        (S::Active, P::ExtendingLease, E::UnitsFailed) => Some((S::Failed, P::None)),

        // Sliver change: same substrate window, tracked as priming.
        (S::Active, P::None, E::ModifyRequest) => Some((S::Active, P::Priming)),
        (S::Active, P::Priming, E::UnitsReady) => Some((S::Active, P::None)),
        (S::Active, P::Priming, E::UnitsFailed) => Some((S::Failed, P::None)),

        // Close drives substrate delete, then reports the closed lease.
        (S::Nascent, P::None, E::CloseRequest) => Some((S::Closed, P::None)),
        (S::Active, P::None, E::CloseRequest) => Some((S::Active, P::Closing)),
        (S::Nascent, P::Priming, E::CloseRequest) => Some((S::CloseWait, P::Closing)),
        (S::Active, P::Priming | P::ExtendingLease, E::CloseRequest) => Some((S::CloseWait, P::Closing)),
        (_, P::Closing, E::CloseComplete) => Some((S::Closed, P::None)),
        // A close that interrupted another substrate action resolves to
        // Closed whichever way that action ends.
        (S::CloseWait, P::Closing, E::UnitsReady | E::UnitsFailed) => Some((S::Closed, P::None)),
        (_, P::Closing, E::UnitsReady) => Some((S::Closed, P::None)),
        (_, P::Closing, E::UnitsFailed) => Some((S::CloseFail, P::None)),

        (_, P::Closing, E::FailedRpc) => Some((S::CloseFail, P::None)),
        (_, _, E::FailedRpc) => Some((S::Failed, P::None)),

        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redeem_primes_then_activates() {
        let primed = transition(S::Nascent, P::None, E::IncomingRedeem).unwrap();
        assert_eq!(primed, (S::Nascent, P::Priming));
        assert_eq!(transition(primed.0, primed.1, E::UnitsReady), Some((S::Active, P::None)));
    }

    #[test]
    fn unit_failure_during_priming_fails_reservation() {
        assert_eq!(transition(S::Nascent, P::Priming, E::UnitsFailed), Some((S::Failed, P::None)));
    }

    #[test]
    fn close_from_active_goes_through_substrate_delete() {
        let closing = transition(S::Active, P::None, E::CloseRequest).unwrap();
        assert_eq!(closing, (S::Active, P::Closing));
        assert_eq!(transition(closing.0, closing.1, E::UnitsReady), Some((S::Closed, P::None)));
    }

    #[test]
    fn failed_delete_is_close_fail() {
        assert_eq!(transition(S::Active, P::Closing, E::UnitsFailed), Some((S::CloseFail, P::None)));
    }

    #[test]
    fn modify_only_when_sliver_changes() {
        // Term-only change takes the extend path, sliver change the modify
        // path; both resolve on unit completion.
        assert_eq!(transition(S::Active, P::None, E::ExtendLeaseRequest), Some((S::Active, P::ExtendingLease)));
        assert_eq!(transition(S::Active, P::None, E::ModifyRequest), Some((S::Active, P::Priming)));
    }
}
