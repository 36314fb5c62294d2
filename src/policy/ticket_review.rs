use crate::error::Result;
use crate::kernel::reservation::{PendingOp, Reservation, ReservationState};
use crate::policy::{Policy, PolicyCommand, PolicyDecision, SiblingInfo};

/// Notice attached to reservations closed by the review gate.
pub const CLOSURE_NOTICE: &str = "closure by ticket review policy";

/// How the review gate sees a slice while weighing one of its tickets.
///
/// `Nascent` takes precedence over `Failing`: as long as any sibling has not
/// finished ticketing, nothing is redeemed and nothing is torn down, because
/// the nascent ticket may yet succeed or fail and change the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SliceReview {
    Redeemable,
    Nascent,
    Failing,
}

/// Client policy acting as a gate between ticketing and redemption: a slice
/// redeems only once none of its reservations are Nascent, and a failure
/// during ticketing tears the whole slice down with a notice.
///
/// A sibling that failed *after* it held a ticket does not block the gate;
/// that failure came from the authority side and the surviving tickets are
/// still worth redeeming.
#[derive(Debug, Default)]
pub struct TicketReviewPolicy {
    current_cycle: i64,
    commands: Vec<PolicyCommand>,
}

impl TicketReviewPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    fn review(siblings: &[SiblingInfo]) -> SliceReview {
        let mut review = SliceReview::Redeemable;
        for sibling in siblings {
            // A redeeming sibling means the slice already cleared review.
            if sibling.pending == PendingOp::Redeeming {
                return SliceReview::Redeemable;
            }
            if sibling.state == ReservationState::Nascent {
                return SliceReview::Nascent;
            }
            if sibling.state == ReservationState::Failed && !sibling.has_ticket {
                review = SliceReview::Failing;
            }
        }
        review
    }
}

impl Policy for TicketReviewPolicy {
    fn name(&self) -> &str {
        "client-ticket-review"
    }

    fn prepare(&mut self, cycle: i64) {
        self.current_cycle = cycle;
    }

    fn bind(&mut self, reservation: &mut Reservation, siblings: &[SiblingInfo]) -> Result<PolicyDecision> {
        match Self::review(siblings) {
            SliceReview::Redeemable => {
                // Clean up siblings that failed downstream; terminal states
                // absorb, so this is bookkeeping, not a transition.
                for sibling in siblings {
                    if sibling.state == ReservationState::Failed && sibling.has_ticket {
                        self.commands.push(PolicyCommand::CloseReservation { rid: sibling.rid.clone(), notice: CLOSURE_NOTICE.to_string() });
                    }
                }
                Ok(PolicyDecision::Allocate)
            }
            SliceReview::Nascent => {
                log::debug!("Deferring redeem of {}: slice has nascent tickets (cycle {}).", reservation.rid, self.current_cycle);
                Ok(PolicyDecision::Defer)
            }
            SliceReview::Failing => {
                log::info!("Closing reservation {} due to ticketing failure in its slice.", reservation.rid);
                self.commands.push(PolicyCommand::CloseReservation { rid: reservation.rid.clone(), notice: CLOSURE_NOTICE.to_string() });
                Ok(PolicyDecision::Defer)
            }
        }
    }

    fn extend(&mut self, _reservation: &mut Reservation) -> Result<PolicyDecision> {
        Ok(PolicyDecision::Allocate)
    }

    fn close(&mut self, reservation: &Reservation) {
        log::debug!("Closing reservation {} at cycle {}.", reservation.rid, self.current_cycle);
    }

    fn drain_commands(&mut self) -> Vec<PolicyCommand> {
        std::mem::take(&mut self.commands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::reservation::{JoinState, ReservationCategory};
    use crate::util::auth::AuthToken;
    use crate::util::id::{ActorGuid, Rid, SliceId};
    use crate::util::resource_set::{ResourceSet, ResourceType};
    use crate::util::term::Term;
    use chrono::{TimeZone, Utc};

    fn reservation() -> Reservation {
        let term = Term::new(Utc.timestamp_opt(5, 0).unwrap(), Utc.timestamp_opt(10, 0).unwrap()).unwrap();
        let mut r = Reservation::new(
            Rid::new("r-main"),
            SliceId::new("s-1"),
            ReservationCategory::Client,
            ResourceSet::new(1, ResourceType::new("vm")),
            term,
            AuthToken::new("owner", ActorGuid::new("o")),
        );
        r.state = ReservationState::Ticketed;
        r
    }

    fn sibling(id: &str, state: ReservationState, has_ticket: bool) -> SiblingInfo {
        SiblingInfo { rid: Rid::new(id), state, pending: PendingOp::None, join: JoinState::NoJoin, has_ticket }
    }

    #[test]
    fn nascent_sibling_defers_redemption() {
        let mut policy = TicketReviewPolicy::new();
        let mut r = reservation();
        let siblings = vec![sibling("r-2", ReservationState::Nascent, false)];

        assert_eq!(policy.bind(&mut r, &siblings).unwrap(), PolicyDecision::Defer);
        assert!(policy.drain_commands().is_empty());
    }

    #[test]
    fn ticketing_failure_closes_the_survivors() {
        let mut policy = TicketReviewPolicy::new();
        let mut r = reservation();
        let siblings = vec![sibling("r-2", ReservationState::Failed, false)];

        assert_eq!(policy.bind(&mut r, &siblings).unwrap(), PolicyDecision::Defer);
        let commands = policy.drain_commands();
        assert_eq!(
            commands,
            vec![PolicyCommand::CloseReservation { rid: r.rid.clone(), notice: CLOSURE_NOTICE.to_string() }]
        );
    }

    #[test]
    fn nascent_takes_precedence_over_failing() {
        let mut policy = TicketReviewPolicy::new();
        let mut r = reservation();
        let siblings = vec![
            sibling("r-2", ReservationState::Nascent, false),
            sibling("r-3", ReservationState::Failed, false),
        ];

        assert_eq!(policy.bind(&mut r, &siblings).unwrap(), PolicyDecision::Defer);
        assert!(policy.drain_commands().is_empty());
    }

    #[test]
    fn downstream_failure_does_not_block_redemption() {
        let mut policy = TicketReviewPolicy::new();
        let mut r = reservation();
        let siblings = vec![sibling("r-2", ReservationState::Failed, true)];

        assert_eq!(policy.bind(&mut r, &siblings).unwrap(), PolicyDecision::Allocate);
        // The failed sibling still gets a cleanup close.
        assert_eq!(policy.drain_commands().len(), 1);
    }
}
