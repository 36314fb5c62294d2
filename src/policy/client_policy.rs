use crate::error::Result;
use crate::kernel::reservation::Reservation;
use crate::policy::{Policy, PolicyDecision, SiblingInfo};

/// Plain client policy: every held ticket is redeemed as soon as the kernel
/// asks, every staged extension goes out unchanged.
#[derive(Debug, Default)]
pub struct ClientSimplePolicy {
    current_cycle: i64,
}

impl ClientSimplePolicy {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Policy for ClientSimplePolicy {
    fn name(&self) -> &str {
        "client-simple"
    }

    fn prepare(&mut self, cycle: i64) {
        self.current_cycle = cycle;
    }

    fn bind(&mut self, _reservation: &mut Reservation, _siblings: &[SiblingInfo]) -> Result<PolicyDecision> {
        Ok(PolicyDecision::Allocate)
    }

    fn extend(&mut self, _reservation: &mut Reservation) -> Result<PolicyDecision> {
        Ok(PolicyDecision::Allocate)
    }

    fn close(&mut self, reservation: &Reservation) {
        log::debug!("Closing reservation {} at cycle {}.", reservation.rid, self.current_cycle);
    }
}
