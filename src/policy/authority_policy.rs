use std::collections::HashMap;

use crate::error::Result;
use crate::kernel::delegation::Delegation;
use crate::kernel::reservation::Reservation;
use crate::policy::{Policy, PolicyDecision, SiblingInfo};
use crate::substrate::handler::HandlerAction;
use crate::substrate::unit::Unit;
use crate::util::properties::Properties;
use crate::util::resource_set::ResourceType;

/// Authority-side policy. The heavy lifting on an authority happens in the
/// substrate manager; the policy tracks advertised inventory and observes
/// handler completions.
#[derive(Debug, Default)]
pub struct AuthorityUnitPolicy {
    inventory: HashMap<ResourceType, u64>,
    current_cycle: i64,
}

impl AuthorityUnitPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inventory_units(&self, resource_type: &ResourceType) -> u64 {
        self.inventory.get(resource_type).copied().unwrap_or(0)
    }
}

impl Policy for AuthorityUnitPolicy {
    fn name(&self) -> &str {
        "authority-unit"
    }

    fn prepare(&mut self, cycle: i64) {
        self.current_cycle = cycle;
    }

    fn bind(&mut self, _reservation: &mut Reservation, _siblings: &[SiblingInfo]) -> Result<PolicyDecision> {
        // Redeems arrive pre-approved by a broker; the substrate is the
        // arbiter from here on.
        Ok(PolicyDecision::Allocate)
    }

    fn extend(&mut self, _reservation: &mut Reservation) -> Result<PolicyDecision> {
        Ok(PolicyDecision::Allocate)
    }

    fn donate(&mut self, delegation: &Delegation) {
        if let Some(resource_type) = &delegation.resource_type {
            *self.inventory.entry(resource_type.clone()).or_default() += delegation.units;
            log::info!("Inventory of {} now {} unit(s).", resource_type, self.inventory[resource_type]);
        }
    }

    fn configuration_complete(&mut self, action: HandlerAction, unit: &Unit, _properties: &Properties) {
        log::debug!("Handler {} settled for unit {} in state {} (cycle {}).", action, unit.unit_id, unit.state, self.current_cycle);
    }

    fn query(&self, _properties: &Properties) -> Properties {
        let mut answer = Properties::new();
        for (resource_type, units) in &self.inventory {
            answer.insert(format!("inventory.{}", resource_type), units.to_string());
        }
        answer
    }
}
