use rand::rng;
use rand::seq::IndexedRandom;
use std::collections::HashMap;

use crate::error::Result;
use crate::kernel::delegation::Delegation;
use crate::kernel::reservation::{Reservation, ReservationState};
use crate::policy::{Policy, PolicyDecision, SiblingInfo};
use crate::util::id::{ActorGuid, DelegationId, Rid};
use crate::util::properties::{PROP_BROKER_QUERY_MODEL, Properties};
use crate::util::resource_set::ResourceType;

/// One claimed delegation viewed as an allocatable source.
#[derive(Debug, Clone)]
struct PoolSource {
    did: DelegationId,
    issuer: ActorGuid,
    total: u64,
    available: u64,
}

#[derive(Debug, Clone)]
struct Allocation {
    resource_type: ResourceType,
    units: u64,
    source: DelegationId,
}

/// Broker policy allocating tickets out of claimed delegation pools.
///
/// Sources of the same resource type are interchangeable; among those with
/// enough free capacity one is picked at random so load spreads across
/// sites without bookkeeping.
#[derive(Debug, Default)]
pub struct BrokerPoolPolicy {
    pools: HashMap<ResourceType, Vec<PoolSource>>,
    allocations: HashMap<Rid, Allocation>,
    current_cycle: i64,
}

impl BrokerPoolPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn available(&self, resource_type: &ResourceType) -> u64 {
        self.pools.get(resource_type).map(|sources| sources.iter().map(|s| s.available).sum()).unwrap_or(0)
    }

    fn take(&mut self, rid: &Rid, resource_type: &ResourceType, units: u64) -> Option<(DelegationId, ActorGuid)> {
        let sources = self.pools.get_mut(resource_type)?;
        let candidates: Vec<usize> =
            sources.iter().enumerate().filter(|(_, s)| s.available >= units).map(|(index, _)| index).collect();
        let chosen = *candidates.choose(&mut rng())?;

        sources[chosen].available -= units;
        let did = sources[chosen].did.clone();
        let issuer = sources[chosen].issuer.clone();
        self.allocations.insert(rid.clone(), Allocation { resource_type: resource_type.clone(), units, source: did.clone() });
        Some((did, issuer))
    }

    fn give_back(&mut self, rid: &Rid) {
        let Some(allocation) = self.allocations.remove(rid) else {
            return;
        };
        if let Some(sources) = self.pools.get_mut(&allocation.resource_type) {
            if let Some(source) = sources.iter_mut().find(|s| s.did == allocation.source) {
                source.available = (source.available + allocation.units).min(source.total);
            }
        }
        log::debug!("Returned {} unit(s) of {} from {}.", allocation.units, allocation.resource_type, rid);
    }
}

impl Policy for BrokerPoolPolicy {
    fn name(&self) -> &str {
        "broker-pool"
    }

    fn prepare(&mut self, cycle: i64) {
        self.current_cycle = cycle;
    }

    fn bind(&mut self, reservation: &mut Reservation, _siblings: &[SiblingInfo]) -> Result<PolicyDecision> {
        let resource_type = reservation.requested.resource_type.clone();
        let units = reservation.requested.units;

        if !self.pools.contains_key(&resource_type) {
            return Ok(PolicyDecision::Reject(format!("no delegated pool for resource type {}", resource_type)));
        }

        let rid = reservation.rid.clone();
        match self.take(&rid, &resource_type, units) {
            Some((did, issuer)) => {
                let mut approved = reservation.requested.clone();
                approved.resource_properties.insert("delegation".to_string(), did.to_string());
                reservation.authority = Some(issuer);
                reservation.approved = Some(approved);
                Ok(PolicyDecision::Allocate)
            }
            None => Ok(PolicyDecision::Reject(format!(
                "insufficient capacity for {} unit(s) of {}: {} available",
                units,
                resource_type,
                self.available(&resource_type)
            ))),
        }
    }

    fn extend(&mut self, reservation: &mut Reservation) -> Result<PolicyDecision> {
        // Term extensions keep the capacity already held; only a unit-count
        // change touches the pool.
        let held = self.allocations.get(&reservation.rid).map(|a| a.units).unwrap_or(0);
        let wanted = reservation.requested.units;

        if wanted == held {
            return Ok(PolicyDecision::Allocate);
        }
        if wanted < held {
            if let Some(allocation) = self.allocations.get_mut(&reservation.rid) {
                let shrink = held - wanted;
                allocation.units = wanted;
                let source = allocation.source.clone();
                let resource_type = allocation.resource_type.clone();
                if let Some(sources) = self.pools.get_mut(&resource_type) {
                    if let Some(pool) = sources.iter_mut().find(|s| s.did == source) {
                        pool.available = (pool.available + shrink).min(pool.total);
                    }
                }
            }
            return Ok(PolicyDecision::Allocate);
        }

        let grow = wanted - held;
        let resource_type = reservation.requested.resource_type.clone();
        let source = self.allocations.get(&reservation.rid).map(|a| a.source.clone());
        let Some(source) = source else {
            return Ok(PolicyDecision::Reject(format!("no existing allocation for {}", reservation.rid)));
        };

        let granted = self
            .pools
            .get_mut(&resource_type)
            .and_then(|sources| sources.iter_mut().find(|s| s.did == source))
            .filter(|pool| pool.available >= grow)
            .map(|pool| pool.available -= grow)
            .is_some();
        if !granted {
            return Ok(PolicyDecision::Reject(format!("insufficient capacity to grow {} by {} unit(s)", reservation.rid, grow)));
        }
        if let Some(allocation) = self.allocations.get_mut(&reservation.rid) {
            allocation.units = wanted;
        }
        Ok(PolicyDecision::Allocate)
    }

    fn donate(&mut self, delegation: &Delegation) {
        let Some(resource_type) = delegation.resource_type.clone() else {
            log::warn!("Delegation {} donated without a resource type; ignoring.", delegation.did);
            return;
        };

        let sources = self.pools.entry(resource_type.clone()).or_default();
        if sources.iter().any(|s| s.did == delegation.did) {
            return;
        }
        log::info!("Pool {} gains {} unit(s) from delegation {}.", resource_type, delegation.units, delegation.did);
        sources.push(PoolSource {
            did: delegation.did.clone(),
            issuer: delegation.issuer.clone(),
            total: delegation.units,
            available: delegation.units,
        });
    }

    fn release(&mut self, reservation: &Reservation) {
        self.give_back(&reservation.rid);
    }

    fn revisit_reservation(&mut self, reservation: &Reservation) {
        // Recovery: re-subtract capacity for tickets that survived the
        // restart.
        if reservation.state == ReservationState::Ticketed {
            if let Some(approved) = &reservation.approved {
                let did = approved.resource_properties.get("delegation").map(|raw| DelegationId::new(raw.clone()));
                if let (Some(did), Some(sources)) = (did, self.pools.get_mut(&approved.resource_type)) {
                    if let Some(source) = sources.iter_mut().find(|s| s.did == did) {
                        source.available = source.available.saturating_sub(approved.units);
                        self.allocations.insert(
                            reservation.rid.clone(),
                            Allocation { resource_type: approved.resource_type.clone(), units: approved.units, source: did },
                        );
                    }
                }
            }
        }
    }

    fn revisit_delegation(&mut self, delegation: &Delegation) {
        if delegation.is_delegated() {
            self.donate(delegation);
        }
    }

    fn query(&self, properties: &Properties) -> Properties {
        let mut answer = Properties::new();
        if properties.contains_key(crate::util::properties::PROP_QUERY_ACTION) {
            let model: Vec<String> =
                self.pools.iter().map(|(resource_type, _)| format!("{}:{}", resource_type, self.available(resource_type))).collect();
            answer.insert(PROP_BROKER_QUERY_MODEL.to_string(), model.join(","));
        }
        answer
    }
}
