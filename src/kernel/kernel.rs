use slotmap::{SlotMap, new_key_type};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::kernel::delegation::Delegation;
use crate::kernel::reservation::{
    JoinState, PendingOp, Reservation, ReservationCategory, ReservationState, SequenceCheck,
};
use crate::kernel::slice::{Slice, SliceState, SliceTrigger};
use crate::kernel::transition::{ReservationEvent, transition};
use crate::loader::parser::to_json_blob;
use crate::policy::{Policy, PolicyCommand, PolicyDecision, SiblingInfo};
use crate::store::{DelegationRecord, ReservationRecord, SliceRecord, Store};
use crate::time::actor_clock::ActorClock;
use crate::util::id::{ActorGuid, DelegationId, Rid, SliceId};
use crate::util::resource_set::ResourceSet;
use crate::util::term::Term;
use crate::util::update_data::UpdateData;

new_key_type! {
    pub struct SliceKey;
    pub struct ReservationKey;
    pub struct DelegationKey;
}

/// Side effect the kernel wants performed after a mutation commits: an
/// outbound RPC or a substrate action. The actor layer executes these; the
/// kernel itself never touches the bus or the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    SendTicket { rid: Rid },
    SendExtendTicket { rid: Rid },
    SendRedeem { rid: Rid },
    SendExtendLease { rid: Rid },
    SendModifyLease { rid: Rid },
    SendRelinquish { rid: Rid },
    SendClose { rid: Rid },
    SendUpdateTicket { rid: Rid, success: bool },
    SendUpdateLease { rid: Rid, success: bool, closed: bool },
    SendClaimDelegation { did: DelegationId },
    SendReclaimDelegation { did: DelegationId },
    SendUpdateDelegation { did: DelegationId, success: bool },
    CreateUnits { rid: Rid },
    ModifyUnits { rid: Rid },
    DeleteUnits { rid: Rid },
}

/// Owns the slice/reservation/delegation tables of one actor and applies
/// every state transition, with write-through persistence.
///
/// Entities live in slotmap arenas; all cross-references are ids resolved
/// through the guid indexes. Every operation must run on the actor thread;
/// mutations are prepared on a clone, persisted, and only then committed to
/// the arena, so a storage rejection leaves memory untouched.
pub struct Kernel {
    actor_guid: ActorGuid,
    clock: ActorClock,
    store: Arc<dyn Store>,

    slices: SlotMap<SliceKey, Slice>,
    slice_index: HashMap<SliceId, SliceKey>,
    /// Slice ids in registration order; the policy sees slices in this
    /// order within a tick.
    slice_order: Vec<SliceId>,

    reservations: SlotMap<ReservationKey, Reservation>,
    reservation_index: HashMap<Rid, ReservationKey>,

    delegations: SlotMap<DelegationKey, Delegation>,
    delegation_index: HashMap<DelegationId, DelegationKey>,
}

impl Kernel {
    pub fn new(actor_guid: ActorGuid, clock: ActorClock, store: Arc<dyn Store>) -> Self {
        Self {
            actor_guid,
            clock,
            store,
            slices: SlotMap::with_key(),
            slice_index: HashMap::new(),
            slice_order: Vec::new(),
            reservations: SlotMap::with_key(),
            reservation_index: HashMap::new(),
            delegations: SlotMap::with_key(),
            delegation_index: HashMap::new(),
        }
    }

    pub fn actor_guid(&self) -> &ActorGuid {
        &self.actor_guid
    }

    pub fn clock(&self) -> &ActorClock {
        &self.clock
    }

    pub fn store(&self) -> Arc<dyn Store> {
        Arc::clone(&self.store)
    }

    // ---- record builders -------------------------------------------------

    fn slice_record(slice: &Slice) -> Result<SliceRecord> {
        Ok(SliceRecord {
            slice_guid: slice.slice_id.clone(),
            name: slice.name.clone(),
            slice_type: format!("{:?}", slice.slice_type),
            state: slice.state.to_string(),
            graph_id: slice.graph_id.clone(),
            owner_sub: slice.owner.oidc_sub.clone(),
            email: slice.owner.email.clone(),
            lease_start: slice.lease_start,
            lease_end: slice.lease_end,
            project_id: slice.project_id.clone(),
            blob: to_json_blob(slice)?,
        })
    }

    fn reservation_record(reservation: &Reservation) -> Result<ReservationRecord> {
        Ok(ReservationRecord {
            rid: reservation.rid.clone(),
            slice_guid: reservation.slice_id.clone(),
            category: reservation.category.to_string(),
            state: reservation.state.to_string(),
            pending: reservation.pending.to_string(),
            joining: format!("{:?}", reservation.join),
            graph_node_id: reservation.graph_node_id.clone(),
            owner_sub: reservation.owner.oidc_sub.clone(),
            email: reservation.owner.email.clone(),
            blob: to_json_blob(reservation)?,
        })
    }

    fn delegation_record(delegation: &Delegation) -> Result<DelegationRecord> {
        Ok(DelegationRecord {
            did: delegation.did.clone(),
            slice_guid: delegation.slice_id.clone(),
            state: delegation.state.to_string(),
            blob: to_json_blob(delegation)?,
        })
    }

    // ---- lookups ---------------------------------------------------------

    pub fn get_slice(&self, slice_id: &SliceId) -> Option<&Slice> {
        self.slice_index.get(slice_id).map(|key| &self.slices[*key])
    }

    pub fn get_reservation(&self, rid: &Rid) -> Option<&Reservation> {
        self.reservation_index.get(rid).map(|key| &self.reservations[*key])
    }

    pub fn get_delegation(&self, did: &DelegationId) -> Option<&Delegation> {
        self.delegation_index.get(did).map(|key| &self.delegations[*key])
    }

    pub fn slice_ids(&self) -> Vec<SliceId> {
        self.slice_order.clone()
    }

    pub fn client_slices(&self) -> Vec<SliceId> {
        self.slice_order.iter().filter(|id| self.get_slice(id).map(Slice::is_client).unwrap_or(false)).cloned().collect()
    }

    pub fn inventory_slices(&self) -> Vec<SliceId> {
        self.slice_order.iter().filter(|id| self.get_slice(id).map(Slice::is_inventory).unwrap_or(false)).cloned().collect()
    }

    /// Reservations of a slice in creation order.
    pub fn slice_reservations(&self, slice_id: &SliceId) -> Vec<Rid> {
        self.get_slice(slice_id).map(|s| s.reservations.clone()).unwrap_or_default()
    }

    fn reservation_key(&self, rid: &Rid) -> Result<ReservationKey> {
        self.reservation_index.get(rid).copied().ok_or_else(|| Error::NotFound(format!("reservation {}", rid)))
    }

    fn delegation_key(&self, did: &DelegationId) -> Result<DelegationKey> {
        self.delegation_index.get(did).copied().ok_or_else(|| Error::NotFound(format!("delegation {}", did)))
    }

    // ---- registration ----------------------------------------------------

    /// Adds a new slice: persists first, indexes after, so a rejected write
    /// leaves no trace.
    pub fn register_slice(&mut self, slice: Slice) -> Result<()> {
        if self.slice_index.contains_key(&slice.slice_id) {
            return Err(Error::InvalidState(format!("slice {} already registered", slice.slice_id)));
        }
        self.store.add_slice(Self::slice_record(&slice)?)?;

        let slice_id = slice.slice_id.clone();
        let key = self.slices.insert(slice);
        self.slice_index.insert(slice_id.clone(), key);
        self.slice_order.push(slice_id);
        Ok(())
    }

    /// Re-indexes an already persisted slice during recovery without writing
    /// it back.
    pub fn re_register_slice(&mut self, slice: Slice) -> Result<()> {
        if self.slice_index.contains_key(&slice.slice_id) {
            return Err(Error::InvalidState(format!("slice {} already registered", slice.slice_id)));
        }
        if self.store.get_slice(&slice.slice_id)?.is_none() {
            return Err(Error::InvalidState(format!("slice {} is not persisted; cannot re-register", slice.slice_id)));
        }

        let slice_id = slice.slice_id.clone();
        let key = self.slices.insert(slice);
        self.slice_index.insert(slice_id.clone(), key);
        self.slice_order.push(slice_id);
        Ok(())
    }

    pub fn register_reservation(&mut self, reservation: Reservation) -> Result<()> {
        if self.reservation_index.contains_key(&reservation.rid) {
            return Err(Error::InvalidState(format!("reservation {} already registered", reservation.rid)));
        }
        let slice_key = *self
            .slice_index
            .get(&reservation.slice_id)
            .ok_or_else(|| Error::NotFound(format!("slice {} for reservation {}", reservation.slice_id, reservation.rid)))?;

        self.store.add_reservation(Self::reservation_record(&reservation)?)?;

        // Membership change is part of the same logical mutation; if the
        // slice row cannot be written the reservation row comes back out.
        let mut slice = self.slices[slice_key].clone();
        slice.register(reservation.rid.clone());
        if let Err(e) = self.persist_slice(&slice) {
            let _ = self.store.remove_reservation(&reservation.rid);
            return Err(e);
        }
        self.slices[slice_key] = slice;

        let rid = reservation.rid.clone();
        let key = self.reservations.insert(reservation);
        self.reservation_index.insert(rid, key);
        Ok(())
    }

    pub fn re_register_reservation(&mut self, reservation: Reservation) -> Result<()> {
        if self.reservation_index.contains_key(&reservation.rid) {
            return Err(Error::InvalidState(format!("reservation {} already registered", reservation.rid)));
        }
        if self.store.get_reservation(&reservation.rid)?.is_none() {
            return Err(Error::InvalidState(format!("reservation {} is not persisted; cannot re-register", reservation.rid)));
        }
        let slice_key = *self
            .slice_index
            .get(&reservation.slice_id)
            .ok_or_else(|| Error::NotFound(format!("slice {} for reservation {}", reservation.slice_id, reservation.rid)))?;

        self.slices[slice_key].register(reservation.rid.clone());

        let rid = reservation.rid.clone();
        let key = self.reservations.insert(reservation);
        self.reservation_index.insert(rid, key);
        Ok(())
    }

    pub fn register_delegation(&mut self, delegation: Delegation) -> Result<()> {
        if self.delegation_index.contains_key(&delegation.did) {
            return Err(Error::InvalidState(format!("delegation {} already registered", delegation.did)));
        }
        let slice_key = *self
            .slice_index
            .get(&delegation.slice_id)
            .ok_or_else(|| Error::NotFound(format!("slice {} for delegation {}", delegation.slice_id, delegation.did)))?;

        self.store.add_delegation(Self::delegation_record(&delegation)?)?;

        let mut slice = self.slices[slice_key].clone();
        slice.register_delegation(delegation.did.clone());
        if let Err(e) = self.persist_slice(&slice) {
            let _ = self.store.remove_delegation(&delegation.did);
            return Err(e);
        }
        self.slices[slice_key] = slice;

        let did = delegation.did.clone();
        let key = self.delegations.insert(delegation);
        self.delegation_index.insert(did, key);
        Ok(())
    }

    pub fn re_register_delegation(&mut self, delegation: Delegation) -> Result<()> {
        if self.delegation_index.contains_key(&delegation.did) {
            return Err(Error::InvalidState(format!("delegation {} already registered", delegation.did)));
        }
        if self.store.get_delegation(&delegation.did)?.is_none() {
            return Err(Error::InvalidState(format!("delegation {} is not persisted; cannot re-register", delegation.did)));
        }
        let slice_key = *self
            .slice_index
            .get(&delegation.slice_id)
            .ok_or_else(|| Error::NotFound(format!("slice {} for delegation {}", delegation.slice_id, delegation.did)))?;

        self.slices[slice_key].register_delegation(delegation.did.clone());

        let did = delegation.did.clone();
        let key = self.delegations.insert(delegation);
        self.delegation_index.insert(did, key);
        Ok(())
    }

    /// Drops a reservation from the indexes. The persisted row stays.
    pub fn unregister_reservation(&mut self, rid: &Rid) -> Result<Reservation> {
        let key = self.reservation_key(rid)?;
        let reservation = self.reservations.remove(key).ok_or_else(|| Error::Internal(format!("arena lost reservation {}", rid)))?;
        self.reservation_index.remove(rid);

        if let Some(slice_key) = self.slice_index.get(&reservation.slice_id) {
            self.slices[*slice_key].unregister(rid);
        }
        Ok(reservation)
    }

    /// Drops a slice from the indexes. The persisted row stays.
    pub fn unregister_slice(&mut self, slice_id: &SliceId) -> Result<Slice> {
        let key = *self.slice_index.get(slice_id).ok_or_else(|| Error::NotFound(format!("slice {}", slice_id)))?;
        for rid in self.slices[key].reservations.clone() {
            if self.reservation_index.contains_key(&rid) {
                return Err(Error::InvalidState(format!("slice {} still has registered reservation {}", slice_id, rid)));
            }
        }

        let slice = self.slices.remove(key).ok_or_else(|| Error::Internal(format!("arena lost slice {}", slice_id)))?;
        self.slice_index.remove(slice_id);
        self.slice_order.retain(|id| id != slice_id);
        Ok(slice)
    }

    /// Drops a delegation from the indexes. The persisted row stays.
    pub fn unregister_delegation(&mut self, did: &DelegationId) -> Result<Delegation> {
        let key = self.delegation_key(did)?;
        let delegation = self.delegations.remove(key).ok_or_else(|| Error::Internal(format!("arena lost delegation {}", did)))?;
        self.delegation_index.remove(did);

        if let Some(slice_key) = self.slice_index.get(&delegation.slice_id) {
            self.slices[*slice_key].unregister_delegation(did);
        }
        Ok(delegation)
    }

    /// Removes a delegation from the indexes and from storage. Only legal
    /// once it is terminal.
    pub fn remove_delegation(&mut self, did: &DelegationId) -> Result<()> {
        let key = self.delegation_key(did)?;
        if !self.delegations[key].is_terminal() {
            return Err(Error::InvalidState(format!("delegation {} is not terminal; close it before removing", did)));
        }
        let slice_id = self.delegations[key].slice_id.clone();

        self.store.remove_delegation(did)?;
        self.delegations.remove(key);
        self.delegation_index.remove(did);

        if let Some(slice_key) = self.slice_index.get(&slice_id).copied() {
            let mut slice = self.slices[slice_key].clone();
            slice.unregister_delegation(did);
            if self.persist_slice(&slice).is_ok() {
                self.slices[slice_key] = slice;
            }
        }
        Ok(())
    }

    /// Removes a reservation from the indexes and from storage. Only legal
    /// once it is terminal.
    pub fn remove_reservation(&mut self, rid: &Rid) -> Result<()> {
        let key = self.reservation_key(rid)?;
        if !self.reservations[key].is_terminal() {
            return Err(Error::InvalidState(format!("reservation {} is not terminal; close it before removing", rid)));
        }
        let slice_id = self.reservations[key].slice_id.clone();

        self.store.remove_reservation(rid)?;
        self.reservations.remove(key);
        self.reservation_index.remove(rid);

        if let Some(slice_key) = self.slice_index.get(&slice_id).copied() {
            let mut slice = self.slices[slice_key].clone();
            slice.unregister(rid);
            if self.persist_slice(&slice).is_ok() {
                self.slices[slice_key] = slice;
            }
        }
        Ok(())
    }

    /// Removes a slice and its persisted row. All children must be terminal
    /// and already removed.
    pub fn remove_slice(&mut self, slice_id: &SliceId) -> Result<()> {
        let key = *self.slice_index.get(slice_id).ok_or_else(|| Error::NotFound(format!("slice {}", slice_id)))?;
        for rid in &self.slices[key].reservations {
            if let Some(r) = self.get_reservation(rid) {
                if !r.is_terminal() {
                    return Err(Error::InvalidState(format!("slice {} has non-terminal reservation {}", slice_id, rid)));
                }
            }
        }
        for did in &self.slices[key].delegations {
            if let Some(d) = self.get_delegation(did) {
                if !d.is_terminal() {
                    return Err(Error::InvalidState(format!("slice {} has non-terminal delegation {}", slice_id, did)));
                }
            }
        }

        self.store.remove_slice(slice_id)?;
        self.slices.remove(key);
        self.slice_index.remove(slice_id);
        self.slice_order.retain(|id| id != slice_id);
        Ok(())
    }

    // ---- persistence helpers --------------------------------------------

    fn persist_slice(&self, slice: &Slice) -> Result<()> {
        self.store.update_slice(Self::slice_record(slice)?)
    }

    fn persist_reservation(&self, reservation: &Reservation) -> Result<()> {
        self.store.update_reservation(Self::reservation_record(reservation)?)
    }

    fn persist_delegation(&self, delegation: &Delegation) -> Result<()> {
        self.store.update_delegation(Self::delegation_record(delegation)?)
    }

    /// Runs a mutation against a clone of the reservation, persists it, and
    /// only then commits to the arena. The closure's effects are returned
    /// untouched. A `StorageFailure` leaves the in-memory state exactly as
    /// it was.
    fn mutate_reservation<F>(&mut self, rid: &Rid, mutator: F) -> Result<Vec<Effect>>
    where
        F: FnOnce(&mut Reservation) -> Result<Vec<Effect>>,
    {
        let key = self.reservation_key(rid)?;
        let mut updated = self.reservations[key].clone();
        let effects = mutator(&mut updated)?;

        self.persist_reservation(&updated)?;
        self.reservations[key] = updated;

        self.reevaluate_slice_of(rid);
        Ok(effects)
    }

    fn mutate_delegation<F>(&mut self, did: &DelegationId, mutator: F) -> Result<Vec<Effect>>
    where
        F: FnOnce(&mut Delegation) -> Result<Vec<Effect>>,
    {
        let key = self.delegation_key(did)?;
        let mut updated = self.delegations[key].clone();
        let effects = mutator(&mut updated)?;

        self.persist_delegation(&updated)?;
        self.delegations[key] = updated;
        Ok(effects)
    }

    /// Recomputes the aggregate state of the slice owning `rid` and persists
    /// it when it changed. A storage rejection here only logs: the slice
    /// state is derived and will be recomputed again.
    fn reevaluate_slice_of(&mut self, rid: &Rid) {
        let Some(slice_id) = self.get_reservation(rid).map(|r| r.slice_id.clone()) else {
            return;
        };
        self.reevaluate_slice(&slice_id);
    }

    pub fn reevaluate_slice(&mut self, slice_id: &SliceId) -> Option<SliceState> {
        let slice_key = *self.slice_index.get(slice_id)?;

        let children: Vec<(ReservationState, PendingOp)> = self.slices[slice_key]
            .reservations
            .iter()
            .filter_map(|rid| self.get_reservation(rid))
            .map(|r| (r.state, r.pending))
            .collect();

        let mut slice = self.slices[slice_key].clone();
        let before = slice.state;
        let after = slice.reevaluate(&children);

        if after != before {
            tracing::info!(slice = %slice_id, from = %before, to = %after, "slice state change");
            if let Err(e) = self.persist_slice(&slice) {
                log::error!("Failed to persist slice {} after reevaluation: {}", slice_id, e);
                return Some(before);
            }
            self.slices[slice_key] = slice;
        }
        Some(after)
    }

    // ---- reservation operations -----------------------------------------

    /// Client-side demand: start ticketing against the upstream broker.
    pub fn demand(&mut self, rid: &Rid) -> Result<Vec<Effect>> {
        self.mutate_reservation(rid, |r| {
            let (state, pending) = transition(r.category, r.state, r.pending, ReservationEvent::Demand)?;
            r.state = state;
            r.pending = pending;
            Ok(vec![Effect::SendTicket { rid: r.rid.clone() }])
        })
    }

    /// Validates and stages an extend; the next tick drives it through the
    /// policy and out to the peers.
    pub fn extend_reservation(&mut self, rid: &Rid, resources: ResourceSet, term: Term) -> Result<()> {
        self.mutate_reservation(rid, |r| {
            r.stage_extend(resources, term)?;
            Ok(Vec::new())
        })?;

        // The slice is now under modification; its derived states switch to
        // the modify flavors until the next settle.
        if let Some(slice_id) = self.get_reservation(rid).map(|r| r.slice_id.clone()) {
            if let Some(key) = self.slice_index.get(&slice_id) {
                self.slices[*key].trigger = SliceTrigger::Modify;
            }
        }
        Ok(())
    }

    /// Moves a reservation toward Closed along its role's close path.
    pub fn close(&mut self, rid: &Rid) -> Result<Vec<Effect>> {
        self.close_with_notice(rid, None)
    }

    pub fn close_with_notice(&mut self, rid: &Rid, notice: Option<String>) -> Result<Vec<Effect>> {
        self.mutate_reservation(rid, |r| {
            if r.is_terminal() || r.is_closing() {
                return Ok(Vec::new());
            }
            if let Some(notice) = notice {
                r.update_data.post(notice);
            }

            let had_ticket = r.approved.is_some();
            let had_lease = r.is_active();

            let (state, pending) = transition(r.category, r.state, r.pending, ReservationEvent::CloseRequest)?;
            r.state = state;
            r.pending = pending;

            let mut effects = Vec::new();
            match r.category {
                ReservationCategory::Client => {
                    if r.pending == PendingOp::Closing && r.state != ReservationState::CloseWait {
                        if had_lease {
                            // Lease holders close at the authority and hand
                            // the ticket back; Closed arrives with the
                            // authority's UpdateLease(closed).
                            effects.push(Effect::SendClose { rid: r.rid.clone() });
                            effects.push(Effect::SendRelinquish { rid: r.rid.clone() });
                        } else if had_ticket {
                            // Ticket-only holders just relinquish; nothing
                            // will call back, so the close completes now.
                            effects.push(Effect::SendRelinquish { rid: r.rid.clone() });
                            let (state, pending) = transition(r.category, r.state, r.pending, ReservationEvent::CloseComplete)?;
                            r.state = state;
                            r.pending = pending;
                        }
                    }
                }
                ReservationCategory::Broker => {
                    // Capacity is returned by the caller through the policy.
                }
                ReservationCategory::Authority => {
                    if r.pending == PendingOp::Closing && r.state != ReservationState::CloseWait {
                        effects.push(Effect::DeleteUnits { rid: r.rid.clone() });
                    } else if r.state == ReservationState::Closed {
                        effects.push(Effect::SendUpdateLease { rid: r.rid.clone(), success: true, closed: true });
                    }
                }
            }
            Ok(effects)
        })
    }

    /// Closes every non-terminal reservation of a slice.
    pub fn close_slice_reservations(&mut self, slice_id: &SliceId) -> Result<Vec<Effect>> {
        let mut effects = Vec::new();
        for rid in self.slice_reservations(slice_id) {
            match self.close(&rid) {
                Ok(more) => effects.extend(more),
                Err(e) => log::error!("Close of reservation {} in slice {} failed: {}", rid, slice_id, e),
            }
        }
        Ok(effects)
    }

    /// Forces a terminal failure with a notice.
    pub fn fail(&mut self, rid: &Rid, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        self.mutate_reservation(rid, |r| {
            r.fail(message);
            Ok(Vec::new())
        })?;
        Ok(())
    }

    pub fn fail_delegation(&mut self, did: &DelegationId, message: impl Into<String>) -> Result<()> {
        let message = message.into();
        self.mutate_delegation(did, |d| {
            d.fail(message);
            Ok(Vec::new())
        })?;
        Ok(())
    }

    // ---- inbound message application ------------------------------------

    /// UpdateTicket from the upstream broker (client side).
    pub fn update_ticket(
        &mut self,
        rid: &Rid,
        sequence: u64,
        success: bool,
        approved: Option<ResourceSet>,
        term: Option<Term>,
        authority: Option<ActorGuid>,
        update: &UpdateData,
    ) -> Result<Vec<Effect>> {
        self.mutate_reservation(rid, |r| {
            match r.ticket_sequence.check(sequence) {
                SequenceCheck::Stale | SequenceCheck::Duplicate => {
                    log::warn!("Dropping stale/duplicate UpdateTicket seq {} for {}.", sequence, r.rid);
                    return Ok(Vec::new());
                }
                SequenceCheck::InOrder => {}
            }

            let was_extending = r.pending == PendingOp::ExtendingTicket;
            let (state, pending) = transition(r.category, r.state, r.pending, ReservationEvent::TicketUpdate { success })?;
            r.state = state;
            r.pending = pending;
            r.update_data.absorb(update);
            r.ticket_sequence.mark_answered();

            if success && !r.is_terminal() {
                if let Some(approved) = approved {
                    r.approved = Some(approved);
                }
                if let Some(authority) = authority {
                    r.authority = Some(authority);
                }
                if was_extending {
                    if let Some(new_term) = r.requested_term.clone() {
                        r.term = new_term;
                        // An active lease still has to be extended; the
                        // staged term stays as the marker until UpdateLease.
                        if r.state != ReservationState::ActiveTicketed {
                            r.requested_term = None;
                        }
                    }
                } else if let Some(term) = term {
                    r.term = term;
                }
            } else if !success {
                r.update_data.failed = true;
            }
            Ok(Vec::new())
        })
    }

    /// UpdateLease from the authority (client side).
    pub fn update_lease(
        &mut self,
        rid: &Rid,
        sequence: u64,
        success: bool,
        closed: bool,
        allocated: Option<ResourceSet>,
        update: &UpdateData,
    ) -> Result<Vec<Effect>> {
        self.mutate_reservation(rid, |r| {
            match r.lease_sequence.check(sequence) {
                SequenceCheck::Stale | SequenceCheck::Duplicate => {
                    log::warn!("Dropping stale/duplicate UpdateLease seq {} for {}.", sequence, r.rid);
                    return Ok(Vec::new());
                }
                SequenceCheck::InOrder => {}
            }

            let (state, pending) = transition(r.category, r.state, r.pending, ReservationEvent::LeaseUpdate { success, closed })?;
            r.state = state;
            r.pending = pending;
            r.update_data.absorb(update);
            r.lease_sequence.mark_answered();

            if success && !closed {
                if let Some(allocated) = allocated {
                    r.allocated = Some(allocated);
                }
                r.requested_term = None;
            }
            Ok(Vec::new())
        })
    }

    /// Inbound Ticket or ExtendTicket request (broker side). A new rid
    /// creates a mirror reservation; a known rid stages an extension.
    pub fn incoming_ticket(
        &mut self,
        rid: Rid,
        slice: Slice,
        sequence: u64,
        requested: ResourceSet,
        term: Term,
        caller: ActorGuid,
        caller_topic: String,
        owner: crate::util::auth::AuthToken,
    ) -> Result<Vec<Effect>> {
        if !self.slice_index.contains_key(&slice.slice_id) {
            self.register_slice(slice.clone())?;
        }

        if !self.reservation_index.contains_key(&rid) {
            let mut mirror = Reservation::new(rid.clone(), slice.slice_id.clone(), ReservationCategory::Broker, requested, term, owner);
            mirror.caller = Some(caller);
            mirror.caller_topic = Some(caller_topic);
            mirror.ticket_sequence.last = sequence;
            self.register_reservation(mirror)?;
            return Ok(Vec::new());
        }

        self.mutate_reservation(&rid, |r| {
            match r.ticket_sequence.check(sequence) {
                SequenceCheck::Stale | SequenceCheck::Duplicate => {
                    log::warn!("Dropping stale/duplicate ticket request seq {} for {}.", sequence, r.rid);
                    return Ok(Vec::new());
                }
                SequenceCheck::InOrder => {}
            }
            if !r.term.extends(&term) {
                return Err(Error::InvalidArgument(format!("requested term {} does not extend {} for {}", term, r.term, r.rid)));
            }
            let (state, pending) = transition(r.category, r.state, r.pending, ReservationEvent::ExtendRequest)?;
            r.state = state;
            r.pending = pending;
            r.requested = requested;
            r.requested_term = Some(term);
            Ok(Vec::new())
        })
    }

    /// Inbound Redeem (authority side): creates the lease mirror and starts
    /// priming units.
    pub fn incoming_redeem(
        &mut self,
        rid: Rid,
        slice: Slice,
        sequence: u64,
        approved: ResourceSet,
        term: Term,
        caller: ActorGuid,
        caller_topic: String,
        owner: crate::util::auth::AuthToken,
    ) -> Result<Vec<Effect>> {
        if !self.slice_index.contains_key(&slice.slice_id) {
            self.register_slice(slice.clone())?;
        }
        if self.reservation_index.contains_key(&rid) {
            return Err(Error::InvalidState(format!("redeem for already known reservation {}", rid)));
        }

        let mut mirror =
            Reservation::new(rid.clone(), slice.slice_id.clone(), ReservationCategory::Authority, approved.clone(), term, owner);
        mirror.caller = Some(caller);
        mirror.caller_topic = Some(caller_topic);
        mirror.approved = Some(approved);
        mirror.lease_sequence.last = sequence;
        self.register_reservation(mirror)?;

        self.mutate_reservation(&rid, |r| {
            let (state, pending) = transition(r.category, r.state, r.pending, ReservationEvent::IncomingRedeem)?;
            r.state = state;
            r.pending = pending;
            Ok(vec![Effect::CreateUnits { rid: r.rid.clone() }])
        })
    }

    /// Inbound ExtendLease / ModifyLease (authority side). The sliver
    /// decides the path: unchanged sliver extends, changed sliver modifies.
    pub fn incoming_extend_lease(&mut self, rid: &Rid, sequence: u64, approved: ResourceSet, term: Term) -> Result<Vec<Effect>> {
        self.mutate_reservation(rid, |r| {
            match r.lease_sequence.check(sequence) {
                SequenceCheck::Stale | SequenceCheck::Duplicate => {
                    log::warn!("Dropping stale/duplicate extend-lease seq {} for {}.", sequence, r.rid);
                    return Ok(Vec::new());
                }
                SequenceCheck::InOrder => {}
            }

            let sliver_changed = r.approved.as_ref().map(|held| held.sliver_differs(&approved)).unwrap_or(false);
            let event = if sliver_changed { ReservationEvent::ModifyRequest } else { ReservationEvent::ExtendLeaseRequest };

            let (state, pending) = transition(r.category, r.state, r.pending, event)?;
            r.state = state;
            r.pending = pending;
            r.approved = Some(approved);
            r.term = term;
            Ok(vec![Effect::ModifyUnits { rid: r.rid.clone() }])
        })
    }

    /// Inbound Relinquish (broker side): the client returned its ticket.
    /// Returns the pre-close snapshot so the caller can release pool
    /// capacity through the policy.
    pub fn incoming_relinquish(&mut self, rid: &Rid, sequence: u64) -> Result<Option<Reservation>> {
        let snapshot = self.get_reservation(rid).cloned();
        let Some(snapshot) = snapshot else {
            log::warn!("Relinquish for unknown reservation {}; ignoring.", rid);
            return Ok(None);
        };

        let effects = self.mutate_reservation(rid, |r| {
            match r.ticket_sequence.check(sequence) {
                SequenceCheck::Stale | SequenceCheck::Duplicate => {
                    log::warn!("Dropping stale/duplicate relinquish seq {} for {}.", sequence, r.rid);
                    return Ok(Vec::new());
                }
                SequenceCheck::InOrder => {}
            }
            if r.is_terminal() {
                return Ok(Vec::new());
            }
            let (state, pending) = transition(r.category, r.state, r.pending, ReservationEvent::Relinquish)?;
            r.state = state;
            r.pending = pending;
            Ok(Vec::new())
        })?;
        debug_assert!(effects.is_empty());

        let closed_now = self.get_reservation(rid).map(|r| r.is_terminal()).unwrap_or(false);
        Ok((closed_now && !snapshot.is_terminal()).then_some(snapshot))
    }

    /// Inbound Close (authority side).
    pub fn incoming_close(&mut self, rid: &Rid, sequence: u64) -> Result<Vec<Effect>> {
        self.mutate_reservation(rid, |r| {
            match r.lease_sequence.check(sequence) {
                SequenceCheck::Stale | SequenceCheck::Duplicate => {
                    log::warn!("Dropping stale/duplicate close seq {} for {}.", sequence, r.rid);
                    return Ok(Vec::new());
                }
                SequenceCheck::InOrder => {}
            }
            if r.is_terminal() || r.is_closing() {
                return Ok(Vec::new());
            }

            let (state, pending) = transition(r.category, r.state, r.pending, ReservationEvent::CloseRequest)?;
            r.state = state;
            r.pending = pending;

            if r.state == ReservationState::Closed {
                Ok(vec![Effect::SendUpdateLease { rid: r.rid.clone(), success: true, closed: true }])
            } else if r.pending == PendingOp::Closing && r.state != ReservationState::CloseWait {
                Ok(vec![Effect::DeleteUnits { rid: r.rid.clone() }])
            } else {
                Ok(Vec::new())
            }
        })
    }

    /// Substrate completion for all units of a reservation (authority side).
    pub fn units_complete(&mut self, rid: &Rid, ok: bool, message: Option<String>) -> Result<Vec<Effect>> {
        self.mutate_reservation(rid, |r| {
            let closing = r.pending == PendingOp::Closing;
            let event = if ok { ReservationEvent::UnitsReady } else { ReservationEvent::UnitsFailed };
            let (state, pending) = transition(r.category, r.state, r.pending, event)?;
            r.state = state;
            r.pending = pending;

            if let Some(message) = message {
                r.update_data.post_error(message);
            }

            let effects = if closing || r.state == ReservationState::Closed {
                vec![Effect::SendUpdateLease { rid: r.rid.clone(), success: ok, closed: true }]
            } else {
                vec![Effect::SendUpdateLease { rid: r.rid.clone(), success: ok, closed: false }]
            };
            Ok(effects)
        })
    }

    // ---- delegation operations ------------------------------------------

    /// Broker-side claim of an advertised delegation.
    pub fn claim_delegation(&mut self, did: &DelegationId) -> Result<Vec<Effect>> {
        let key = self.delegation_key(did)?;
        if self.delegations[key].is_terminal() {
            return Err(Error::InvalidState(format!("delegation {} is terminal", did)));
        }
        Ok(vec![Effect::SendClaimDelegation { did: did.clone() }])
    }

    pub fn reclaim_delegation(&mut self, did: &DelegationId) -> Result<Vec<Effect>> {
        let key = self.delegation_key(did)?;
        if !self.delegations[key].is_delegated() {
            return Err(Error::InvalidState(format!("delegation {} is not delegated", did)));
        }
        Ok(vec![Effect::SendReclaimDelegation { did: did.clone() }])
    }

    /// Inbound ClaimDelegation (authority side): hands the pool to the
    /// claiming broker and answers with UpdateDelegation.
    pub fn incoming_claim(&mut self, did: &DelegationId, holder: ActorGuid) -> Result<Vec<Effect>> {
        self.mutate_delegation(did, |d| {
            d.claim(holder)?;
            Ok(vec![Effect::SendUpdateDelegation { did: d.did.clone(), success: true }])
        })
    }

    pub fn incoming_reclaim(&mut self, did: &DelegationId) -> Result<Vec<Effect>> {
        self.mutate_delegation(did, |d| {
            d.reclaim()?;
            Ok(vec![Effect::SendUpdateDelegation { did: d.did.clone(), success: true }])
        })
    }

    /// Inbound UpdateDelegation (broker side): the claim round-trip
    /// resolved. Returns the delegation snapshot so the caller can donate it
    /// to the policy pool.
    pub fn update_delegation(
        &mut self,
        did: &DelegationId,
        success: bool,
        units: u64,
        resource_type: Option<crate::util::resource_set::ResourceType>,
        update: &UpdateData,
    ) -> Result<Option<Delegation>> {
        let holder = self.actor_guid.clone();
        self.mutate_delegation(did, |d| {
            if !success {
                d.update_data.absorb(update);
                d.fail("peer rejected delegation claim");
                return Ok(Vec::new());
            }
            d.claim(holder)?;
            d.units = units;
            d.resource_type = resource_type;
            d.update_data.absorb(update);
            Ok(Vec::new())
        })?;

        let delegation = self.get_delegation(did).cloned();
        Ok(delegation.filter(|d| d.is_delegated()))
    }

    /// Pins the upstream broker a client reservation tickets against.
    pub fn set_broker(&mut self, rid: &Rid, broker: ActorGuid) -> Result<()> {
        self.mutate_reservation(rid, |r| {
            r.broker = Some(broker);
            Ok(Vec::new())
        })?;
        Ok(())
    }

    /// Bumps and persists the outbound sequence for a reservation; every
    /// outbound RPC carries a strictly increasing number.
    pub fn outbound_sequence(&mut self, rid: &Rid) -> Result<u64> {
        let mut sequence = 0;
        self.mutate_reservation(rid, |r| {
            sequence = r.next_sequence_out();
            Ok(Vec::new())
        })?;
        Ok(sequence)
    }

    // ---- tick ------------------------------------------------------------

    /// Single cycle advance: policy prepare, service pass over every
    /// reservation with due work (slice order, then creation order), policy
    /// finish, then any policy-emitted commands.
    pub fn tick(&mut self, cycle: i64, policy: &mut dyn Policy) -> Vec<Effect> {
        tracing::debug!(cycle, actor = %self.actor_guid, "kernel tick");
        policy.prepare(cycle);

        let mut effects = Vec::new();
        let now = self.clock.cycle_start_date(cycle);

        for slice_id in self.slice_ids() {
            for rid in self.slice_reservations(&slice_id) {
                match self.service_reservation(&rid, now, policy) {
                    Ok(more) => effects.extend(more),
                    Err(e) => log::error!("Service pass failed for reservation {}: {}", rid, e),
                }
            }
        }

        policy.finish(cycle);

        for command in policy.drain_commands() {
            match command {
                PolicyCommand::CloseReservation { rid, notice } => match self.close_with_notice(&rid, Some(notice)) {
                    Ok(more) => effects.extend(more),
                    Err(e) => log::error!("Policy-requested close of {} failed: {}", rid, e),
                },
            }
        }

        effects
    }

    fn siblings_of(&self, reservation: &Reservation) -> Vec<SiblingInfo> {
        self.slice_reservations(&reservation.slice_id)
            .iter()
            .filter(|rid| **rid != reservation.rid)
            .filter_map(|rid| self.get_reservation(rid))
            .map(|r| SiblingInfo { rid: r.rid.clone(), state: r.state, pending: r.pending, join: r.join, has_ticket: r.approved.is_some() })
            .collect()
    }

    fn service_reservation(&mut self, rid: &Rid, now: chrono::DateTime<chrono::Utc>, policy: &mut dyn Policy) -> Result<Vec<Effect>> {
        let Some(reservation) = self.get_reservation(rid).cloned() else {
            return Ok(Vec::new());
        };
        if reservation.is_terminal() {
            return Ok(Vec::new());
        }

        // Lease expiry: the owning client winds the reservation down.
        if reservation.category == ReservationCategory::Client
            && reservation.pending.is_none()
            && !reservation.is_nascent()
            && reservation.term.expired(now)
            && reservation.requested_term.is_none()
        {
            policy.close(&reservation);
            return self.close(rid);
        }

        let siblings = self.siblings_of(&reservation);

        match (reservation.category, reservation.state, reservation.pending) {
            // Broker weighing a fresh request.
            (ReservationCategory::Broker, ReservationState::Nascent, PendingOp::None) => {
                self.apply_policy_ticket(rid, policy, &siblings, false)
            }
            // Broker weighing a staged extension.
            (ReservationCategory::Broker, ReservationState::Ticketed, PendingOp::ExtendingTicket) => {
                self.apply_policy_ticket(rid, policy, &siblings, true)
            }
            // Client holding a ticket: ask the policy whether to redeem.
            (ReservationCategory::Client, ReservationState::Ticketed, PendingOp::None) => {
                if reservation.requested_term.is_some() {
                    self.apply_client_extend_ticket(rid, policy)
                } else {
                    self.apply_client_redeem(rid, policy, &siblings)
                }
            }
            // Client with a staged extend on an active lease.
            (ReservationCategory::Client, ReservationState::Active, PendingOp::None) => {
                if reservation.requested_term.is_some() {
                    self.apply_client_extend_ticket(rid, policy)
                } else {
                    Ok(Vec::new())
                }
            }
            // Extended ticket in hand: push it into the lease.
            (ReservationCategory::Client, ReservationState::ActiveTicketed, PendingOp::None) => {
                if reservation.requested_term.is_some() {
                    self.mutate_reservation(rid, |r| {
                        let (state, pending) = transition(r.category, r.state, r.pending, ReservationEvent::ExtendLeaseDecision)?;
                        r.state = state;
                        r.pending = pending;
                        Ok(vec![Effect::SendExtendLease { rid: r.rid.clone() }])
                    })
                } else {
                    Ok(Vec::new())
                }
            }
            _ => Ok(Vec::new()),
        }
    }

    fn apply_policy_ticket(&mut self, rid: &Rid, policy: &mut dyn Policy, siblings: &[SiblingInfo], extending: bool) -> Result<Vec<Effect>> {
        let key = self.reservation_key(rid)?;
        let mut updated = self.reservations[key].clone();

        let decision = if extending { policy.extend(&mut updated)? } else { policy.bind(&mut updated, siblings)? };

        let effects = match decision {
            PolicyDecision::Defer => return Ok(Vec::new()),
            PolicyDecision::Allocate => {
                let (state, pending) = transition(updated.category, updated.state, updated.pending, ReservationEvent::TicketAllocated)?;
                updated.state = state;
                updated.pending = pending;
                if updated.approved.is_none() {
                    updated.approved = Some(updated.requested.clone());
                }
                if extending {
                    if let Some(term) = updated.requested_term.take() {
                        updated.term = term;
                    }
                }
                vec![Effect::SendUpdateTicket { rid: rid.clone(), success: true }]
            }
            PolicyDecision::Reject(notice) => {
                let (state, pending) = transition(updated.category, updated.state, updated.pending, ReservationEvent::TicketRejected)?;
                updated.state = state;
                updated.pending = pending;
                updated.update_data.post_error(notice);
                vec![Effect::SendUpdateTicket { rid: rid.clone(), success: false }]
            }
        };

        self.persist_reservation(&updated)?;
        self.reservations[key] = updated;
        self.reevaluate_slice_of(rid);
        Ok(effects)
    }

    fn apply_client_redeem(&mut self, rid: &Rid, policy: &mut dyn Policy, siblings: &[SiblingInfo]) -> Result<Vec<Effect>> {
        let key = self.reservation_key(rid)?;
        let mut updated = self.reservations[key].clone();

        match policy.bind(&mut updated, siblings)? {
            PolicyDecision::Defer => Ok(Vec::new()),
            PolicyDecision::Allocate => {
                let (state, pending) = transition(updated.category, updated.state, updated.pending, ReservationEvent::RedeemDecision)?;
                updated.state = state;
                updated.pending = pending;
                updated.join = JoinState::Joined;
                self.persist_reservation(&updated)?;
                self.reservations[key] = updated;
                self.reevaluate_slice_of(rid);
                Ok(vec![Effect::SendRedeem { rid: rid.clone() }])
            }
            PolicyDecision::Reject(notice) => {
                self.persist_reservation(&updated)?;
                self.reservations[key] = updated;
                self.fail(rid, notice)?;
                Ok(Vec::new())
            }
        }
    }

    fn apply_client_extend_ticket(&mut self, rid: &Rid, policy: &mut dyn Policy) -> Result<Vec<Effect>> {
        let key = self.reservation_key(rid)?;
        let mut updated = self.reservations[key].clone();

        match policy.extend(&mut updated)? {
            PolicyDecision::Defer => Ok(Vec::new()),
            PolicyDecision::Allocate => {
                let (state, pending) = transition(updated.category, updated.state, updated.pending, ReservationEvent::ExtendTicketDecision)?;
                updated.state = state;
                updated.pending = pending;
                self.persist_reservation(&updated)?;
                self.reservations[key] = updated;
                Ok(vec![Effect::SendExtendTicket { rid: rid.clone() }])
            }
            PolicyDecision::Reject(notice) => {
                self.fail(rid, notice)?;
                Ok(Vec::new())
            }
        }
    }

    // ---- maintenance -----------------------------------------------------

    /// Drops every index without touching storage. Used by tests and the
    /// export tool between runs.
    pub fn reset(&mut self) {
        self.slices.clear();
        self.slice_index.clear();
        self.slice_order.clear();
        self.reservations.clear();
        self.reservation_index.clear();
        self.delegations.clear();
        self.delegation_index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::slice::SliceType;
    use crate::loader::parser::parse_json_str;
    use crate::store::MemStore;
    use crate::util::auth::AuthToken;
    use crate::util::resource_set::ResourceType;

    fn kernel_with_store() -> (Kernel, MemStore) {
        let store = MemStore::new();
        let clock = ActorClock::new(0, 1000).unwrap();
        let kernel = Kernel::new(ActorGuid::new("actor-1"), clock, Arc::new(store.clone()));
        (kernel, store)
    }

    fn owner() -> AuthToken {
        AuthToken::new("owner", ActorGuid::new("owner-guid"))
    }

    fn client_slice(kernel: &mut Kernel, id: &str) -> SliceId {
        let slice_id = SliceId::new(id);
        kernel.register_slice(Slice::new(slice_id.clone(), id, SliceType::Client, owner())).unwrap();
        slice_id
    }

    fn client_reservation(kernel: &mut Kernel, slice_id: &SliceId, id: &str) -> Rid {
        let rid = Rid::new(id);
        let term = kernel.clock().term(5, 10).unwrap();
        let reservation = Reservation::new(
            rid.clone(),
            slice_id.clone(),
            ReservationCategory::Client,
            ResourceSet::new(1, ResourceType::new("vm")),
            term,
            owner(),
        );
        kernel.register_reservation(reservation).unwrap();
        rid
    }

    #[test]
    fn register_requires_slice() {
        let (mut kernel, _store) = kernel_with_store();
        let term = kernel.clock().term(5, 10).unwrap();
        let reservation = Reservation::new(
            Rid::new("r-1"),
            SliceId::new("missing"),
            ReservationCategory::Client,
            ResourceSet::new(1, ResourceType::new("vm")),
            term,
            owner(),
        );
        assert!(matches!(kernel.register_reservation(reservation), Err(Error::NotFound(_))));
    }

    #[test]
    fn register_unregister_re_register_round_trip() {
        let (mut kernel, store) = kernel_with_store();
        let slice_id = client_slice(&mut kernel, "s-1");
        let rid = client_reservation(&mut kernel, &slice_id, "r-1");

        let persisted: Reservation = parse_json_str(&store.get_reservation(&rid).unwrap().unwrap().blob).unwrap();

        let dropped = kernel.unregister_reservation(&rid).unwrap();
        assert!(kernel.get_reservation(&rid).is_none());
        assert_eq!(dropped, persisted);

        kernel.re_register_reservation(persisted.clone()).unwrap();
        assert_eq!(kernel.get_reservation(&rid), Some(&persisted));
    }

    #[test]
    fn re_register_without_persisted_row_fails() {
        let (mut kernel, _store) = kernel_with_store();
        let slice_id = client_slice(&mut kernel, "s-1");
        let term = kernel.clock().term(5, 10).unwrap();
        let reservation = Reservation::new(
            Rid::new("r-ghost"),
            slice_id,
            ReservationCategory::Client,
            ResourceSet::new(1, ResourceType::new("vm")),
            term,
            owner(),
        );
        assert!(matches!(kernel.re_register_reservation(reservation), Err(Error::InvalidState(_))));
    }

    #[test]
    fn remove_requires_terminal_state_then_clears_everything() {
        let (mut kernel, store) = kernel_with_store();
        let slice_id = client_slice(&mut kernel, "s-1");
        let rid = client_reservation(&mut kernel, &slice_id, "r-1");

        assert!(matches!(kernel.remove_reservation(&rid), Err(Error::InvalidState(_))));

        kernel.close(&rid).unwrap();
        kernel.remove_reservation(&rid).unwrap();

        assert!(kernel.get_reservation(&rid).is_none());
        assert!(store.get_reservation(&rid).unwrap().is_none());
        assert!(!kernel.get_slice(&slice_id).unwrap().reservations.contains(&rid));
    }

    #[test]
    fn storage_rejection_rolls_back_mutation() {
        let (mut kernel, store) = kernel_with_store();
        let slice_id = client_slice(&mut kernel, "s-1");
        let rid = client_reservation(&mut kernel, &slice_id, "r-1");

        store.fail_next_writes(1);
        assert!(matches!(kernel.demand(&rid), Err(Error::StorageFailure(_))));

        let r = kernel.get_reservation(&rid).unwrap();
        assert_eq!(r.state, ReservationState::Nascent);
        assert_eq!(r.pending, PendingOp::None);
    }

    #[test]
    fn close_on_nascent_closes_without_effects() {
        let (mut kernel, _store) = kernel_with_store();
        let slice_id = client_slice(&mut kernel, "s-1");
        let rid = client_reservation(&mut kernel, &slice_id, "r-1");

        let effects = kernel.close(&rid).unwrap();
        assert!(effects.is_empty());
        assert_eq!(kernel.get_reservation(&rid).unwrap().state, ReservationState::Closed);
        assert_eq!(kernel.get_slice(&slice_id).unwrap().state, SliceState::Dead);
    }

    #[test]
    fn demand_emits_ticket_send_and_pending_serializes() {
        let (mut kernel, _store) = kernel_with_store();
        let slice_id = client_slice(&mut kernel, "s-1");
        let rid = client_reservation(&mut kernel, &slice_id, "r-1");

        let effects = kernel.demand(&rid).unwrap();
        assert_eq!(effects, vec![Effect::SendTicket { rid: rid.clone() }]);

        // A second demand while ticketing is a state error.
        assert!(matches!(kernel.demand(&rid), Err(Error::InvalidState(_))));
    }

    #[test]
    fn extend_with_shorter_term_is_invalid_argument() {
        let (mut kernel, _store) = kernel_with_store();
        let slice_id = client_slice(&mut kernel, "s-1");
        let rid = client_reservation(&mut kernel, &slice_id, "r-1");

        let resources = ResourceSet::new(1, ResourceType::new("vm"));
        let shorter = kernel.clock().term(5, 9).unwrap();
        assert!(matches!(kernel.extend_reservation(&rid, resources, shorter), Err(Error::InvalidArgument(_))));
    }
}
