use std::sync::Arc;

use crate::actor::event_loop::{ActorLoop, LoopHandle};
use crate::config::ActorType;
use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::kernel::delegation::Delegation;
use crate::kernel::kernel::Effect;
use crate::kernel::reservation::Reservation;
use crate::kernel::slice::{Slice, SliceType};
use crate::policy::Policy;
use crate::registry::RemoteActorRegistry;
use crate::rpc::manager::{FailedRpc, FailureSink, RpcBinding, RpcManager, RpcRequest};
use crate::rpc::message::{DelegationPayload, Envelope, RequestType, ReservationPayload, SlicePayload};
use crate::substrate::handler::{CompletionSink, HandlerAction};
use crate::substrate::manager::SubstrateManager;
use crate::time::ticker::Tickable;
use crate::util::auth::AuthToken;
use crate::util::id::{ActorGuid, DelegationId, Rid, SliceId, UnitId};
use crate::util::properties::Properties;
use crate::util::resource_set::ResourceSet;
use crate::util::term::Term;
use crate::util::update_data::UpdateData;

/// Everything one actor owns, living on its loop thread. All mutation goes
/// through loop tasks; other threads only hold a `LoopHandle`.
pub struct ActorCore {
    pub name: String,
    pub guid: ActorGuid,
    pub identity: AuthToken,
    pub actor_type: ActorType,
    pub topic: String,

    pub kernel: Kernel,
    pub policy: Box<dyn Policy>,
    pub rpc: Arc<RpcManager>,
    pub registry: Arc<RemoteActorRegistry>,
    /// Authority actors carry the substrate bookkeeping; others leave it
    /// empty.
    pub substrate: Option<SubstrateManager>,

    pub current_cycle: i64,
    pub recovered: bool,
    pub last_query_result: Option<Properties>,
}

impl ActorCore {
    // ---- tick ------------------------------------------------------------

    /// One cycle of work. Gaps in the delivered cycle numbers are fine: the
    /// kernel reconciles everything due up to `cycle` in one pass.
    pub fn actor_tick(&mut self, cycle: i64) {
        if cycle <= self.current_cycle {
            log::warn!("Actor '{}' ignoring non-monotone tick {} (at {}).", self.name, cycle, self.current_cycle);
            return;
        }
        self.current_cycle = cycle;

        self.rpc.check_timeouts();

        let effects = self.kernel.tick(cycle, self.policy.as_mut());
        self.apply_effects(effects, None);
    }

    // ---- inbound RPC -----------------------------------------------------

    pub fn handle_incoming(&mut self, envelope: Envelope) {
        let from = envelope.caller.guid.clone();
        if !self.rpc.register_inbound(&envelope, &from) {
            return;
        }
        // Cancels the pending timer when this answers an outstanding
        // request.
        let _binding = self.rpc.match_response(&envelope);

        let outcome = self.dispatch_incoming(&envelope);
        if let Err(e) = outcome {
            log::error!("Actor '{}' failed to process {} {}: {}", self.name, envelope.name, envelope.message_id, e);
        }
    }

    fn dispatch_incoming(&mut self, envelope: &Envelope) -> Result<()> {
        match envelope.name {
            RequestType::Ticket | RequestType::ExtendTicket => self.on_ticket_request(envelope),
            RequestType::Redeem => self.on_redeem(envelope),
            RequestType::ExtendLease | RequestType::ModifyLease => self.on_extend_lease(envelope),
            RequestType::Relinquish => self.on_relinquish(envelope),
            RequestType::Close => self.on_close(envelope),
            RequestType::UpdateTicket => self.on_update_ticket(envelope),
            RequestType::UpdateLease => self.on_update_lease(envelope),
            RequestType::ClaimDelegation => self.on_claim(envelope),
            RequestType::ReclaimDelegation => self.on_reclaim(envelope),
            RequestType::UpdateDelegation => self.on_update_delegation(envelope),
            RequestType::Query => self.on_query(envelope),
            RequestType::QueryResult => {
                self.last_query_result = envelope.query.clone();
                Ok(())
            }
            RequestType::FailedRpc => self.on_peer_failure(envelope),
        }
    }

    fn reservation_payload(envelope: &Envelope) -> Result<&ReservationPayload> {
        envelope.reservation.as_ref().ok_or_else(|| Error::InvalidArgument(format!("{} without reservation payload", envelope.name)))
    }

    fn delegation_payload(envelope: &Envelope) -> Result<&DelegationPayload> {
        envelope.delegation.as_ref().ok_or_else(|| Error::InvalidArgument(format!("{} without delegation payload", envelope.name)))
    }

    fn mirror_slice(payload: &ReservationPayload) -> Slice {
        let mut slice = Slice::new(payload.slice.slice_id.clone(), payload.slice.name.clone(), payload.slice.slice_type, payload.slice.owner.clone());
        slice.lease_start = Some(payload.term.start);
        slice.lease_end = Some(payload.term.end);
        slice
    }

    fn on_ticket_request(&mut self, envelope: &Envelope) -> Result<()> {
        let payload = Self::reservation_payload(envelope)?;
        let effects = self.kernel.incoming_ticket(
            payload.rid.clone(),
            Self::mirror_slice(payload),
            payload.sequence,
            payload.resources.clone(),
            payload.term.clone(),
            envelope.caller.guid.clone(),
            envelope.callback_topic.clone(),
            payload.slice.owner.clone(),
        )?;
        self.apply_effects(effects, Some(envelope));
        Ok(())
    }

    fn on_redeem(&mut self, envelope: &Envelope) -> Result<()> {
        let payload = Self::reservation_payload(envelope)?;
        let effects = self.kernel.incoming_redeem(
            payload.rid.clone(),
            Self::mirror_slice(payload),
            payload.sequence,
            payload.resources.clone(),
            payload.term.clone(),
            envelope.caller.guid.clone(),
            envelope.callback_topic.clone(),
            payload.slice.owner.clone(),
        )?;
        self.apply_effects(effects, Some(envelope));
        Ok(())
    }

    fn on_extend_lease(&mut self, envelope: &Envelope) -> Result<()> {
        let payload = Self::reservation_payload(envelope)?;
        let effects =
            self.kernel.incoming_extend_lease(&payload.rid, payload.sequence, payload.resources.clone(), payload.term.clone())?;
        self.apply_effects(effects, Some(envelope));
        Ok(())
    }

    fn on_relinquish(&mut self, envelope: &Envelope) -> Result<()> {
        let payload = Self::reservation_payload(envelope)?;
        if let Some(released) = self.kernel.incoming_relinquish(&payload.rid, payload.sequence)? {
            self.policy.release(&released);
        }
        Ok(())
    }

    fn on_close(&mut self, envelope: &Envelope) -> Result<()> {
        let payload = Self::reservation_payload(envelope)?;
        let effects = self.kernel.incoming_close(&payload.rid, payload.sequence)?;
        self.apply_effects(effects, Some(envelope));
        Ok(())
    }

    fn on_update_ticket(&mut self, envelope: &Envelope) -> Result<()> {
        let payload = Self::reservation_payload(envelope)?;
        let update = envelope.update_data.clone().unwrap_or_default();
        let effects = self.kernel.update_ticket(
            &payload.rid,
            payload.sequence,
            payload.success,
            payload.success.then(|| payload.resources.clone()),
            Some(payload.term.clone()),
            payload.authority.clone(),
            &update,
        )?;
        self.apply_effects(effects, Some(envelope));
        Ok(())
    }

    fn on_update_lease(&mut self, envelope: &Envelope) -> Result<()> {
        let payload = Self::reservation_payload(envelope)?;
        let update = envelope.update_data.clone().unwrap_or_default();
        let effects = self.kernel.update_lease(
            &payload.rid,
            payload.sequence,
            payload.success,
            payload.closed,
            payload.success.then(|| payload.resources.clone()),
            &update,
        )?;
        self.apply_effects(effects, Some(envelope));
        Ok(())
    }

    fn on_claim(&mut self, envelope: &Envelope) -> Result<()> {
        let payload = Self::delegation_payload(envelope)?;
        let effects = self.kernel.incoming_claim(&payload.did, envelope.caller.guid.clone())?;
        self.apply_effects(effects, Some(envelope));
        Ok(())
    }

    fn on_reclaim(&mut self, envelope: &Envelope) -> Result<()> {
        let payload = Self::delegation_payload(envelope)?;
        let effects = self.kernel.incoming_reclaim(&payload.did)?;
        self.apply_effects(effects, Some(envelope));
        Ok(())
    }

    fn on_update_delegation(&mut self, envelope: &Envelope) -> Result<()> {
        let payload = Self::delegation_payload(envelope)?;
        let update = envelope.update_data.clone().unwrap_or_default();
        if let Some(delegation) =
            self.kernel.update_delegation(&payload.did, payload.success, payload.units, payload.resource_type.clone(), &update)?
        {
            self.policy.donate(&delegation);
        }
        Ok(())
    }

    fn on_query(&mut self, envelope: &Envelope) -> Result<()> {
        let query = envelope.query.clone().unwrap_or_default();
        let answer = self.policy.query(&query);

        let response = Envelope::new(RequestType::QueryResult, self.identity.clone(), self.topic.clone())
            .with_query(answer)
            .in_response_to(envelope.message_id.clone());
        self.rpc.send(RpcRequest { topic: envelope.callback_topic.clone(), envelope: response, binding: RpcBinding::None });
        Ok(())
    }

    fn on_peer_failure(&mut self, envelope: &Envelope) -> Result<()> {
        let error = envelope.error.clone().unwrap_or_else(|| "peer reported failure".to_string());
        if let Some(payload) = &envelope.reservation {
            self.kernel.fail(&payload.rid, error)?;
        } else if let Some(payload) = &envelope.delegation {
            self.kernel.fail_delegation(&payload.did, error)?;
        } else {
            log::warn!("FailedRpc from {} carries no binding: {}", envelope.caller.name, error);
        }
        Ok(())
    }

    // ---- failure projection ---------------------------------------------

    pub fn handle_failed_rpc(&mut self, failed: FailedRpc) {
        log::warn!("Actor '{}' projecting failed {}: {}", self.name, failed.request_type, failed.error);
        let outcome = match &failed.binding {
            RpcBinding::Reservation(rid) => self.kernel.fail(rid, failed.error.clone()),
            RpcBinding::Delegation(did) => self.kernel.fail_delegation(did, failed.error.clone()),
            RpcBinding::None => Ok(()),
        };
        if let Err(e) = outcome {
            log::error!("Failure projection for {} could not be applied: {}", failed.message_id, e);
        }
    }

    // ---- substrate completions ------------------------------------------

    pub fn configuration_complete(&mut self, action: HandlerAction, unit_id: UnitId, properties: Properties) {
        let Some(substrate) = self.substrate.as_mut() else {
            log::error!("Handler completion on non-authority actor '{}'.", self.name);
            return;
        };

        match substrate.configuration_complete(action, &unit_id, &properties) {
            Err(e) => log::error!("Completion for unit {} rejected: {}", unit_id, e),
            Ok(None) => {}
            Ok(Some(outcome)) => {
                if let Some(unit) = self.substrate.as_ref().and_then(|s| s.unit(&unit_id)).cloned() {
                    self.policy.configuration_complete(action, &unit, &properties);
                }
                match self.kernel.units_complete(&outcome.rid, outcome.ok, outcome.message) {
                    Ok(effects) => self.apply_effects(effects, None),
                    Err(e) => log::error!("Unit completion for {} not applied: {}", outcome.rid, e),
                }
            }
        }
    }

    // ---- effects ---------------------------------------------------------

    /// Turns kernel effects into outbound RPCs and substrate calls.
    /// `reply_to` carries the envelope being processed, so direct responses
    /// can reference the request id.
    pub fn apply_effects(&mut self, effects: Vec<Effect>, reply_to: Option<&Envelope>) {
        for effect in effects {
            if let Err(e) = self.apply_effect(&effect, reply_to) {
                log::error!("Actor '{}' could not apply {:?}: {}", self.name, effect, e);
            }
        }
    }

    fn reservation_snapshot(&self, rid: &Rid) -> Result<Reservation> {
        self.kernel.get_reservation(rid).cloned().ok_or_else(|| Error::NotFound(format!("reservation {}", rid)))
    }

    fn slice_payload(&self, slice_id: &SliceId) -> Result<SlicePayload> {
        let slice = self.kernel.get_slice(slice_id).ok_or_else(|| Error::NotFound(format!("slice {}", slice_id)))?;
        Ok(SlicePayload { slice_id: slice.slice_id.clone(), name: slice.name.clone(), slice_type: slice.slice_type, owner: slice.owner.clone() })
    }

    fn broker_topic(&self, reservation: &Reservation) -> Result<(ActorGuid, String)> {
        let guid = reservation
            .broker
            .clone()
            .or_else(|| self.registry.default_broker().map(|peer| peer.guid))
            .ok_or_else(|| Error::NotFound(format!("no broker peer for reservation {}", reservation.rid)))?;
        let topic = self.registry.topic_for(&guid).ok_or_else(|| Error::NotFound(format!("no topic for broker {}", guid)))?;
        Ok((guid, topic))
    }

    fn authority_topic(&self, reservation: &Reservation) -> Result<String> {
        let guid = reservation
            .authority
            .clone()
            .ok_or_else(|| Error::NotFound(format!("reservation {} has no authority", reservation.rid)))?;
        self.registry.topic_for(&guid).ok_or_else(|| Error::NotFound(format!("no topic for authority {}", guid)))
    }

    fn caller_topic(&self, reservation: &Reservation) -> Result<String> {
        if let Some(topic) = &reservation.caller_topic {
            return Ok(topic.clone());
        }
        reservation
            .caller
            .as_ref()
            .and_then(|guid| self.registry.topic_for(guid))
            .ok_or_else(|| Error::NotFound(format!("no reply topic for reservation {}", reservation.rid)))
    }

    fn build_reservation_envelope(
        &mut self,
        name: RequestType,
        rid: &Rid,
        resources: ResourceSet,
        term: Term,
        success: bool,
        closed: bool,
        authority: Option<ActorGuid>,
        update_data: Option<UpdateData>,
    ) -> Result<Envelope> {
        let sequence = self.kernel.outbound_sequence(rid)?;
        let snapshot = self.reservation_snapshot(rid)?;
        let slice = self.slice_payload(&snapshot.slice_id)?;

        let mut envelope = Envelope::new(name, self.identity.clone(), self.topic.clone()).with_reservation(ReservationPayload {
            rid: rid.clone(),
            slice,
            resources,
            term,
            sequence,
            success,
            closed,
            authority,
        });
        if let Some(update_data) = update_data {
            envelope = envelope.with_update_data(update_data);
        }
        Ok(envelope)
    }

    fn apply_effect(&mut self, effect: &Effect, reply_to: Option<&Envelope>) -> Result<()> {
        match effect {
            Effect::SendTicket { rid } | Effect::SendExtendTicket { rid } => {
                let snapshot = self.reservation_snapshot(rid)?;
                let (broker_guid, topic) = self.broker_topic(&snapshot)?;
                if snapshot.broker.is_none() {
                    // Pin the chosen upstream so retries and relinquish go to
                    // the same place.
                    self.kernel.set_broker(rid, broker_guid)?;
                }

                let name = if matches!(effect, Effect::SendTicket { .. }) { RequestType::Ticket } else { RequestType::ExtendTicket };
                let term = if name == RequestType::ExtendTicket {
                    snapshot.requested_term.clone().unwrap_or_else(|| snapshot.term.clone())
                } else {
                    snapshot.term.clone()
                };
                let envelope = self.build_reservation_envelope(name, rid, snapshot.requested.clone(), term, true, false, None, None)?;
                self.rpc.send(RpcRequest { topic, envelope, binding: RpcBinding::Reservation(rid.clone()) });
                Ok(())
            }
            Effect::SendRedeem { rid } | Effect::SendExtendLease { rid } | Effect::SendModifyLease { rid } => {
                let snapshot = self.reservation_snapshot(rid)?;
                let topic = self.authority_topic(&snapshot)?;
                let name = match effect {
                    Effect::SendRedeem { .. } => RequestType::Redeem,
                    Effect::SendExtendLease { .. } => RequestType::ExtendLease,
                    _ => RequestType::ModifyLease,
                };
                let resources = snapshot.approved.clone().unwrap_or_else(|| snapshot.requested.clone());
                let term = if name == RequestType::Redeem {
                    snapshot.term.clone()
                } else {
                    snapshot.requested_term.clone().unwrap_or_else(|| snapshot.term.clone())
                };
                let envelope = self.build_reservation_envelope(name, rid, resources, term, true, false, None, None)?;
                self.rpc.send(RpcRequest { topic, envelope, binding: RpcBinding::Reservation(rid.clone()) });
                Ok(())
            }
            Effect::SendRelinquish { rid } => {
                let snapshot = self.reservation_snapshot(rid)?;
                let (_, topic) = self.broker_topic(&snapshot)?;
                let envelope = self.build_reservation_envelope(
                    RequestType::Relinquish,
                    rid,
                    snapshot.requested.clone(),
                    snapshot.term.clone(),
                    true,
                    false,
                    None,
                    None,
                )?;
                self.rpc.send(RpcRequest { topic, envelope, binding: RpcBinding::Reservation(rid.clone()) });
                Ok(())
            }
            Effect::SendClose { rid } => {
                let snapshot = self.reservation_snapshot(rid)?;
                let topic = self.authority_topic(&snapshot)?;
                let envelope = self.build_reservation_envelope(
                    RequestType::Close,
                    rid,
                    snapshot.approved.clone().unwrap_or_else(|| snapshot.requested.clone()),
                    snapshot.term.clone(),
                    true,
                    false,
                    None,
                    None,
                )?;
                self.rpc.send(RpcRequest { topic, envelope, binding: RpcBinding::Reservation(rid.clone()) });
                Ok(())
            }
            Effect::SendUpdateTicket { rid, success } => {
                let snapshot = self.reservation_snapshot(rid)?;
                let topic = self.caller_topic(&snapshot)?;
                let envelope = self.build_reservation_envelope(
                    RequestType::UpdateTicket,
                    rid,
                    snapshot.approved.clone().unwrap_or_else(|| snapshot.requested.clone()),
                    snapshot.term.clone(),
                    *success,
                    false,
                    snapshot.authority.clone(),
                    Some(snapshot.update_data.clone()),
                )?;
                let envelope = match reply_to {
                    Some(request) => envelope.in_response_to(request.message_id.clone()),
                    None => envelope,
                };
                self.rpc.send(RpcRequest { topic, envelope, binding: RpcBinding::Reservation(rid.clone()) });
                Ok(())
            }
            Effect::SendUpdateLease { rid, success, closed } => {
                let snapshot = self.reservation_snapshot(rid)?;
                let topic = self.caller_topic(&snapshot)?;
                let envelope = self.build_reservation_envelope(
                    RequestType::UpdateLease,
                    rid,
                    snapshot.allocated.clone().or_else(|| snapshot.approved.clone()).unwrap_or_else(|| snapshot.requested.clone()),
                    snapshot.term.clone(),
                    *success,
                    *closed,
                    None,
                    Some(snapshot.update_data.clone()),
                )?;
                let envelope = match reply_to {
                    Some(request) => envelope.in_response_to(request.message_id.clone()),
                    None => envelope,
                };
                self.rpc.send(RpcRequest { topic, envelope, binding: RpcBinding::Reservation(rid.clone()) });
                Ok(())
            }
            Effect::SendClaimDelegation { did } | Effect::SendReclaimDelegation { did } => {
                let delegation =
                    self.kernel.get_delegation(did).cloned().ok_or_else(|| Error::NotFound(format!("delegation {}", did)))?;
                let topic = self
                    .registry
                    .topic_for(&delegation.issuer)
                    .ok_or_else(|| Error::NotFound(format!("no topic for issuer {}", delegation.issuer)))?;

                let name = if matches!(effect, Effect::SendClaimDelegation { .. }) {
                    RequestType::ClaimDelegation
                } else {
                    RequestType::ReclaimDelegation
                };
                let envelope = Envelope::new(name, self.identity.clone(), self.topic.clone()).with_delegation(DelegationPayload {
                    did: did.clone(),
                    slice_id: delegation.slice_id.clone(),
                    units: delegation.units,
                    resource_type: delegation.resource_type.clone(),
                    sequence: 0,
                    success: true,
                });
                self.rpc.send(RpcRequest { topic, envelope, binding: RpcBinding::Delegation(did.clone()) });
                Ok(())
            }
            Effect::SendUpdateDelegation { did, success } => {
                let delegation =
                    self.kernel.get_delegation(did).cloned().ok_or_else(|| Error::NotFound(format!("delegation {}", did)))?;
                let holder = delegation.holder.clone().ok_or_else(|| Error::InvalidState(format!("delegation {} has no holder", did)))?;
                let topic = reply_to
                    .map(|request| request.callback_topic.clone())
                    .or_else(|| self.registry.topic_for(&holder))
                    .ok_or_else(|| Error::NotFound(format!("no topic for holder {}", holder)))?;

                let mut envelope = Envelope::new(RequestType::UpdateDelegation, self.identity.clone(), self.topic.clone())
                    .with_delegation(DelegationPayload {
                        did: did.clone(),
                        slice_id: delegation.slice_id.clone(),
                        units: delegation.units,
                        resource_type: delegation.resource_type.clone(),
                        sequence: 0,
                        success: *success,
                    })
                    .with_update_data(delegation.update_data.clone());
                if let Some(request) = reply_to {
                    envelope = envelope.in_response_to(request.message_id.clone());
                }
                self.rpc.send(RpcRequest { topic, envelope, binding: RpcBinding::Delegation(did.clone()) });
                Ok(())
            }
            Effect::CreateUnits { rid } => {
                let snapshot = self.reservation_snapshot(rid)?;
                let substrate =
                    self.substrate.as_mut().ok_or_else(|| Error::InvalidState("substrate actions on non-authority actor".to_string()))?;
                substrate.create_units(&snapshot)
            }
            Effect::ModifyUnits { rid } => {
                let snapshot = self.reservation_snapshot(rid)?;
                let substrate =
                    self.substrate.as_mut().ok_or_else(|| Error::InvalidState("substrate actions on non-authority actor".to_string()))?;
                substrate.modify_units(&snapshot)
            }
            Effect::DeleteUnits { rid } => {
                let substrate =
                    self.substrate.as_mut().ok_or_else(|| Error::InvalidState("substrate actions on non-authority actor".to_string()))?;
                if let Some(outcome) = substrate.delete_units(rid)? {
                    let effects = self.kernel.units_complete(&outcome.rid, outcome.ok, outcome.message)?;
                    self.apply_effects(effects, reply_to);
                }
                Ok(())
            }
        }
    }

    // ---- local operations (management surface) --------------------------

    /// Registers a client slice and reservation, then demands it.
    pub fn demand_reservation(&mut self, reservation: Reservation) -> Result<()> {
        let rid = reservation.rid.clone();
        self.kernel.register_reservation(reservation)?;
        let effects = self.kernel.demand(&rid)?;
        self.apply_effects(effects, None);
        Ok(())
    }

    pub fn close_reservation(&mut self, rid: &Rid) -> Result<()> {
        let effects = self.kernel.close(rid)?;
        self.apply_effects(effects, None);
        Ok(())
    }

    pub fn extend_reservation(&mut self, rid: &Rid, resources: ResourceSet, term: Term) -> Result<()> {
        self.kernel.extend_reservation(rid, resources, term)
    }

    /// Boot-time claim pass: one local delegation mirror per configured
    /// peer delegation, then the claim RPC.
    pub fn claim_peer_delegations(&mut self) {
        for peer in self.registry.claimable_peers(self.actor_type) {
            let Some(did) = peer.delegation.clone() else { continue };
            if self.kernel.get_delegation(&did).is_some() {
                continue;
            }

            let slice_id = SliceId::generate();
            let slice = Slice::new(slice_id.clone(), format!("{}-delegations", peer.name), SliceType::Inventory, self.identity.clone());
            let outcome = self
                .kernel
                .register_slice(slice)
                .and_then(|_| self.kernel.register_delegation(Delegation::new(did.clone(), slice_id, peer.guid.clone())))
                .and_then(|_| self.kernel.claim_delegation(&did));
            match outcome {
                Ok(effects) => self.apply_effects(effects, None),
                Err(e) => log::error!("Claim of delegation {} from '{}' failed: {}", did, peer.name, e),
            }
        }
    }

    /// Authority boot: one inventory slice and one advertised delegation
    /// per configured resource pool. The delegation id is the resource
    /// label, which is what broker configs reference when claiming.
    pub fn setup_inventory(&mut self, resources: &[crate::config::ResourceConfig]) {
        for resource in resources {
            let units = resource.handler.properties.get("units").and_then(|raw| raw.parse::<u64>().ok()).unwrap_or(0);
            let did = if resource.label.is_empty() { DelegationId::generate() } else { DelegationId::new(resource.label.clone()) };

            let slice_id = SliceId::generate();
            let slice =
                Slice::new(slice_id.clone(), format!("{}-inventory", resource.resource_type), SliceType::Inventory, self.identity.clone());

            let mut delegation = Delegation::new(did.clone(), slice_id, self.guid.clone());
            delegation.units = units;
            delegation.resource_type = Some(crate::util::resource_set::ResourceType::new(resource.resource_type.clone()));

            let outcome = self.kernel.register_slice(slice).and_then(|_| {
                self.policy.donate(&delegation);
                self.kernel.register_delegation(delegation)
            });
            if let Err(e) = outcome {
                log::error!("Inventory setup for pool '{}' failed: {}", resource.resource_type, e);
            }
        }
    }

    /// Sends a Query to a peer; the result lands in `last_query_result`.
    pub fn query_peer(&mut self, peer: &ActorGuid, properties: Properties) -> Result<()> {
        let topic = self.registry.topic_for(peer).ok_or_else(|| Error::NotFound(format!("no topic for peer {}", peer)))?;
        let envelope = Envelope::new(RequestType::Query, self.identity.clone(), self.topic.clone()).with_query(properties);
        self.rpc.send(RpcRequest { topic, envelope, binding: RpcBinding::None });
        Ok(())
    }

    /// Marks a clean shutdown so the next boot recovers instead of starting
    /// cold.
    pub fn write_superblock(&mut self) -> Result<()> {
        crate::recovery::write_superblock(self.kernel.store())
    }
}

// ---- facade -------------------------------------------------------------

/// Owns the loop and exposes the thread-safe adapters (tickable, inbox,
/// failure sink, completion sink) that feed it.
pub struct Actor {
    pub name: String,
    actor_loop: ActorLoop<ActorCore>,
}

impl Actor {
    pub fn start(core: ActorCore) -> Self {
        let name = core.name.clone();
        let actor_loop = ActorLoop::start(name.clone(), core);
        Self { name, actor_loop }
    }

    pub fn handle(&self) -> LoopHandle<ActorCore> {
        self.actor_loop.handle()
    }

    pub fn tickable(&self) -> Arc<dyn Tickable> {
        Arc::new(ActorTickable { name: self.name.clone(), handle: self.handle() })
    }

    pub fn inbox(&self) -> Arc<dyn Fn(Envelope) + Send + Sync> {
        let handle = self.handle();
        Arc::new(move |envelope: Envelope| {
            handle.queue_event(Box::new(move |core: &mut ActorCore| core.handle_incoming(envelope)));
        })
    }

    pub fn failure_sink(&self) -> Arc<dyn FailureSink> {
        Arc::new(ActorFailureSink { handle: self.handle() })
    }

    pub fn completion_sink(&self) -> Arc<dyn CompletionSink> {
        Arc::new(ActorCompletionSink { handle: self.handle() })
    }

    /// Graceful stop: drains the loop and joins its thread.
    pub fn stop(&mut self) {
        self.actor_loop.stop();
    }
}

struct ActorTickable {
    name: String,
    handle: LoopHandle<ActorCore>,
}

impl Tickable for ActorTickable {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn external_tick(&self, cycle: i64) {
        // Return promptly: the work happens on the actor loop.
        self.handle.queue_event(Box::new(move |core: &mut ActorCore| core.actor_tick(cycle)));
    }
}

struct ActorFailureSink {
    handle: LoopHandle<ActorCore>,
}

impl FailureSink for ActorFailureSink {
    fn post_failed_rpc(&self, failed: FailedRpc) {
        self.handle.queue_event(Box::new(move |core: &mut ActorCore| core.handle_failed_rpc(failed)));
    }
}

struct ActorCompletionSink {
    handle: LoopHandle<ActorCore>,
}

impl CompletionSink for ActorCompletionSink {
    fn configuration_complete(&self, action: HandlerAction, unit_id: UnitId, properties: Properties) {
        self.handle.queue_event(Box::new(move |core: &mut ActorCore| core.configuration_complete(action, unit_id, properties)));
    }
}
