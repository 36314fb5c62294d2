use serde::{Deserialize, Serialize};

use crate::kernel::slice::SliceType;
use crate::util::auth::AuthToken;
use crate::util::id::{ActorGuid, DelegationId, MessageId, Rid, SliceId};
use crate::util::properties::Properties;
use crate::util::resource_set::{ResourceSet, ResourceType};
use crate::util::term::Term;
use crate::util::update_data::UpdateData;

/// Named message types exchanged between actors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestType {
    Ticket,
    ExtendTicket,
    Relinquish,
    Redeem,
    ExtendLease,
    ModifyLease,
    Close,
    UpdateTicket,
    UpdateDelegation,
    UpdateLease,
    ClaimDelegation,
    ReclaimDelegation,
    Query,
    QueryResult,
    FailedRpc,
}

impl RequestType {
    /// Claim-class requests await a peer grant and share the claim timer.
    pub fn is_claim_like(&self) -> bool {
        matches!(
            self,
            RequestType::Ticket
                | RequestType::ExtendTicket
                | RequestType::Redeem
                | RequestType::ExtendLease
                | RequestType::ModifyLease
                | RequestType::ClaimDelegation
                | RequestType::ReclaimDelegation
        )
    }
}

impl std::fmt::Display for RequestType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Slice fields a mirror needs to reconstruct the container on the far
/// side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlicePayload {
    pub slice_id: SliceId,
    pub name: String,
    pub slice_type: SliceType,
    pub owner: AuthToken,
}

/// Reservation fields riding on ticket/lease traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservationPayload {
    pub rid: Rid,
    pub slice: SlicePayload,
    pub resources: ResourceSet,
    pub term: Term,
    pub sequence: u64,
    pub success: bool,
    pub closed: bool,
    /// Authority the ticket redeems at; filled in by the broker on
    /// UpdateTicket so the client knows where to send Redeem.
    pub authority: Option<ActorGuid>,
}

/// Delegation fields riding on claim traffic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DelegationPayload {
    pub did: DelegationId,
    pub slice_id: SliceId,
    pub units: u64,
    pub resource_type: Option<ResourceType>,
    pub sequence: u64,
    pub success: bool,
}

/// Common wire envelope. Every message is independently routable; the only
/// cross-message linkage is `request_id`, which ties a response back to the
/// pending entry of its request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub message_id: MessageId,
    pub name: RequestType,
    pub caller: AuthToken,
    /// Topic the receiver should answer on.
    pub callback_topic: String,
    pub request_id: Option<MessageId>,
    pub reservation: Option<ReservationPayload>,
    pub delegation: Option<DelegationPayload>,
    pub query: Option<Properties>,
    pub update_data: Option<UpdateData>,
    /// Transport-reported error carried on FailedRpc messages.
    pub error: Option<String>,
}

impl Envelope {
    pub fn new(name: RequestType, caller: AuthToken, callback_topic: impl Into<String>) -> Self {
        Self {
            message_id: MessageId::generate(),
            name,
            caller,
            callback_topic: callback_topic.into(),
            request_id: None,
            reservation: None,
            delegation: None,
            query: None,
            update_data: None,
            error: None,
        }
    }

    pub fn with_reservation(mut self, payload: ReservationPayload) -> Self {
        self.reservation = Some(payload);
        self
    }

    pub fn with_delegation(mut self, payload: DelegationPayload) -> Self {
        self.delegation = Some(payload);
        self
    }

    pub fn with_update_data(mut self, update_data: UpdateData) -> Self {
        self.update_data = Some(update_data);
        self
    }

    pub fn with_query(mut self, query: Properties) -> Self {
        self.query = Some(query);
        self
    }

    pub fn in_response_to(mut self, request_id: MessageId) -> Self {
        self.request_id = Some(request_id);
        self
    }
}
