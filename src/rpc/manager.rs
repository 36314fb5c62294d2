use lazy_static::lazy_static;
use parking_lot::{Condvar, Mutex};
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::rpc::message::{Envelope, RequestType};
use crate::rpc::transport::BusTransport;
use crate::util::id::{ActorGuid, DelegationId, MessageId, Rid};

lazy_static! {
    // Seen inbound messages keyed by "(message_id, from)", valued by a hash
    // of the wire form so a duplicate with a differing payload can be told
    // apart from a plain redelivery.
    static ref SEEN_MESSAGES: Mutex<HashMap<String, u64>> = Mutex::new(HashMap::new());
}

pub const CLAIM_TIMEOUT_MESSAGE: &str = "Timeout during claim";
pub const QUERY_TIMEOUT_MESSAGE: &str = "Timeout during query";

/// Default per-type response timers.
pub const DEFAULT_CLAIM_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(120);

/// Kernel entity an outbound request is acting for; failure projections are
/// routed back to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RpcBinding {
    Reservation(Rid),
    Delegation(DelegationId),
    None,
}

/// Synthetic failure event produced when delivery fails or a response timer
/// fires. Lands on the actor loop, never applied inline.
#[derive(Debug, Clone)]
pub struct FailedRpc {
    pub request_type: RequestType,
    pub binding: RpcBinding,
    pub error: String,
    pub message_id: MessageId,
}

/// Where failure projections are delivered: the actor's event queue.
pub trait FailureSink: Send + Sync {
    fn post_failed_rpc(&self, failed: FailedRpc);
}

/// A prepared outbound request bound to its kernel entity.
#[derive(Debug, Clone)]
pub struct RpcRequest {
    pub topic: String,
    pub envelope: Envelope,
    pub binding: RpcBinding,
}

struct PendingEntry {
    request_type: RequestType,
    binding: RpcBinding,
    deadline: Option<Instant>,
}

struct WorkQueue {
    queue: VecDeque<RpcRequest>,
    running: bool,
}

/// Outbound half of the at-most-once RPC layer: stamps message ids, queues
/// requests onto a bounded worker pool, tracks pending responses, and turns
/// delivery errors and timer expiry into `FailedRpc` events.
///
/// Requests are never retried automatically; `retry` re-enqueues with the
/// message id unchanged.
pub struct RpcManager {
    transport: Arc<dyn BusTransport>,
    work: Arc<(Mutex<WorkQueue>, Condvar)>,
    pending: Arc<Mutex<HashMap<MessageId, PendingEntry>>>,
    failure_sink: Arc<Mutex<Option<Arc<dyn FailureSink>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    claim_timeout: Duration,
    query_timeout: Duration,
    pool_size: usize,
}

impl RpcManager {
    pub fn new(transport: Arc<dyn BusTransport>) -> Self {
        Self::with_timeouts(transport, DEFAULT_CLAIM_TIMEOUT, DEFAULT_QUERY_TIMEOUT)
    }

    pub fn with_timeouts(transport: Arc<dyn BusTransport>, claim_timeout: Duration, query_timeout: Duration) -> Self {
        Self {
            transport,
            work: Arc::new((Mutex::new(WorkQueue { queue: VecDeque::new(), running: false }), Condvar::new())),
            pending: Arc::new(Mutex::new(HashMap::new())),
            failure_sink: Arc::new(Mutex::new(None)),
            workers: Mutex::new(Vec::new()),
            claim_timeout,
            query_timeout,
            pool_size: 4,
        }
    }

    pub fn set_failure_sink(&self, sink: Arc<dyn FailureSink>) {
        *self.failure_sink.lock() = Some(sink);
    }

    /// Starts the worker pool.
    pub fn start(&self) {
        let mut workers = self.workers.lock();
        if !workers.is_empty() {
            return;
        }
        self.work.0.lock().running = true;

        for index in 0..self.pool_size {
            let work = Arc::clone(&self.work);
            let transport = Arc::clone(&self.transport);
            let pending = Arc::clone(&self.pending);
            let failure_sink = Arc::clone(&self.failure_sink);

            workers.push(std::thread::spawn(move || {
                log::debug!("RPC worker {} up.", index);
                loop {
                    let request = {
                        let (lock, condvar) = &*work;
                        let mut state = lock.lock();
                        loop {
                            if !state.running {
                                return;
                            }
                            if let Some(request) = state.queue.pop_front() {
                                break request;
                            }
                            condvar.wait(&mut state);
                        }
                    };

                    if let Err(e) = transport.send(&request.topic, &request.envelope) {
                        log::error!(
                            "Delivery of {} {} to topic '{}' failed: {}",
                            request.envelope.name,
                            request.envelope.message_id,
                            request.topic,
                            e
                        );
                        pending.lock().remove(&request.envelope.message_id);

                        let sink = failure_sink.lock().clone();
                        if let Some(sink) = sink {
                            sink.post_failed_rpc(FailedRpc {
                                request_type: request.envelope.name,
                                binding: request.binding.clone(),
                                error: failure_message(request.envelope.name),
                                message_id: request.envelope.message_id.clone(),
                            });
                        }
                    }
                }
            }));
        }
    }

    /// Stamps a fresh message id, records the pending entry, and hands the
    /// request to the pool. Returns the stamped id.
    pub fn send(&self, mut request: RpcRequest) -> MessageId {
        request.envelope.message_id = MessageId::generate();
        self.enqueue(request)
    }

    /// Re-enqueues a request unchanged; the stable message id makes the
    /// receiver's duplicate filter absorb an answered original.
    pub fn retry(&self, request: RpcRequest) -> MessageId {
        log::info!("Retrying {} {} to topic '{}'.", request.envelope.name, request.envelope.message_id, request.topic);
        self.enqueue(request)
    }

    fn enqueue(&self, request: RpcRequest) -> MessageId {
        let message_id = request.envelope.message_id.clone();

        // Only requests with a response timer stay in the pending table;
        // everything else is fire-and-forget at this layer and resolves
        // through the reservation state machine.
        let deadline = match request.envelope.name {
            RequestType::ClaimDelegation | RequestType::ReclaimDelegation => Some(Instant::now() + self.claim_timeout),
            RequestType::Query => Some(Instant::now() + self.query_timeout),
            _ => None,
        };
        if deadline.is_some() {
            self.pending.lock().insert(
                message_id.clone(),
                PendingEntry { request_type: request.envelope.name, binding: request.binding.clone(), deadline },
            );
        }

        let (lock, condvar) = &*self.work;
        lock.lock().queue.push_back(request);
        condvar.notify_one();
        message_id
    }

    /// Arms a response timer for an operation resumed by recovery: the
    /// original request went out before the restart, so if no response ever
    /// arrives the claim timer turns it into a failure.
    pub fn watch_recovered(&self, request_type: RequestType, binding: RpcBinding) -> MessageId {
        let message_id = MessageId::generate();
        self.pending.lock().insert(
            message_id.clone(),
            PendingEntry { request_type, binding, deadline: Some(Instant::now() + self.claim_timeout) },
        );
        message_id
    }

    /// Called for every inbound envelope. Removes and returns the matched
    /// pending binding when the envelope answers an outstanding request,
    /// which also cancels its timer.
    pub fn match_response(&self, envelope: &Envelope) -> Option<RpcBinding> {
        let request_id = envelope.request_id.as_ref()?;
        self.pending.lock().remove(request_id).map(|entry| entry.binding)
    }

    /// Explicit cancel for a pending request.
    pub fn cancel_pending(&self, message_id: &MessageId) {
        self.pending.lock().remove(message_id);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Fires expired response timers into the failure sink. Driven from the
    /// actor's tick.
    pub fn check_timeouts(&self) {
        let now = Instant::now();
        let expired: Vec<(MessageId, RequestType, RpcBinding)> = {
            let mut pending = self.pending.lock();
            let ids: Vec<MessageId> = pending
                .iter()
                .filter(|(_, entry)| entry.deadline.map(|deadline| deadline <= now).unwrap_or(false))
                .map(|(id, _)| id.clone())
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id).map(|entry| (id, entry.request_type, entry.binding)))
                .collect()
        };

        if expired.is_empty() {
            return;
        }
        let sink = self.failure_sink.lock().clone();
        for (message_id, request_type, binding) in expired {
            log::warn!("Response timer expired for {} {}.", request_type, message_id);
            if let Some(sink) = &sink {
                sink.post_failed_rpc(FailedRpc {
                    request_type,
                    binding,
                    error: failure_message(request_type),
                    message_id,
                });
            }
        }
    }

    /// Inbound duplicate filter keyed by `(message_id, from)`. Returns true
    /// when the message is fresh. A duplicate with a differing payload is a
    /// protocol violation and is reported loudly, but still dropped.
    pub fn register_inbound(&self, envelope: &Envelope, from: &ActorGuid) -> bool {
        let key = format!("{}:{}", envelope.message_id, from);
        let digest = envelope_digest(envelope);

        let mut seen = SEEN_MESSAGES.lock();
        match seen.get(&key) {
            None => {
                seen.insert(key, digest);
                true
            }
            Some(prior) if *prior == digest => {
                log::warn!("Dropping duplicate message {} from {}.", envelope.message_id, from);
                false
            }
            Some(_) => {
                log::error!(
                    "Duplicate message id {} from {} with a different payload; dropping the imposter.",
                    envelope.message_id,
                    from
                );
                false
            }
        }
    }

    /// Drains the worker pool and clears the pending table. Pending callers
    /// are not notified; recovery re-resolves their state on restart.
    pub fn stop(&self) {
        {
            let (lock, condvar) = &*self.work;
            let mut state = lock.lock();
            state.running = false;
            state.queue.clear();
            condvar.notify_all();
        }
        let mut workers = self.workers.lock();
        for worker in workers.drain(..) {
            if worker.join().is_err() {
                log::error!("RPC worker panicked during shutdown.");
            }
        }
        self.pending.lock().clear();
    }
}

fn failure_message(request_type: RequestType) -> String {
    if request_type == RequestType::Query {
        QUERY_TIMEOUT_MESSAGE.to_string()
    } else if request_type.is_claim_like() {
        CLAIM_TIMEOUT_MESSAGE.to_string()
    } else {
        format!("Delivery failed for {}", request_type)
    }
}

fn envelope_digest(envelope: &Envelope) -> u64 {
    let mut hasher = DefaultHasher::new();
    // The serialized form covers every field without requiring Hash on the
    // payload types.
    serde_json::to_string(envelope).unwrap_or_default().hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::message::RequestType;
    use crate::rpc::transport::InProcessBus;
    use crate::util::auth::AuthToken;

    struct CollectingSink {
        failures: Mutex<Vec<FailedRpc>>,
    }

    impl FailureSink for CollectingSink {
        fn post_failed_rpc(&self, failed: FailedRpc) {
            self.failures.lock().push(failed);
        }
    }

    fn caller() -> AuthToken {
        AuthToken::new("orchestrator", ActorGuid::new("o-1"))
    }

    fn request(topic: &str, name: RequestType) -> RpcRequest {
        RpcRequest {
            topic: topic.to_string(),
            envelope: Envelope::new(name, caller(), "reply-topic"),
            binding: RpcBinding::Reservation(Rid::new("r-1")),
        }
    }

    #[test]
    fn delivery_failure_projects_claim_timeout_message() {
        let bus = Arc::new(InProcessBus::new());
        bus.subscribe("broker", Arc::new(|_| {}));
        bus.fail_topic("broker");

        let manager = RpcManager::new(bus);
        let sink = Arc::new(CollectingSink { failures: Mutex::new(Vec::new()) });
        manager.set_failure_sink(sink.clone());
        manager.start();

        manager.send(request("broker", RequestType::Ticket));

        // The pool is asynchronous; wait for the failure to land.
        for _ in 0..100 {
            if !sink.failures.lock().is_empty() {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        let failures = sink.failures.lock();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].error, CLAIM_TIMEOUT_MESSAGE);
        assert_eq!(failures[0].binding, RpcBinding::Reservation(Rid::new("r-1")));
        drop(failures);
        manager.stop();
    }

    #[test]
    fn expired_claim_timer_fires_failure() {
        let bus = Arc::new(InProcessBus::new());
        bus.subscribe("site", Arc::new(|_| {}));

        let manager = RpcManager::with_timeouts(bus, Duration::from_millis(0), Duration::from_millis(0));
        let sink = Arc::new(CollectingSink { failures: Mutex::new(Vec::new()) });
        manager.set_failure_sink(sink.clone());

        manager.watch_recovered(RequestType::Redeem, RpcBinding::Reservation(Rid::new("r-9")));
        manager.check_timeouts();

        let failures = sink.failures.lock();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].error, CLAIM_TIMEOUT_MESSAGE);
    }

    #[test]
    fn duplicate_filter_drops_second_copy() {
        let bus = Arc::new(InProcessBus::new());
        let manager = RpcManager::new(bus);
        let from = ActorGuid::new("peer-1");

        let envelope = Envelope::new(RequestType::UpdateTicket, caller(), "reply");
        assert!(manager.register_inbound(&envelope, &from));
        assert!(!manager.register_inbound(&envelope, &from));

        // Same id, different payload: still dropped, reported loudly.
        let mut imposter = envelope.clone();
        imposter.callback_topic = "elsewhere".to_string();
        assert!(!manager.register_inbound(&imposter, &from));
    }

    #[test]
    fn retry_keeps_the_message_id() {
        let bus = Arc::new(InProcessBus::new());
        let manager = RpcManager::new(bus);

        let prepared = request("site", RequestType::Redeem);
        let first = manager.send(prepared.clone());

        // send() stamps a fresh id; a retry must reuse whatever went out.
        let mut retried = prepared;
        retried.envelope.message_id = first.clone();
        assert_eq!(manager.retry(retried), first);
    }

    #[test]
    fn match_response_cancels_pending_entry() {
        let bus = Arc::new(InProcessBus::new());
        bus.subscribe("site", Arc::new(|_| {}));
        let manager = RpcManager::new(bus);

        let message_id = manager.send(request("site", RequestType::ClaimDelegation));
        assert_eq!(manager.pending_count(), 1);

        let mut response = Envelope::new(RequestType::UpdateDelegation, caller(), "reply");
        response.request_id = Some(message_id);
        assert!(manager.match_response(&response).is_some());
        assert_eq!(manager.pending_count(), 0);
    }
}
