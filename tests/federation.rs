//! End-to-end scenarios over a three-actor federation: orchestrator,
//! broker, and authority wired through the in-process bus, driven by a
//! manual ticker on 1000 ms cycles.

use std::sync::Arc;
use std::time::Duration;

use testbed_control::actor::{Actor, ActorCore};
use testbed_control::config::{ActorType, ModuleConfig, PeerConfig, ResourceConfig};
use testbed_control::kernel::Kernel;
use testbed_control::kernel::reservation::{PendingOp, Reservation, ReservationCategory, ReservationState};
use testbed_control::kernel::slice::{Slice, SliceState, SliceType};
use testbed_control::policy::Policy;
use testbed_control::policy::authority_policy::AuthorityUnitPolicy;
use testbed_control::policy::broker_policy::BrokerPoolPolicy;
use testbed_control::policy::ticket_review::{CLOSURE_NOTICE, TicketReviewPolicy};
use testbed_control::recovery;
use testbed_control::registry::RemoteActorRegistry;
use testbed_control::rpc::manager::{CLAIM_TIMEOUT_MESSAGE, RpcManager};
use testbed_control::rpc::transport::{BusTransport, InProcessBus};
use testbed_control::store::MemStore;
use testbed_control::substrate::handler::NoopHandler;
use testbed_control::substrate::manager::SubstrateManager;
use testbed_control::time::actor_clock::ActorClock;
use testbed_control::time::ticker::Ticker;
use testbed_control::util::auth::AuthToken;
use testbed_control::util::id::{ActorGuid, Rid, SliceId};
use testbed_control::util::properties::{PROP_BROKER_QUERY_MODEL, PROP_QUERY_ACTION, Properties};
use testbed_control::util::resource_set::{ResourceSet, ResourceType};

const ORCHESTRATOR_TOPIC: &str = "orchestrator-1-topic";
const BROKER_TOPIC: &str = "broker-1-topic";
const AUTHORITY_TOPIC: &str = "site-a-topic";

struct TestActor {
    actor: Actor,
    rpc: Arc<RpcManager>,
    store: MemStore,
}

fn peer(name: &str, peer_type: ActorType, topic: &str, delegation: Option<&str>) -> PeerConfig {
    PeerConfig {
        name: name.to_string(),
        peer_type,
        guid: name.to_string(),
        kafka_topic: topic.to_string(),
        delegation: delegation.map(str::to_string),
    }
}

fn spawn_actor(
    name: &str,
    actor_type: ActorType,
    topic: &str,
    peers: Vec<PeerConfig>,
    bus: &Arc<InProcessBus>,
    clock: &ActorClock,
    store: MemStore,
) -> TestActor {
    let guid = ActorGuid::new(name);
    let transport: Arc<dyn BusTransport> = bus.clone();
    let rpc = Arc::new(RpcManager::new(transport));
    let registry = Arc::new(RemoteActorRegistry::from_peers(&peers));

    let policy: Box<dyn Policy> = match actor_type {
        ActorType::Orchestrator => Box::new(TicketReviewPolicy::new()),
        ActorType::Broker => Box::new(BrokerPoolPolicy::new()),
        ActorType::Authority => Box::new(AuthorityUnitPolicy::new()),
    };

    let core = ActorCore {
        name: name.to_string(),
        guid: guid.clone(),
        identity: AuthToken::new(name, guid.clone()),
        actor_type,
        topic: topic.to_string(),
        kernel: Kernel::new(guid.clone(), clock.clone(), Arc::new(store.clone())),
        policy,
        rpc: Arc::clone(&rpc),
        registry,
        substrate: None,
        current_cycle: -1,
        recovered: false,
        last_query_result: None,
    };

    let actor = Actor::start(core);

    if actor_type == ActorType::Authority {
        let handler = Arc::new(NoopHandler::new(actor.completion_sink()));
        let substrate = SubstrateManager::new(guid.clone(), Arc::new(store.clone()), handler);
        actor.handle().execute_and_wait(move |core| core.substrate = Some(substrate)).unwrap();
    }

    bus.subscribe(topic.to_string(), actor.inbox());
    rpc.set_failure_sink(actor.failure_sink());
    rpc.start();

    TestActor { actor, rpc, store }
}

struct Federation {
    bus: Arc<InProcessBus>,
    clock: ActorClock,
    ticker: Ticker,
    orchestrator: TestActor,
    broker: TestActor,
    authority: TestActor,
}

impl Federation {
    fn build() -> Federation {
        let bus = Arc::new(InProcessBus::new());
        let clock = ActorClock::new(0, 1000).unwrap();

        let orchestrator = spawn_actor(
            "orchestrator-1",
            ActorType::Orchestrator,
            ORCHESTRATOR_TOPIC,
            vec![
                peer("broker-1", ActorType::Broker, BROKER_TOPIC, None),
                peer("site-a", ActorType::Authority, AUTHORITY_TOPIC, None),
            ],
            &bus,
            &clock,
            MemStore::new(),
        );
        let broker = spawn_actor(
            "broker-1",
            ActorType::Broker,
            BROKER_TOPIC,
            vec![
                peer("site-a", ActorType::Authority, AUTHORITY_TOPIC, Some("vm-pool")),
                peer("orchestrator-1", ActorType::Orchestrator, ORCHESTRATOR_TOPIC, None),
            ],
            &bus,
            &clock,
            MemStore::new(),
        );
        let authority = spawn_actor(
            "site-a",
            ActorType::Authority,
            AUTHORITY_TOPIC,
            vec![
                peer("broker-1", ActorType::Broker, BROKER_TOPIC, None),
                peer("orchestrator-1", ActorType::Orchestrator, ORCHESTRATOR_TOPIC, None),
            ],
            &bus,
            &clock,
            MemStore::new(),
        );

        // Authority advertises its pool, broker claims it.
        let inventory = vec![ResourceConfig {
            resource_type: "vm".to_string(),
            label: "vm-pool".to_string(),
            handler: ModuleConfig {
                module: String::new(),
                class: String::new(),
                properties: [("units".to_string(), "10".to_string())].into_iter().collect(),
            },
        }];
        authority.actor.handle().execute_and_wait(move |core| core.setup_inventory(&inventory)).unwrap();
        broker.actor.handle().execute_and_wait(|core| core.claim_peer_delegations()).unwrap();

        let ticker = Ticker::new(clock.clone(), true);
        ticker.add_tickable(orchestrator.actor.tickable());
        ticker.add_tickable(broker.actor.tickable());
        ticker.add_tickable(authority.actor.tickable());

        let federation = Federation { bus, clock, ticker, orchestrator, broker, authority };
        federation.settle();
        federation
    }

    /// Lets in-flight messages cross the worker pool and the actor loops.
    fn settle(&self) {
        for _ in 0..30 {
            let _ = self.orchestrator.actor.handle().execute_and_wait(|_| ());
            let _ = self.broker.actor.handle().execute_and_wait(|_| ());
            let _ = self.authority.actor.handle().execute_and_wait(|_| ());
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn tick_to(&self, cycle: i64) {
        while self.ticker.current_cycle() < cycle {
            self.ticker.tick();
            self.settle();
        }
    }

    fn owner(&self) -> AuthToken {
        AuthToken::new("experimenter", ActorGuid::new("user-1"))
    }

    fn new_client_slice(&self, name: &str) -> SliceId {
        let slice = Slice::new(SliceId::generate(), name, SliceType::Client, self.owner());
        let slice_id = slice.slice_id.clone();
        self.orchestrator.actor.handle().execute_and_wait(move |core| core.kernel.register_slice(slice)).unwrap().unwrap();
        slice_id
    }

    fn demand(&self, slice_id: &SliceId, units: u64, start_cycle: i64, end_cycle: i64) -> Rid {
        let rid = Rid::generate();
        let term = self.clock.term(start_cycle, end_cycle).unwrap();
        let reservation = Reservation::new(
            rid.clone(),
            slice_id.clone(),
            ReservationCategory::Client,
            ResourceSet::new(units, ResourceType::new("vm")),
            term,
            self.owner(),
        );
        self.orchestrator.actor.handle().execute_and_wait(move |core| core.demand_reservation(reservation)).unwrap().unwrap();
        rid
    }

    fn reservation_state(&self, rid: &Rid) -> Option<(ReservationState, PendingOp)> {
        let rid = rid.clone();
        self.orchestrator
            .actor
            .handle()
            .execute_and_wait(move |core| core.kernel.get_reservation(&rid).map(|r| (r.state, r.pending)))
            .unwrap()
    }

    fn reservation(&self, rid: &Rid) -> Option<Reservation> {
        let rid = rid.clone();
        self.orchestrator.actor.handle().execute_and_wait(move |core| core.kernel.get_reservation(&rid).cloned()).unwrap()
    }

    fn slice_state(&self, slice_id: &SliceId) -> Option<SliceState> {
        let slice_id = slice_id.clone();
        self.orchestrator.actor.handle().execute_and_wait(move |core| core.kernel.get_slice(&slice_id).map(|s| s.state)).unwrap()
    }

    fn broker_pool(&self) -> String {
        let mut query = Properties::new();
        query.insert(PROP_QUERY_ACTION.to_string(), "discover".to_string());
        self.broker
            .actor
            .handle()
            .execute_and_wait(move |core| core.policy.query(&query))
            .unwrap()
            .get(PROP_BROKER_QUERY_MODEL)
            .cloned()
            .unwrap_or_default()
    }
}

#[test]
fn happy_path_ticket_redeem_close() {
    let federation = Federation::build();
    assert_eq!(federation.broker_pool(), "vm:10");

    let slice_id = federation.new_client_slice("happy-path");
    let rid = federation.demand(&slice_id, 1, 5, 10);

    federation.tick_to(5);
    assert_eq!(federation.reservation_state(&rid), Some((ReservationState::Active, PendingOp::None)));
    assert_eq!(federation.broker_pool(), "vm:9");

    federation.tick_to(11);
    assert_eq!(federation.reservation_state(&rid), Some((ReservationState::Closed, PendingOp::None)));
    assert_eq!(federation.slice_state(&slice_id), Some(SliceState::Dead));
    assert_eq!(federation.broker_pool(), "vm:10");
}

#[test]
fn transport_failure_fails_reservation_with_claim_timeout() {
    let federation = Federation::build();
    federation.bus.fail_topic(BROKER_TOPIC);

    let slice_id = federation.new_client_slice("unreachable-broker");
    let rid = federation.demand(&slice_id, 1, 5, 10);
    federation.settle();

    let reservation = federation.reservation(&rid).unwrap();
    assert_eq!(reservation.state, ReservationState::Failed);
    assert_eq!(reservation.update_data.message, CLAIM_TIMEOUT_MESSAGE);
}

#[test]
fn ticketing_failure_closes_slice_via_ticket_review() {
    let federation = Federation::build();
    let slice_id = federation.new_client_slice("partial-failure");

    let good_one = federation.demand(&slice_id, 1, 5, 50);
    let good_two = federation.demand(&slice_id, 1, 5, 50);
    // More units than the whole pool: the broker rejects this one.
    let doomed = federation.demand(&slice_id, 20, 5, 50);

    federation.tick_to(4);

    assert_eq!(federation.reservation_state(&doomed).map(|s| s.0), Some(ReservationState::Failed));
    assert_eq!(federation.reservation_state(&good_one), Some((ReservationState::Closed, PendingOp::None)));
    assert_eq!(federation.reservation_state(&good_two), Some((ReservationState::Closed, PendingOp::None)));

    let closed = federation.reservation(&good_one).unwrap();
    assert!(closed.update_data.events.iter().any(|event| event == CLOSURE_NOTICE));

    assert_eq!(federation.slice_state(&slice_id), Some(SliceState::Dead));
    assert_eq!(federation.broker_pool(), "vm:10");
}

#[test]
fn extend_runs_ticket_then_lease_and_keeps_reservation_active() {
    let federation = Federation::build();
    let slice_id = federation.new_client_slice("extend");
    let rid = federation.demand(&slice_id, 1, 5, 10);

    federation.tick_to(8);
    assert_eq!(federation.reservation_state(&rid), Some((ReservationState::Active, PendingOp::None)));

    let current = federation.reservation(&rid).unwrap();
    let extended = current.term.extend(chrono::Duration::seconds(10)).unwrap();
    let resources = current.requested.clone();
    {
        let rid = rid.clone();
        federation
            .orchestrator
            .actor
            .handle()
            .execute_and_wait(move |core| core.extend_reservation(&rid, resources, extended))
            .unwrap()
            .unwrap();
    }

    federation.tick_to(12);

    let reservation = federation.reservation(&rid).unwrap();
    assert_eq!(reservation.state, ReservationState::Active);
    assert_eq!(reservation.pending, PendingOp::None);
    assert_eq!(reservation.term.new_start, Some(federation.clock.cycle_start_date(10)));
    assert_eq!(reservation.term.end, federation.clock.cycle_start_date(20));
}

#[test]
fn broker_answers_model_queries_over_the_bus() {
    let federation = Federation::build();

    let broker_guid = ActorGuid::new("broker-1");
    let mut query = Properties::new();
    query.insert(PROP_QUERY_ACTION.to_string(), "discover".to_string());
    federation
        .orchestrator
        .actor
        .handle()
        .execute_and_wait(move |core| core.query_peer(&broker_guid, query))
        .unwrap()
        .unwrap();
    federation.settle();

    let result = federation.orchestrator.actor.handle().execute_and_wait(|core| core.last_query_result.clone()).unwrap();
    assert_eq!(result.unwrap().get(PROP_BROKER_QUERY_MODEL).map(String::as_str), Some("vm:10"));
}

#[test]
fn recovery_reindexes_and_times_out_the_pending_redeem() {
    let federation = Federation::build();

    // The authority goes silent (messages are delivered into a void), so
    // the redeem never gets an answer.
    federation.bus.subscribe(AUTHORITY_TOPIC.to_string(), Arc::new(|_| {}));

    let slice_id = federation.new_client_slice("recovery");
    let rid = federation.demand(&slice_id, 1, 5, 10);
    federation.tick_to(3);

    assert_eq!(federation.reservation_state(&rid), Some((ReservationState::Ticketed, PendingOp::Redeeming)));

    // Clean shutdown of the orchestrator.
    let store = federation.orchestrator.store.clone();
    federation.orchestrator.actor.handle().execute_and_wait(|core| core.write_superblock()).unwrap().unwrap();
    let Federation { mut orchestrator, .. } = federation;
    orchestrator.rpc.stop();
    orchestrator.actor.stop();

    // Restart against the same store, with immediate claim timers.
    let bus = Arc::new(InProcessBus::new());
    let clock = ActorClock::new(0, 1000).unwrap();
    let guid = ActorGuid::new("orchestrator-1");
    let transport: Arc<dyn BusTransport> = bus.clone();
    let rpc = Arc::new(RpcManager::with_timeouts(transport, Duration::from_millis(0), Duration::from_millis(0)));

    let core = ActorCore {
        name: "orchestrator-1".to_string(),
        guid: guid.clone(),
        identity: AuthToken::new("orchestrator-1", guid.clone()),
        actor_type: ActorType::Orchestrator,
        topic: ORCHESTRATOR_TOPIC.to_string(),
        kernel: Kernel::new(guid.clone(), clock, Arc::new(store.clone())),
        policy: Box::new(TicketReviewPolicy::new()),
        rpc: Arc::clone(&rpc),
        registry: Arc::new(RemoteActorRegistry::from_peers(&[])),
        substrate: None,
        current_cycle: -1,
        recovered: false,
        last_query_result: None,
    };
    let restarted = Actor::start(core);
    rpc.set_failure_sink(restarted.failure_sink());

    restarted.handle().execute_and_wait(|core| recovery::recover(core)).unwrap().unwrap();

    let rid_check = rid.clone();
    let recovered_state = restarted
        .handle()
        .execute_and_wait(move |core| core.kernel.get_reservation(&rid_check).map(|r| (r.state, r.pending)))
        .unwrap();
    assert_eq!(recovered_state, Some((ReservationState::Ticketed, PendingOp::Redeeming)));

    // The watched redeem has an expired timer; firing it fails the
    // reservation.
    rpc.check_timeouts();
    std::thread::sleep(Duration::from_millis(50));

    let rid_check = rid.clone();
    let final_state =
        restarted.handle().execute_and_wait(move |core| core.kernel.get_reservation(&rid_check).map(|r| r.state)).unwrap();
    assert_eq!(final_state, Some(ReservationState::Failed));
}

#[test]
fn nascent_sibling_gates_redemption_until_ticketed() {
    let federation = Federation::build();
    let slice_id = federation.new_client_slice("nascent-gate");

    let first = federation.demand(&slice_id, 1, 5, 50);
    let failed = federation.demand(&slice_id, 1, 5, 50);

    // Third member of the slice exists but is not demanded yet, so it stays
    // Nascent.
    let nascent = Rid::generate();
    {
        let term = federation.clock.term(5, 50).unwrap();
        let reservation = Reservation::new(
            nascent.clone(),
            slice_id.clone(),
            ReservationCategory::Client,
            ResourceSet::new(1, ResourceType::new("vm")),
            term,
            federation.owner(),
        );
        federation.orchestrator.actor.handle().execute_and_wait(move |core| core.kernel.register_reservation(reservation)).unwrap().unwrap();
    }

    federation.tick_to(1);
    assert_eq!(federation.reservation_state(&first).map(|s| s.0), Some(ReservationState::Ticketed));
    assert_eq!(federation.reservation_state(&failed).map(|s| s.0), Some(ReservationState::Ticketed));

    // A downstream failure on a ticketed sibling: absorbing, but not a
    // reason to hold the gate.
    {
        let rid = failed.clone();
        federation
            .orchestrator
            .actor
            .handle()
            .execute_and_wait(move |core| core.kernel.fail(&rid, "authority failure during redeem"))
            .unwrap()
            .unwrap();
    }

    federation.tick_to(2);
    // Gate holds: the nascent sibling blocks redemption.
    assert_eq!(federation.reservation_state(&first), Some((ReservationState::Ticketed, PendingOp::None)));

    // Demand the nascent one; once it is Ticketed the gate opens.
    {
        let rid = nascent.clone();
        federation
            .orchestrator
            .actor
            .handle()
            .execute_and_wait(move |core| {
                let effects = core.kernel.demand(&rid)?;
                core.apply_effects(effects, None);
                Ok::<(), testbed_control::Error>(())
            })
            .unwrap()
            .unwrap();
    }

    federation.tick_to(5);

    assert_eq!(federation.reservation_state(&first).map(|s| s.0), Some(ReservationState::Active));
    assert_eq!(federation.reservation_state(&nascent).map(|s| s.0), Some(ReservationState::Active));
    // Terminal states absorb; the failed sibling stays failed.
    assert_eq!(federation.reservation_state(&failed).map(|s| s.0), Some(ReservationState::Failed));
}
