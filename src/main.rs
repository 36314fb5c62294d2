use anyhow::{Context, anyhow};
use chrono::Utc;
use clap::Parser;
use std::sync::Arc;

use testbed_control::actor::{Actor, ActorCore};
use testbed_control::config::{ActorType, Config};
use testbed_control::kernel::Kernel;
use testbed_control::policy::authority_policy::AuthorityUnitPolicy;
use testbed_control::policy::broker_policy::BrokerPoolPolicy;
use testbed_control::policy::client_policy::ClientSimplePolicy;
use testbed_control::policy::ticket_review::TicketReviewPolicy;
use testbed_control::policy::Policy;
use testbed_control::recovery;
use testbed_control::registry::RemoteActorRegistry;
use testbed_control::rpc::manager::RpcManager;
use testbed_control::rpc::transport::InProcessBus;
use testbed_control::store::{ActorRecord, MemStore, Store};
use testbed_control::substrate::handler::NoopHandler;
use testbed_control::substrate::manager::SubstrateManager;
use testbed_control::time::actor_clock::ActorClock;
use testbed_control::time::ticker::Ticker;
use testbed_control::{logger, util::auth::AuthToken};

#[derive(Parser)]
#[command(about = "Testbed resource-leasing control actor")]
struct Cli {
    /// Path to the actor configuration file (JSON).
    #[arg(short, long)]
    config: String,
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(&cli.config) {
        log::error!("Fatal: {:#}", e);
        eprintln!("Fatal: {:#}", e);
        std::process::exit(1);
    }
}

fn run(config_path: &str) -> anyhow::Result<()> {
    let config = Config::load(config_path).with_context(|| format!("loading configuration from {}", config_path))?;
    logger::init_from(&config.logging);

    let actor_config = &config.actor;
    let guid = actor_config.actor_guid();
    let identity = AuthToken::new(actor_config.name.clone(), guid.clone());
    log::info!("Booting {} actor '{}' ({}).", actor_config.actor_type, actor_config.name, guid);

    // Wall-clock anchored cycle arithmetic; -1 anchors at boot time.
    let beginning_of_time = if config.time.start_time < 0 { Utc::now().timestamp_millis() } else { config.time.start_time };
    let clock = ActorClock::new(beginning_of_time, config.time.cycle_millis).map_err(|e| anyhow!("{}", e))?;
    let mut ticker = Ticker::new(clock.clone(), config.time.manual);

    // The bus transport is pluggable; this binary wires the in-process
    // router, which is enough for a single-process federation and tooling.
    let bus = Arc::new(InProcessBus::new());
    let rpc = Arc::new(RpcManager::new(bus.clone()));
    let registry = Arc::new(RemoteActorRegistry::from_peers(&config.peers));
    let store: Arc<dyn Store> = Arc::new(MemStore::new());

    store
        .add_actor(ActorRecord {
            name: actor_config.name.clone(),
            guid: guid.clone(),
            actor_type: actor_config.actor_type.to_string(),
            blob: serde_json::to_string(&config.actor)?,
        })
        .map_err(|e| anyhow!("{}", e))?;

    // The ticket-review gate is the default orchestrator policy; operators
    // can fall back to the plain one by class name.
    let policy: Box<dyn Policy> = match actor_config.actor_type {
        ActorType::Orchestrator if actor_config.policy.class == "client-simple" => Box::new(ClientSimplePolicy::new()),
        ActorType::Orchestrator => Box::new(TicketReviewPolicy::new()),
        ActorType::Broker => Box::new(BrokerPoolPolicy::new()),
        ActorType::Authority => Box::new(AuthorityUnitPolicy::new()),
    };

    let core = ActorCore {
        name: actor_config.name.clone(),
        guid: guid.clone(),
        identity,
        actor_type: actor_config.actor_type,
        topic: actor_config.kafka_topic.clone(),
        kernel: Kernel::new(guid, clock, Arc::clone(&store)),
        policy,
        rpc: Arc::clone(&rpc),
        registry: Arc::clone(&registry),
        substrate: None,
        current_cycle: -1,
        recovered: false,
        last_query_result: None,
    };

    let mut actor = Actor::start(core);
    let handle = actor.handle();

    // The substrate handler reports back through the actor loop, so it can
    // only be built once the loop exists.
    if actor_config.actor_type == ActorType::Authority {
        let handler = Arc::new(NoopHandler::new(actor.completion_sink()));
        let substrate = SubstrateManager::new(actor_config.actor_guid(), Arc::clone(&store), handler);
        handle
            .execute_and_wait(move |core| core.substrate = Some(substrate))
            .map_err(|e| anyhow!("installing substrate: {}", e))?;
    }

    bus.subscribe(actor_config.kafka_topic.clone(), actor.inbox());
    rpc.set_failure_sink(actor.failure_sink());
    rpc.start();

    let recovered = handle.execute_and_wait(|core| recovery::recover(core)).map_err(|e| anyhow!("{}", e))?;
    recovered.map_err(|e| anyhow!("recovery: {}", e))?;

    let resources = actor_config.resources.clone();
    handle
        .execute_and_wait(move |core| {
            if core.actor_type == ActorType::Authority && !core.recovered {
                core.setup_inventory(&resources);
            }
            core.claim_peer_delegations();
        })
        .map_err(|e| anyhow!("{}", e))?;

    recovery::write_superblock(Arc::clone(&store)).map_err(|e| anyhow!("{}", e))?;

    ticker.add_tickable(actor.tickable());
    ticker.start();
    log::info!("Actor '{}' running; press enter to stop.", actor_config.name);

    let mut line = String::new();
    let _ = std::io::stdin().read_line(&mut line);

    log::info!("Shutting down actor '{}'.", actor_config.name);
    ticker.stop();
    rpc.stop();
    actor.stop();
    Ok(())
}
