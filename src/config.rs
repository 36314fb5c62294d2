use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::loader::parser::parse_json_file;
use crate::util::id::ActorGuid;

/// Role a federation member plays. Determines which reservation flavors its
/// kernel hosts and which peers it may claim delegations from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActorType {
    Orchestrator,
    Broker,
    Authority,
}

impl std::fmt::Display for ActorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActorType::Orchestrator => write!(f, "orchestrator"),
            ActorType::Broker => write!(f, "broker"),
            ActorType::Authority => write!(f, "authority"),
        }
    }
}

fn default_request_timeout_millis() -> u64 {
    120_000
}

fn default_rpc_request_timeout_seconds() -> u64 {
    900
}

/// Message-bus runtime settings. The transport itself lives behind
/// `rpc::transport::BusTransport`; these knobs are forwarded to whichever
/// implementation is plugged in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub bus_servers: String,
    #[serde(default)]
    pub schema_registry: String,
    #[serde(default)]
    pub sasl_username: String,
    #[serde(default)]
    pub sasl_password: String,
    #[serde(default)]
    pub ssl_ca_location: String,
    #[serde(default)]
    pub group_id: String,
    #[serde(default = "default_request_timeout_millis")]
    pub request_timeout_millis: u64,
    #[serde(default = "default_rpc_request_timeout_seconds")]
    pub rpc_request_timeout_seconds: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            bus_servers: String::new(),
            schema_registry: String::new(),
            sasl_username: String::new(),
            sasl_password: String::new(),
            ssl_ca_location: String::new(),
            group_id: String::new(),
            request_timeout_millis: default_request_timeout_millis(),
            rpc_request_timeout_seconds: default_rpc_request_timeout_seconds(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_retain() -> u32 {
    5
}

fn default_log_size() -> u64 {
    50_000_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default, alias = "log-directory")]
    pub log_directory: String,
    #[serde(default, alias = "log-file")]
    pub log_file: String,
    #[serde(default = "default_log_level", alias = "log-level")]
    pub log_level: String,
    #[serde(default = "default_log_retain", alias = "log-retain")]
    pub log_retain: u32,
    #[serde(default = "default_log_size", alias = "log-size")]
    pub log_size: u64,
    #[serde(default)]
    pub logger: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_directory: String::new(),
            log_file: String::new(),
            log_level: default_log_level(),
            log_retain: default_log_retain(),
            log_size: default_log_size(),
            logger: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OAuthConfig {
    #[serde(default)]
    pub jwks_url: String,
    #[serde(default)]
    pub key_refresh_interval: String,
    #[serde(default)]
    pub verify_exp: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub db_user: String,
    #[serde(default)]
    pub db_password: String,
    #[serde(default)]
    pub db_name: String,
    #[serde(default)]
    pub db_host: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerConfig {
    #[serde(default)]
    pub container_guid: String,
}

fn default_start_time() -> i64 {
    -1
}

fn default_cycle_millis() -> u64 {
    1000
}

/// Clock settings. `start_time = -1` means "beginning of time is now";
/// `manual = true` disables the background ticker thread so tests and tools
/// drive cycles explicitly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeConfig {
    #[serde(default = "default_start_time", alias = "start-time")]
    pub start_time: i64,
    #[serde(default = "default_cycle_millis", alias = "cycle-millis")]
    pub cycle_millis: u64,
    #[serde(default)]
    pub manual: bool,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self { start_time: default_start_time(), cycle_millis: default_cycle_millis(), manual: false }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Neo4jConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub import_host_dir: String,
    #[serde(default)]
    pub import_dir: String,
}

/// A pluggable module reference: which policy/handler/control to load and
/// its free-form properties.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModuleConfig {
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub class: String,
    #[serde(default)]
    pub properties: std::collections::BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub handler: ModuleConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default)]
    pub module: String,
    #[serde(default)]
    pub class: String,
    #[serde(rename = "type", default)]
    pub resource_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorConfig {
    pub name: String,
    pub guid: String,
    #[serde(rename = "type")]
    pub actor_type: ActorType,
    #[serde(default, alias = "kafka-topic")]
    pub kafka_topic: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub substrate_file: String,
    #[serde(default)]
    pub policy: ModuleConfig,
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
    #[serde(default)]
    pub controls: Vec<ControlConfig>,
}

impl ActorConfig {
    pub fn actor_guid(&self) -> ActorGuid {
        ActorGuid::new(self.guid.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub peer_type: ActorType,
    pub guid: String,
    #[serde(default, alias = "kafka-topic")]
    pub kafka_topic: String,
    /// Delegation the local actor should claim from this peer, if any.
    #[serde(default)]
    pub delegation: Option<String>,
}

/// Top-level declarative configuration (§ runtime file). Unknown keys are
/// ignored so operator files can carry extra sections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub oauth: OAuthConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub container: ContainerConfig,
    #[serde(default)]
    pub time: TimeConfig,
    #[serde(default)]
    pub neo4j: Neo4jConfig,
    pub actor: ActorConfig,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
    #[serde(default)]
    pub bqm: Option<serde_json::Value>,
    #[serde(default)]
    pub pdp: Option<serde_json::Value>,
}

impl Config {
    pub fn load(file_path: &str) -> Result<Config> {
        let config: Config = parse_json_file(file_path)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.actor.name.is_empty() {
            return Err(Error::InvalidArgument("actor.name must not be empty".to_string()));
        }
        if self.actor.guid.is_empty() {
            return Err(Error::InvalidArgument("actor.guid must not be empty".to_string()));
        }
        if self.time.cycle_millis == 0 {
            return Err(Error::InvalidArgument("time.cycle_millis must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_actor_config_parses_with_defaults() {
        let raw = r#"{
            "actor": {"name": "broker-1", "guid": "b1-guid", "type": "broker", "kafka-topic": "broker-1-topic"}
        }"#;

        let config: Config = serde_json::from_str(raw).unwrap();
        assert_eq!(config.actor.actor_type, ActorType::Broker);
        assert_eq!(config.actor.kafka_topic, "broker-1-topic");
        assert_eq!(config.runtime.request_timeout_millis, 120_000);
        assert_eq!(config.runtime.rpc_request_timeout_seconds, 900);
        assert_eq!(config.time.cycle_millis, 1000);
        assert_eq!(config.time.start_time, -1);
        assert!(!config.time.manual);
    }

    #[test]
    fn cycle_millis_zero_is_rejected() {
        let config = Config {
            runtime: RuntimeConfig::default(),
            logging: LoggingConfig::default(),
            oauth: OAuthConfig::default(),
            database: DatabaseConfig::default(),
            container: ContainerConfig::default(),
            time: TimeConfig { start_time: -1, cycle_millis: 0, manual: true },
            neo4j: Neo4jConfig::default(),
            actor: ActorConfig {
                name: "a".to_string(),
                guid: "g".to_string(),
                actor_type: ActorType::Authority,
                kafka_topic: String::new(),
                description: String::new(),
                substrate_file: String::new(),
                policy: ModuleConfig::default(),
                resources: Vec::new(),
                controls: Vec::new(),
            },
            peers: Vec::new(),
            bqm: None,
            pdp: None,
        };

        assert!(config.validate().is_err());
    }
}
