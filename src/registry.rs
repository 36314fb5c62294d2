use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::{ActorType, PeerConfig};
use crate::util::id::{ActorGuid, DelegationId};

/// Everything the local actor knows about a remote peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteActor {
    pub guid: ActorGuid,
    pub name: String,
    pub actor_type: ActorType,
    pub topic: String,
    /// Delegation the local actor should claim from this peer at boot.
    pub delegation: Option<DelegationId>,
}

/// Whether a pair of actor roles may exchange delegation claims, and in
/// which direction. Brokers claim from authorities; broker-to-broker
/// peering is symmetric, so either side may initiate.
pub fn may_claim(local: ActorType, remote: ActorType) -> bool {
    matches!(
        (local, remote),
        (ActorType::Broker, ActorType::Authority) | (ActorType::Broker, ActorType::Broker)
    )
}

/// Shared table of remote-actor descriptors, loaded from the `peers` config
/// section and occasionally updated at runtime. Updates are rare; a plain
/// mutex around the map is enough.
#[derive(Default)]
pub struct RemoteActorRegistry {
    peers: Mutex<HashMap<ActorGuid, RemoteActor>>,
}

impl RemoteActorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_peers(peers: &[PeerConfig]) -> Self {
        let registry = Self::new();
        for peer in peers {
            registry.add(RemoteActor {
                guid: ActorGuid::new(peer.guid.clone()),
                name: peer.name.clone(),
                actor_type: peer.peer_type,
                topic: peer.kafka_topic.clone(),
                delegation: peer.delegation.clone().map(DelegationId::new),
            });
        }
        registry
    }

    pub fn add(&self, peer: RemoteActor) {
        log::debug!("Registering remote actor '{}' ({}) on topic '{}'.", peer.name, peer.actor_type, peer.topic);
        self.peers.lock().insert(peer.guid.clone(), peer);
    }

    pub fn get(&self, guid: &ActorGuid) -> Option<RemoteActor> {
        self.peers.lock().get(guid).cloned()
    }

    pub fn topic_for(&self, guid: &ActorGuid) -> Option<String> {
        self.get(guid).map(|peer| peer.topic)
    }

    pub fn all(&self) -> Vec<RemoteActor> {
        let mut peers: Vec<RemoteActor> = self.peers.lock().values().cloned().collect();
        peers.sort_by(|a, b| a.guid.cmp(&b.guid));
        peers
    }

    /// Peers advertising a delegation the local actor should claim, filtered
    /// by the role-pair direction rules.
    pub fn claimable_peers(&self, local: ActorType) -> Vec<RemoteActor> {
        self.all().into_iter().filter(|peer| peer.delegation.is_some() && may_claim(local, peer.actor_type)).collect()
    }

    /// First broker peer, the default upstream for client reservations.
    pub fn default_broker(&self) -> Option<RemoteActor> {
        self.all().into_iter().find(|peer| peer.actor_type == ActorType::Broker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(guid: &str, actor_type: ActorType, delegation: Option<&str>) -> PeerConfig {
        PeerConfig {
            name: guid.to_string(),
            peer_type: actor_type,
            guid: guid.to_string(),
            kafka_topic: format!("{}-topic", guid),
            delegation: delegation.map(str::to_string),
        }
    }

    #[test]
    fn claim_direction_rules() {
        assert!(may_claim(ActorType::Broker, ActorType::Authority));
        assert!(may_claim(ActorType::Broker, ActorType::Broker));
        assert!(!may_claim(ActorType::Authority, ActorType::Broker));
        assert!(!may_claim(ActorType::Orchestrator, ActorType::Broker));
    }

    #[test]
    fn claimable_peers_respects_direction_and_delegation() {
        let registry = RemoteActorRegistry::from_peers(&[
            peer("site-a", ActorType::Authority, Some("del-a")),
            peer("site-b", ActorType::Authority, None),
            peer("broker-2", ActorType::Broker, Some("del-b")),
        ]);

        let claimable = registry.claimable_peers(ActorType::Broker);
        assert_eq!(claimable.len(), 2);

        assert!(registry.claimable_peers(ActorType::Orchestrator).is_empty());
    }
}
