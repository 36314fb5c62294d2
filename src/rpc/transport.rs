use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::rpc::message::Envelope;

/// Message-bus seam. One call: write an envelope to a peer's topic. The
/// production transport sits on the configured bus; tests use the
/// in-process router below.
pub trait BusTransport: Send + Sync {
    fn send(&self, topic: &str, envelope: &Envelope) -> Result<()>;
}

type Inbox = Arc<dyn Fn(Envelope) + Send + Sync>;

/// Routes topics to in-process inboxes. Envelopes take a serialize/parse
/// round trip so the wire form is exercised even without a real bus.
/// `fail_topic` makes deliveries to a topic report a permanent failure,
/// which is how tests exercise the failure projection path.
#[derive(Default)]
pub struct InProcessBus {
    inboxes: RwLock<HashMap<String, Inbox>>,
    failed_topics: RwLock<HashSet<String>>,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, topic: impl Into<String>, inbox: Inbox) {
        self.inboxes.write().insert(topic.into(), inbox);
    }

    pub fn fail_topic(&self, topic: impl Into<String>) {
        self.failed_topics.write().insert(topic.into());
    }

    pub fn restore_topic(&self, topic: &str) {
        self.failed_topics.write().remove(topic);
    }
}

impl BusTransport for InProcessBus {
    fn send(&self, topic: &str, envelope: &Envelope) -> Result<()> {
        if self.failed_topics.read().contains(topic) {
            return Err(Error::NetworkPermanent(format!("topic {} unreachable", topic)));
        }

        let inbox = self.inboxes.read().get(topic).cloned();
        let Some(inbox) = inbox else {
            return Err(Error::NetworkPermanent(format!("no subscriber on topic {}", topic)));
        };

        let wire = serde_json::to_string(envelope).map_err(Error::DeserializationError)?;
        let delivered: Envelope = serde_json::from_str(&wire).map_err(Error::DeserializationError)?;
        inbox(delivered);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::message::RequestType;
    use crate::util::auth::AuthToken;
    use crate::util::id::ActorGuid;
    use parking_lot::Mutex;

    #[test]
    fn delivery_round_trips_through_the_wire_form() {
        let bus = InProcessBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe("broker-topic", Arc::new(move |envelope| sink.lock().push(envelope)));

        let envelope = Envelope::new(RequestType::Ticket, AuthToken::new("orchestrator", ActorGuid::new("o-1")), "orchestrator-topic");
        bus.send("broker-topic", &envelope).unwrap();

        let received = seen.lock();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0], envelope);
    }

    #[test]
    fn failed_topic_reports_permanent_error() {
        let bus = InProcessBus::new();
        bus.subscribe("t", Arc::new(|_| {}));
        bus.fail_topic("t");

        let envelope = Envelope::new(RequestType::Ticket, AuthToken::new("o", ActorGuid::new("o-1")), "back");
        assert!(matches!(bus.send("t", &envelope), Err(Error::NetworkPermanent(_))));

        bus.restore_topic("t");
        assert!(bus.send("t", &envelope).is_ok());
    }
}
