use std::sync::Arc;

use crate::substrate::unit::Unit;
use crate::util::id::UnitId;
use crate::util::properties::{PROP_ACTION_SEQUENCE, PROP_EXCEPTION_MESSAGE, PROP_RESULT_CODE, PROP_TARGET, Properties};

/// Substrate action a handler performs on a unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerAction {
    Create,
    Modify,
    Delete,
}

impl std::fmt::Display for HandlerAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerAction::Create => write!(f, "create"),
            HandlerAction::Modify => write!(f, "modify"),
            HandlerAction::Delete => write!(f, "delete"),
        }
    }
}

/// Where handlers report completions. Implemented by the actor as an event
/// enqueue; handler threads must never touch kernel state directly.
pub trait CompletionSink: Send + Sync {
    fn configuration_complete(&self, action: HandlerAction, unit_id: UnitId, properties: Properties);
}

/// Substrate plugin contract. All three calls are asynchronous: the handler
/// returns immediately and later reports through the `CompletionSink` it was
/// constructed with.
pub trait Handler: Send + Sync {
    fn create(&self, unit: &Unit);
    fn modify(&self, unit: &Unit);
    fn delete(&self, unit: &Unit);
}

/// Builds the completion property bag a handler sends back.
pub fn completion_properties(unit: &Unit, sequence: u64, result_code: i64, exception: Option<&str>) -> Properties {
    let mut properties = Properties::new();
    properties.insert(PROP_TARGET.to_string(), unit.unit_id.to_string());
    properties.insert(PROP_RESULT_CODE.to_string(), result_code.to_string());
    properties.insert(PROP_ACTION_SEQUENCE.to_string(), sequence.to_string());
    if let Some(message) = exception {
        properties.insert(PROP_EXCEPTION_MESSAGE.to_string(), message.to_string());
    }
    properties
}

/// Test and single-node handler: acknowledges every action on the spot with
/// a configurable result code.
pub struct NoopHandler {
    sink: Arc<dyn CompletionSink>,
    result_code: i64,
}

impl NoopHandler {
    pub fn new(sink: Arc<dyn CompletionSink>) -> Self {
        Self { sink, result_code: 0 }
    }

    pub fn failing(sink: Arc<dyn CompletionSink>, result_code: i64) -> Self {
        Self { sink, result_code }
    }

    fn complete(&self, action: HandlerAction, unit: &Unit) {
        let exception = (self.result_code != 0).then(|| format!("handler {} failed", action));
        let properties = completion_properties(unit, unit.sequence, self.result_code, exception.as_deref());
        self.sink.configuration_complete(action, unit.unit_id.clone(), properties);
    }
}

impl Handler for NoopHandler {
    fn create(&self, unit: &Unit) {
        self.complete(HandlerAction::Create, unit);
    }

    fn modify(&self, unit: &Unit) {
        self.complete(HandlerAction::Modify, unit);
    }

    fn delete(&self, unit: &Unit) {
        self.complete(HandlerAction::Delete, unit);
    }
}
