use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::id::{ActorGuid, Rid, SliceId, UnitId};
use crate::util::properties::Properties;
use crate::util::resource_set::{ResourceType, Sliver};

pub const UNIT_BLOB_VERSION: u32 = 1;

/// Handler-driven lifecycle of one physical binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnitState {
    /// Created in the kernel, not yet handed to the handler.
    Default,
    /// Create in flight on the substrate.
    Priming,
    Active,
    /// Modify in flight.
    Modifying,
    /// Delete in flight.
    Closing,
    Closed,
    Failed,
}

impl UnitState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, UnitState::Closed | UnitState::Failed)
    }
}

impl std::fmt::Display for UnitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Authority-side record of one indivisible allocation.
///
/// The sequence number increments every time an action is dispatched to the
/// handler; completions carrying an older number are stale and ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    pub version: u32,
    pub unit_id: UnitId,
    pub reservation_id: Rid,
    pub slice_id: SliceId,
    pub actor_id: ActorGuid,
    pub parent_id: Option<UnitId>,
    pub resource_type: ResourceType,
    pub sliver: Option<Sliver>,
    pub state: UnitState,
    pub sequence: u64,
    pub properties: Properties,
}

impl Unit {
    pub fn new(unit_id: UnitId, reservation_id: Rid, slice_id: SliceId, actor_id: ActorGuid, resource_type: ResourceType) -> Self {
        Self {
            version: UNIT_BLOB_VERSION,
            unit_id,
            reservation_id,
            slice_id,
            actor_id,
            parent_id: None,
            resource_type,
            sliver: None,
            state: UnitState::Default,
            sequence: 0,
            properties: Properties::new(),
        }
    }

    /// Stamps the next action sequence and moves into the in-flight state
    /// for the given action.
    pub fn start_action(&mut self, to: UnitState) -> Result<u64> {
        let legal = matches!(
            (self.state, to),
            (UnitState::Default, UnitState::Priming)
                | (UnitState::Active, UnitState::Modifying)
                | (UnitState::Active, UnitState::Closing)
                | (UnitState::Priming, UnitState::Closing)
                | (UnitState::Modifying, UnitState::Closing)
        );
        if !legal {
            return Err(Error::InvalidState(format!("unit {} cannot start action {} from {}", self.unit_id, to, self.state)));
        }
        self.state = to;
        self.sequence += 1;
        Ok(self.sequence)
    }

    /// Applies a handler completion. Stale sequences are ignored and
    /// reported as `Ok(false)`; `result_code != 0` fails the unit.
    pub fn complete_action(&mut self, sequence: u64, result_code: i64, message: Option<&str>) -> Result<bool> {
        if sequence < self.sequence {
            log::warn!(
                "Ignoring stale completion for unit {}: sequence {} behind {}.",
                self.unit_id,
                sequence,
                self.sequence
            );
            return Ok(false);
        }
        if self.state.is_terminal() {
            return Ok(false);
        }

        if result_code != 0 {
            log::error!(
                "Handler failed unit {} (code {}): {}",
                self.unit_id,
                result_code,
                message.unwrap_or("no message")
            );
            self.state = UnitState::Failed;
            return Ok(true);
        }

        self.state = match self.state {
            UnitState::Priming | UnitState::Modifying => UnitState::Active,
            UnitState::Closing => UnitState::Closed,
            other => {
                return Err(Error::InvalidState(format!("unit {} completion in unexpected state {}", self.unit_id, other)));
            }
        };
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit() -> Unit {
        Unit::new(
            UnitId::new("u-1"),
            Rid::new("r-1"),
            SliceId::new("s-1"),
            ActorGuid::new("site-a"),
            ResourceType::new("vm"),
        )
    }

    #[test]
    fn create_cycle() {
        let mut u = unit();
        let seq = u.start_action(UnitState::Priming).unwrap();
        assert_eq!(seq, 1);
        assert!(u.complete_action(seq, 0, None).unwrap());
        assert_eq!(u.state, UnitState::Active);
    }

    #[test]
    fn stale_completion_is_ignored() {
        let mut u = unit();
        let first = u.start_action(UnitState::Priming).unwrap();
        u.complete_action(first, 0, None).unwrap();
        let second = u.start_action(UnitState::Modifying).unwrap();

        assert!(!u.complete_action(first, 0, None).unwrap());
        assert_eq!(u.state, UnitState::Modifying);

        assert!(u.complete_action(second, 0, None).unwrap());
        assert_eq!(u.state, UnitState::Active);
    }

    #[test]
    fn nonzero_result_code_fails_unit() {
        let mut u = unit();
        let seq = u.start_action(UnitState::Priming).unwrap();
        assert!(u.complete_action(seq, 1, Some("no capacity")).unwrap());
        assert_eq!(u.state, UnitState::Failed);
    }
}
