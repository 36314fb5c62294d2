use serde::{Deserialize, Serialize};

/// Accumulated outcome notices for a reservation or delegation.
///
/// Peers ship their update data with every Update* message; the local side
/// absorbs it so the management API can show the full trail.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateData {
    pub message: String,
    pub events: Vec<String>,
    pub failed: bool,
}

impl UpdateData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { message: message.into(), events: Vec::new(), failed: true }
    }

    /// Records a notice without changing the failure flag.
    pub fn post(&mut self, event: impl Into<String>) {
        self.events.push(event.into());
    }

    /// Records a failure notice and marks the update as failed.
    pub fn post_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        self.events.push(message.clone());
        self.message = message;
        self.failed = true;
    }

    /// Merges a peer's update data into the local record. The peer's primary
    /// message wins if it reported one; notices append.
    pub fn absorb(&mut self, other: &UpdateData) {
        if !other.message.is_empty() {
            self.message = other.message.clone();
        }
        self.events.extend(other.events.iter().cloned());
        self.failed = self.failed || other.failed;
    }

    pub fn successful(&self) -> bool {
        !self.failed
    }

    pub fn clear(&mut self) {
        self.message.clear();
        self.events.clear();
        self.failed = false;
    }
}
