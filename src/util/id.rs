use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use uuid::Uuid;

/// Globally unique, printable identifier carried by every kernel entity.
///
/// The phantom tag keeps ids for different entity kinds from being mixed up
/// at compile time while the wire form stays a plain string.
#[derive(PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Id<T> {
    pub id: String,
    _marker: PhantomData<T>,
}

impl<T> Id<T> {
    pub fn new(id: impl Into<String>) -> Self {
        Id { id: id.into(), _marker: PhantomData }
    }

    /// Mints a fresh random identifier.
    pub fn generate() -> Self {
        Id { id: Uuid::new_v4().to_string(), _marker: PhantomData }
    }

    pub fn as_str(&self) -> &str {
        &self.id
    }
}

impl<T> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl<T> From<Id<T>> for String {
    fn from(id_wrapper: Id<T>) -> Self {
        id_wrapper.id
    }
}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let full_name = std::any::type_name::<T>();
        let clean_name = full_name.split("::").last().unwrap_or(full_name);
        let display_name = clean_name.replace("Tag", "Id");

        write!(f, "{}: {:?}", display_name, self.id)
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Copy)]
pub struct ReservationTag;
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Copy)]
pub struct SliceTag;
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Copy)]
pub struct DelegationTag;
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Copy)]
pub struct UnitTag;
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Copy)]
pub struct ActorTag;
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Copy)]
pub struct MessageTag;
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Copy)]
pub struct GraphTag;
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone, Hash, Copy)]
pub struct GraphNodeTag;

/// Reservation id, unique across the federation.
pub type Rid = Id<ReservationTag>;
/// Slice id.
pub type SliceId = Id<SliceTag>;
/// Delegation id.
pub type DelegationId = Id<DelegationTag>;
/// Unit id, one per indivisible physical allocation.
pub type UnitId = Id<UnitTag>;
/// Actor guid.
pub type ActorGuid = Id<ActorTag>;
/// RPC message id, stamped by the RPC manager on every outbound request.
pub type MessageId = Id<MessageTag>;
/// Resource graph id.
pub type GraphId = Id<GraphTag>;
/// Node id within a resource graph.
pub type GraphNodeId = Id<GraphNodeTag>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_are_unique_and_printable() {
        let a = Rid::generate();
        let b = Rid::generate();
        assert_ne!(a, b);
        assert!(!a.to_string().is_empty());
    }

    #[test]
    fn debug_renders_tag_name() {
        let rid = Rid::new("r-1");
        assert_eq!(format!("{:?}", rid), "ReservationId: \"r-1\"");
    }
}
