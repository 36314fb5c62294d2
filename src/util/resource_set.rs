use serde::{Deserialize, Serialize};

use crate::util::properties::Properties;

/// Resource type label, matched against the authority's advertised pools.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceType(pub String);

impl ResourceType {
    pub fn new(label: impl Into<String>) -> Self {
        ResourceType(label.into())
    }
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque per-node fragment of a resource graph. The kernel never looks
/// inside; it only compares and forwards them.
pub type Sliver = serde_json::Value;

/// One shape of resources attached to a reservation: how many units of which
/// type, the graph fragment describing them, and the property bags riding
/// along.
///
/// A reservation carries up to three of these (requested, approved,
/// allocated). Once a reservation is Ticketed its approved set is frozen
/// except through the extend path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceSet {
    pub units: u64,
    pub resource_type: ResourceType,
    pub sliver: Option<Sliver>,
    pub request_properties: Properties,
    pub resource_properties: Properties,
}

impl ResourceSet {
    pub fn new(units: u64, resource_type: ResourceType) -> Self {
        Self { units, resource_type, sliver: None, request_properties: Properties::new(), resource_properties: Properties::new() }
    }

    pub fn with_sliver(mut self, sliver: Sliver) -> Self {
        self.sliver = Some(sliver);
        self
    }

    /// True when the graph fragments differ. Drives the modify-vs-extend
    /// decision on the authority: a term change with an unchanged sliver is
    /// an extend, anything touching the sliver is a modify.
    pub fn sliver_differs(&self, other: &ResourceSet) -> bool {
        self.sliver != other.sliver
    }

    pub fn abstract_clone(&self) -> ResourceSet {
        ResourceSet {
            units: self.units,
            resource_type: self.resource_type.clone(),
            sliver: None,
            request_properties: self.request_properties.clone(),
            resource_properties: Properties::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sliver_difference_detection() {
        let base = ResourceSet::new(1, ResourceType::new("vm")).with_sliver(json!({"core": 2}));
        let same = base.clone();
        let changed = ResourceSet::new(1, ResourceType::new("vm")).with_sliver(json!({"core": 4}));

        assert!(!base.sliver_differs(&same));
        assert!(base.sliver_differs(&changed));
    }
}
