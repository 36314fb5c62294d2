use serde::{Deserialize, Serialize};

use crate::util::id::ActorGuid;

/// Identifies the principal on whose behalf an action is performed.
///
/// Actors attach their own token to outbound requests; user-facing slices
/// carry the token of the slice owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthToken {
    pub name: String,
    pub guid: ActorGuid,
    pub oidc_sub: Option<String>,
    pub email: Option<String>,
}

impl AuthToken {
    pub fn new(name: impl Into<String>, guid: ActorGuid) -> Self {
        Self { name: name.into(), guid, oidc_sub: None, email: None }
    }

    pub fn with_subject(name: impl Into<String>, guid: ActorGuid, oidc_sub: impl Into<String>, email: impl Into<String>) -> Self {
        Self { name: name.into(), guid, oidc_sub: Some(oidc_sub.into()), email: Some(email.into()) }
    }
}

impl std::fmt::Display for AuthToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}({})", self.name, self.guid)
    }
}
