use std::collections::BTreeMap;

/// Ordered string map used for request/resource/config properties and for
/// handler completion payloads.
pub type Properties = BTreeMap<String, String>;

pub const PROP_TARGET: &str = "target";
pub const PROP_RESULT_CODE: &str = "result_code";
pub const PROP_ACTION_SEQUENCE: &str = "action_sequence_number";
pub const PROP_EXCEPTION_MESSAGE: &str = "exception_message";

/// Key under which a broker publishes its query model (§ query subsystem).
pub const PROP_BROKER_QUERY_MODEL: &str = "broker_query_model";
/// Query action requested by a peer.
pub const PROP_QUERY_ACTION: &str = "query_action";
pub const QUERY_ACTION_DISCOVER: &str = "discover";
