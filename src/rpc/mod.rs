pub mod manager;
pub mod message;
pub mod transport;

pub use manager::{FailedRpc, FailureSink, RpcBinding, RpcManager, RpcRequest};
pub use message::{DelegationPayload, Envelope, RequestType, ReservationPayload, SlicePayload};
pub use transport::{BusTransport, InProcessBus};
