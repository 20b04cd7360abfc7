//! Reflector service.
//!
//! ```text
//! message AckRequest { int64 timestamp = 1; }
//! message AckResult  { int64 timestamp = 1; }
//! ```

use crate::registry::{ExecutionError, MethodRegistry};

pub const ACK: &str = "Reflector.Service.ack";

/// Payload of both the `ack` request and its result.
#[derive(Clone, Copy, PartialEq, Eq, prost::Message)]
pub struct Timestamp {
    #[prost(int64, tag = "1")]
    pub timestamp: i64,
}

/// Echo the caller's timestamp unchanged.
pub fn ack(request: Timestamp) -> Result<Timestamp, ExecutionError> {
    Ok(request)
}

pub fn register(registry: &mut MethodRegistry) {
    registry.register(ACK, ack);
}
