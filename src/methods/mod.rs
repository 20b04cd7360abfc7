//! Built-in RPC services.
//!
//! ## Services
//! - `reflector`: `Reflector.Service.ack`, echoes a timestamp back to the
//!   caller. Used for liveness and latency checks.
//! - `calculator`: `Calculator.Service.{add,sub,mul,div}` over two `int64`
//!   operands.
//!
//! Method names may also be sent fully qualified with a leading dot
//! (`.Calculator.Service.add`); the registry treats both forms alike.

pub mod calculator;
pub mod reflector;

use crate::registry::MethodRegistry;

/// Register every built-in service.
pub fn register_all(registry: &mut MethodRegistry) {
    reflector::register(registry);
    calculator::register(registry);
}
