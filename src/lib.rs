//! protobuf-rpc: a protobuf request/response RPC server
//!
//! Clients send `Rpc.Request` envelopes naming a method, the server routes
//! each one through its method registry and answers with an `Rpc.Response`
//! carrying the same id.
//!
//! Features:
//! - Length-prefixed TCP or WebSocket transport
//! - Built-in `Reflector` and `Calculator` services
//! - Typed handler registration for custom methods
//! - Configurable handling of malformed envelopes
//! - Configuration via CLI arguments or TOML file

pub mod client;
pub mod config;
pub mod envelope;
pub mod methods;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod transport;
