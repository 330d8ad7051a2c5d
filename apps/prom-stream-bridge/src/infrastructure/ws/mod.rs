//! WebSocket Transport Adapters
//!
//! Server-side transport for client connections: the accept loop,
//! the per-connection control protocol, and the outbound point sink.

pub mod messages;
pub mod server;
pub mod sink;

pub use messages::ControlMessage;
pub use server::{BridgeState, WsServer, WsServerConfig, WsServerError};
pub use sink::WsPointSink;
