//! Client Control Message Types
//!
//! Wire format types for deserializing control messages received on a client
//! WebSocket connection. Every inbound text frame is expected to be a JSON
//! object with a `type` discriminator; frames that fail to parse are dropped
//! by the connection handler without terminating the session.
//!
//! # Message Types
//!
//! - `start`: Begin a named subscription (query, label list, step, history)
//! - `stop`: Cancel one subscription by id
//! - `reset`: Cancel every subscription on the connection
//!
//! # Examples
//!
//! ```json
//! {"type": "start", "id": "cpu", "query": "rate(cpu_seconds[1m])", "metrics": ["job"], "step": 5, "history": 60}
//! {"type": "stop", "id": "cpu"}
//! {"type": "reset"}
//! ```

use serde::Deserialize;

use crate::domain::subscription::StartRequest;

// =============================================================================
// Control Messages
// =============================================================================

/// A control message sent by a client over its WebSocket connection.
///
/// Unknown `type` values and structurally invalid payloads surface as serde
/// errors; the caller treats both the same way as any other malformed frame.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ControlMessage {
    /// Begin a new subscription described by the embedded request.
    Start(StartRequest),
    /// Cancel the subscription with the given id.
    Stop {
        /// Id of the subscription to cancel.
        id: String,
    },
    /// Cancel every subscription on this connection.
    Reset,
}

// =============================================================================
// Tests
// =============================================================================
