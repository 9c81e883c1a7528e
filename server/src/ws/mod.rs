pub mod actor;
pub mod handler;
pub mod protocol;
pub mod rooms;
pub mod sessions;

use tokio::sync::mpsc;
use uuid::Uuid;

/// Opaque identifier for one live WebSocket connection.
/// Generated server-side at upgrade time; never supplied by the client.
pub type ConnectionId = Uuid;

/// Type alias for the sender half of a WebSocket connection's channel.
/// Other parts of the system can clone this to push messages to a specific client.
pub type ConnectionSender = mpsc::UnboundedSender<axum::extract::ws::Message>;
