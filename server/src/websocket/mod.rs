//! Real-time delivery to connected devices.
//!
//! Devices hold a WebSocket open while the app is in the foreground. The
//! [`ConnectionRegistry`] tracks one transport per (user, device) and the
//! [`SyncBroadcaster`] fans resolved carts out to every device of a user
//! except the one that made the change.

mod broadcast;
mod protocol;
mod registry;
mod transport;

pub use broadcast::{BroadcastReport, DeliveryState, DeliveryTracker, SyncBroadcaster};
pub use protocol::*;
pub use registry::{Connection, ConnectionId, ConnectionRegistry};
pub use transport::{DeviceTransport, MessageSender, TransportError};
