//! Request handlers shared by the HTTP routes and the WebSocket loop.

mod sync;
mod websocket;

pub use sync::*;
pub use websocket::*;
