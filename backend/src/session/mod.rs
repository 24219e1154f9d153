//! One page controller per websocket client, coordinating the workers.

pub mod controller;
pub mod protocol;

pub use controller::{Session, SessionClosed};
pub use protocol::{ClientMessage, ServerMessage};
