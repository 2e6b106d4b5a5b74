//! Control session for the remote console.
//!
//! Provides:
//! - `CommandChannel` - Independent request/response dispatch with timeouts
//! - `EventStream` - Push subscription with explicit, cancelable reconnection
//! - `ControlSession` - Facade wiring both into an `EventLog`

pub mod channel;
pub mod session;
pub mod stream;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::CommandChannel;
pub use session::{ControlSession, SessionOptions};
pub use stream::{EventItems, EventStream, StreamItem};
