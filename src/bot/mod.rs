//! Subscriber-facing bot: command routing and conversational sessions.

pub mod commands;
pub mod session;

pub use commands::CommandRouter;
pub use session::{SessionState, Sessions};
