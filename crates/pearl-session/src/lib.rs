//! Session orchestration for PEARL GPU instances.
//!
//! A [`Session`] owns one instance connection at a time. It provisions or
//! reuses instances through the REST port, serializes intents into an
//! [`OutboundQueue`], gates sends on the instance status and routes worker
//! push messages to the downstream reducers through the dispatch port.
//!
//! Modules:
//! - `queue`: outbound FIFO with express insertion
//! - `state`: status machine driver and send discipline
//! - `router`: inbound dispatch table
//! - `session`: intent operations and connection lifecycle

mod config;
mod queue;
mod router;
mod session;
mod state;

#[cfg(test)]
mod testing;

pub use config::SessionConfig;
pub use queue::{OutboundQueue, QueuedMessage};
pub use session::{Session, SessionBuilder};
