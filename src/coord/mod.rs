//! Coordinator-based keyed job execution
//!
//! A single control loop owns all running/pending state. Handles and spawned
//! jobs talk to it only through channels.

pub mod types;
pub mod coordinator;
pub mod handle;
mod inflight;
mod table;

pub use types::*;
pub use coordinator::*;
pub use handle::*;
