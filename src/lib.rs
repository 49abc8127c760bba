//! # jobmap: key-scoped job coalescing
//!
//! Jobs are submitted under a key. For every key at most one job runs at a
//! time and at most one waits behind it; a newer submission replaces the
//! waiting one. Different keys run fully in parallel.
//!
//! ```rust,no_run
//! use jobmap::{shutdown, Coordinator};
//!
//! #[tokio::main]
//! async fn main() {
//!     let coordinator = Coordinator::<String>::new();
//!     let jobs = coordinator.handle();
//!
//!     tokio::spawn(async move {
//!         jobs.submit("index".to_string(), |_cancel| async { /* rebuild */ }).await;
//!     });
//!
//!     let summary = coordinator.run(shutdown::install_signal_handler()).await;
//!     println!("{} jobs ran", summary.completed);
//! }
//! ```

pub mod core;
pub mod coord;
pub mod shutdown;
pub mod telemetry;

pub use crate::core::config::{CoordinatorConfig, CoordinatorConfigBuilder, OverflowPolicy};
pub use crate::core::errors::{JobMapError, Result, SubmitError};
pub use coord::{Coordinator, JobEvent, JobId, JobKey, JobMapHandle, JobOutcome, RunSummary};

pub use tokio_util::sync::CancellationToken;
