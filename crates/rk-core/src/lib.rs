//! rk-core: shared types, IDs, errors, configuration, and progress events.
//!
//! This crate is the foundational dependency for all other rk-* crates,
//! providing type-safe identifiers, a unified error type, application
//! configuration, and the progress event types plus a broadcast event bus.

pub mod config;
pub mod error;
pub mod events;
pub mod ids;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, Result};
pub use events::{ProgressEvent, ProgressReporter, ProgressStatus, SubProgress};
pub use ids::*;
