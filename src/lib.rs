//! reelkeeper - video ingest pipeline
//!
//! This library crate holds the binary's wiring and its concrete record
//! store and remote service clients, exposed for integration testing.

pub mod remote;
pub mod setup;
pub mod store;
