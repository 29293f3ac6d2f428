//! Store adapters that live inside the domain crate for convenience.
//!
//! The in-memory store backs unit tests and local demos. The Datastore
//! adapter lives in its own crate.

pub mod memory_store;
