//! In-memory authoritative cache store.

/// Cache store with optimistic shadowing and fetch generations.
pub mod store;
