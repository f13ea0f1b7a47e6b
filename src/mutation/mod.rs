//! Optimistic mutation controller.
//!
//! A mutation runs through a fixed lifecycle: validate, cancel in-flight
//! fetches, snapshot, optimistic apply, remote call, commit or rollback, and
//! finally an unconditional settle that marks the key for revalidation.

/// Controller and the [`controller::Mutation`] trait.
pub mod controller;
/// Classified mutation errors and controller faults.
pub mod error;
/// Per-invocation lifecycle state.
pub mod state;

pub use controller::{Mutation, MutationController, MutationRequest};
pub use error::{ControllerFault, MutationError};
pub use state::{MutationOutcome, MutationState};
