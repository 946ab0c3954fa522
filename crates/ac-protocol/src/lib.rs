//! Canonical data model and wire protocol for the agent execution control plane.
//!
//! This crate has no I/O of its own: it defines the types that cross the
//! boundary between the Control Plane and the Execution Plane (§3, §4.7,
//! §6.1 of the design), plus the shared error taxonomy (§7) that both sides
//! map their own errors onto.

pub mod error;
pub mod events;
pub mod model;
pub mod runner;

pub use error::Error;
