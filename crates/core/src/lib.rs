//! Domain building blocks for the warehouse core.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns):
//! identifiers, the shared error taxonomy and aggregate traits.

pub mod aggregate;
pub mod error;
pub mod id;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, ErrorKind};
pub use id::{ContainerId, EventId, LocationId, MovementId, ProductId, QrCode};
