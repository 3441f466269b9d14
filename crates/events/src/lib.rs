//! Event and projection contracts shared by the ledger and container models.

pub mod event;
pub mod projection;

pub use event::Event;
pub use projection::Projection;
