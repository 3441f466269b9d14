//! Container domain module.
//!
//! Containers are aggregates: commands are decided against current state and
//! produce events, which also translate into the ledger movements that must
//! be appended with them. No IO happens here.

pub mod container;
pub mod error;
pub mod status;

pub use container::{
    Container, ContainerCommand, ContainerEvent, ContainerRegistered, ContainerRelocated,
    ContentLine, ContentUnpacked, NewContentLine, RegisterContainer, RelocateContainer,
    StatusChanged, UnpackContainer, UpdateContainerStatus,
};
pub use error::ContainerError;
pub use status::{ContainerStatus, ContainerType};
