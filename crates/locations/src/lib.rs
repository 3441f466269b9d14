//! Location hierarchy (materialized paths).
//!
//! Pure domain logic: validation of new locations against their parent,
//! path/level derivation, patch merging, descendant selection, tree assembly
//! and capacity-aware placement. Storage lives in `wms-infra`.

pub mod error;
pub mod location;
pub mod placement;
pub mod tree;

pub use error::LocationError;
pub use location::{
    descendants, Location, LocationDraft, LocationNode, LocationPatch, LocationPath, NewLocation,
    ZoneType, MAX_LEVEL,
};
pub use placement::{find_available, Footprint, Load, PlacementCandidate, PlacementRequest};
pub use tree::{LocationTree, TreeNode};
