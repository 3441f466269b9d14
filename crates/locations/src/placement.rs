//! Capacity-aware placement: pick a location that can take a given quantity.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use wms_core::{DomainError, LocationId, ProductId};

use crate::error::LocationError;
use crate::location::{Location, ZoneType};

/// Estimated physical size of one unit of a product.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Footprint {
    /// kg per unit.
    pub weight: f64,
    /// m³ per unit.
    pub volume: f64,
}

impl Default for Footprint {
    fn default() -> Self {
        Self {
            weight: 1.0,
            volume: 0.0,
        }
    }
}

impl Footprint {
    pub fn times(self, quantity: i64) -> Load {
        let q = quantity.max(0) as f64;
        Load {
            weight: self.weight * q,
            volume: self.volume * q,
        }
    }
}

/// Occupied (or requested) weight and volume.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Load {
    pub weight: f64,
    pub volume: f64,
}

impl Load {
    pub fn add(&mut self, other: Load) {
        self.weight += other.weight;
        self.volume += other.volume;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementRequest {
    pub product_id: ProductId,
    pub quantity: i64,
    pub zone_type: ZoneType,
}

/// The chosen location and how much room it has left before placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementCandidate {
    pub location_id: LocationId,
    pub code: String,
    pub zone_type: ZoneType,
    /// `None` when weight is unlimited.
    pub free_weight: Option<f64>,
    /// `None` when volume is unlimited.
    pub free_volume: Option<f64>,
    /// Highest fill ratio across limited dimensions, before placement.
    pub utilization: f64,
}

fn limit(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v > 0.0)
}

fn ratio(used: f64, max: Option<f64>) -> f64 {
    max.map(|m| used / m).unwrap_or(0.0)
}

/// Select the least-loaded eligible location for `request`.
///
/// Eligible: leaf location of the requested zone, active, pickable when the
/// zone is `picking`, with enough free weight and volume for
/// `quantity × footprint`. Ties are broken by code.
pub fn find_available(
    request: &PlacementRequest,
    footprint: Footprint,
    locations: &[Location],
    loads: &HashMap<LocationId, Load>,
) -> Result<PlacementCandidate, LocationError> {
    if request.quantity <= 0 {
        return Err(DomainError::validation("quantity must be positive").into());
    }

    let parents: HashSet<LocationId> = locations.iter().filter_map(|l| l.parent_id).collect();
    let needed = footprint.times(request.quantity);

    let mut best: Option<PlacementCandidate> = None;
    for location in locations {
        if location.zone_type != request.zone_type
            || !location.is_active
            || parents.contains(&location.id)
        {
            continue;
        }
        if request.zone_type == ZoneType::Picking && !location.is_pickable {
            continue;
        }

        let used = loads.get(&location.id).copied().unwrap_or_default();
        let max_weight = limit(location.max_weight);
        let max_volume = limit(location.max_volume);
        let free_weight = max_weight.map(|m| m - used.weight);
        let free_volume = max_volume.map(|m| m - used.volume);

        let fits_weight = free_weight.is_none_or(|free| needed.weight <= free);
        let fits_volume = free_volume.is_none_or(|free| needed.volume <= free);
        if !fits_weight || !fits_volume {
            continue;
        }

        let candidate = PlacementCandidate {
            location_id: location.id,
            code: location.code.clone(),
            zone_type: location.zone_type,
            free_weight,
            free_volume,
            utilization: ratio(used.weight, max_weight).max(ratio(used.volume, max_volume)),
        };

        let better = match &best {
            None => true,
            Some(current) => candidate
                .utilization
                .total_cmp(&current.utilization)
                .then_with(|| candidate.code.cmp(&current.code))
                .is_lt(),
        };
        if better {
            best = Some(candidate);
        }
    }

    best.ok_or_else(|| LocationError::NoAvailableLocation {
        product_id: request.product_id.to_string(),
        quantity: request.quantity,
        zone_type: request.zone_type,
    })
}
