use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use wms_core::{DomainError, LocationId};

use crate::error::LocationError;

/// Deepest level a location may sit at (warehouse → zone → rack → section → cell).
pub const MAX_LEVEL: u8 = 5;

const MAX_NAME_LEN: usize = 100;
const MAX_CODE_LEN: usize = 64;

/// Functional zone a location belongs to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneType {
    Receiving,
    Storage,
    Picking,
    Packing,
    Shipping,
    Quarantine,
}

impl ZoneType {
    pub fn as_str(self) -> &'static str {
        match self {
            ZoneType::Receiving => "receiving",
            ZoneType::Storage => "storage",
            ZoneType::Picking => "picking",
            ZoneType::Packing => "packing",
            ZoneType::Shipping => "shipping",
            ZoneType::Quarantine => "quarantine",
        }
    }
}

impl core::fmt::Display for ZoneType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ZoneType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "receiving" => Ok(ZoneType::Receiving),
            "storage" => Ok(ZoneType::Storage),
            "picking" => Ok(ZoneType::Picking),
            "packing" => Ok(ZoneType::Packing),
            "shipping" => Ok(ZoneType::Shipping),
            "quarantine" => Ok(ZoneType::Quarantine),
            other => Err(DomainError::validation(format!(
                "zone_type must be one of: receiving, storage, picking, packing, shipping, quarantine (got '{other}')"
            ))),
        }
    }
}

/// Materialized ancestry of a location: ancestor ids root-first, ending with
/// the location's own id. Rendered as `1.4.9`.
///
/// `a` is an ancestor of `b` iff `a`'s segments are a strict prefix of `b`'s.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LocationPath(Vec<LocationId>);

impl LocationPath {
    pub fn root(id: LocationId) -> Self {
        Self(vec![id])
    }

    pub fn child(&self, id: LocationId) -> Self {
        let mut segments = self.0.clone();
        segments.push(id);
        Self(segments)
    }

    pub fn segments(&self) -> &[LocationId] {
        &self.0
    }

    /// Number of segments; equals the location's level.
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn leaf(&self) -> Option<LocationId> {
        self.0.last().copied()
    }

    pub fn is_strict_ancestor_of(&self, other: &LocationPath) -> bool {
        other.0.len() > self.0.len() && other.0.starts_with(&self.0)
    }
}

impl core::fmt::Display for LocationPath {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for (idx, seg) in self.0.iter().enumerate() {
            if idx > 0 {
                f.write_str(".")?;
            }
            write!(f, "{seg}")?;
        }
        Ok(())
    }
}

impl FromStr for LocationPath {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let segments = s
            .split('.')
            .map(LocationId::from_str)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| DomainError::validation(format!("invalid location path '{s}': {e}")))?;
        if segments.is_empty() {
            return Err(DomainError::validation("location path cannot be empty"));
        }
        Ok(Self(segments))
    }
}

impl TryFrom<String> for LocationPath {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LocationPath> for String {
    fn from(value: LocationPath) -> Self {
        value.to_string()
    }
}

/// A storage location in the warehouse hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    pub code: String,
    pub name: String,
    pub zone_type: ZoneType,
    pub level: u8,
    pub path: LocationPath,
    pub parent_id: Option<LocationId>,
    /// Maximum load in kg; `None` or `0` means unlimited.
    pub max_weight: Option<f64>,
    /// Maximum volume in m³; `None` or `0` means unlimited.
    pub max_volume: Option<f64>,
    pub is_active: bool,
    pub is_pickable: bool,
    pub metadata: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Location {
    pub fn is_descendant_of(&self, ancestor: &Location) -> bool {
        ancestor.path.is_strict_ancestor_of(&self.path)
    }

    /// Reject placing stock or containers into this location when inactive.
    pub fn ensure_accepts_placement(&self) -> Result<(), LocationError> {
        if self.is_active {
            Ok(())
        } else {
            Err(LocationError::Inactive(self.code.clone()))
        }
    }

    pub fn node(&self, depth: u8) -> LocationNode {
        LocationNode {
            id: self.id,
            code: self.code.clone(),
            name: self.name.clone(),
            zone_type: self.zone_type,
            level: self.level,
            path: self.path.clone(),
            is_active: self.is_active,
            is_pickable: self.is_pickable,
            depth,
        }
    }
}

/// Compact view of a location, as returned by descendant and tree queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocationNode {
    pub id: LocationId,
    pub code: String,
    pub name: String,
    pub zone_type: ZoneType,
    pub level: u8,
    pub path: LocationPath,
    pub is_active: bool,
    pub is_pickable: bool,
    /// Level difference to the queried ancestor.
    pub depth: u8,
}

/// Request to create a location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLocation {
    pub parent_id: Option<LocationId>,
    /// Explicit code; derived from the parent code and name when absent.
    pub code: Option<String>,
    pub name: String,
    pub zone_type: ZoneType,
    pub max_weight: Option<f64>,
    pub max_volume: Option<f64>,
    pub is_active: bool,
    pub is_pickable: bool,
    pub metadata: Option<JsonValue>,
}

impl NewLocation {
    pub fn new(name: impl Into<String>, zone_type: ZoneType) -> Self {
        Self {
            parent_id: None,
            code: None,
            name: name.into(),
            zone_type,
            max_weight: None,
            max_volume: None,
            is_active: true,
            is_pickable: false,
            metadata: None,
        }
    }

    pub fn under(mut self, parent_id: LocationId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_capacity(mut self, max_weight: Option<f64>, max_volume: Option<f64>) -> Self {
        self.max_weight = max_weight;
        self.max_volume = max_volume;
        self
    }

    pub fn pickable(mut self, is_pickable: bool) -> Self {
        self.is_pickable = is_pickable;
        self
    }

    /// Validate the request against the (already loaded) parent row and
    /// compute the hierarchy-dependent attributes.
    ///
    /// `parent` must be the row for `self.parent_id`, or `None` if it could
    /// not be found.
    pub fn plan(&self, parent: Option<&Location>) -> Result<LocationDraft, LocationError> {
        validate_name(&self.name)?;
        validate_capacity("max_weight", self.max_weight)?;
        validate_capacity("max_volume", self.max_volume)?;

        let (level, parent_path, parent_code) = match (self.parent_id, parent) {
            (None, _) => (1, None, None),
            (Some(id), None) => return Err(LocationError::ParentNotFound(id)),
            (Some(id), Some(p)) => {
                if p.id != id {
                    return Err(LocationError::ParentNotFound(id));
                }
                if !p.is_active {
                    return Err(LocationError::ParentInactive(p.code.clone()));
                }
                if p.level >= MAX_LEVEL {
                    return Err(LocationError::MaxDepthExceeded {
                        parent: p.code.clone(),
                        level: p.level,
                        max: MAX_LEVEL,
                    });
                }
                (p.level + 1, Some(p.path.clone()), Some(p.code.as_str()))
            }
        };

        let code = match &self.code {
            Some(code) => validate_code(code)?,
            None => derive_code(parent_code, &self.name)?,
        };

        Ok(LocationDraft {
            parent_id: self.parent_id,
            parent_path,
            code,
            name: self.name.trim().to_string(),
            zone_type: self.zone_type,
            level,
            max_weight: self.max_weight,
            max_volume: self.max_volume,
            is_active: self.is_active,
            is_pickable: self.is_pickable,
            metadata: self.metadata.clone(),
        })
    }
}

/// A validated location awaiting its store-assigned id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationDraft {
    pub parent_id: Option<LocationId>,
    pub parent_path: Option<LocationPath>,
    pub code: String,
    pub name: String,
    pub zone_type: ZoneType,
    pub level: u8,
    pub max_weight: Option<f64>,
    pub max_volume: Option<f64>,
    pub is_active: bool,
    pub is_pickable: bool,
    pub metadata: Option<JsonValue>,
}

impl LocationDraft {
    /// Path the location will get once `id` is assigned.
    pub fn path_for(&self, id: LocationId) -> LocationPath {
        match &self.parent_path {
            Some(parent) => parent.child(id),
            None => LocationPath::root(id),
        }
    }

    pub fn into_location(self, id: LocationId, now: DateTime<Utc>) -> Location {
        let path = self.path_for(id);
        Location {
            id,
            code: self.code,
            name: self.name,
            zone_type: self.zone_type,
            level: self.level,
            path,
            parent_id: self.parent_id,
            max_weight: self.max_weight,
            max_volume: self.max_volume,
            is_active: self.is_active,
            is_pickable: self.is_pickable,
            metadata: self.metadata,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update: only the provided fields change.
///
/// Capacities are tri-state: absent leaves the limit alone, `null` clears it
/// and a number replaces it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocationPatch {
    pub name: Option<String>,
    pub zone_type: Option<ZoneType>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub max_weight: Option<Option<f64>>,
    #[serde(default, deserialize_with = "present", skip_serializing_if = "Option::is_none")]
    pub max_volume: Option<Option<f64>>,
    pub is_active: Option<bool>,
    pub is_pickable: Option<bool>,
    pub metadata: Option<JsonValue>,
}

impl LocationPatch {
    pub fn is_empty(&self) -> bool {
        self == &LocationPatch::default()
    }

    /// Merge the patch over `current`. Identity, code and path never change.
    pub fn merge(&self, current: &Location, now: DateTime<Utc>) -> Result<Location, LocationError> {
        if let Some(name) = &self.name {
            validate_name(name)?;
        }
        validate_capacity("max_weight", self.max_weight.flatten())?;
        validate_capacity("max_volume", self.max_volume.flatten())?;

        let mut next = current.clone();
        if let Some(name) = &self.name {
            next.name = name.trim().to_string();
        }
        if let Some(zone_type) = self.zone_type {
            next.zone_type = zone_type;
        }
        if let Some(max_weight) = self.max_weight {
            next.max_weight = max_weight;
        }
        if let Some(max_volume) = self.max_volume {
            next.max_volume = max_volume;
        }
        if let Some(is_active) = self.is_active {
            next.is_active = is_active;
        }
        if let Some(is_pickable) = self.is_pickable {
            next.is_pickable = is_pickable;
        }
        if self.metadata.is_some() {
            next.metadata = self.metadata.clone();
        }
        next.updated_at = now;
        Ok(next)
    }
}

/// A field that was present in the input, even as `null`.
fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Descendants of `target` among `all`, shaped like the store queries.
///
/// Recursive results are ordered by path; direct children by code.
pub fn descendants(target: &Location, all: &[Location], recursive: bool) -> Vec<LocationNode> {
    let mut out: Vec<LocationNode> = if recursive {
        all.iter()
            .filter(|l| l.is_descendant_of(target))
            .map(|l| l.node(l.level.saturating_sub(target.level)))
            .collect()
    } else {
        all.iter()
            .filter(|l| l.parent_id == Some(target.id))
            .map(|l| l.node(1))
            .collect()
    };

    if recursive {
        out.sort_by(|a, b| a.path.cmp(&b.path));
    } else {
        out.sort_by(|a, b| a.code.cmp(&b.code));
    }
    out
}

fn validate_name(name: &str) -> Result<(), DomainError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation("name cannot be empty"));
    }
    if trimmed.chars().count() > MAX_NAME_LEN {
        return Err(DomainError::validation(format!(
            "name cannot exceed {MAX_NAME_LEN} characters"
        )));
    }
    Ok(())
}

fn validate_capacity(field: &str, value: Option<f64>) -> Result<(), DomainError> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => Err(DomainError::validation(format!(
            "{field} must be a non-negative number"
        ))),
        _ => Ok(()),
    }
}

fn validate_code(code: &str) -> Result<String, DomainError> {
    let trimmed = code.trim();
    if trimmed.is_empty() {
        return Err(DomainError::validation("code cannot be empty"));
    }
    if trimmed.chars().count() > MAX_CODE_LEN {
        return Err(DomainError::validation(format!(
            "code cannot exceed {MAX_CODE_LEN} characters"
        )));
    }
    Ok(trimmed.to_string())
}

fn derive_code(parent_code: Option<&str>, name: &str) -> Result<String, DomainError> {
    let mut slug = String::with_capacity(name.len());
    for ch in name.trim().chars() {
        if ch.is_alphanumeric() {
            slug.extend(ch.to_uppercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        return Err(DomainError::validation(format!(
            "cannot derive a code from name '{name}'; provide one explicitly"
        )));
    }
    let code = match parent_code {
        Some(parent) => format!("{parent}-{slug}"),
        None => slug.to_string(),
    };
    validate_code(&code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wms_core::ErrorKind;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn root(id: i64, code: &str) -> Location {
        NewLocation::new(code, ZoneType::Storage)
            .with_code(code)
            .plan(None)
            .unwrap()
            .into_location(LocationId::new(id), now())
    }

    fn child_of(parent: &Location, id: i64, name: &str) -> Location {
        NewLocation::new(name, ZoneType::Storage)
            .under(parent.id)
            .plan(Some(parent))
            .unwrap()
            .into_location(LocationId::new(id), now())
    }

    #[test]
    fn root_has_level_one_and_single_segment_path() {
        let wh = root(1, "WH");
        assert_eq!(wh.level, 1);
        assert_eq!(wh.path.to_string(), "1");
        assert_eq!(wh.path.depth(), wh.level as usize);
    }

    #[test]
    fn child_extends_parent_path_and_derives_code() {
        let wh = root(1, "WH");
        let zone = child_of(&wh, 4, "zone a");
        let rack = child_of(&zone, 9, "Rack 01");
        assert_eq!(zone.code, "WH-ZONE-A");
        assert_eq!(rack.code, "WH-ZONE-A-RACK-01");
        assert_eq!(rack.path.to_string(), "1.4.9");
        assert_eq!(rack.level, 3);
        assert!(rack.is_descendant_of(&wh));
        assert!(!wh.is_descendant_of(&rack));
        assert!(!rack.is_descendant_of(&rack));
    }

    #[test]
    fn missing_parent_is_rejected() {
        let err = NewLocation::new("A", ZoneType::Storage)
            .under(LocationId::new(77))
            .plan(None)
            .unwrap_err();
        assert_eq!(err, LocationError::ParentNotFound(LocationId::new(77)));
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn inactive_parent_is_rejected() {
        let mut wh = root(1, "WH");
        wh.is_active = false;
        let err = NewLocation::new("A", ZoneType::Storage)
            .under(wh.id)
            .plan(Some(&wh))
            .unwrap_err();
        assert_eq!(err, LocationError::ParentInactive("WH".to_string()));
        assert_eq!(err.kind(), ErrorKind::StateConflict);
    }

    #[test]
    fn hierarchy_depth_is_capped() {
        let mut current = root(1, "WH");
        for id in 2..=5 {
            current = child_of(&current, id, &format!("L{id}"));
        }
        assert_eq!(current.level, MAX_LEVEL);
        let err = NewLocation::new("too deep", ZoneType::Storage)
            .under(current.id)
            .plan(Some(&current))
            .unwrap_err();
        assert!(matches!(err, LocationError::MaxDepthExceeded { level: 5, .. }));
    }

    #[test]
    fn blank_name_fails_validation() {
        let err = NewLocation::new("  ", ZoneType::Storage).plan(None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn patch_merges_only_provided_fields() {
        let wh = root(1, "WH");
        let patch = LocationPatch {
            name: Some("Main warehouse".to_string()),
            max_weight: Some(Some(500.0)),
            ..LocationPatch::default()
        };
        let merged = patch.merge(&wh, now()).unwrap();
        assert_eq!(merged.name, "Main warehouse");
        assert_eq!(merged.max_weight, Some(500.0));
        assert_eq!(merged.zone_type, wh.zone_type);
        assert_eq!(merged.path, wh.path);
        assert_eq!(merged.code, wh.code);
        assert!(merged.is_active);
        assert!(LocationPatch::default().is_empty());
    }

    #[test]
    fn patch_rejects_negative_capacity() {
        let wh = root(1, "WH");
        let patch = LocationPatch {
            max_volume: Some(Some(-1.0)),
            ..LocationPatch::default()
        };
        assert!(patch.merge(&wh, now()).is_err());
    }

    #[test]
    fn patch_can_clear_a_capacity() {
        let mut bin = root(1, "WH");
        bin.max_weight = Some(100.0);
        bin.max_volume = Some(4.0);

        let patch: LocationPatch = serde_json::from_str(r#"{"max_weight": null}"#).unwrap();
        assert_eq!(patch.max_weight, Some(None));
        assert_eq!(patch.max_volume, None);

        let merged = patch.merge(&bin, now()).unwrap();
        assert_eq!(merged.max_weight, None);
        assert_eq!(merged.max_volume, Some(4.0));

        let untouched: LocationPatch = serde_json::from_str("{}").unwrap();
        assert!(untouched.is_empty());
        assert_eq!(untouched.merge(&bin, now()).unwrap().max_weight, Some(100.0));
    }

    #[test]
    fn direct_and_recursive_descendants() {
        let wh = root(1, "WH");
        let a = child_of(&wh, 2, "A");
        let b = child_of(&wh, 3, "B");
        let a1 = child_of(&a, 4, "01");
        let other = root(5, "OTHER");
        let all = vec![wh.clone(), a.clone(), b.clone(), a1.clone(), other];

        let direct = descendants(&wh, &all, false);
        assert_eq!(
            direct.iter().map(|n| n.code.as_str()).collect::<Vec<_>>(),
            vec!["WH-A", "WH-B"]
        );
        assert!(direct.iter().all(|n| n.depth == 1));

        let recursive = descendants(&wh, &all, true);
        let got: Vec<(&str, u8)> = recursive.iter().map(|n| (n.code.as_str(), n.depth)).collect();
        assert_eq!(got, vec![("WH-A", 1), ("WH-A-01", 2), ("WH-B", 1)]);
    }

    #[test]
    fn path_round_trips_through_text() {
        let path: LocationPath = "1.4.9".parse().unwrap();
        assert_eq!(path.leaf(), Some(LocationId::new(9)));
        assert!("1..2".parse::<LocationPath>().is_err());
    }

    #[test]
    fn zone_type_parses_case_insensitively() {
        assert_eq!("Picking".parse::<ZoneType>().unwrap(), ZoneType::Picking);
        assert!("attic".parse::<ZoneType>().is_err());
    }

    fn forest(parents: &[Option<usize>]) -> Vec<Location> {
        let mut all: Vec<Location> = Vec::with_capacity(parents.len());
        for (i, parent) in parents.iter().enumerate() {
            let parent = match parent {
                Some(p) if i > 0 => Some(all[p % i].clone()).filter(|p| p.level < MAX_LEVEL),
                _ => None,
            };
            let mut request = NewLocation::new(format!("N{i}"), ZoneType::Storage).with_code(format!("L{i}"));
            if let Some(p) = &parent {
                request = request.under(p.id);
            }
            let location = request
                .plan(parent.as_ref())
                .unwrap()
                .into_location(LocationId::new(i as i64 + 1), now());
            all.push(location);
        }
        all
    }

    fn ancestors(location: &Location, all: &[Location]) -> Vec<LocationId> {
        let mut out = Vec::new();
        let mut current = location.parent_id;
        while let Some(id) = current {
            out.push(id);
            current = all.iter().find(|l| l.id == id).and_then(|l| l.parent_id);
        }
        out
    }

    proptest::proptest! {
        #[test]
        fn recursive_descendants_are_exactly_the_subtree(
            parents in proptest::collection::vec(proptest::option::of(0usize..64), 1..40),
            pick in 0usize..64,
        ) {
            let all = forest(&parents);
            let target = &all[pick % all.len()];

            let got = descendants(target, &all, true);
            let mut got_ids: Vec<LocationId> = got.iter().map(|n| n.id).collect();
            got_ids.sort();
            let mut expected: Vec<LocationId> = all
                .iter()
                .filter(|l| ancestors(l, &all).contains(&target.id))
                .map(|l| l.id)
                .collect();
            expected.sort();

            proptest::prop_assert_eq!(got_ids, expected);
            for node in &got {
                proptest::prop_assert_eq!(node.depth, node.level - target.level);
            }
        }
    }
}
