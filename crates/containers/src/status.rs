use core::str::FromStr;

use serde::{Deserialize, Serialize};

use wms_core::DomainError;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerType {
    Pallet,
    Box,
    Cage,
    Trolley,
}

impl ContainerType {
    pub fn as_str(self) -> &'static str {
        match self {
            ContainerType::Pallet => "pallet",
            ContainerType::Box => "box",
            ContainerType::Cage => "cage",
            ContainerType::Trolley => "trolley",
        }
    }
}

impl core::fmt::Display for ContainerType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pallet" => Ok(ContainerType::Pallet),
            "box" => Ok(ContainerType::Box),
            "cage" => Ok(ContainerType::Cage),
            "trolley" => Ok(ContainerType::Trolley),
            other => Err(DomainError::validation(format!(
                "container type must be one of: pallet, box, cage, trolley (got '{other}')"
            ))),
        }
    }
}

/// Lifecycle state of a container.
///
/// ```text
/// empty ──> sealed <──> open
///             │          │
///             └─> in_transit <┘ ──> sealed | open | blocked
/// any non-blocked state ──> blocked (absorbing)
/// ```
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerStatus {
    Empty,
    Sealed,
    Open,
    InTransit,
    Blocked,
}

impl ContainerStatus {
    pub const ALL: [ContainerStatus; 5] = [
        ContainerStatus::Empty,
        ContainerStatus::Sealed,
        ContainerStatus::Open,
        ContainerStatus::InTransit,
        ContainerStatus::Blocked,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ContainerStatus::Empty => "empty",
            ContainerStatus::Sealed => "sealed",
            ContainerStatus::Open => "open",
            ContainerStatus::InTransit => "in_transit",
            ContainerStatus::Blocked => "blocked",
        }
    }

    /// Whether the ordinary update path may move from `self` to `next`.
    /// Same-state updates are not transitions and are handled by the caller.
    pub fn can_transition_to(self, next: ContainerStatus) -> bool {
        use ContainerStatus::*;
        match (self, next) {
            (Blocked, _) => false,
            (_, Blocked) => true,
            (Empty, Sealed | Open) => true,
            (Sealed, Open | InTransit) => true,
            (Open, Sealed | InTransit) => true,
            (InTransit, Sealed | Open) => true,
            _ => false,
        }
    }
}

impl core::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContainerStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        ContainerStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == needle)
            .ok_or_else(|| DomainError::validation(format!("unknown container status '{s}'")))
    }
}
