use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use wms_core::{DomainError, EventId, LocationId, MovementId, ProductId, QrCode};
use wms_events::Event;

use crate::error::LedgerError;
use crate::projection::ProjectionKey;

/// Kind of stock movement recorded in the ledger.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Receive,
    Ship,
    Transfer,
    Adjust,
    WriteOff,
    Unpack,
}

impl MovementType {
    pub const ALL: [MovementType; 6] = [
        MovementType::Receive,
        MovementType::Ship,
        MovementType::Transfer,
        MovementType::Adjust,
        MovementType::WriteOff,
        MovementType::Unpack,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MovementType::Receive => "receive",
            MovementType::Ship => "ship",
            MovementType::Transfer => "transfer",
            MovementType::Adjust => "adjust",
            MovementType::WriteOff => "write_off",
            MovementType::Unpack => "unpack",
        }
    }

    fn event_type(self) -> &'static str {
        match self {
            MovementType::Receive => "ledger.movement.receive",
            MovementType::Ship => "ledger.movement.ship",
            MovementType::Transfer => "ledger.movement.transfer",
            MovementType::Adjust => "ledger.movement.adjust",
            MovementType::WriteOff => "ledger.movement.write_off",
            MovementType::Unpack => "ledger.movement.unpack",
        }
    }
}

impl core::fmt::Display for MovementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MovementType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let needle = s.trim().to_lowercase();
        MovementType::ALL
            .into_iter()
            .find(|t| t.as_str() == needle)
            .ok_or_else(|| DomainError::validation(format!("unknown movement type '{s}'")))
    }
}

/// A movement request, before the ledger assigns it a position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMovement {
    pub movement_type: MovementType,
    pub product_id: ProductId,
    pub from_location_id: Option<LocationId>,
    pub to_location_id: Option<LocationId>,
    pub quantity: i64,
    pub batch_number: Option<String>,
    pub container_code: Option<QrCode>,
    pub user: Option<String>,
    pub reason: Option<String>,
}

impl NewMovement {
    fn new(
        movement_type: MovementType,
        product_id: ProductId,
        from: Option<LocationId>,
        to: Option<LocationId>,
        quantity: i64,
    ) -> Self {
        Self {
            movement_type,
            product_id,
            from_location_id: from,
            to_location_id: to,
            quantity,
            batch_number: None,
            container_code: None,
            user: None,
            reason: None,
        }
    }

    /// Stock arriving at `to`.
    pub fn inbound(movement_type: MovementType, product_id: ProductId, to: LocationId, quantity: i64) -> Self {
        Self::new(movement_type, product_id, None, Some(to), quantity)
    }

    /// Stock leaving `from`.
    pub fn outbound(movement_type: MovementType, product_id: ProductId, from: LocationId, quantity: i64) -> Self {
        Self::new(movement_type, product_id, Some(from), None, quantity)
    }

    pub fn receive(product_id: ProductId, to: LocationId, quantity: i64) -> Self {
        Self::inbound(MovementType::Receive, product_id, to, quantity)
    }

    pub fn ship(product_id: ProductId, from: LocationId, quantity: i64) -> Self {
        Self::outbound(MovementType::Ship, product_id, from, quantity)
    }

    pub fn transfer(product_id: ProductId, from: LocationId, to: LocationId, quantity: i64) -> Self {
        Self::new(MovementType::Transfer, product_id, Some(from), Some(to), quantity)
    }

    pub fn with_batch(mut self, batch_number: Option<String>) -> Self {
        self.batch_number = batch_number;
        self
    }

    pub fn in_container(mut self, container_code: QrCode) -> Self {
        self.container_code = Some(container_code);
        self
    }

    pub fn by_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Check the shape rules that need no stored state and normalize blank
    /// batch numbers to `None`.
    pub fn validated(mut self) -> Result<Self, LedgerError> {
        if self.quantity <= 0 {
            return Err(LedgerError::invalid(format!(
                "quantity must be positive (got {})",
                self.quantity
            )));
        }
        match (self.from_location_id, self.to_location_id) {
            (None, None) => {
                return Err(LedgerError::invalid(
                    "at least one of from_location_id / to_location_id is required",
                ));
            }
            (Some(from), Some(to)) if from == to => {
                return Err(LedgerError::invalid(format!(
                    "from and to locations must differ (both {from})"
                )));
            }
            _ => {}
        }
        self.batch_number = normalize_batch(self.batch_number);
        Ok(self)
    }

    /// Entries carrying a container code belong to container commands, which
    /// write them together with the container's content lines.
    pub fn ensure_loose(&self) -> Result<(), LedgerError> {
        match &self.container_code {
            Some(code) => Err(LedgerError::invalid(format!(
                "movement names container '{code}'; use the container commands instead"
            ))),
            None => Ok(()),
        }
    }

    pub fn into_movement(self, id: MovementId, event_id: EventId, created_at: DateTime<Utc>) -> Movement {
        Movement {
            id,
            event_id,
            movement_type: self.movement_type,
            product_id: self.product_id,
            from_location_id: self.from_location_id,
            to_location_id: self.to_location_id,
            quantity: self.quantity,
            batch_number: self.batch_number,
            container_code: self.container_code,
            user: self.user,
            reason: self.reason,
            created_at,
        }
    }

    pub fn contributions(&self) -> Vec<(ProjectionKey, i64)> {
        contributions(
            &self.product_id,
            self.from_location_id,
            self.to_location_id,
            self.quantity,
            self.batch_number.as_deref(),
            self.container_code.as_ref(),
        )
    }
}

/// An appended, immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub id: MovementId,
    pub event_id: EventId,
    pub movement_type: MovementType,
    pub product_id: ProductId,
    pub from_location_id: Option<LocationId>,
    pub to_location_id: Option<LocationId>,
    pub quantity: i64,
    pub batch_number: Option<String>,
    pub container_code: Option<QrCode>,
    pub user: Option<String>,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Movement {
    /// Signed effect of this entry on each projection key it touches.
    ///
    /// The `to` side adds `quantity`, the `from` side removes it; a
    /// dual-location entry touches two keys.
    pub fn contributions(&self) -> Vec<(ProjectionKey, i64)> {
        contributions(
            &self.product_id,
            self.from_location_id,
            self.to_location_id,
            self.quantity,
            self.batch_number.as_deref(),
            self.container_code.as_ref(),
        )
    }

    pub fn touches(&self, location_id: LocationId) -> bool {
        self.from_location_id == Some(location_id) || self.to_location_id == Some(location_id)
    }
}

impl Event for Movement {
    fn event_type(&self) -> &'static str {
        self.movement_type.event_type()
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

fn contributions(
    product_id: &ProductId,
    from: Option<LocationId>,
    to: Option<LocationId>,
    quantity: i64,
    batch_number: Option<&str>,
    container_code: Option<&QrCode>,
) -> Vec<(ProjectionKey, i64)> {
    let key = |location_id| ProjectionKey {
        product_id: product_id.clone(),
        location_id,
        batch_number: batch_number.map(str::to_string),
        container_code: container_code.cloned(),
    };

    let mut out = Vec::with_capacity(2);
    if let Some(from) = from {
        out.push((key(from), -quantity));
    }
    if let Some(to) = to {
        out.push((key(to), quantity));
    }
    out
}

pub(crate) fn normalize_batch(batch: Option<String>) -> Option<String> {
    batch
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty())
}
