use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use wms_core::{Aggregate, AggregateRoot, ContainerId, DomainError, LocationId, ProductId, QrCode};
use wms_events::Event;
use wms_ledger::{MovementType, NewMovement};
use wms_locations::Location;

use crate::error::ContainerError;
use crate::status::{ContainerStatus, ContainerType};

/// One product line inside a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentLine {
    pub product_id: ProductId,
    pub quantity: i64,
    pub batch_number: Option<String>,
    pub is_scanned: bool,
}

/// Content line as supplied at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewContentLine {
    pub product_id: ProductId,
    pub quantity: i64,
    pub batch_number: Option<String>,
}

impl NewContentLine {
    pub fn new(product_id: ProductId, quantity: i64) -> Self {
        Self {
            product_id,
            quantity,
            batch_number: None,
        }
    }

    pub fn batch(mut self, batch_number: impl Into<String>) -> Self {
        self.batch_number = Some(batch_number.into());
        self
    }
}

/// Aggregate root: a physical container (pallet, box...) holding stock.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Container {
    id: ContainerId,
    qr_code: Option<QrCode>,
    container_type: ContainerType,
    status: ContainerStatus,
    location_id: Option<LocationId>,
    parent_container_id: Option<ContainerId>,
    contents: Vec<ContentLine>,
    metadata: Option<JsonValue>,
    version: u64,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
}

impl Container {
    /// Create an empty, not-yet-registered aggregate instance.
    pub fn empty(id: ContainerId) -> Self {
        Self {
            id,
            qr_code: None,
            container_type: ContainerType::Pallet,
            status: ContainerStatus::Empty,
            location_id: None,
            parent_container_id: None,
            contents: Vec::new(),
            metadata: None,
            version: 0,
            created_at: None,
            updated_at: None,
        }
    }

    /// Rehydrate a registered container from stored state.
    #[allow(clippy::too_many_arguments)]
    pub fn restore(
        id: ContainerId,
        qr_code: QrCode,
        container_type: ContainerType,
        status: ContainerStatus,
        location_id: LocationId,
        parent_container_id: Option<ContainerId>,
        contents: Vec<ContentLine>,
        metadata: Option<JsonValue>,
        version: u64,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            qr_code: Some(qr_code),
            container_type,
            status,
            location_id: Some(location_id),
            parent_container_id,
            contents,
            metadata,
            version,
            created_at: Some(created_at),
            updated_at: Some(updated_at),
        }
    }

    pub fn is_registered(&self) -> bool {
        self.qr_code.is_some()
    }

    pub fn id_typed(&self) -> ContainerId {
        self.id
    }

    pub fn qr_code(&self) -> Option<&QrCode> {
        self.qr_code.as_ref()
    }

    pub fn container_type(&self) -> ContainerType {
        self.container_type
    }

    pub fn status(&self) -> ContainerStatus {
        self.status
    }

    pub fn location_id(&self) -> Option<LocationId> {
        self.location_id
    }

    pub fn parent_container_id(&self) -> Option<ContainerId> {
        self.parent_container_id
    }

    pub fn contents(&self) -> &[ContentLine] {
        &self.contents
    }

    pub fn metadata(&self) -> Option<&JsonValue> {
        self.metadata.as_ref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn total_units(&self) -> i64 {
        self.contents.iter().map(|l| l.quantity).sum()
    }

    /// Number of distinct products with a non-zero line.
    pub fn products_count(&self) -> usize {
        let mut products: Vec<&ProductId> = self
            .contents
            .iter()
            .filter(|l| l.quantity > 0)
            .map(|l| &l.product_id)
            .collect();
        products.sort();
        products.dedup();
        products.len()
    }
}

impl AggregateRoot for Container {
    type Id = ContainerId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterContainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterContainer {
    pub qr_code: QrCode,
    pub container_type: ContainerType,
    /// The resolved target location.
    pub location: Location,
    pub contents: Vec<NewContentLine>,
    pub parent_container_id: Option<ContainerId>,
    pub metadata: Option<JsonValue>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RelocateContainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelocateContainer {
    pub target: Location,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UnpackContainer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnpackContainer {
    pub qr_code: QrCode,
    pub product_id: ProductId,
    pub quantity: i64,
    pub batch_number: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateContainerStatus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateContainerStatus {
    pub status: ContainerStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContainerCommand {
    Register(RegisterContainer),
    Relocate(RelocateContainer),
    Unpack(UnpackContainer),
    UpdateStatus(UpdateContainerStatus),
}

/// Event: ContainerRegistered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerRegistered {
    pub container_id: ContainerId,
    pub qr_code: QrCode,
    pub container_type: ContainerType,
    pub status: ContainerStatus,
    pub location_id: LocationId,
    pub parent_container_id: Option<ContainerId>,
    pub contents: Vec<ContentLine>,
    pub metadata: Option<JsonValue>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ContainerRelocated. `lines` are the non-empty lines moved along.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRelocated {
    pub container_id: ContainerId,
    pub qr_code: QrCode,
    pub from_location_id: LocationId,
    pub to_location_id: LocationId,
    pub lines: Vec<ContentLine>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ContentUnpacked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentUnpacked {
    pub container_id: ContainerId,
    pub qr_code: QrCode,
    pub location_id: LocationId,
    pub product_id: ProductId,
    pub batch_number: Option<String>,
    pub quantity: i64,
    pub remaining_in_container: i64,
    pub status_after: ContainerStatus,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StatusChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusChanged {
    pub container_id: ContainerId,
    pub from: ContainerStatus,
    pub to: ContainerStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContainerEvent {
    Registered(ContainerRegistered),
    Relocated(ContainerRelocated),
    Unpacked(ContentUnpacked),
    StatusChanged(StatusChanged),
}

impl Event for ContainerEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ContainerEvent::Registered(_) => "containers.container.registered",
            ContainerEvent::Relocated(_) => "containers.container.relocated",
            ContainerEvent::Unpacked(_) => "containers.container.unpacked",
            ContainerEvent::StatusChanged(_) => "containers.container.status_changed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ContainerEvent::Registered(e) => e.occurred_at,
            ContainerEvent::Relocated(e) => e.occurred_at,
            ContainerEvent::Unpacked(e) => e.occurred_at,
            ContainerEvent::StatusChanged(e) => e.occurred_at,
        }
    }
}

impl ContainerEvent {
    /// Ledger entries this event stands for, in append order.
    pub fn movements(&self) -> Vec<NewMovement> {
        match self {
            ContainerEvent::Registered(e) => e
                .contents
                .iter()
                .map(|line| {
                    NewMovement::receive(line.product_id.clone(), e.location_id, line.quantity)
                        .with_batch(line.batch_number.clone())
                        .in_container(e.qr_code.clone())
                })
                .collect(),
            ContainerEvent::Relocated(e) => e
                .lines
                .iter()
                .map(|line| {
                    NewMovement::transfer(
                        line.product_id.clone(),
                        e.from_location_id,
                        e.to_location_id,
                        line.quantity,
                    )
                    .with_batch(line.batch_number.clone())
                    .in_container(e.qr_code.clone())
                })
                .collect(),
            ContainerEvent::Unpacked(e) => vec![
                NewMovement::outbound(MovementType::Unpack, e.product_id.clone(), e.location_id, e.quantity)
                    .with_batch(e.batch_number.clone())
                    .in_container(e.qr_code.clone()),
                NewMovement::inbound(MovementType::Unpack, e.product_id.clone(), e.location_id, e.quantity)
                    .with_batch(e.batch_number.clone()),
            ],
            ContainerEvent::StatusChanged(_) => Vec::new(),
        }
    }
}

impl Aggregate for Container {
    type Command = ContainerCommand;
    type Event = ContainerEvent;
    type Error = ContainerError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ContainerEvent::Registered(e) => {
                self.id = e.container_id;
                self.qr_code = Some(e.qr_code.clone());
                self.container_type = e.container_type;
                self.status = e.status;
                self.location_id = Some(e.location_id);
                self.parent_container_id = e.parent_container_id;
                self.contents = e.contents.clone();
                self.metadata = e.metadata.clone();
                self.created_at = Some(e.occurred_at);
                self.updated_at = Some(e.occurred_at);
            }
            ContainerEvent::Relocated(e) => {
                self.location_id = Some(e.to_location_id);
                self.updated_at = Some(e.occurred_at);
            }
            ContainerEvent::Unpacked(e) => {
                if let Some(line) = self
                    .contents
                    .iter_mut()
                    .find(|l| l.product_id == e.product_id && l.batch_number == e.batch_number)
                {
                    line.quantity -= e.quantity;
                }
                self.status = e.status_after;
                self.updated_at = Some(e.occurred_at);
            }
            ContainerEvent::StatusChanged(e) => {
                self.status = e.to;
                self.updated_at = Some(e.occurred_at);
            }
        }

        // one version per applied event
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ContainerCommand::Register(cmd) => self.handle_register(cmd),
            ContainerCommand::Relocate(cmd) => self.handle_relocate(cmd),
            ContainerCommand::Unpack(cmd) => self.handle_unpack(cmd),
            ContainerCommand::UpdateStatus(cmd) => self.handle_update_status(cmd),
        }
    }
}

impl Container {
    fn registered(&self) -> Result<(&QrCode, LocationId), ContainerError> {
        match (&self.qr_code, self.location_id) {
            (Some(qr), Some(loc)) => Ok((qr, loc)),
            _ => Err(ContainerError::not_found(self.id)),
        }
    }

    fn ensure_not_blocked(&self, qr: &QrCode) -> Result<(), ContainerError> {
        if self.status == ContainerStatus::Blocked {
            return Err(ContainerError::Blocked(qr.to_string()));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterContainer) -> Result<Vec<ContainerEvent>, ContainerError> {
        if let Some(qr) = &self.qr_code {
            return Err(ContainerError::AlreadyExists(qr.to_string()));
        }
        cmd.location.ensure_accepts_placement()?;

        // Merge duplicate (product, batch) lines, keeping first-seen order.
        let mut merged: Vec<ContentLine> = Vec::with_capacity(cmd.contents.len());
        let mut index: BTreeMap<(ProductId, Option<String>), usize> = BTreeMap::new();
        for line in &cmd.contents {
            if line.quantity < 1 {
                return Err(DomainError::validation(format!(
                    "content quantity for '{}' must be at least 1 (got {})",
                    line.product_id, line.quantity
                ))
                .into());
            }
            let batch = line
                .batch_number
                .as_deref()
                .map(str::trim)
                .filter(|b| !b.is_empty())
                .map(str::to_string);
            let key = (line.product_id.clone(), batch.clone());
            match index.get(&key) {
                Some(&i) => merged[i].quantity += line.quantity,
                None => {
                    index.insert(key, merged.len());
                    merged.push(ContentLine {
                        product_id: line.product_id.clone(),
                        quantity: line.quantity,
                        batch_number: batch,
                        is_scanned: false,
                    });
                }
            }
        }

        let status = if merged.is_empty() {
            ContainerStatus::Empty
        } else {
            ContainerStatus::Sealed
        };

        Ok(vec![ContainerEvent::Registered(ContainerRegistered {
            container_id: self.id,
            qr_code: cmd.qr_code.clone(),
            container_type: cmd.container_type,
            status,
            location_id: cmd.location.id,
            parent_container_id: cmd.parent_container_id,
            contents: merged,
            metadata: cmd.metadata.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_relocate(&self, cmd: &RelocateContainer) -> Result<Vec<ContainerEvent>, ContainerError> {
        let (qr, current) = self.registered()?;
        self.ensure_not_blocked(qr)?;
        cmd.target.ensure_accepts_placement()?;

        if cmd.target.id == current {
            return Ok(Vec::new());
        }

        Ok(vec![ContainerEvent::Relocated(ContainerRelocated {
            container_id: self.id,
            qr_code: qr.clone(),
            from_location_id: current,
            to_location_id: cmd.target.id,
            lines: self.contents.iter().filter(|l| l.quantity > 0).cloned().collect(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_unpack(&self, cmd: &UnpackContainer) -> Result<Vec<ContainerEvent>, ContainerError> {
        let (qr, location_id) = self.registered()?;
        if qr != &cmd.qr_code {
            return Err(ContainerError::QrMismatch {
                expected: qr.to_string(),
                given: cmd.qr_code.to_string(),
            });
        }
        self.ensure_not_blocked(qr)?;
        if cmd.quantity <= 0 {
            return Err(DomainError::validation(format!(
                "unpack quantity must be positive (got {})",
                cmd.quantity
            ))
            .into());
        }

        let batch = cmd.batch_number.as_deref().map(str::trim).filter(|b| !b.is_empty());
        let line = self.pick_line(&cmd.product_id, batch)?;
        let available = line.map(|l| l.quantity).unwrap_or(0);
        let line = match line {
            Some(line) if available >= cmd.quantity => line,
            _ => {
                return Err(ContainerError::InsufficientQuantity {
                    product_id: cmd.product_id.to_string(),
                    batch: line
                        .and_then(|l| l.batch_number.clone())
                        .or_else(|| batch.map(str::to_string)),
                    available,
                    requested: cmd.quantity,
                });
            }
        };

        let remaining = line.quantity - cmd.quantity;
        let others_empty = self
            .contents
            .iter()
            .filter(|l| !(l.product_id == line.product_id && l.batch_number == line.batch_number))
            .all(|l| l.quantity == 0);
        let status_after = if remaining == 0 && others_empty {
            ContainerStatus::Empty
        } else if self.status == ContainerStatus::Sealed {
            ContainerStatus::Open
        } else {
            self.status
        };

        Ok(vec![ContainerEvent::Unpacked(ContentUnpacked {
            container_id: self.id,
            qr_code: qr.clone(),
            location_id,
            product_id: cmd.product_id.clone(),
            batch_number: line.batch_number.clone(),
            quantity: cmd.quantity,
            remaining_in_container: remaining,
            status_after,
            occurred_at: cmd.occurred_at,
        })])
    }

    /// The content line an unpack targets. Without a batch, the product must
    /// sit in at most one non-empty line.
    fn pick_line(&self, product_id: &ProductId, batch: Option<&str>) -> Result<Option<&ContentLine>, ContainerError> {
        let mut lines = self.contents.iter().filter(|l| &l.product_id == product_id);

        if let Some(batch) = batch {
            return Ok(lines.find(|l| l.batch_number.as_deref() == Some(batch)));
        }

        let lines: Vec<&ContentLine> = lines.collect();
        let stocked: Vec<&ContentLine> = lines.iter().copied().filter(|l| l.quantity > 0).collect();
        match stocked.as_slice() {
            [] => Ok(lines.first().copied()),
            [only] => Ok(Some(*only)),
            _ => Err(ContainerError::AmbiguousBatch {
                product_id: product_id.to_string(),
                batches: stocked
                    .iter()
                    .map(|l| l.batch_number.clone().unwrap_or_else(|| "-".to_string()))
                    .collect(),
            }),
        }
    }

    fn handle_update_status(&self, cmd: &UpdateContainerStatus) -> Result<Vec<ContainerEvent>, ContainerError> {
        let (qr, _) = self.registered()?;
        self.ensure_not_blocked(qr)?;
        if cmd.status == self.status {
            return Ok(Vec::new());
        }
        if !self.status.can_transition_to(cmd.status) {
            return Err(ContainerError::InvalidTransition {
                from: self.status,
                to: cmd.status,
            });
        }
        Ok(vec![ContainerEvent::StatusChanged(StatusChanged {
            container_id: self.id,
            from: self.status,
            to: cmd.status,
            occurred_at: cmd.occurred_at,
        })])
    }
}
