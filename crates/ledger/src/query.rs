//! Read-only movement queries.

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use wms_core::{ProductId, QrCode};

use crate::movement::{Movement, MovementType};

pub const DEFAULT_LIMIT: u32 = 100;
pub const MAX_LIMIT: u32 = 1000;

/// Pagination parameters for movement queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of movements to return (1..=1000).
    pub limit: u32,
    /// Offset for pagination (0-based).
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

impl Pagination {
    pub fn new(limit: Option<u32>, offset: Option<u32>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT),
            offset: offset.unwrap_or(0),
        }
    }
}

/// Filter criteria for movement queries. Dates are whole UTC days.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementFilter {
    pub product_id: Option<ProductId>,
    pub container_code: Option<QrCode>,
    pub movement_type: Option<MovementType>,
    /// Inclusive lower bound.
    pub from_date: Option<NaiveDate>,
    /// Inclusive upper bound: the whole day is included.
    pub to_date: Option<NaiveDate>,
}

impl MovementFilter {
    pub fn for_container(container_code: QrCode) -> Self {
        Self {
            container_code: Some(container_code),
            ..Self::default()
        }
    }

    /// Lower bound instant (inclusive).
    pub fn from_instant(&self) -> Option<DateTime<Utc>> {
        self.from_date.and_then(start_of_day)
    }

    /// Upper bound instant (exclusive): midnight after `to_date`.
    pub fn to_instant(&self) -> Option<DateTime<Utc>> {
        self.to_date
            .and_then(|d| d.checked_add_days(Days::new(1)))
            .and_then(start_of_day)
    }

    pub fn matches(&self, movement: &Movement) -> bool {
        self.product_id.as_ref().is_none_or(|p| p == &movement.product_id)
            && self
                .container_code
                .as_ref()
                .is_none_or(|c| movement.container_code.as_ref() == Some(c))
            && self.movement_type.is_none_or(|t| t == movement.movement_type)
            && self.from_instant().is_none_or(|from| movement.created_at >= from)
            && self.to_instant().is_none_or(|to| movement.created_at < to)
    }
}

fn start_of_day(date: NaiveDate) -> Option<DateTime<Utc>> {
    date.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc())
}

/// Paginated movement query result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementPage {
    pub movements: Vec<Movement>,
    /// Total number of movements matching the filter (across all pages).
    pub total: u64,
    pub pagination: Pagination,
    pub has_more: bool,
}

/// Newest first: `created_at` descending, then id descending.
pub fn newest_first(a: &Movement, b: &Movement) -> core::cmp::Ordering {
    b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id))
}

/// Filter, order and paginate `movements`.
pub fn select<'a>(
    movements: impl IntoIterator<Item = &'a Movement>,
    filter: &MovementFilter,
    pagination: Pagination,
) -> MovementPage {
    let mut matching: Vec<&Movement> = movements.into_iter().filter(|m| filter.matches(m)).collect();
    matching.sort_by(|a, b| newest_first(a, b));

    let total = matching.len() as u64;
    let page: Vec<Movement> = matching
        .into_iter()
        .skip(pagination.offset as usize)
        .take(pagination.limit as usize)
        .cloned()
        .collect();
    let has_more = u64::from(pagination.offset) + (page.len() as u64) < total;

    MovementPage {
        movements: page,
        total,
        pagination,
        has_more,
    }
}
