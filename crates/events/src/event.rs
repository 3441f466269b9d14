use chrono::{DateTime, Utc};

/// A recorded fact: ledger movements and container state changes.
///
/// Implementors are never edited once written; corrections are new events.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Dotted name, e.g. `ledger.movement.receive` or `container.unpacked`.
    fn event_type(&self) -> &'static str;

    /// Payload schema revision; bump when fields change meaning.
    fn version(&self) -> u32;

    /// Business time of the fact, not the time it was stored.
    fn occurred_at(&self) -> DateTime<Utc>;
}
