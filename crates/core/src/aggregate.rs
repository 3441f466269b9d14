//! Versioned aggregates (containers) and the write-side version guard.

/// Identity plus the version stores compare on write.
pub trait AggregateRoot {
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    fn id(&self) -> &Self::Id;

    /// Number of events applied since the aggregate was created.
    fn version(&self) -> u64;
}

/// Version a write expects to find in the store.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// No guard.
    Any,
    /// The stored aggregate must still be at this version; `0` means it must
    /// not exist yet.
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }
}

impl core::fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ExpectedVersion::Any => f.write_str("any"),
            ExpectedVersion::Exact(v) => write!(f, "v{v}"),
        }
    }
}

/// Decide/evolve split for aggregates.
///
/// `handle` validates a command against current state and returns the events
/// it produces without touching anything; `apply` folds one event into state
/// and bumps the version. Neither does IO: the caller persists the evolved
/// state together with the ledger entries derived from the events.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    fn apply(&mut self, event: &Self::Event);

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}
