use crate::Event;

/// A read model folded from an append-only event stream.
///
/// ## Idempotency and disposability
///
/// Read models are **disposable**: they can be deleted and rebuilt from the
/// events at any time, and rebuilding twice from the same events must produce
/// the same state. Events are the source of truth; the projection is a
/// materialized cache of them.
///
/// ## Persistence
///
/// This trait doesn't define how read models are stored; that's an
/// infrastructure concern. In-memory folds, SQL tables and cached aggregates
/// all apply events the same way.
pub trait Projection {
    type Ev: Event;

    /// Fold one event in.
    fn apply(&mut self, event: &Self::Ev);

    /// Apply a batch of events in order.
    fn apply_all<'a, I>(&mut self, events: I)
    where
        I: IntoIterator<Item = &'a Self::Ev>,
        Self::Ev: 'a,
    {
        for event in events {
            self.apply(event);
        }
    }
}
