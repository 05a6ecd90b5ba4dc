//! Change notification bus
//!
//! Every successful repository operation publishes a [`ChangeEvent`].
//! Observers register on a [`ChangeBus`] instance that the caller creates and
//! hands to [`LocalDatabase::open`](crate::LocalDatabase::open); there is no
//! global dispatcher.
//!
//! Publishing is fire-and-forget: observers run synchronously on the
//! publishing task, a panicking observer is logged and skipped, and payloads
//! are only built when at least one observer is attached.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use tracing::warn;
use uuid::Uuid;

use crate::models::{ConnectionEndpoint, Customer, FileAttachment, Order};

/// Which record kind an event concerns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Customer,
    Order,
    File,
    Connection,
}

/// What happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeAction {
    Created,
    Updated,
    Deleted,
    /// A single record lookup (payload may be [`ChangePayload::NotFound`])
    Retrieved,
    /// A list or search call returned
    BatchRetrieved,
    /// A stream produced one element
    StreamElementRetrieved,
    CountChanged,
    SizeQueried,
}

/// Event payload
#[derive(Debug, Clone)]
pub enum ChangePayload {
    Customer(Customer),
    Customers(Vec<Customer>),
    Order(Order),
    Orders(Vec<Order>),
    File(FileAttachment),
    Files(Vec<FileAttachment>),
    Connection(ConnectionEndpoint),
    Connections(Vec<ConnectionEndpoint>),
    /// Lookup by this key found nothing
    NotFound(Uuid),
    /// Rows removed for this key
    Removed { id: Uuid, rows: usize },
    Count(u64),
    /// Human-readable size
    Size(String),
}

/// A published change
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub entity: EntityKind,
    pub action: ChangeAction,
    pub payload: ChangePayload,
}

/// Receives change events
///
/// Any `Fn(&ChangeEvent) + Send + Sync` closure is an observer.
pub trait ChangeObserver: Send + Sync {
    fn on_change(&self, event: &ChangeEvent);
}

impl<F> ChangeObserver for F
where
    F: Fn(&ChangeEvent) + Send + Sync,
{
    fn on_change(&self, event: &ChangeEvent) {
        self(event)
    }
}

/// Handle returned by [`ChangeBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type ObserverList = Vec<(SubscriptionId, Arc<dyn ChangeObserver>)>;

#[derive(Default)]
struct BusInner {
    next_id: AtomicU64,
    observers: RwLock<ObserverList>,
}

/// Observer registry shared by everything constructed from it
///
/// Cloning is cheap; clones publish to the same observers.
#[derive(Clone, Default)]
pub struct ChangeBus {
    inner: Arc<BusInner>,
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an observer
    pub fn subscribe(&self, observer: impl ChangeObserver + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        self.write_observers().push((id, Arc::new(observer)));
        id
    }

    /// Detach an observer; returns false if it was not attached
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut observers = self.write_observers();
        let before = observers.len();
        observers.retain(|(sid, _)| *sid != id);
        observers.len() != before
    }

    /// Detach every observer
    pub fn clear(&self) {
        self.write_observers().clear();
    }

    pub fn observer_count(&self) -> usize {
        self.read_observers().len()
    }

    pub fn has_observers(&self) -> bool {
        self.observer_count() > 0
    }

    /// Deliver an event to every attached observer
    pub fn publish(&self, event: &ChangeEvent) {
        // Snapshot so observers may subscribe/unsubscribe while being notified
        let observers: Vec<Arc<dyn ChangeObserver>> = self
            .read_observers()
            .iter()
            .map(|(_, o)| Arc::clone(o))
            .collect();

        for observer in observers {
            let delivered = catch_unwind(AssertUnwindSafe(|| observer.on_change(event)));
            if delivered.is_err() {
                warn!(
                    "Change observer panicked on {:?} {:?}; continuing",
                    event.entity, event.action
                );
            }
        }
    }

    /// Publish with a lazily built payload
    pub(crate) fn emit(
        &self,
        entity: EntityKind,
        action: ChangeAction,
        payload: impl FnOnce() -> ChangePayload,
    ) {
        if !self.has_observers() {
            return;
        }
        self.publish(&ChangeEvent {
            entity,
            action,
            payload: payload(),
        });
    }

    fn read_observers(&self) -> std::sync::RwLockReadGuard<'_, ObserverList> {
        self.inner
            .observers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_observers(&self) -> std::sync::RwLockWriteGuard<'_, ObserverList> {
        self.inner
            .observers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for ChangeBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangeBus")
            .field("observers", &self.observer_count())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::EventLog;
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn count_event() -> ChangeEvent {
        ChangeEvent {
            entity: EntityKind::Customer,
            action: ChangeAction::CountChanged,
            payload: ChangePayload::Count(3),
        }
    }

    #[test]
    fn test_publish_reaches_all_observers() {
        let bus = ChangeBus::new();
        let first = EventLog::attach(&bus);
        let second = EventLog::attach(&bus);

        bus.publish(&count_event());

        assert_eq!(first.events(), vec![(EntityKind::Customer, ChangeAction::CountChanged)]);
        assert_eq!(second.events().len(), 1);
        assert_eq!(bus.observer_count(), 2);
    }

    #[test]
    fn test_unsubscribe() {
        let bus = ChangeBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let id = bus.subscribe(move |_: &ChangeEvent| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(&count_event());
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.publish(&count_event());

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(!bus.has_observers());
    }

    #[test]
    fn test_panicking_observer_does_not_stop_others() {
        let bus = ChangeBus::new();
        bus.subscribe(|_: &ChangeEvent| panic!("observer failure"));
        let log = EventLog::attach(&bus);

        bus.publish(&count_event());

        assert_eq!(log.events().len(), 1);
    }

    #[test]
    fn test_emit_skips_payload_without_observers() {
        let bus = ChangeBus::new();
        let built = AtomicUsize::new(0);

        bus.emit(EntityKind::File, ChangeAction::SizeQueried, || {
            built.fetch_add(1, Ordering::SeqCst);
            ChangePayload::Size("1 B".to_string())
        });
        assert_eq!(built.load(Ordering::SeqCst), 0);

        let log = EventLog::attach(&bus);
        bus.emit(EntityKind::File, ChangeAction::SizeQueried, || {
            built.fetch_add(1, Ordering::SeqCst);
            ChangePayload::Size("1 B".to_string())
        });
        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert_eq!(log.count(EntityKind::File, ChangeAction::SizeQueried), 1);
    }

    #[test]
    fn test_clear_detaches_everything() {
        let bus = ChangeBus::new();
        let log = EventLog::attach(&bus);
        let clone = bus.clone();

        clone.clear();
        bus.publish(&count_event());

        assert!(log.events().is_empty());
    }
}
