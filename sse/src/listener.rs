use crate::state::ConnectionState;
use dashmap::DashMap;
use events::{EventEnvelope, EventKind};
use log::*;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Callback invoked for each decoded event.
pub type Listener = Arc<dyn Fn(&EventEnvelope) + Send + Sync>;

/// Callback invoked on every connection state change.
pub type StatusListener = Arc<dyn Fn(&ConnectionState) + Send + Sync>;

/// Unique identifier for a registered listener
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerId(String);

impl ListenerId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Which events a listener wants to see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ListenerScope {
    /// Only events of one kind
    Event(EventKind),
    /// Every decoded event (wildcard)
    All,
}

impl From<EventKind> for ListenerScope {
    fn from(kind: EventKind) -> Self {
        ListenerScope::Event(kind)
    }
}

/// Handle returned on registration, used to remove the listener again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    id: ListenerId,
    scope: ListenerScope,
}

impl Subscription {
    pub fn id(&self) -> &ListenerId {
        &self.id
    }

    pub fn scope(&self) -> ListenerScope {
        self.scope
    }
}

struct ListenerInfo {
    scope: ListenerScope,
    callback: Listener,
}

/// Event listener registry with dual indices: by listener id for removal, and by
/// scope (in registration order) for fan-out.
pub struct ListenerRegistry {
    /// Primary storage: lookup by listener id for registration/cleanup - O(1)
    listeners: DashMap<ListenerId, ListenerInfo>,

    /// Secondary index: listener ids per scope, in registration order
    scope_index: DashMap<ListenerScope, Vec<ListenerId>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self {
            listeners: DashMap::new(),
            scope_index: DashMap::new(),
        }
    }

    pub fn register(&self, scope: ListenerScope, callback: Listener) -> Subscription {
        let id = ListenerId::new();

        self.listeners.insert(
            id.clone(),
            ListenerInfo {
                scope,
                callback,
            },
        );

        self.scope_index.entry(scope).or_default().push(id.clone());

        debug!("Registered listener {} for {scope:?}", id.as_str());
        Subscription { id, scope }
    }

    /// Removes a listener. Returns false when it was already gone.
    pub fn unregister(&self, subscription: &Subscription) -> bool {
        let Some((_, info)) = self.listeners.remove(&subscription.id) else {
            return false;
        };

        if let Some(mut entry) = self.scope_index.get_mut(&info.scope) {
            entry.retain(|id| id != &subscription.id);

            if entry.is_empty() {
                drop(entry); // Release lock before removal
                self.scope_index.remove(&info.scope);
            }
        }
        true
    }

    pub fn count(&self, scope: ListenerScope) -> usize {
        self.scope_index
            .get(&scope)
            .map(|ids| ids.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    /// Snapshot of the callbacks for one scope, so none of the map locks are held
    /// while listeners run (listeners may register or remove other listeners).
    fn snapshot(&self, scope: ListenerScope) -> Vec<Listener> {
        let ids = match self.scope_index.get(&scope) {
            Some(ids) => ids.clone(),
            None => return Vec::new(),
        };

        ids.iter()
            .filter_map(|id| self.listeners.get(id).map(|info| Arc::clone(&info.callback)))
            .collect()
    }

    /// Delivers an event to the listeners of its kind, then to every wildcard
    /// listener. Returns how many listeners ran to completion.
    pub fn dispatch(&self, envelope: &EventEnvelope) -> usize {
        let specific = self.snapshot(ListenerScope::Event(envelope.kind()));
        let wildcard = self.snapshot(ListenerScope::All);

        specific
            .iter()
            .chain(wildcard.iter())
            .filter(|listener| invoke_isolated(envelope.kind().as_str(), || listener(envelope)))
            .count()
    }
}

impl Default for ListenerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry of connection state observers.
///
/// Snapshots are delivered one at a time, in the order they were enqueued,
/// whichever thread enqueued them. A snapshot enqueued while another thread is
/// delivering is handed to that thread, so observers always end on the newest
/// state.
pub struct StatusListeners {
    listeners: DashMap<ListenerId, StatusListener>,
    delivery: Mutex<Delivery>,
}

#[derive(Default)]
struct Delivery {
    pending: VecDeque<ConnectionState>,
    running: bool,
}

impl StatusListeners {
    pub fn new() -> Self {
        Self {
            listeners: DashMap::new(),
            delivery: Mutex::new(Delivery::default()),
        }
    }

    pub fn register(&self, callback: StatusListener) -> ListenerId {
        let id = ListenerId::new();
        self.listeners.insert(id.clone(), callback);
        id
    }

    pub fn unregister(&self, id: &ListenerId) -> bool {
        self.listeners.remove(id).is_some()
    }

    fn lock_delivery(&self) -> MutexGuard<'_, Delivery> {
        self.delivery.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a snapshot without delivering it. Callers that enqueue while
    /// holding their own state lock fix the delivery order to the order of
    /// their state changes.
    pub fn enqueue(&self, state: ConnectionState) {
        self.lock_delivery().pending.push_back(state);
    }

    /// Delivers queued snapshots unless another thread already is, in which
    /// case that thread delivers them. Must not be called with a lock held that
    /// listeners might take.
    pub fn flush(&self) {
        {
            let mut delivery = self.lock_delivery();
            if delivery.running {
                return;
            }
            delivery.running = true;
        }

        loop {
            let next = {
                let mut delivery = self.lock_delivery();
                match delivery.pending.pop_front() {
                    Some(state) => state,
                    None => {
                        delivery.running = false;
                        return;
                    }
                }
            };
            self.deliver(&next);
        }
    }

    pub fn notify(&self, state: &ConnectionState) {
        self.enqueue(state.clone());
        self.flush();
    }

    fn deliver(&self, state: &ConnectionState) {
        let callbacks: Vec<StatusListener> = self
            .listeners
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for callback in callbacks {
            invoke_isolated("status", || callback(state));
        }
    }
}

impl Default for StatusListeners {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs one listener, containing any panic so the remaining listeners still run.
fn invoke_isolated(label: &str, call: impl FnOnce()) -> bool {
    match panic::catch_unwind(AssertUnwindSafe(call)) {
        Ok(()) => true,
        Err(payload) => {
            error!(
                "Listener for {label} panicked: {}",
                panic_message(payload.as_ref())
            );
            false
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use events::{UserDeleted, UserEvent};
    use crate::state::ConnectionStatus;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn deleted(id: &str) -> EventEnvelope {
        EventEnvelope::new(
            None,
            UserEvent::Deleted(UserDeleted {
                user_id: id.to_string(),
                user_name: String::new(),
                message: String::new(),
            }),
        )
    }

    fn counting(counter: &Arc<AtomicUsize>) -> Listener {
        let counter = Arc::clone(counter);
        Arc::new(move |_: &EventEnvelope| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn dispatch_reaches_kind_and_wildcard_listeners_once() {
        let registry = ListenerRegistry::new();
        let deletes = Arc::new(AtomicUsize::new(0));
        let creates = Arc::new(AtomicUsize::new(0));
        let everything = Arc::new(AtomicUsize::new(0));

        registry.register(EventKind::UserDeleted.into(), counting(&deletes));
        registry.register(EventKind::UserCreated.into(), counting(&creates));
        registry.register(ListenerScope::All, counting(&everything));

        let delivered = registry.dispatch(&deleted("u-1"));

        assert_eq!(delivered, 2);
        assert_eq!(deletes.load(Ordering::SeqCst), 1);
        assert_eq!(creates.load(Ordering::SeqCst), 0);
        assert_eq!(everything.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listeners_run_in_registration_order() {
        let registry = ListenerRegistry::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second", "third"] {
            let order = Arc::clone(&order);
            registry.register(
                EventKind::UserDeleted.into(),
                Arc::new(move |_: &EventEnvelope| order.lock().unwrap().push(label)),
            );
        }

        registry.dispatch(&deleted("u-1"));
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[test]
    fn panicking_listener_does_not_stop_the_others() {
        let registry = ListenerRegistry::new();
        let after = Arc::new(AtomicUsize::new(0));

        registry.register(
            EventKind::UserDeleted.into(),
            Arc::new(|_: &EventEnvelope| panic!("listener failure")),
        );
        registry.register(EventKind::UserDeleted.into(), counting(&after));
        registry.register(ListenerScope::All, counting(&after));

        let delivered = registry.dispatch(&deleted("u-1"));

        assert_eq!(delivered, 2);
        assert_eq!(after.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unregister_removes_listener_and_empty_scope() {
        let registry = ListenerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let subscription = registry.register(EventKind::UserDeleted.into(), counting(&hits));
        assert_eq!(registry.count(EventKind::UserDeleted.into()), 1);

        assert!(registry.unregister(&subscription));
        assert!(!registry.unregister(&subscription));
        assert_eq!(registry.count(EventKind::UserDeleted.into()), 0);
        assert!(registry.is_empty());

        registry.dispatch(&deleted("u-1"));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn listener_may_unregister_itself_during_dispatch() {
        let registry = Arc::new(ListenerRegistry::new());
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let registry_ref = Arc::clone(&registry);
        let slot_ref = Arc::clone(&slot);
        let subscription = registry.register(
            ListenerScope::All,
            Arc::new(move |_: &EventEnvelope| {
                if let Some(subscription) = slot_ref.lock().unwrap().take() {
                    registry_ref.unregister(&subscription);
                }
            }),
        );
        *slot.lock().unwrap() = Some(subscription);

        assert_eq!(registry.dispatch(&deleted("u-1")), 1);
        assert_eq!(registry.dispatch(&deleted("u-2")), 0);
    }

    #[test]
    fn status_listeners_are_isolated_too() {
        let listeners = StatusListeners::new();
        let seen = Arc::new(AtomicUsize::new(0));

        listeners.register(Arc::new(|_: &ConnectionState| panic!("status failure")));
        let seen_ref = Arc::clone(&seen);
        let id = listeners.register(Arc::new(move |_: &ConnectionState| {
            seen_ref.fetch_add(1, Ordering::SeqCst);
        }));

        listeners.notify(&ConnectionState::default());
        assert_eq!(seen.load(Ordering::SeqCst), 1);

        assert!(listeners.unregister(&id));
        listeners.notify(&ConnectionState::default());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn status_listener_may_notify_from_inside_a_callback() {
        let listeners = Arc::new(StatusListeners::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let listeners_ref = Arc::clone(&listeners);
        let seen_ref = Arc::clone(&seen);
        listeners.register(Arc::new(move |state: &ConnectionState| {
            seen_ref.lock().unwrap().push(state.status);
            if state.status == ConnectionStatus::Error {
                listeners_ref.notify(&ConnectionState::default());
            }
        }));

        listeners.notify(&ConnectionState {
            status: ConnectionStatus::Error,
            ..Default::default()
        });

        assert_eq!(
            *seen.lock().unwrap(),
            vec![ConnectionStatus::Error, ConnectionStatus::Disconnected]
        );
    }

    #[test]
    fn snapshots_queued_during_delivery_arrive_in_order() {
        let listeners = Arc::new(StatusListeners::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_ref = Arc::clone(&seen);
        listeners.register(Arc::new(move |state: &ConnectionState| {
            if state.status == ConnectionStatus::Error {
                std::thread::sleep(std::time::Duration::from_millis(100));
            }
            seen_ref.lock().unwrap().push(state.status);
        }));

        listeners.enqueue(ConnectionState {
            status: ConnectionStatus::Error,
            ..Default::default()
        });
        listeners.enqueue(ConnectionState {
            status: ConnectionStatus::Reconnecting,
            ..Default::default()
        });

        let slow = Arc::clone(&listeners);
        let worker = std::thread::spawn(move || slow.flush());
        std::thread::sleep(std::time::Duration::from_millis(20));
        listeners.notify(&ConnectionState::default());
        worker.join().unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![
                ConnectionStatus::Error,
                ConnectionStatus::Reconnecting,
                ConnectionStatus::Disconnected
            ]
        );
    }
}
