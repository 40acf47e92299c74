//! Typed subscriptions for the users event stream.

use crate::client::EventStreamClient;
use crate::listener::{ListenerScope, Subscription};
use events::{EventEnvelope, EventKind, StatsUpdated, UserCreated, UserDeleted, UserEvent, UserUpdated};

impl EventStreamClient {
    pub fn on_user_created<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&UserCreated) + Send + Sync + 'static,
    {
        self.add_listener(EventKind::UserCreated, move |envelope: &EventEnvelope| {
            if let UserEvent::Created(data) = &envelope.payload {
                callback(data);
            }
        })
    }

    pub fn on_user_updated<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&UserUpdated) + Send + Sync + 'static,
    {
        self.add_listener(EventKind::UserUpdated, move |envelope: &EventEnvelope| {
            if let UserEvent::Updated(data) = &envelope.payload {
                callback(data);
            }
        })
    }

    pub fn on_user_deleted<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&UserDeleted) + Send + Sync + 'static,
    {
        self.add_listener(EventKind::UserDeleted, move |envelope: &EventEnvelope| {
            if let UserEvent::Deleted(data) = &envelope.payload {
                callback(data);
            }
        })
    }

    pub fn on_stats_updated<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&StatsUpdated) + Send + Sync + 'static,
    {
        self.add_listener(EventKind::StatsUpdated, move |envelope: &EventEnvelope| {
            if let UserEvent::StatsUpdated(data) = &envelope.payload {
                callback(data);
            }
        })
    }

    /// Every users event, whatever its kind.
    pub fn on_any_event<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&EventEnvelope) + Send + Sync + 'static,
    {
        self.add_listener(ListenerScope::All, callback)
    }
}
