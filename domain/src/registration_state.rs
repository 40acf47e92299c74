//! The dashboard's local view of the users collection and how push events
//! change it. Everything here is synchronous and free of I/O.

use chrono::{DateTime, Utc};
use entity::pagination::Pagination;
use entity::users::{User, UserFilters};
use events::{
    EventEnvelope, StatsUpdated, UserCreated, UserDeleted, UserEvent, UserStats, UserUpdated,
};
use serde::{Deserialize, Serialize};
use sse::ConnectionState;
use std::collections::VecDeque;

/// Number of recent events kept in `RegistrationState::event_history`.
pub const EVENT_HISTORY_LIMIT: usize = 100;

/// Aggregate counters maintained from push events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeStats {
    pub total_users: u64,
    pub active_users: u64,
    pub new_users_this_month: u64,
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrationState {
    pub users: Vec<User>,
    pub current_user: Option<User>,
    pub pagination: Pagination,
    pub filters: UserFilters,
    pub is_loading: bool,
    pub is_creating: bool,
    pub is_updating: bool,
    pub is_deleting: bool,
    pub error: Option<String>,
    pub connection_state: ConnectionState,
    pub realtime_stats: RealtimeStats,
    pub realtime_enabled: bool,
    pub last_event: Option<EventEnvelope>,
    /// Newest first.
    pub event_history: VecDeque<EventEnvelope>,
}

/// The part of the state that survives a restart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedState {
    #[serde(default)]
    pub filters: UserFilters,
    #[serde(default)]
    pub current_user: Option<User>,
}

impl RegistrationState {
    pub fn is_busy(&self) -> bool {
        self.is_loading || self.is_creating || self.is_updating || self.is_deleting
    }

    /// Inserts `user` at the front, or replaces the record with the same id in
    /// place. Returns true when the id was new.
    pub(crate) fn upsert_user(&mut self, user: User) -> bool {
        match self.users.iter_mut().find(|existing| existing.id == user.id) {
            Some(existing) => {
                *existing = user;
                false
            }
            None => {
                self.users.insert(0, user);
                true
            }
        }
    }

    /// Replaces the record with the same id, if any. Also refreshes the current
    /// user when it is that record. Never inserts.
    pub(crate) fn replace_user(&mut self, user: &User) {
        if let Some(existing) = self.users.iter_mut().find(|existing| existing.id == user.id) {
            *existing = user.clone();
        }
        if self.current_user.as_ref().is_some_and(|current| current.id == user.id) {
            self.current_user = Some(user.clone());
        }
    }

    pub(crate) fn remove_user(&mut self, id: &str) {
        self.users.retain(|user| user.id != id);
        if self.current_user.as_ref().is_some_and(|current| current.id == id) {
            self.current_user = None;
        }
    }

    /// Upserts the new user. `total_users` only grows when the id was unknown.
    pub fn apply_user_created(&mut self, data: &UserCreated, at: DateTime<Utc>) {
        if self.upsert_user(data.user.clone()) {
            self.realtime_stats.total_users += 1;
        }
        self.realtime_stats.last_updated = Some(at);
    }

    pub fn apply_user_updated(&mut self, data: &UserUpdated, at: DateTime<Utc>) {
        self.replace_user(&data.user);
        self.realtime_stats.last_updated = Some(at);
    }

    /// `total_users` is decremented even for ids outside the loaded page.
    pub fn apply_user_deleted(&mut self, data: &UserDeleted, at: DateTime<Utc>) {
        self.remove_user(&data.user_id);
        self.realtime_stats.total_users = self.realtime_stats.total_users.saturating_sub(1);
        self.realtime_stats.last_updated = Some(at);
    }

    pub fn apply_stats_updated(&mut self, data: &StatsUpdated, at: DateTime<Utc>) {
        let UserStats {
            total_users,
            active_users,
            new_users_this_month,
        } = data.stats;

        self.realtime_stats = RealtimeStats {
            total_users,
            active_users,
            new_users_this_month,
            last_updated: Some(at),
        };
    }

    /// Folds one push event into the state. Merges are keyed by user id, so
    /// applying the same event twice leaves the users list as applying it once.
    pub fn apply_event(&mut self, envelope: &EventEnvelope) {
        let at = envelope.received_at;

        match &envelope.payload {
            UserEvent::Created(data) => self.apply_user_created(data, at),
            UserEvent::Updated(data) => self.apply_user_updated(data, at),
            UserEvent::Deleted(data) => self.apply_user_deleted(data, at),
            UserEvent::StatsUpdated(data) => self.apply_stats_updated(data, at),
        }
    }

    pub fn record_event(&mut self, envelope: &EventEnvelope) {
        self.event_history.push_front(envelope.clone());
        self.event_history.truncate(EVENT_HISTORY_LIMIT);
        self.last_event = Some(envelope.clone());
    }

    pub fn persisted(&self) -> PersistedState {
        PersistedState {
            filters: self.filters.clone(),
            current_user: self.current_user.clone(),
        }
    }

    pub fn restore(&mut self, persisted: PersistedState) {
        self.filters = persisted.filters;
        self.current_user = persisted.current_user;
    }
}
