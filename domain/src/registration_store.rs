//! Observable store behind the registration dashboard.
//!
//! `RegistrationStore` keeps one `RegistrationState` in a `tokio::sync::watch`
//! channel. CRUD calls go through a `UserService` and fold the result into the
//! state; push events from an attached `EventStreamClient` are folded in by the
//! listeners `bind_realtime` installs. Observers call `subscribe` and read the
//! latest snapshot whenever it changes.

use crate::error::Error;
use crate::registration_state::{PersistedState, RegistrationState};
use crate::user_service::UserService;
use chrono::Utc;
use entity::pagination::Pagination;
use entity::users::{CreateUserRequest, UpdateUserRequest, User, UserFilters};
use events::{EventEnvelope, StatsUpdated, UserCreated, UserDeleted, UserUpdated};
use log::*;
use sse::{ConnectionState, EventStreamClient, ListenerId, Subscription};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Clone)]
pub struct RegistrationStore {
    state: Arc<StateChannel>,
    user_service: Arc<dyn UserService>,
    event_stream: Option<EventStreamClient>,
}

/// Listeners installed by `RegistrationStore::bind_realtime`.
pub struct RealtimeBinding {
    client: EventStreamClient,
    subscriptions: Vec<Subscription>,
    status_listener: ListenerId,
}

impl RealtimeBinding {
    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    /// Removes every listener the binding installed.
    pub fn unbind(self) {
        for subscription in &self.subscriptions {
            self.client.remove_listener(subscription);
        }
        self.client.remove_status_listener(&self.status_listener);
    }
}

impl RegistrationStore {
    pub fn new(user_service: Arc<dyn UserService>) -> Self {
        let (state, _) = watch::channel(RegistrationState::default());
        Self {
            state: Arc::new(state),
            user_service,
            event_stream: None,
        }
    }

    pub fn with_event_stream(mut self, client: EventStreamClient) -> Self {
        self.event_stream = Some(client);
        self
    }

    pub fn event_stream(&self) -> Option<&EventStreamClient> {
        self.event_stream.as_ref()
    }

    pub fn subscribe(&self) -> watch::Receiver<RegistrationState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> RegistrationState {
        self.state.borrow().clone()
    }

    fn update(&self, modify: impl FnOnce(&mut RegistrationState)) {
        self.state.send_modify(modify);
    }

    /// Records a failed call and hands the error back to the caller.
    fn fail<T>(&self, err: Error, clear: impl FnOnce(&mut RegistrationState)) -> Result<T, Error> {
        warn!("Registration store operation failed: {err}");
        let message = err.to_string();
        self.update(|state| {
            clear(state);
            state.error = Some(message);
        });
        Err(err)
    }

    /// Loads one page of users. `filters` are overlaid on the stored ones and
    /// the merged result becomes the stored filters.
    pub async fn fetch_users(&self, filters: Option<UserFilters>) -> Result<(), Error> {
        let stored = self.state.borrow().filters.clone();
        let merged = match &filters {
            Some(filters) => stored.merge(filters),
            None => stored,
        };

        self.update(|state| {
            state.is_loading = true;
            state.error = None;
        });

        match self.user_service.get_users(&merged).await {
            Ok(response) => {
                debug!(
                    "Fetched {} of {} users (page {}/{})",
                    response.data.len(),
                    response.total,
                    response.page,
                    response.total_pages
                );
                self.update(|state| {
                    state.pagination = Pagination::from(&response);
                    state.users = response.data;
                    state.filters = merged;
                    state.is_loading = false;
                });
                Ok(())
            }
            Err(err) => self.fail(err, |state| state.is_loading = false),
        }
    }

    pub fn set_filters(&self, filters: UserFilters) {
        self.update(|state| state.filters = filters);
    }

    pub fn clear_users(&self) {
        self.update(|state| {
            state.users.clear();
            state.pagination = Pagination::default();
        });
    }

    pub async fn fetch_user_by_id(&self, id: &str) -> Result<(), Error> {
        self.update(|state| {
            state.is_loading = true;
            state.error = None;
        });

        match self.user_service.get_user_by_id(id).await {
            Ok(user) => {
                self.update(|state| {
                    state.current_user = Some(user);
                    state.is_loading = false;
                });
                Ok(())
            }
            Err(err) => self.fail(err, |state| {
                state.is_loading = false;
                state.current_user = None;
            }),
        }
    }

    pub fn set_current_user(&self, user: Option<User>) {
        self.update(|state| state.current_user = user);
    }

    pub async fn create_user(&self, data: CreateUserRequest) -> Result<User, Error> {
        self.update(|state| {
            state.is_creating = true;
            state.error = None;
        });

        match self.user_service.create_user(data).await {
            Ok(user) => {
                self.update(|state| {
                    state.users.retain(|existing| existing.id != user.id);
                    state.users.insert(0, user.clone());
                    state.current_user = Some(user.clone());
                    state.is_creating = false;
                });
                Ok(user)
            }
            Err(err) => self.fail(err, |state| state.is_creating = false),
        }
    }

    pub async fn update_user(&self, id: &str, data: UpdateUserRequest) -> Result<User, Error> {
        self.update(|state| {
            state.is_updating = true;
            state.error = None;
        });

        match self.user_service.update_user(id, data).await {
            Ok(user) => {
                self.update(|state| {
                    state.replace_user(&user);
                    state.is_updating = false;
                });
                Ok(user)
            }
            Err(err) => self.fail(err, |state| state.is_updating = false),
        }
    }

    pub async fn delete_user(&self, id: &str) -> Result<(), Error> {
        self.update(|state| {
            state.is_deleting = true;
            state.error = None;
        });

        match self.user_service.delete_user(id).await {
            Ok(()) => {
                self.update(|state| {
                    state.remove_user(id);
                    state.is_deleting = false;
                });
                Ok(())
            }
            Err(err) => self.fail(err, |state| state.is_deleting = false),
        }
    }

    pub fn handle_user_created(&self, data: &UserCreated) {
        fold_user_created(&self.state, data);
    }

    pub fn handle_user_updated(&self, data: &UserUpdated) {
        fold_user_updated(&self.state, data);
    }

    pub fn handle_user_deleted(&self, data: &UserDeleted) {
        fold_user_deleted(&self.state, data);
    }

    pub fn handle_stats_updated(&self, data: &StatsUpdated) {
        fold_stats_updated(&self.state, data);
    }

    pub fn record_event(&self, envelope: &EventEnvelope) {
        fold_event_record(&self.state, envelope);
    }

    pub fn set_connection_state(&self, connection_state: &ConnectionState) {
        fold_connection_state(&self.state, connection_state);
    }

    /// Turns realtime updates on and opens the attached event stream.
    pub fn enable_realtime(&self) {
        self.update(|state| state.realtime_enabled = true);
        match &self.event_stream {
            Some(client) => client.connect(),
            None => warn!("Realtime enabled without an event stream attached"),
        }
    }

    pub fn disable_realtime(&self) {
        self.update(|state| state.realtime_enabled = false);
        if let Some(client) = &self.event_stream {
            client.disconnect();
        }
    }

    /// Wires the attached event stream into this store: one handler per users
    /// event kind, a wildcard listener feeding `last_event` and `event_history`,
    /// and a status listener mirroring `connection_state`. Returns `None` when no
    /// stream is attached.
    ///
    /// Listeners hold only the state channel, not the store.
    pub fn bind_realtime(&self) -> Option<RealtimeBinding> {
        let client = self.event_stream.clone()?;
        let mut subscriptions = Vec::with_capacity(5);

        let state = Arc::clone(&self.state);
        subscriptions.push(client.on_user_created(move |data| fold_user_created(&state, data)));

        let state = Arc::clone(&self.state);
        subscriptions.push(client.on_user_updated(move |data| fold_user_updated(&state, data)));

        let state = Arc::clone(&self.state);
        subscriptions.push(client.on_user_deleted(move |data| fold_user_deleted(&state, data)));

        let state = Arc::clone(&self.state);
        subscriptions.push(client.on_stats_updated(move |data| fold_stats_updated(&state, data)));

        let state = Arc::clone(&self.state);
        subscriptions.push(client.on_any_event(move |envelope| fold_event_record(&state, envelope)));

        let state = Arc::clone(&self.state);
        let status_listener = client.on_status_change(move |connection_state| {
            fold_connection_state(&state, connection_state)
        });

        self.set_connection_state(&client.state());
        info!("Realtime updates bound to the users event stream");

        Some(RealtimeBinding {
            client,
            subscriptions,
            status_listener,
        })
    }

    pub fn clear_error(&self) {
        self.update(|state| state.error = None);
    }

    pub fn clear_event_history(&self) {
        self.update(|state| {
            state.event_history.clear();
            state.last_event = None;
        });
    }

    /// Back to the initial state. The live connection state and the realtime
    /// flag describe the attached stream, so they are kept.
    pub fn reset(&self) {
        self.update(|state| {
            *state = RegistrationState {
                connection_state: state.connection_state.clone(),
                realtime_enabled: state.realtime_enabled,
                ..Default::default()
            };
        });
    }

    pub fn persisted(&self) -> PersistedState {
        self.state.borrow().persisted()
    }

    pub fn restore(&self, persisted: PersistedState) {
        self.update(|state| state.restore(persisted));
    }

    /// Reads a state file written by `save_state`. A missing file yields `None`.
    pub fn load_state(path: &Path) -> Result<Option<PersistedState>, Error> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        Ok(Some(serde_json::from_str(&contents)?))
    }

    pub fn save_state(&self, path: &Path) -> Result<(), Error> {
        let contents = serde_json::to_string_pretty(&self.persisted())?;
        std::fs::write(path, contents)?;
        debug!("Saved registration state to {}", path.display());
        Ok(())
    }
}

type StateChannel = watch::Sender<RegistrationState>;

fn fold_user_created(state: &StateChannel, data: &UserCreated) {
    state.send_modify(|state| state.apply_user_created(data, Utc::now()));
}

fn fold_user_updated(state: &StateChannel, data: &UserUpdated) {
    state.send_modify(|state| state.apply_user_updated(data, Utc::now()));
}

fn fold_user_deleted(state: &StateChannel, data: &UserDeleted) {
    state.send_modify(|state| state.apply_user_deleted(data, Utc::now()));
}

fn fold_stats_updated(state: &StateChannel, data: &StatsUpdated) {
    state.send_modify(|state| state.apply_stats_updated(data, Utc::now()));
}

fn fold_event_record(state: &StateChannel, envelope: &EventEnvelope) {
    state.send_modify(|state| state.record_event(envelope));
}

fn fold_connection_state(state: &StateChannel, connection_state: &ConnectionState) {
    let connection_state = connection_state.clone();
    state.send_modify(|state| state.connection_state = connection_state);
}
