//! Domain layer of the registration dashboard.
//!
//! `user_service` validates and normalizes input before it reaches the remote
//! API, `registration_state` holds the pure state transitions, and
//! `registration_store` ties both to the event stream and exposes the
//! observable store.

pub use entity::{pagination, users, Id};

pub mod error;
pub mod registration_state;
pub mod registration_store;
pub mod user_service;

pub use registration_state::{PersistedState, RealtimeStats, RegistrationState};
pub use registration_store::{RealtimeBinding, RegistrationStore};
pub use user_service::{UserService, UserServiceImpl, ValidationResult};
