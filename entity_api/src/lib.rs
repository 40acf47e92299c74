//! HTTP collaborators of the registration dashboard.
//!
//! Thin wrappers around the remote REST API: `client` owns transport concerns
//! (base URL, timeout, bearer token, status mapping), `user` and `auth` map
//! endpoints onto typed calls.

pub mod auth;
pub mod client;
pub mod error;
pub mod user;

pub use client::ApiClient;
pub use error::{EntityApiErrorKind, Error};
pub use user::{HttpUserRepository, UserRepository};
