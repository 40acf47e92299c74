//! Bearer token shared by every outbound call.

use secrecy::{ExposeSecret, SecretString};
use std::sync::{Arc, RwLock};

/// Holds the bearer token issued by `/auth/login`.
///
/// Cloning is cheap and every clone observes the same token, so the HTTP client,
/// the auth API and the event stream can all hold one.
#[derive(Clone, Default)]
pub struct TokenStore {
    inner: Arc<RwLock<Option<SecretString>>>,
}

impl TokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, token: String) {
        if let Ok(mut slot) = self.inner.write() {
            *slot = Some(SecretString::new(token));
        }
    }

    pub fn clear(&self) {
        if let Ok(mut slot) = self.inner.write() {
            *slot = None;
        }
    }

    /// Returns a copy of the token for building a request.
    pub fn get(&self) -> Option<String> {
        self.inner
            .read()
            .ok()
            .and_then(|slot| slot.as_ref().map(|token| token.expose_secret().clone()))
    }

    pub fn is_present(&self) -> bool {
        self.inner
            .read()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenStore")
            .field("present", &self.is_present())
            .finish()
    }
}
