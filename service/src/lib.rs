use config::Config;
use session::TokenStore;

pub mod config;
pub mod logging;
pub mod session;

// Client-level state containing only infrastructure concerns shared by the
// HTTP collaborators and the event stream.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub tokens: TokenStore,
}

impl AppState {
    pub fn new(app_config: Config) -> Self {
        let tokens = TokenStore::new();
        if let Some(token) = app_config.auth_token() {
            tokens.set(token);
        }

        Self {
            config: app_config,
            tokens,
        }
    }

    pub fn tokens_ref(&self) -> &TokenStore {
        &self.tokens
    }
}
