use domain::error::Error;
use domain::{RegistrationState, RegistrationStore, UserServiceImpl};
use entity::auth::LoginRequest;
use entity::users::UserFilters;
use entity_api::auth::AuthApi;
use entity_api::{ApiClient, HttpUserRepository};
use log::*;
use service::{config::Config, logging::Logger, AppState};
use sse::EventStreamClient;
use std::future::Future;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    let config = Config::new();
    if let Err(e) = Logger::init_logger(&config) {
        eprintln!("Failed to initialize logger: {e}");
    }

    info!(
        "Starting registration sync [{}] against {}",
        config.runtime_env(),
        config.api_base_url
    );

    let app_state = AppState::new(config);

    if let Err(e) = run(app_state).await {
        error!("Registration sync stopped: {e}");
        std::process::exit(1);
    }
}

async fn run(app_state: AppState) -> Result<(), Error> {
    let config = &app_state.config;
    let api_client = ApiClient::new(config, app_state.tokens.clone())?;

    if let Some((email, password)) = config.login_credentials() {
        AuthApi::new(api_client.clone())
            .login(&LoginRequest { email, password })
            .await?;
    } else if !app_state.tokens_ref().is_present() {
        warn!("No auth token or login credentials configured, requests are unauthenticated");
    }

    let user_service = UserServiceImpl::new(HttpUserRepository::new(api_client));
    let event_stream = EventStreamClient::from_config(config, app_state.tokens.clone())?;
    let store = RegistrationStore::new(Arc::new(user_service)).with_event_stream(event_stream);

    if let Some(path) = &config.state_file {
        match RegistrationStore::load_state(path) {
            Ok(Some(persisted)) => {
                info!("Restored filters and selection from {}", path.display());
                store.restore(persisted);
            }
            Ok(None) => debug!("No saved state at {}", path.display()),
            Err(e) => warn!("Ignoring unreadable state file {}: {e}", path.display()),
        }
    }

    let page = UserFilters {
        limit: Some(config.page_limit),
        ..Default::default()
    };
    if let Err(e) = store.fetch_users(Some(page)).await {
        // Realtime updates can still populate the view.
        warn!("Initial user fetch failed: {e}");
    }

    let binding = store.bind_realtime();
    store.enable_realtime();

    watch_until(&store, tokio::signal::ctrl_c()).await;

    store.disable_realtime();
    if let Some(binding) = binding {
        binding.unbind();
    }

    if let Some(path) = &config.state_file {
        store.save_state(path)?;
        info!("Saved filters and selection to {}", path.display());
    }

    Ok(())
}

/// Logs a one-line summary whenever the dashboard view changes, until
/// `shutdown` completes.
async fn watch_until<F: Future>(store: &RegistrationStore, shutdown: F) {
    let mut updates = store.subscribe();
    let mut last_summary = String::new();
    tokio::pin!(shutdown);

    loop {
        let summary = summarize(&updates.borrow_and_update());
        if summary != last_summary {
            info!("{summary}");
            last_summary = summary;
        }

        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
        }
    }
}

fn summarize(state: &RegistrationState) -> String {
    let mut summary = format!(
        "stream {} | {} users on page {}/{} | total {} active {} new this month {}",
        state.connection_state.status,
        state.users.len(),
        state.pagination.page,
        state.pagination.total_pages,
        state.realtime_stats.total_users,
        state.realtime_stats.active_users,
        state.realtime_stats.new_users_this_month,
    );

    if state.is_busy() {
        summary.push_str(" | busy");
    }
    if let Some(event) = &state.last_event {
        summary.push_str(&format!(" | last {} {}", event.kind(), event.payload.message()));
    }
    if let Some(error) = state
        .connection_state
        .error
        .as_ref()
        .or(state.error.as_ref())
    {
        summary.push_str(&format!(" | error: {error}"));
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use service::session::TokenStore;
    use std::time::Duration;
    use tokio::sync::oneshot;

    fn offline_store() -> RegistrationStore {
        let client =
            ApiClient::with_client(Default::default(), "http://127.0.0.1:9/api", TokenStore::new());
        RegistrationStore::new(Arc::new(UserServiceImpl::new(HttpUserRepository::new(client))))
    }

    #[tokio::test]
    async fn shutdown_signal_between_changes_is_not_lost() {
        let store = offline_store();
        let (signal, shutdown) = oneshot::channel::<()>();

        let watched = store.clone();
        let watcher = tokio::spawn(async move { watch_until(&watched, shutdown).await });

        store.clear_error();
        signal.send(()).unwrap();
        store.clear_error();
        store.clear_users();

        tokio::time::timeout(Duration::from_secs(1), watcher)
            .await
            .expect("watcher should stop after the signal")
            .unwrap();
    }

    #[test]
    fn summary_flags_busy_state_and_errors() {
        let state = RegistrationState {
            is_loading: true,
            error: Some("Network error".to_string()),
            ..Default::default()
        };

        let summary = summarize(&state);
        assert!(summary.starts_with("stream disconnected | 0 users"));
        assert!(summary.contains(" | busy"));
        assert!(summary.ends_with(" | error: Network error"));
    }
}
