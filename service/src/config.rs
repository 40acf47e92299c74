use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default base URL of the registration REST API.
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:3001/api";

/// Default push endpoint for user events.
pub const DEFAULT_EVENTS_URL: &str = "http://localhost:3001/api/users/events";

#[derive(Clone, Debug, PartialEq)]
pub enum RustEnv {
    Development,
    Production,
    Staging,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RustEnvParseError;

impl FromStr for RustEnv {
    type Err = RustEnvParseError;
    fn from_str(level: &str) -> Result<RustEnv, Self::Err> {
        match level.to_lowercase().as_str() {
            "development" => Ok(RustEnv::Development),
            "production" => Ok(RustEnv::Production),
            "staging" => Ok(RustEnv::Staging),
            _ => Err(RustEnvParseError),
        }
    }
}

impl fmt::Display for RustEnv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RustEnv::Development => write!(f, "development"),
            RustEnv::Production => write!(f, "production"),
            RustEnv::Staging => write!(f, "staging"),
        }
    }
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Base URL of the registration REST API (users and auth endpoints).
    #[arg(short, long, env, default_value = DEFAULT_API_BASE_URL)]
    pub api_base_url: String,

    /// Full URL of the server-push endpoint emitting user events.
    #[arg(short, long, env, default_value = DEFAULT_EVENTS_URL)]
    pub events_url: String,

    /// Milliseconds to wait before re-opening a failed event stream.
    #[arg(long, env, default_value_t = 3000)]
    pub reconnect_interval_ms: u64,

    /// Consecutive reconnect attempts before the event stream gives up and
    /// stays in the error state until re-enabled.
    #[arg(long, env, default_value_t = 10)]
    pub max_reconnect_attempts: u32,

    /// Timeout in seconds for a single REST call.
    #[arg(long, env, default_value_t = 10)]
    pub request_timeout_secs: u64,

    /// Bearer token to use for REST calls and the event stream.
    #[arg(long, env)]
    auth_token: Option<String>,

    /// Email to sign in with when no token is configured.
    #[arg(long, env)]
    login_email: Option<String>,

    /// Password to sign in with when no token is configured.
    #[arg(long, env)]
    login_password: Option<String>,

    /// Page size requested when listing users.
    #[arg(long, env, default_value_t = 10)]
    pub page_limit: u32,

    /// File the dashboard filters and selected user are persisted to between runs.
    #[arg(long, env)]
    pub state_file: Option<PathBuf>,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
        )]
    pub log_level_filter: LevelFilter,

    /// Set the Rust runtime environment to use.
    #[arg(
    short,
    long,
    env,
    default_value_t = RustEnv::Development,
    value_parser = clap::builder::PossibleValuesParser::new([
        "DEVELOPMENT", "PRODUCTION", "STAGING",
        "development", "production", "staging"
    ])
        .map(|s| s.parse::<RustEnv>().unwrap()),
    )]
    pub runtime_env: RustEnv,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn set_auth_token(mut self, token: String) -> Self {
        self.auth_token = Some(token);
        self
    }

    pub fn auth_token(&self) -> Option<String> {
        self.auth_token.clone()
    }

    /// Returns the email/password pair only when both halves are configured.
    pub fn login_credentials(&self) -> Option<(String, String)> {
        match (&self.login_email, &self.login_password) {
            (Some(email), Some(password)) => Some((email.clone(), password.clone())),
            _ => None,
        }
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn runtime_env(&self) -> RustEnv {
        self.runtime_env.clone()
    }

    pub fn is_production(&self) -> bool {
        self.runtime_env() == RustEnv::Production
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    #[serial]
    fn defaults_match_the_user_event_stream() {
        let config = Config::parse_from(["registration_sync"]);

        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
        assert_eq!(config.events_url, DEFAULT_EVENTS_URL);
        assert_eq!(config.reconnect_interval(), Duration::from_secs(3));
        assert_eq!(config.max_reconnect_attempts, 10);
        assert_eq!(config.request_timeout(), Duration::from_secs(10));
        assert_eq!(config.page_limit, 10);
        assert_eq!(config.log_level_filter, LevelFilter::Info);
        assert!(!config.is_production());
    }

    #[test]
    #[serial]
    fn environment_overrides_defaults() {
        env::set_var("MAX_RECONNECT_ATTEMPTS", "3");
        env::set_var("RUNTIME_ENV", "production");

        let config = Config::parse_from(["registration_sync"]);

        env::remove_var("MAX_RECONNECT_ATTEMPTS");
        env::remove_var("RUNTIME_ENV");

        assert_eq!(config.max_reconnect_attempts, 3);
        assert!(config.is_production());
    }

    #[test]
    #[serial]
    fn login_credentials_require_both_halves() {
        let only_email = Config::parse_from(["registration_sync", "--login-email", "a@b.com"]);
        assert_eq!(only_email.login_credentials(), None);

        let both = Config::parse_from([
            "registration_sync",
            "--login-email",
            "a@b.com",
            "--login-password",
            "hunter22",
        ]);
        assert_eq!(
            both.login_credentials(),
            Some(("a@b.com".to_string(), "hunter22".to_string()))
        );
    }

    #[test]
    fn rust_env_parses_case_insensitively() {
        assert_eq!("STAGING".parse::<RustEnv>(), Ok(RustEnv::Staging));
        assert_eq!("nope".parse::<RustEnv>(), Err(RustEnvParseError));
    }
}
