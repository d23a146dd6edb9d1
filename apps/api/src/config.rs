use std::fmt;

use crate::errors::AppError;

/// Application configuration loaded from environment variables.
/// Startup fails fast if a required variable is missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub db: DbSettings,
    pub port: u16,
    pub rust_log: String,
    /// Abort startup when the initial database handshake fails.
    pub db_fail_fast: bool,
}

/// Connection parameters for the PostgreSQL server. Immutable after load.
#[derive(Clone, PartialEq, Eq)]
pub struct DbSettings {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for DbSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("name", &self.name)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Config {
            db: DbSettings::from_lookup(&lookup)?,
            port: match lookup("PORT") {
                Some(raw) => parse_port("PORT", &raw)?,
                None => 8080,
            },
            rust_log: lookup("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            db_fail_fast: match lookup("DB_FAIL_FAST") {
                Some(raw) => parse_bool("DB_FAIL_FAST", &raw)?,
                None => false,
            },
        })
    }
}

impl DbSettings {
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |key: &str| require_var(&lookup, key);
        let require_trimmed = |key: &str| require(key).map(|value| value.trim().to_string());

        Ok(DbSettings {
            host: require_trimmed("DB_HOST")?,
            port: parse_port("DB_PORT", &require("DB_PORT")?)?,
            name: require_trimmed("DB_NAME")?,
            user: require_trimmed("DB_USER")?,
            // Password is taken verbatim.
            password: require("DB_PASSWORD")?,
        })
    }
}

fn require_var<F>(lookup: &F, key: &str) -> Result<String, AppError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| AppError::MissingEnv(key.to_string()))
}

fn parse_port(key: &str, raw: &str) -> Result<u16, AppError> {
    let invalid = |reason: &str| AppError::InvalidEnv {
        key: key.to_string(),
        value: raw.to_string(),
        reason: reason.to_string(),
    };

    match raw.trim().parse::<u16>() {
        Ok(0) => Err(invalid("port must be between 1 and 65535")),
        Ok(port) => Ok(port),
        Err(_) => Err(invalid("must be a valid port number")),
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, AppError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(AppError::InvalidEnv {
            key: key.to_string(),
            value: raw.to_string(),
            reason: "must be a boolean".to_string(),
        }),
    }
}
