//! Server configuration, read once from the environment at start.
//!
//! Both binaries call [`load_dotenv`] first, so any variable below may also
//! come from a `.env` file. Variables already set in the environment win.
//!
//! | Variable | Default |
//! |---|---|
//! | `API_KEY` (or `GEMINI_API_KEY`) | unset: `/api/generate` answers 500 |
//! | `HOST` / `PORT` | `127.0.0.1` / `3001` |
//! | `AQUARIUS_ENV` | `development` |
//! | `ALLOWED_ORIGINS` | `http://localhost:5173` in development, empty in production |
//! | `CLIENT_DIR` | `client` (served in production only) |
//! | `GEMINI_MODEL` / `GEMINI_BASE_URL` | `gemini-2.5-flash` / public endpoint |
//! | `RATE_LIMIT_MAX` / `RATE_LIMIT_WINDOW_SECS` | `100` / `900` |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::llm::{DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL};

/// Origin of the development front-end server.
pub const DEV_ORIGIN: &str = "http://localhost:5173";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

/// Load `.env` from the working directory (or a parent) into the process
/// environment, returning the file used. A missing file is `Ok(None)`.
///
/// Runs before logging is set up so `RUST_LOG` may come from the file too;
/// callers log the outcome afterwards.
pub fn load_dotenv() -> Result<Option<PathBuf>, dotenvy::Error> {
    match dotenvy::dotenv() {
        Ok(path) => Ok(Some(path)),
        Err(e) if e.not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Deployment mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Development,
    Production,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Development => "development",
            Mode::Production => "production",
        }
    }
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "dev" | "development" => Ok(Mode::Development),
            "prod" | "production" => Ok(Mode::Production),
            _ => Err(ConfigError::Invalid {
                name: "AQUARIUS_ENV",
                expected: "`development` or `production`",
                value: s.to_string(),
            }),
        }
    }
}

/// Per-IP request budget for the generate endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 100,
            window: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub mode: Mode,
    /// Upstream credential. `None` keeps the server up but refuses generation.
    pub api_key: Option<String>,
    pub gemini_model: String,
    pub gemini_base_url: String,
    pub allowed_origins: Vec<String>,
    /// Pre-built client bundle, served in production.
    pub client_dir: PathBuf,
    pub rate_limit: RateLimitConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3001,
            mode: Mode::Development,
            api_key: None,
            gemini_model: DEFAULT_GEMINI_MODEL.to_string(),
            gemini_base_url: DEFAULT_GEMINI_BASE_URL.to_string(),
            allowed_origins: vec![DEV_ORIGIN.to_string()],
            client_dir: PathBuf::from("client"),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl Config {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load using an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let mode = match var("AQUARIUS_ENV") {
            Some(v) => v.parse()?,
            None => Mode::Development,
        };

        let allowed_origins = match var("ALLOWED_ORIGINS") {
            Some(list) => list
                .split(',')
                .map(|o| o.trim().trim_end_matches('/').to_string())
                .filter(|o| !o.is_empty())
                .collect(),
            None if mode == Mode::Production => Vec::new(),
            None => defaults.allowed_origins,
        };

        let rate_limit = RateLimitConfig {
            max_requests: parse_var(&var, "RATE_LIMIT_MAX", "a positive integer")?
                .unwrap_or(defaults.rate_limit.max_requests),
            window: parse_var::<u64, _>(&var, "RATE_LIMIT_WINDOW_SECS", "a number of seconds")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.rate_limit.window),
        };

        Ok(Config {
            host: var("HOST").unwrap_or(defaults.host),
            port: parse_var(&var, "PORT", "a port number")?.unwrap_or(defaults.port),
            mode,
            api_key: var("API_KEY").or_else(|| var("GEMINI_API_KEY")),
            gemini_model: var("GEMINI_MODEL").unwrap_or(defaults.gemini_model),
            gemini_base_url: var("GEMINI_BASE_URL").unwrap_or(defaults.gemini_base_url),
            allowed_origins,
            client_dir: var("CLIENT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.client_dir),
            rate_limit,
        })
    }

    pub fn is_production(&self) -> bool {
        self.mode == Mode::Production
    }
}

fn parse_var<T, F>(var: &F, name: &'static str, expected: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match var(name) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                name,
                expected,
                value,
            }),
    }
}
