//! Process configuration.
//!
//! Everything tern needs to know about its environment is resolved exactly
//! once, at startup, into an immutable [`Config`]. The app holds it behind an
//! `Arc` and hands it to every middleware; nothing mutates it afterwards.
//!
//! Resolution order for each setting: environment variable, then the default
//! of the selected [`Profile`], then the built-in default. A value that is
//! present but malformed is a fatal [`Error::Config`], never silently
//! replaced by a default.
//!
//! | Variable | Default |
//! |---|---|
//! | `APP_ENV` | `development` |
//! | `ALLOWED_ORIGINS` | `http://localhost:4200` |
//! | `REDIS_URL` | `redis://localhost:6379/0` |
//! | `REDIS_CONNECT_TIMEOUT_MS` | `1000` |
//! | `REDIS_RECONNECT_ATTEMPTS` | `3` |
//! | `SERVE_STATIC_FILES` | profile |
//! | `PUBLIC_DIR` | `public` |
//! | `CACHE_STORE` | profile |
//! | `FORCE_SSL` | profile |
//! | `LOG_LEVEL` / `LOG_FORMAT` | profile |
//! | `BIND_ADDR` | `0.0.0.0:3000` |

use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::Level;

use crate::error::{Error, Result};
use crate::middleware::cors::CorsPolicy;

pub const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:4200";
pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379/0";
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_PUBLIC_DIR: &str = "public";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 3;

// ── Profile ───────────────────────────────────────────────────────────────────

/// Named deployment mode. Selects a bundle of defaults.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Profile {
    Development,
    Test,
    Production,
}

impl Profile {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Development => "development",
            Self::Test        => "test",
            Self::Production  => "production",
        }
    }

    fn log_level(self) -> Level {
        match self {
            Self::Development => Level::DEBUG,
            Self::Test        => Level::WARN,
            Self::Production  => Level::INFO,
        }
    }

    fn log_format(self) -> LogFormat {
        match self {
            Self::Production => LogFormat::Json,
            Self::Development | Self::Test => LogFormat::Pretty,
        }
    }

    fn detailed_errors(self) -> bool {
        matches!(self, Self::Test)
    }

    fn cache_store(self) -> CacheStoreKind {
        match self {
            Self::Test => CacheStoreKind::Null,
            Self::Development | Self::Production => CacheStoreKind::Memory,
        }
    }

    fn force_ssl(self) -> bool {
        !matches!(self, Self::Test)
    }

    fn serve_static_files(self) -> bool {
        matches!(self, Self::Test)
    }
}

impl FromStr for Profile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "development" => Ok(Self::Development),
            "test"        => Ok(Self::Test),
            "production"  => Ok(Self::Production),
            other => Err(Error::config("APP_ENV", format!("unrecognized profile `{other}`"))),
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Enumerated settings ───────────────────────────────────────────────────────

/// Shape of diagnostic log output.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl FromStr for LogFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "json"   => Ok(Self::Json),
            "pretty" => Ok(Self::Pretty),
            other => Err(Error::config("LOG_FORMAT", format!("expected `json` or `pretty`, got `{other}`"))),
        }
    }
}

/// Which store backs response caching.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CacheStoreKind {
    /// Process-local map.
    Memory,
    /// Caching disabled.
    Null,
    /// The external Redis backend.
    Redis,
}

impl FromStr for CacheStoreKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "memory" => Ok(Self::Memory),
            "null"   => Ok(Self::Null),
            "redis"  => Ok(Self::Redis),
            other => Err(Error::config(
                "CACHE_STORE",
                format!("expected `memory`, `null` or `redis`, got `{other}`"),
            )),
        }
    }
}

/// Server-side session storage. The API is stateless; sessions are off.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionStore {
    Disabled,
}

/// Connection settings for the external key-value backend.
#[derive(Clone, Debug)]
pub struct BackendConfig {
    pub url: String,
    pub connect_timeout: Duration,
    pub reconnect_attempts: u32,
}

// ── Config ────────────────────────────────────────────────────────────────────

/// Immutable process configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub profile: Profile,
    pub bind_addr: SocketAddr,
    pub log_level: Level,
    pub log_format: LogFormat,
    /// Include error details in JSON error envelopes.
    pub detailed_errors: bool,
    pub force_ssl: bool,
    pub serve_static_files: bool,
    pub public_dir: PathBuf,
    pub cache_store: CacheStoreKind,
    pub session_store: SessionStore,
    pub backend: BackendConfig,
    pub cors: CorsPolicy,
}

impl Config {
    /// Loads `.env` if present, then resolves the process environment.
    pub fn from_env() -> Result<Self> {
        // A missing .env file is normal; anything else is worth knowing about.
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(Error::config(".env", e));
            }
        }
        Self::from_vars(std::env::vars())
    }

    /// Resolves configuration from an explicit set of variables.
    pub fn from_vars<I, K, V>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars = Vars(vars.into_iter().map(|(k, v)| (k.into(), v.into())).collect());

        let profile: Profile = vars.parse("APP_ENV")?.unwrap_or(Profile::Development);

        let bind_addr = vars.get("BIND_ADDR").unwrap_or(DEFAULT_BIND_ADDR);
        let bind_addr: SocketAddr = bind_addr
            .parse()
            .map_err(|e| Error::config("BIND_ADDR", format!("`{bind_addr}`: {e}")))?;

        let log_level = match vars.get("LOG_LEVEL") {
            Some(raw) => Level::from_str(raw)
                .map_err(|_| Error::config("LOG_LEVEL", format!("unknown level `{raw}`")))?,
            None => profile.log_level(),
        };

        let force_ssl = match vars.get("FORCE_SSL") {
            Some(raw) => parse_bool("FORCE_SSL", raw)?,
            None => profile.force_ssl(),
        };

        let origins = vars.get("ALLOWED_ORIGINS").unwrap_or(DEFAULT_ALLOWED_ORIGIN);

        Ok(Self {
            profile,
            bind_addr,
            log_level,
            log_format: vars.parse("LOG_FORMAT")?.unwrap_or(profile.log_format()),
            detailed_errors: profile.detailed_errors(),
            force_ssl,
            serve_static_files: vars.present("SERVE_STATIC_FILES") || profile.serve_static_files(),
            public_dir: PathBuf::from(vars.get("PUBLIC_DIR").unwrap_or(DEFAULT_PUBLIC_DIR)),
            cache_store: vars.parse("CACHE_STORE")?.unwrap_or(profile.cache_store()),
            session_store: SessionStore::Disabled,
            backend: BackendConfig {
                url: parse_backend_url(vars.get("REDIS_URL").unwrap_or(DEFAULT_REDIS_URL))?,
                connect_timeout: vars
                    .positive("REDIS_CONNECT_TIMEOUT_MS")?
                    .map_or(DEFAULT_CONNECT_TIMEOUT, Duration::from_millis),
                reconnect_attempts: vars
                    .positive("REDIS_RECONNECT_ATTEMPTS")?
                    .map_or(Ok(DEFAULT_RECONNECT_ATTEMPTS), u32::try_from)
                    .map_err(|e| Error::config("REDIS_RECONNECT_ATTEMPTS", e))?,
            },
            cors: CorsPolicy::from_origin_list(origins)?,
        })
    }
}

// ── Parsing helpers ───────────────────────────────────────────────────────────

struct Vars(HashMap<String, String>);

impl Vars {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Non-empty after trimming. Mirrors "is the flag set at all".
    fn present(&self, key: &str) -> bool {
        self.get(key).is_some_and(|v| !v.trim().is_empty())
    }

    fn parse<T: FromStr<Err = Error>>(&self, key: &str) -> Result<Option<T>> {
        self.get(key).map(|raw| raw.trim().parse()).transpose()
    }

    fn positive(&self, key: &str) -> Result<Option<u64>> {
        let Some(raw) = self.get(key) else { return Ok(None) };
        match raw.trim().parse::<u64>() {
            Ok(0) => Err(Error::config(key, "must be greater than zero")),
            Ok(n) => Ok(Some(n)),
            Err(e) => Err(Error::config(key, format!("`{raw}`: {e}"))),
        }
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::config(key, format!("expected a boolean, got `{raw}`"))),
    }
}

fn parse_backend_url(raw: &str) -> Result<String> {
    let parsed = url::Url::parse(raw).map_err(|e| Error::config("REDIS_URL", e))?;
    match parsed.scheme() {
        "redis" | "rediss" | "redis+unix" | "unix" => Ok(raw.to_owned()),
        other => Err(Error::config("REDIS_URL", format!("unsupported scheme `{other}`"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(vars: &[(&str, &str)]) -> Result<Config> {
        Config::from_vars(vars.iter().copied())
    }

    #[test]
    fn defaults_to_development() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.profile, Profile::Development);
        assert_eq!(cfg.log_level, Level::DEBUG);
        assert_eq!(cfg.cache_store, CacheStoreKind::Memory);
        assert_eq!(cfg.session_store, SessionStore::Disabled);
        assert!(cfg.force_ssl);
        assert!(!cfg.detailed_errors);
        assert!(!cfg.serve_static_files);
        assert_eq!(cfg.bind_addr, "0.0.0.0:3000".parse::<SocketAddr>().unwrap());
        assert_eq!(cfg.backend.url, DEFAULT_REDIS_URL);
        assert_eq!(cfg.backend.connect_timeout, Duration::from_secs(1));
        assert_eq!(cfg.backend.reconnect_attempts, 3);
        assert_eq!(cfg.cors.origins(), ["http://localhost:4200"]);
    }

    #[test]
    fn test_profile_defaults() {
        let cfg = config(&[("APP_ENV", "test")]).unwrap();
        assert_eq!(cfg.cache_store, CacheStoreKind::Null);
        assert!(!cfg.force_ssl);
        assert!(cfg.detailed_errors);
        assert!(cfg.serve_static_files);
    }

    #[test]
    fn production_profile_defaults() {
        let cfg = config(&[("APP_ENV", "production")]).unwrap();
        assert_eq!(cfg.log_level, Level::INFO);
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert!(cfg.force_ssl);
        assert!(!cfg.serve_static_files);

        let cfg = config(&[("APP_ENV", "production"), ("SERVE_STATIC_FILES", "1")]).unwrap();
        assert!(cfg.serve_static_files);
    }

    #[test]
    fn unrecognized_profile_is_fatal() {
        let err = config(&[("APP_ENV", "staging")]).unwrap_err();
        assert!(matches!(err, Error::Config(ref m) if m.contains("staging")), "{err}");
    }

    #[test]
    fn origins_are_split_and_trimmed() {
        let cfg = config(&[("ALLOWED_ORIGINS", "http://a.test, http://b.test,,")]).unwrap();
        assert_eq!(cfg.cors.origins(), ["http://a.test", "http://b.test"]);
    }

    #[test]
    fn malformed_values_are_fatal() {
        for vars in [
            [("ALLOWED_ORIGINS", "*")],
            [("ALLOWED_ORIGINS", " , ")],
            [("REDIS_URL", "http://localhost:6379")],
            [("REDIS_URL", "not a url")],
            [("REDIS_CONNECT_TIMEOUT_MS", "soon")],
            [("REDIS_RECONNECT_ATTEMPTS", "0")],
            [("CACHE_STORE", "disk")],
            [("FORCE_SSL", "maybe")],
            [("LOG_LEVEL", "loud")],
            [("LOG_FORMAT", "xml")],
            [("BIND_ADDR", "localhost")],
        ] {
            assert!(config(&vars).is_err(), "{vars:?} should be rejected");
        }
    }

    #[test]
    fn explicit_overrides_win_over_profile() {
        let cfg = config(&[
            ("APP_ENV", "test"),
            ("FORCE_SSL", "true"),
            ("CACHE_STORE", "redis"),
            ("LOG_LEVEL", "trace"),
            ("REDIS_CONNECT_TIMEOUT_MS", "250"),
            ("REDIS_RECONNECT_ATTEMPTS", "5"),
        ])
        .unwrap();
        assert!(cfg.force_ssl);
        assert_eq!(cfg.cache_store, CacheStoreKind::Redis);
        assert_eq!(cfg.log_level, Level::TRACE);
        assert_eq!(cfg.backend.connect_timeout, Duration::from_millis(250));
        assert_eq!(cfg.backend.reconnect_attempts, 5);
    }
}
