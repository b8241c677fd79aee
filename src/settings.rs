//! Runtime settings read from `INSAC_*` environment variables (a `.env` file is honored).

use crate::error::ConfigError;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Clone, Debug)]
pub struct Settings {
    pub bind: SocketAddr,
    /// Directory holding entities.json and routes.json.
    pub definitions: PathBuf,
    pub database_url: Option<String>,
    pub default_limit: u64,
    pub max_limit: u64,
    /// Strictness for routes that do not choose.
    pub strict: bool,
    /// Hide internal error detail from clients.
    pub production: bool,
    pub body_limit: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            bind: SocketAddr::from(([127, 0, 0, 1], 3000)),
            definitions: PathBuf::from("definitions"),
            database_url: None,
            default_limit: 100,
            max_limit: 1000,
            strict: false,
            production: false,
            body_limit: 2 * 1024 * 1024,
        }
    }
}

impl Settings {
    /// Defaults overridden by the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        let mut s = Settings::default();
        if let Some(v) = var("INSAC_BIND") {
            s.bind = parse("INSAC_BIND", &v)?;
        }
        if let Some(v) = var("INSAC_DEFINITIONS") {
            s.definitions = PathBuf::from(v);
        }
        s.database_url = var("DATABASE_URL");
        if let Some(v) = var("INSAC_DEFAULT_LIMIT") {
            s.default_limit = parse("INSAC_DEFAULT_LIMIT", &v)?;
        }
        if let Some(v) = var("INSAC_MAX_LIMIT") {
            s.max_limit = parse("INSAC_MAX_LIMIT", &v)?;
        }
        if let Some(v) = var("INSAC_STRICT") {
            s.strict = flag("INSAC_STRICT", &v)?;
        }
        if let Some(v) = var("INSAC_PRODUCTION") {
            s.production = flag("INSAC_PRODUCTION", &v)?;
        }
        if let Some(v) = var("INSAC_BODY_LIMIT") {
            s.body_limit = parse("INSAC_BODY_LIMIT", &v)?;
        }
        if s.default_limit == 0 || s.max_limit < s.default_limit {
            return Err(ConfigError::Validation(
                "INSAC_DEFAULT_LIMIT must be positive and not above INSAC_MAX_LIMIT".into(),
            ));
        }
        Ok(s)
    }
}

fn var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse<T: FromStr>(key: &str, v: &str) -> Result<T, ConfigError> {
    v.trim()
        .parse()
        .map_err(|_| ConfigError::Load(format!("{}: cannot parse '{}'", key, v)))
}

fn flag(key: &str, v: &str) -> Result<bool, ConfigError> {
    match v.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Load(format!("{}: expected a boolean, got '{}'", key, v))),
    }
}
