//! Process settings from environment (optionally seeded from `.env`).

use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("invalid value for {key}: '{value}'")]
    Invalid { key: &'static str, value: String },
}

#[derive(Clone, Debug)]
pub struct Settings {
    /// Absent means the in-memory store is used.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    /// PostgreSQL schema holding resource tables.
    pub schema: String,
    /// Prefix for every resource route.
    pub api_base_path: String,
    pub default_page_limit: u32,
    pub max_page_limit: u32,
    /// Write the audit entry in the same transaction as the mutation.
    pub atomic_audit: bool,
    pub bind_addr: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            database_url: None,
            db_max_connections: 5,
            schema: "public".into(),
            api_base_path: "/api".into(),
            default_page_limit: 10,
            max_page_limit: 1000,
            atomic_audit: true,
            bind_addr: "0.0.0.0:3000".into(),
        }
    }
}

impl Settings {
    /// Load `.env` if present, then read settings from the environment.
    pub fn load() -> Result<Self, SettingsError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|k| std::env::var(k).ok())
    }

    /// Read settings through an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let defaults = Settings::default();
        let get = |k: &str| lookup(k).filter(|v| !v.trim().is_empty());
        Ok(Settings {
            database_url: get("DATABASE_URL"),
            db_max_connections: parse(&get, "DB_MAX_CONNECTIONS", defaults.db_max_connections)?,
            schema: get("RESOURCE_SCHEMA").unwrap_or(defaults.schema),
            api_base_path: normalize_base_path(get("API_BASE_PATH").unwrap_or(defaults.api_base_path)),
            default_page_limit: parse(&get, "DEFAULT_PAGE_LIMIT", defaults.default_page_limit)?,
            max_page_limit: parse(&get, "MAX_PAGE_LIMIT", defaults.max_page_limit)?,
            atomic_audit: parse_bool(&get, "ATOMIC_AUDIT", defaults.atomic_audit)?,
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
        })
    }
}

fn normalize_base_path(p: String) -> String {
    let trimmed = p.trim().trim_end_matches('/');
    if trimmed.is_empty() || trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

fn parse<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, SettingsError> {
    match get(key) {
        None => Ok(default),
        Some(v) => v.trim().parse().map_err(|_| SettingsError::Invalid { key, value: v }),
    }
}

fn parse_bool(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: bool,
) -> Result<bool, SettingsError> {
    match get(key) {
        None => Ok(default),
        Some(v) => match v.trim().to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(SettingsError::Invalid { key, value: v }),
        },
    }
}
