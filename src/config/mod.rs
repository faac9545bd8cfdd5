use serde::Deserialize;
use std::{env, fmt::Display, ops::RangeInclusive, str::FromStr};
use thiserror::Error;

// Главная структура конфигурации - контейнер для всех настроек
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub reconcile: ReconcileConfig,
}

// Настройки приложения
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub environment: String,
    pub rust_log: String,
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

// Где хранятся шоу и брони
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

// Настройки базы данных
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub backend: StorageBackend,
    /// Обязателен только для `StorageBackend::Postgres`.
    pub url: Option<String>,
    pub pool_size: u32,
}

// Настройки Redis. Без URL кеш отключён.
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: Option<String>,
}

/// Верхняя граница обоих интервалов сверки: неделя.
pub const MAX_RECONCILE_SECONDS: i64 = 7 * 24 * 60 * 60;

// Фоновая сверка зависших PENDING броней
#[derive(Debug, Clone, Deserialize)]
pub struct ReconcileConfig {
    pub interval_seconds: u64,
    pub pending_after_seconds: i64,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} must be set")]
    Missing { key: &'static str },

    #[error("{key} has invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let backend = match var_or("STORAGE", "postgres").to_lowercase().as_str() {
            "postgres" => StorageBackend::Postgres,
            "memory" => StorageBackend::Memory,
            other => {
                return Err(ConfigError::Invalid {
                    key: "STORAGE",
                    value: other.to_string(),
                    reason: "expected postgres or memory".to_string(),
                })
            }
        };

        let database_url = env::var("DATABASE_URL").ok();
        if backend == StorageBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing { key: "DATABASE_URL" });
        }

        let log_format = match var_or("LOG_FORMAT", "pretty").to_lowercase().as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Pretty,
        };

        Ok(Config {
            app: AppConfig {
                host: var_or("HOST", "0.0.0.0"),
                port: parse_or("PORT", "5000")?,
                environment: var_or("ENVIRONMENT", "development"),
                rust_log: var_or("RUST_LOG", "show_booking=debug,tower_http=debug"),
                log_format,
            },
            database: DatabaseConfig {
                backend,
                url: database_url,
                pool_size: parse_or("DB_POOL_SIZE", "20")?,
            },
            redis: RedisConfig {
                url: env::var("REDIS_URL").ok().filter(|url| !url.is_empty()),
            },
            reconcile: ReconcileConfig {
                interval_seconds: parse_in_range(
                    "RECONCILE_INTERVAL_SECONDS",
                    "60",
                    1..=MAX_RECONCILE_SECONDS as u64,
                )?,
                pending_after_seconds: parse_in_range(
                    "RECONCILE_PENDING_AFTER_SECONDS",
                    "300",
                    0..=MAX_RECONCILE_SECONDS,
                )?,
            },
        })
    }
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T>(key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
{
    let value = var_or(key, default);
    value.parse().map_err(|e: T::Err| ConfigError::Invalid {
        key,
        reason: e.to_string(),
        value,
    })
}

fn parse_in_range<T>(
    key: &'static str,
    default: &str,
    range: RangeInclusive<T>,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd + Display,
    T::Err: Display,
{
    let value: T = parse_or(key, default)?;
    if range.contains(&value) {
        Ok(value)
    } else {
        Err(ConfigError::Invalid {
            key,
            value: value.to_string(),
            reason: format!("expected {}..={}", range.start(), range.end()),
        })
    }
}
