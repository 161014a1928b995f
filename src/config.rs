use serde::Deserialize;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub pool: PoolConfig,
    pub logging: LoggingConfig,
}

/// Source registry location
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Connection pool size for each Postgres/MySQL source
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfig {
    pub max_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Try to load from .env file
        let _ = dotenv::dotenv();

        let mut builder = config::Config::builder()
            .set_default("database.url", "./sources.db")?
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 3000)?
            .set_default("pool.max_size", 16)?
            .set_default("logging.level", "info")?;

        // Load from environment variables
        if let Ok(database_url) = env::var("DATABASE_URL") {
            builder = builder.set_override("database.url", database_url)?;
        }

        if let Ok(host) = env::var("HOST") {
            builder = builder.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            builder = builder.set_override("server.port", u64::from(parse_var::<u16>("PORT", &port)?))?;
        }

        if let Ok(max_size) = env::var("POOL_MAX_SIZE") {
            let max_size = parse_var::<u64>("POOL_MAX_SIZE", &max_size)?;
            if max_size == 0 {
                return Err(config::ConfigError::Message(
                    "POOL_MAX_SIZE must be at least 1".to_string(),
                ));
            }
            builder = builder.set_override("pool.max_size", max_size)?;
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            builder = builder.set_override("logging.level", log_level)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn server_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

/// Parse a numeric environment override, naming the variable on failure
fn parse_var<T>(name: &str, raw: &str) -> Result<T, config::ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim().parse::<T>().map_err(|e| {
        config::ConfigError::Message(format!("Invalid {} '{}': {}", name, raw, e))
    })
}
