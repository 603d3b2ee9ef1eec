//! Configuration module
//!
//! Environment-driven configuration for the proxy binary. Every setting has
//! a default suitable for local development except the database URL and the
//! storage backend credentials, which must be provided explicitly.

use std::env;
use std::time::Duration;

use crate::storage_types::StorageBackend;

const SERVER_PORT: u16 = 3000;
const DB_MAX_CONNECTIONS: u32 = 20;
const DB_TIMEOUT_SECS: u64 = 30;
const PROXY_REQUEST_TIMEOUT_SECS: u64 = 3;
const PERSIST_TIMEOUT_SECS: u64 = 3;
const REGISTRY_TX_COMMIT_SECS: u64 = 3;

#[derive(Clone, Debug)]
pub struct Config {
    pub server_port: u16,
    pub environment: String,

    pub database_url: String,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,

    // Storage configuration
    pub storage_backend: Option<StorageBackend>,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    /// Custom endpoint for S3-compatible providers (MinIO, DigitalOcean Spaces, etc.)
    pub s3_endpoint: Option<String>,
    pub local_storage_path: Option<String>,
    pub local_storage_base_url: Option<String>,

    // Transformation normalization
    pub allow_upscale: bool,
    /// Pixel snapping step for height/width, 0 = disabled.
    pub size_discrete_step: u32,
    /// Percent snapping step for quality, 0 = disabled.
    pub quality_discrete_step: u32,
    /// Percent snapping step for scale, 0 = disabled.
    pub scale_discrete_step: u32,

    // Timeouts
    pub proxy_request_timeout_secs: u64,
    pub persist_timeout_secs: u64,
    pub registry_tx_commit_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let storage_backend =
            env::var("STORAGE_BACKEND")
                .ok()
                .and_then(|s| match s.to_lowercase().as_str() {
                    "s3" => Some(StorageBackend::S3),
                    "local" => Some(StorageBackend::Local),
                    _ => None,
                });

        let config = Config {
            server_port: env::var("PORT")
                .unwrap_or_else(|_| SERVER_PORT.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?,
            environment,
            database_url: env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?,
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| DB_MAX_CONNECTIONS.to_string())
                .parse()
                .unwrap_or(DB_MAX_CONNECTIONS),
            db_timeout_seconds: env::var("DB_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| DB_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(DB_TIMEOUT_SECS),
            storage_backend,
            s3_bucket: env::var("S3_BUCKET").ok(),
            s3_region: env::var("S3_REGION").ok(),
            s3_endpoint: env::var("S3_ENDPOINT").ok(),
            local_storage_path: env::var("LOCAL_STORAGE_PATH").ok(),
            local_storage_base_url: env::var("LOCAL_STORAGE_BASE_URL").ok(),
            allow_upscale: env::var("ALLOW_UPSCALE")
                .unwrap_or_else(|_| "false".to_string())
                .to_lowercase()
                .parse()
                .unwrap_or(false),
            size_discrete_step: env::var("SIZE_DISCRETE_STEP")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .unwrap_or(0),
            quality_discrete_step: env::var("QUALITY_DISCRETE_STEP")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .unwrap_or(0),
            scale_discrete_step: env::var("SCALE_DISCRETE_STEP")
                .unwrap_or_else(|_| "0".to_string())
                .parse()
                .unwrap_or(0),
            proxy_request_timeout_secs: env::var("PROXY_REQUEST_TIMEOUT_SECS")
                .unwrap_or_else(|_| PROXY_REQUEST_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(PROXY_REQUEST_TIMEOUT_SECS),
            persist_timeout_secs: env::var("PERSIST_TIMEOUT_SECS")
                .unwrap_or_else(|_| PERSIST_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(PERSIST_TIMEOUT_SECS),
            registry_tx_commit_secs: env::var("REGISTRY_TX_COMMIT_SECS")
                .unwrap_or_else(|_| REGISTRY_TX_COMMIT_SECS.to_string())
                .parse()
                .unwrap_or(REGISTRY_TX_COMMIT_SECS),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if !self.database_url.starts_with("postgresql://")
            && !self.database_url.starts_with("postgres://")
        {
            return Err(anyhow::anyhow!(
                "DATABASE_URL must be a valid PostgreSQL connection string"
            ));
        }

        match self.storage_backend.unwrap_or(StorageBackend::S3) {
            StorageBackend::S3 => {
                if self.s3_bucket.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_BUCKET must be set when using S3 storage backend"
                    ));
                }
                if self.s3_region.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_REGION must be set when using S3 storage backend"
                    ));
                }
            }
            StorageBackend::Local => {
                if self.local_storage_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must be set when using local storage backend"
                    ));
                }
                if self.local_storage_base_url.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_BASE_URL must be set when using local storage backend"
                    ));
                }
            }
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn db_timeout(&self) -> Duration {
        Duration::from_secs(self.db_timeout_seconds)
    }

    pub fn proxy_request_timeout(&self) -> Duration {
        Duration::from_secs(self.proxy_request_timeout_secs)
    }

    pub fn persist_timeout(&self) -> Duration {
        Duration::from_secs(self.persist_timeout_secs)
    }

    pub fn registry_tx_commit(&self) -> Duration {
        Duration::from_secs(self.registry_tx_commit_secs)
    }
}
