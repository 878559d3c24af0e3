use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct InvoicingConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub smtp: SmtpConfig,
    pub stripe: StripeConfig,
    pub storage: StorageConfig,
    pub external_timeout_secs: u64,
    pub otlp_endpoint: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Empty outside production selects the in-memory store.
    pub url: Secret<String>,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    pub jwt_secret: Secret<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Secret<String>,
    pub from_name: String,
    pub from_email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeConfig {
    pub secret_key: Secret<String>,
    pub webhook_secret: Secret<String>,
    pub api_base_url: String,
    pub webhook_tolerance_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    pub uploads_dir: String,
}

impl InvoicingConfig {
    pub fn load() -> Result<Self, AppError> {
        // Load common config (handles .env and APP__ prefix)
        let common = core_config::Config::load()?;
        let is_prod = common.is_production();

        Ok(InvoicingConfig {
            database: DatabaseConfig {
                url: Secret::new(get_env("DATABASE_URL", Some(""), is_prod)?),
                max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10)?,
                min_connections: parse_env("DATABASE_MIN_CONNECTIONS", 1)?,
            },
            auth: AuthConfig {
                jwt_secret: Secret::new(get_env("JWT_SECRET", Some("dev-jwt-secret"), is_prod)?),
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some(""), is_prod)?,
                port: parse_env("SMTP_PORT", 587)?,
                user: get_env("SMTP_USER", Some(""), is_prod)?,
                password: Secret::new(get_env("SMTP_PASSWORD", Some(""), is_prod)?),
                from_name: get_env("FROM_NAME", Some("Invoicing"), is_prod)?,
                from_email: get_env("FROM_EMAIL", Some("invoices@localhost"), is_prod)?,
            },
            stripe: StripeConfig {
                secret_key: Secret::new(get_env("STRIPE_SECRET_KEY", Some(""), is_prod)?),
                webhook_secret: Secret::new(get_env(
                    "STRIPE_WEBHOOK_SECRET",
                    Some("whsec_dev"),
                    is_prod,
                )?),
                api_base_url: env::var("STRIPE_API_BASE")
                    .unwrap_or_else(|_| "https://api.stripe.com/v1".to_string()),
                webhook_tolerance_secs: parse_env("STRIPE_WEBHOOK_TOLERANCE_SECS", 300)?,
            },
            storage: StorageConfig {
                uploads_dir: get_env("UPLOADS_DIR", Some("uploads"), is_prod)?,
            },
            external_timeout_secs: parse_env("EXTERNAL_TIMEOUT_SECS", 10)?,
            otlp_endpoint: env::var("OTLP_ENDPOINT").ok().filter(|v| !v.is_empty()),
            common,
        })
    }

    pub fn external_timeout(&self) -> Duration {
        Duration::from_secs(self.external_timeout_secs)
    }

    pub fn uses_database(&self) -> bool {
        !self.database.url.expose_secret().is_empty()
    }
}

impl SmtpConfig {
    pub fn is_configured(&self) -> bool {
        !self.host.is_empty()
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => val.parse().map_err(|e: T::Err| {
            AppError::ConfigError(anyhow::anyhow!("{} has an invalid value: {}", key, e))
        }),
        Err(_) => Ok(default),
    }
}
