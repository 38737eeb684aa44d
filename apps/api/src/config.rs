use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::catalog::Region;

/// Deployment environment. Development enables the mock checkout provider
/// and the mock-confirm endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" | "local" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => bail!("APP_ENV must be 'development' or 'production', got '{other}'"),
        }
    }

    pub fn is_production(self) -> bool {
        self == Environment::Production
    }
}

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub anthropic_api_key: String,
    pub environment: Environment,
    pub stripe_secret_key: Option<String>,
    pub stripe_webhook_secret: Option<String>,
    pub public_base_url: String,
    pub default_region: Region,
    pub pricing_file: Option<String>,
    pub max_upload_bytes: usize,
    pub llm_timeout: Duration,
    pub admin_api_token: Option<String>,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let environment = Environment::parse(
            &std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        )?;

        let stripe_secret_key = optional_env("STRIPE_SECRET_KEY");
        let stripe_webhook_secret = optional_env("STRIPE_WEBHOOK_SECRET");
        if environment.is_production() {
            if stripe_secret_key.is_none() {
                bail!("STRIPE_SECRET_KEY is required when APP_ENV=production");
            }
            if stripe_webhook_secret.is_none() {
                bail!("STRIPE_WEBHOOK_SECRET is required when APP_ENV=production");
            }
        }

        let default_region = std::env::var("DEFAULT_REGION").unwrap_or_else(|_| "us".to_string());
        let default_region = Region::parse(&default_region)
            .with_context(|| format!("DEFAULT_REGION '{default_region}' is not a known region"))?;

        Ok(Config {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://resume.db?mode=rwc".to_string()),
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            environment,
            stripe_secret_key,
            stripe_webhook_secret,
            public_base_url: std::env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080".to_string())
                .trim_end_matches('/')
                .to_string(),
            default_region,
            pricing_file: optional_env("PRICING_FILE"),
            max_upload_bytes: parse_env("MAX_UPLOAD_BYTES", 5 * 1024 * 1024)?,
            llm_timeout: Duration::from_secs(parse_env("LLM_TIMEOUT_SECS", 90)?),
            admin_api_token: optional_env("ADMIN_API_TOKEN"),
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value '{raw}'")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_parse_accepts_aliases() {
        assert_eq!(Environment::parse("prod").unwrap(), Environment::Production);
        assert_eq!(
            Environment::parse(" Development ").unwrap(),
            Environment::Development
        );
        assert!(Environment::parse("staging").is_err());
    }

    #[test]
    fn test_only_production_is_production() {
        assert!(Environment::Production.is_production());
        assert!(!Environment::Development.is_production());
    }
}
