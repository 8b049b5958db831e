use anyhow::{bail, Context, Result};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Deployment mode. Controls log format and verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => bail!(
                "ALFRED_ENV must be 'development' or 'production', got '{}'",
                other
            ),
        }
    }
}

/// Upper bounds on each blocking operation a request performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    /// Begin, mutate and commit of one relational transaction.
    pub transaction: Duration,
    /// Commentator role lookup.
    pub lookup: Duration,
    /// Appending a request's records to the stream store.
    pub stream: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Timeouts {
            transaction: Duration::from_secs(10),
            lookup: Duration::from_secs(10),
            stream: Duration::from_secs(5),
        }
    }
}

#[derive(Clone)]
pub struct Config {
    pub github_webhook_secret: String,
    pub environment: Environment,
    pub port: u16,
    /// Directory holding `alfred.db`. Defaults to the working directory.
    pub state_dir: PathBuf,
    pub valkey_url: String,
    /// Length of a fresh claim before it expires.
    pub claim_window_days: u32,
    pub timeouts: Timeouts,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let github_webhook_secret = parse_webhook_secret(lookup("GITHUB_WEBHOOK_SECRET"))?;

        let environment = lookup("ALFRED_ENV")
            .map(|v| v.parse::<Environment>())
            .transpose()?
            .unwrap_or(Environment::Development);

        let port = lookup("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let state_dir = lookup("STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));

        let valkey_url =
            lookup("VALKEY_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".to_string());

        let claim_window_days = lookup("CLAIM_WINDOW_DAYS")
            .unwrap_or_else(|| "8".to_string())
            .parse::<u32>()
            .context("CLAIM_WINDOW_DAYS must be a valid number")?;
        if claim_window_days == 0 {
            bail!("CLAIM_WINDOW_DAYS must be at least 1");
        }

        let defaults = Timeouts::default();
        let timeouts = Timeouts {
            transaction: parse_seconds(
                &lookup,
                "TRANSACTION_TIMEOUT_SECS",
                defaults.transaction,
            )?,
            lookup: parse_seconds(&lookup, "LOOKUP_TIMEOUT_SECS", defaults.lookup)?,
            stream: parse_seconds(&lookup, "STREAM_TIMEOUT_SECS", defaults.stream)?,
        };

        Ok(Config {
            github_webhook_secret,
            environment,
            port,
            state_dir,
            valkey_url,
            claim_window_days,
            timeouts,
        })
    }

    pub fn database_path(&self) -> PathBuf {
        self.state_dir.join("alfred.db")
    }
}

/// Require a webhook secret with some non-whitespace content.
///
/// An empty secret would let anyone who knows the endpoint forge signatures.
pub fn parse_webhook_secret(value: Option<String>) -> Result<String> {
    match value {
        Some(secret) if !secret.trim().is_empty() => Ok(secret),
        Some(_) => bail!("GITHUB_WEBHOOK_SECRET must not be empty"),
        None => bail!("GITHUB_WEBHOOK_SECRET environment variable is required"),
    }
}

fn parse_seconds<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => {
            let secs = raw
                .parse::<u64>()
                .with_context(|| format!("{} must be a whole number of seconds", key))?;
            if secs == 0 {
                bail!("{} must be at least 1", key);
            }
            Ok(Duration::from_secs(secs))
        }
    }
}
