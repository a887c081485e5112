use anyhow::{Context, Result, bail};
use crate::services::triggers::TriggerCommands;
use clap::Parser;
use std::{env, path::PathBuf, str::FromStr};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub base_url: String,
    /// Seconds after a bin's last update before it expires.
    pub expiration_secs: u64,
    pub workers: usize,
    pub queue_capacity: usize,
    /// Commands run on bin events.
    pub triggers: TriggerCommands,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Expiring file bins over HTTP")]
pub struct Args {
    /// Host to bind to (overrides FILEBIN_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides FILEBIN_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory holding one sub-directory per bin (overrides FILEBIN_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,

    /// Scratch directory for uploads in progress (overrides FILEBIN_TEMP_DIR)
    #[arg(long)]
    pub temp_dir: Option<PathBuf>,

    /// Public URL used in links (overrides FILEBIN_BASE_URL)
    #[arg(long)]
    pub base_url: Option<String>,

    /// Bin lifetime in seconds after the last upload (overrides FILEBIN_EXPIRATION)
    #[arg(long)]
    pub expiration: Option<u64>,

    /// Derived-asset worker count (overrides FILEBIN_WORKERS)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Derived-asset queue capacity (overrides FILEBIN_QUEUE_CAPACITY)
    #[arg(long)]
    pub queue_capacity: Option<usize>,

    /// Command run with the bin id when a bin is created (overrides FILEBIN_TRIGGER_NEW_BIN)
    #[arg(long)]
    pub trigger_new_bin: Option<String>,

    /// Command run with the bin id and filename after an upload (overrides FILEBIN_TRIGGER_UPLOADED_FILE)
    #[arg(long)]
    pub trigger_uploaded_file: Option<String>,

    /// Command run with the bin id when a bin is found expired (overrides FILEBIN_TRIGGER_EXPIRED_BIN)
    #[arg(long)]
    pub trigger_expired_bin: Option<String>,
}

const DEFAULT_PORT: u16 = 31337;
const DEFAULT_EXPIRATION_SECS: u64 = 7 * 24 * 60 * 60;
const DEFAULT_WORKERS: usize = 2;
const DEFAULT_QUEUE_CAPACITY: usize = 256;

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        Self::from_args(Args::parse())
    }

    fn from_args(args: Args) -> Result<Self> {
        // --- Environment fallback ---
        let env_host = env::var("FILEBIN_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = env_parse("FILEBIN_PORT", DEFAULT_PORT)?;
        let env_storage = env::var("FILEBIN_STORAGE_DIR").unwrap_or_else(|_| "./data/files".into());
        let env_temp = env::var("FILEBIN_TEMP_DIR").unwrap_or_else(|_| "./data/tmp".into());
        let env_expiration = env_parse("FILEBIN_EXPIRATION", DEFAULT_EXPIRATION_SECS)?;
        let env_workers = env_parse("FILEBIN_WORKERS", DEFAULT_WORKERS)?;
        let env_capacity = env_parse("FILEBIN_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?;

        // --- Merge ---
        let host = args.host.unwrap_or(env_host);
        let port = args.port.unwrap_or(env_port);
        let base_url = args
            .base_url
            .or_else(|| env::var("FILEBIN_BASE_URL").ok())
            .unwrap_or_else(|| format!("http://localhost:{}", port));

        let cfg = Self {
            host,
            port,
            storage_dir: args.storage_dir.unwrap_or_else(|| env_storage.into()),
            temp_dir: args.temp_dir.unwrap_or_else(|| env_temp.into()),
            base_url: base_url.trim_end_matches('/').to_string(),
            expiration_secs: args.expiration.unwrap_or(env_expiration),
            workers: args.workers.unwrap_or(env_workers),
            queue_capacity: args.queue_capacity.unwrap_or(env_capacity),
            triggers: TriggerCommands {
                new_bin: args
                    .trigger_new_bin
                    .or_else(|| env_command("FILEBIN_TRIGGER_NEW_BIN")),
                uploaded_file: args
                    .trigger_uploaded_file
                    .or_else(|| env_command("FILEBIN_TRIGGER_UPLOADED_FILE")),
                expired_bin: args
                    .trigger_expired_bin
                    .or_else(|| env_command("FILEBIN_TRIGGER_EXPIRED_BIN")),
            },
        };

        if cfg.expiration_secs == 0 {
            bail!("expiration must be at least one second");
        }
        if cfg.workers == 0 || cfg.queue_capacity == 0 {
            bail!("workers and queue capacity must be positive");
        }

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn ttl(&self) -> Result<chrono::Duration> {
        let secs = i64::try_from(self.expiration_secs).context("expiration out of range")?;
        chrono::Duration::try_seconds(secs).context("expiration out of range")
    }
}

/// An unset or blank variable disables the trigger.
fn env_command(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .with_context(|| format!("parsing {} value `{}`", key, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", key)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_arguments_win() {
        let args = Args {
            host: Some("127.0.0.1".into()),
            port: Some(8080),
            storage_dir: Some("/srv/files".into()),
            base_url: Some("https://bins.example.com/".into()),
            expiration: Some(60),
            workers: Some(4),
            queue_capacity: Some(8),
            trigger_uploaded_file: Some("/usr/local/bin/on-upload".into()),
            ..Args::default()
        };
        let cfg = AppConfig::from_args(args).unwrap();

        assert_eq!(cfg.addr(), "127.0.0.1:8080");
        assert_eq!(cfg.storage_dir, PathBuf::from("/srv/files"));
        assert_eq!(cfg.base_url, "https://bins.example.com");
        assert_eq!(cfg.ttl().unwrap(), chrono::Duration::seconds(60));
        assert_eq!(cfg.workers, 4);
        assert_eq!(
            cfg.triggers.uploaded_file.as_deref(),
            Some("/usr/local/bin/on-upload")
        );
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let args = Args {
            expiration: Some(60),
            workers: Some(0),
            ..Args::default()
        };
        assert!(AppConfig::from_args(args).is_err());

        let args = Args {
            expiration: Some(0),
            workers: Some(1),
            queue_capacity: Some(1),
            ..Args::default()
        };
        assert!(AppConfig::from_args(args).is_err());
    }
}
