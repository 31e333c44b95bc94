use anyhow::{Context, Result};
use clap::Parser;
use std::env;

/// Default extension allowlist, matching the classic upload form.
const DEFAULT_ALLOWED_EXTENSIONS: &str = "txt,pdf,png,jpg,jpeg,gif,zip,rar";

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub storage_dir: String,
    pub database_url: String,
    /// 32-byte at-rest encryption key, decoded from hex. `None` disables
    /// blob encryption.
    pub encryption_key: Option<[u8; 32]>,
    /// Reaper sweep interval in seconds. Zero disables the background sweep.
    pub sweep_interval_secs: u64,
    pub max_upload_bytes: usize,
    pub allowed_extensions: Vec<String>,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Ephemeral file-sharing service")]
pub struct Args {
    /// Host to bind to (overrides DROPGATE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides DROPGATE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory where blobs are stored (overrides DROPGATE_STORAGE_DIR)
    #[arg(long)]
    pub storage_dir: Option<String>,

    /// Database URL (overrides DROPGATE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Hex-encoded 32-byte blob encryption key (overrides DROPGATE_ENCRYPTION_KEY)
    #[arg(long)]
    pub encryption_key: Option<String>,

    /// Seconds between reaper sweeps, 0 to disable (overrides DROPGATE_SWEEP_INTERVAL_SECS)
    #[arg(long)]
    pub sweep_interval_secs: Option<u64>,

    /// Maximum upload size in bytes (overrides DROPGATE_MAX_UPLOAD_BYTES)
    #[arg(long)]
    pub max_upload_bytes: Option<usize>,

    /// Comma-separated extension allowlist, empty to allow all
    /// (overrides DROPGATE_ALLOWED_EXTENSIONS)
    #[arg(long)]
    pub allowed_extensions: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();

        // --- Environment fallback ---
        let env_host = env::var("DROPGATE_HOST").unwrap_or_else(|_| "0.0.0.0".into());
        let env_port = match env::var("DROPGATE_PORT") {
            Ok(value) => value
                .parse::<u16>()
                .with_context(|| format!("parsing DROPGATE_PORT value `{}`", value))?,
            Err(env::VarError::NotPresent) => 3000,
            Err(err) => return Err(err).context("reading DROPGATE_PORT"),
        };
        let env_storage =
            env::var("DROPGATE_STORAGE_DIR").unwrap_or_else(|_| "./data/blobs".into());
        let env_db = env::var("DROPGATE_DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./data/meta/dropgate.db".into());
        let env_key = env::var("DROPGATE_ENCRYPTION_KEY").ok();
        let env_sweep = match env::var("DROPGATE_SWEEP_INTERVAL_SECS") {
            Ok(value) => Some(value.parse::<u64>().with_context(|| {
                format!("parsing DROPGATE_SWEEP_INTERVAL_SECS value `{}`", value)
            })?),
            Err(_) => None,
        };
        let env_max_upload = match env::var("DROPGATE_MAX_UPLOAD_BYTES") {
            Ok(value) => Some(value.parse::<usize>().with_context(|| {
                format!("parsing DROPGATE_MAX_UPLOAD_BYTES value `{}`", value)
            })?),
            Err(_) => None,
        };
        let env_extensions = env::var("DROPGATE_ALLOWED_EXTENSIONS").ok();

        // --- Merge ---
        let key_hex = args.encryption_key.or(env_key);
        let encryption_key = key_hex.as_deref().map(parse_key_hex).transpose()?;

        let extensions_raw = args
            .allowed_extensions
            .or(env_extensions)
            .unwrap_or_else(|| DEFAULT_ALLOWED_EXTENSIONS.into());

        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            storage_dir: args.storage_dir.unwrap_or(env_storage),
            database_url: args.database_url.unwrap_or(env_db),
            encryption_key,
            sweep_interval_secs: args.sweep_interval_secs.or(env_sweep).unwrap_or(300),
            // 50 MiB default
            max_upload_bytes: args
                .max_upload_bytes
                .or(env_max_upload)
                .unwrap_or(50 * 1024 * 1024),
            allowed_extensions: parse_extensions(&extensions_raw),
        };

        Ok((cfg, args.migrate))
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_key_hex(hex_str: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(hex_str.trim()).context("encryption key is not valid hex")?;
    let len = bytes.len();
    let key: [u8; 32] = bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("encryption key must be 32 bytes, got {}", len))?;
    Ok(key)
}

fn parse_extensions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|ext| ext.trim().to_ascii_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}
