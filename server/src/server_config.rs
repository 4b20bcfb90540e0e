use config::Config;
use lazy_static::lazy_static;
use serde::Deserialize;
use std::{env, fs, path::Path};

#[derive(Debug, Clone, Deserialize)]
pub struct GmailSettings {
    /// Path (relative to the config root) of the stored OAuth token
    pub token_file: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OracleSettings {
    pub endpoint: String,
    pub model: String,
    /// Path (relative to the config root) of the API key file
    pub key_file: String,
    pub default_prompt: String,
    /// When true, an oracle failure aborts classification of the message
    /// instead of defaulting it to not_spam
    pub fail_closed: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanSettings {
    pub default_days: i64,
    pub page_size: u32,
    pub fetch_chunk_size: usize,
    pub max_fetch_attempts: u32,
    pub backoff_base_secs: u64,
    pub body_preview_words: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LabelNames {
    pub spam: String,
    pub whitelist: String,
    pub ignore: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpSettings {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ConfigFile {
    gmail: GmailSettings,
    oracle: OracleSettings,
    scan: ScanSettings,
    labels: LabelNames,
    http: HttpSettings,
}

#[derive(Debug)]
pub struct ServerConfig {
    pub gmail: GmailSettings,
    pub oracle: OracleSettings,
    pub scan: ScanSettings,
    pub labels: LabelNames,
    pub http: HttpSettings,
}

impl std::fmt::Display for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Server Config:\nGmail: {:?}\n\nOracle: model={} endpoint={} fail_closed={}\n\nScan: {:?}\n\nLabels: {:?}\n\nHttp: {:?}",
            self.gmail,
            self.oracle.model,
            self.oracle.endpoint,
            self.oracle.fail_closed,
            self.scan,
            self.labels,
            self.http,
        )
    }
}

/// Resolve the config root: APP_DIR in deployment, `<workspace>/config` in dev
pub fn config_root() -> String {
    env::var("APP_DIR").unwrap_or_else(|_| {
        let dir =
            env::var("CARGO_MANIFEST_DIR").expect("CARGO_MANIFEST_DIR or APP_DIR is required");
        let dir = Path::new(&dir).parent().unwrap().display().to_string();
        format!("{}/config", dir)
    })
}

fn read_secret_file(name: &str) -> Option<String> {
    let path = format!("{}/{}", config_root(), name);
    let content = fs::read_to_string(path).ok()?;
    let content = content.trim().to_string();
    if content.is_empty() {
        None
    } else {
        Some(content)
    }
}

/// Load the stored Gmail access token. The token file is either the raw
/// token string or the JSON blob written by the OAuth callback.
pub fn read_access_token() -> Option<String> {
    let content = read_secret_file(&cfg.gmail.token_file)?;
    if let Ok(json) = serde_json::from_str::<serde_json::Value>(&content) {
        return json
            .get("access_token")
            .and_then(|t| t.as_str())
            .map(|t| t.to_string());
    }
    Some(content)
}

/// Load the oracle API key. None means no oracle is configured.
pub fn read_oracle_key() -> Option<String> {
    read_secret_file(&cfg.oracle.key_file)
}

lazy_static! {
    pub static ref cfg: ServerConfig = {
        let root = config_root();
        let path = format!("{root}/config.toml");
        let cfg_file: ConfigFile = Config::builder()
            .add_source(config::File::with_name(&path))
            .build()
            .expect("config.toml is required")
            .try_deserialize()
            .expect("config.toml is invalid");

        let ConfigFile {
            gmail,
            oracle,
            scan,
            labels,
            http,
        } = cfg_file;

        ServerConfig {
            gmail,
            oracle,
            scan,
            labels,
            http,
        }
    };
}
