//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.sarufi-messenger/config.json`) and environment.
//! Secrets are usually supplied through the environment; the file carries tuning knobs.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Webhook server settings.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Messenger (Graph API) settings.
    #[serde(default)]
    pub messenger: MessengerConfig,

    /// Sarufi conversational service settings.
    #[serde(default)]
    pub sarufi: SarufiConfig,
}

/// Webhook server bind, port, and dispatch queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// Port for the webhook endpoint (default 5000). Overridden by PORT env.
    #[serde(default = "default_gateway_port")]
    pub port: u16,

    /// Bind address (default "0.0.0.0"; the platform must be able to reach the webhook).
    #[serde(default = "default_gateway_bind")]
    pub bind: String,

    /// Capacity of the queue between the webhook handler and the dispatch processor.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_gateway_port() -> u16 {
    5000
}

fn default_gateway_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_queue_capacity() -> usize {
    64
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_gateway_port(),
            bind: default_gateway_bind(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

/// Messenger page and webhook settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessengerConfig {
    /// Page access token for the Send API. Overridden by PAGE_ACCESS_TOKEN env.
    pub page_access_token: Option<String>,
    /// Token the platform echoes in `hub.verify_token` during the handshake. Overridden by VERIFY_TOKEN env.
    pub verify_token: Option<String>,
    /// Graph API version without the leading "v" (default "16.0").
    #[serde(default = "default_api_version")]
    pub api_version: String,
    /// Graph API base URL (tests point this at a mock server).
    #[serde(default = "default_graph_base_url")]
    pub graph_base_url: String,
    /// Send a typing indicator before replaying actions.
    #[serde(default = "default_true")]
    pub typing_indicator: bool,
    /// Send `send_images` as generic-template cards instead of one attachment per image.
    #[serde(default = "default_true")]
    pub batch_images: bool,
    /// Per-request timeout for Send API calls.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_api_version() -> String {
    "16.0".to_string()
}

fn default_graph_base_url() -> String {
    "https://graph.facebook.com".to_string()
}

fn default_true() -> bool {
    true
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for MessengerConfig {
    fn default() -> Self {
        Self {
            page_access_token: None,
            verify_token: None,
            api_version: default_api_version(),
            graph_base_url: default_graph_base_url(),
            typing_indicator: true,
            batch_images: true,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Sarufi bot and endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SarufiConfig {
    /// API key. Overridden by SARUFI_API_KEY env.
    pub api_key: Option<String>,
    /// Bot id selected at startup. Overridden by SARUFI_BOT_ID env.
    pub bot_id: Option<String>,
    /// API base URL (default "https://api.sarufi.io").
    #[serde(default = "default_sarufi_base_url")]
    pub base_url: String,
    /// Channel tag sent with each conversation turn; decides the shape of returned actions.
    #[serde(default = "default_sarufi_channel")]
    pub channel: String,
    /// Per-request timeout for Sarufi calls.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_sarufi_base_url() -> String {
    "https://api.sarufi.io".to_string()
}

fn default_sarufi_channel() -> String {
    "whatsapp".to_string()
}

impl Default for SarufiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            bot_id: None,
            base_url: default_sarufi_base_url(),
            channel: default_sarufi_channel(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Required secrets, resolved from env and config. Built by [`resolve_credentials_with`].
#[derive(Clone)]
pub struct Credentials {
    pub page_access_token: String,
    pub verify_token: String,
    pub sarufi_api_key: String,
    pub sarufi_bot_id: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("sarufi_bot_id", &self.sarufi_bot_id)
            .finish_non_exhaustive()
    }
}

/// Non-empty trimmed env var, if set.
fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| non_empty(&s))
}

fn non_empty(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

fn config_value(value: Option<&String>) -> Option<String> {
    value.and_then(|s| non_empty(s))
}

/// Resolve a secret: env `name` (then its lowercase spelling) overrides the config value.
fn resolve_secret<L>(lookup: &L, name: &str, from_config: Option<&String>) -> Option<String>
where
    L: Fn(&str) -> Option<String>,
{
    lookup(name)
        .or_else(|| lookup(&name.to_ascii_lowercase()))
        .and_then(|v| non_empty(&v))
        .or_else(|| config_value(from_config))
}

/// Apply the PORT env override, if it parses.
pub fn apply_env_overrides(config: &mut Config) {
    if let Some(p) = env_value("PORT") {
        match p.parse::<u16>() {
            Ok(port) => config.gateway.port = port,
            Err(_) => log::warn!("ignoring invalid PORT value: {}", p),
        }
    }
}

/// Resolve every required secret. Fails listing all of the missing ones so a
/// misconfigured deployment can be fixed in one pass.
pub fn resolve_credentials(config: &Config) -> Result<Credentials> {
    resolve_credentials_with(config, env_value)
}

/// [`resolve_credentials`] with the environment lookup supplied by the caller.
pub fn resolve_credentials_with<L>(config: &Config, lookup: L) -> Result<Credentials>
where
    L: Fn(&str) -> Option<String>,
{
    let page_access_token = resolve_secret(
        &lookup,
        "PAGE_ACCESS_TOKEN",
        config.messenger.page_access_token.as_ref(),
    );
    let verify_token = resolve_secret(&lookup, "VERIFY_TOKEN", config.messenger.verify_token.as_ref());
    let sarufi_api_key = resolve_secret(&lookup, "SARUFI_API_KEY", config.sarufi.api_key.as_ref());
    let sarufi_bot_id = resolve_secret(&lookup, "SARUFI_BOT_ID", config.sarufi.bot_id.as_ref());

    match (page_access_token, verify_token, sarufi_api_key, sarufi_bot_id) {
        (Some(page_access_token), Some(verify_token), Some(sarufi_api_key), Some(sarufi_bot_id)) => {
            Ok(Credentials {
                page_access_token,
                verify_token,
                sarufi_api_key,
                sarufi_bot_id,
            })
        }
        (a, b, c, d) => {
            let missing: Vec<&str> = [
                (a.is_none(), "PAGE_ACCESS_TOKEN (messenger.pageAccessToken)"),
                (b.is_none(), "VERIFY_TOKEN (messenger.verifyToken)"),
                (c.is_none(), "SARUFI_API_KEY (sarufi.apiKey)"),
                (d.is_none(), "SARUFI_BOT_ID (sarufi.botId)"),
            ]
            .into_iter()
            .filter_map(|(missing, name)| missing.then_some(name))
            .collect();
            anyhow::bail!("missing required configuration: {}", missing.join(", "))
        }
    }
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("BRIDGE_CONFIG_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            dirs::home_dir()
                .map(|h| h.join(".sarufi-messenger").join("config.json"))
                .unwrap_or_else(|| PathBuf::from("config.json"))
        })
}

/// Load config from the given path (or the default). Missing file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = read_config_file(&path)?;
    Ok((config, path))
}

fn read_config_file(path: &Path) -> Result<Config> {
    if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        return Ok(Config::default());
    }
    let s = std::fs::read_to_string(path)
        .with_context(|| format!("reading config from {}", path.display()))?;
    serde_json::from_str(&s).with_context(|| format!("parsing config from {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn full_config() -> Config {
        let mut config = Config::default();
        config.messenger.page_access_token = Some("page".to_string());
        config.messenger.verify_token = Some("verify".to_string());
        config.sarufi.api_key = Some("key".to_string());
        config.sarufi.bot_id = Some("42".to_string());
        config
    }

    #[test]
    fn defaults() {
        let config = Config::default();
        assert_eq!(config.gateway.port, 5000);
        assert_eq!(config.gateway.bind, "0.0.0.0");
        assert_eq!(config.gateway.queue_capacity, 64);
        assert_eq!(config.messenger.api_version, "16.0");
        assert!(config.messenger.typing_indicator);
        assert!(config.messenger.batch_images);
        assert_eq!(config.sarufi.channel, "whatsapp");
    }

    #[test]
    fn parses_camel_case_with_partial_sections() {
        let config: Config = serde_json::from_str(
            r#"{"gateway":{"port":8080},"messenger":{"batchImages":false,"verifyToken":"v"}}"#,
        )
        .unwrap();
        assert_eq!(config.gateway.port, 8080);
        assert_eq!(config.gateway.bind, "0.0.0.0");
        assert!(!config.messenger.batch_images);
        assert!(config.messenger.typing_indicator);
        assert_eq!(config.messenger.verify_token.as_deref(), Some("v"));
        assert_eq!(config.sarufi.base_url, "https://api.sarufi.io");
    }

    #[test]
    fn missing_file_loads_defaults() {
        let path = std::env::temp_dir()
            .join(format!("bridge-config-{}", uuid::Uuid::new_v4()))
            .join("config.json");
        let (config, used) = load_config(Some(path.clone())).unwrap();
        assert_eq!(used, path);
        assert_eq!(config.gateway.port, 5000);
    }

    #[test]
    fn invalid_file_is_an_error() {
        let dir = std::env::temp_dir().join(format!("bridge-config-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(load_config(Some(path)).is_err());
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn env_of(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| vars.get(name).cloned()
    }

    #[test]
    fn credentials_from_config() {
        let creds = resolve_credentials_with(&full_config(), no_env).unwrap();
        assert_eq!(creds.page_access_token, "page");
        assert_eq!(creds.verify_token, "verify");
        assert_eq!(creds.sarufi_api_key, "key");
        assert_eq!(creds.sarufi_bot_id, "42");
    }

    #[test]
    fn env_overrides_config() {
        let env = env_of(&[("PAGE_ACCESS_TOKEN", " from-env "), ("SARUFI_BOT_ID", "7")]);
        let creds = resolve_credentials_with(&full_config(), env).unwrap();
        assert_eq!(creds.page_access_token, "from-env");
        assert_eq!(creds.sarufi_bot_id, "7");
        assert_eq!(creds.verify_token, "verify");
    }

    #[test]
    fn lowercase_env_names_are_accepted() {
        let env = env_of(&[
            ("page_access_token", "p"),
            ("verify_token", "v"),
            ("sarufi_api_key", "k"),
            ("sarufi_bot_id", "1"),
        ]);
        let creds = resolve_credentials_with(&Config::default(), env).unwrap();
        assert_eq!(creds.page_access_token, "p");
        assert_eq!(creds.verify_token, "v");
        assert_eq!(creds.sarufi_api_key, "k");
        assert_eq!(creds.sarufi_bot_id, "1");
    }

    #[test]
    fn uppercase_env_name_wins_over_lowercase() {
        let env = env_of(&[("SARUFI_API_KEY", "upper"), ("sarufi_api_key", "lower")]);
        let creds = resolve_credentials_with(&full_config(), env).unwrap();
        assert_eq!(creds.sarufi_api_key, "upper");
    }

    #[test]
    fn blank_env_value_falls_back_to_config() {
        let env = env_of(&[("VERIFY_TOKEN", "  ")]);
        let creds = resolve_credentials_with(&full_config(), env).unwrap();
        assert_eq!(creds.verify_token, "verify");
    }

    #[test]
    fn missing_credentials_are_all_listed() {
        let mut config = full_config();
        config.messenger.verify_token = Some("   ".to_string());
        config.sarufi.bot_id = None;
        let err = resolve_credentials_with(&config, no_env)
            .unwrap_err()
            .to_string();
        assert!(err.contains("VERIFY_TOKEN"));
        assert!(err.contains("SARUFI_BOT_ID"));
        assert!(!err.contains("PAGE_ACCESS_TOKEN"));
    }

    #[test]
    fn credentials_debug_hides_secrets() {
        let mut config = full_config();
        config.messenger.page_access_token = Some("super-secret".to_string());
        let creds = resolve_credentials_with(&config, no_env).unwrap();
        let shown = format!("{:?}", creds);
        assert!(!shown.contains("super-secret"));
        assert!(shown.contains("42"));
    }
}
