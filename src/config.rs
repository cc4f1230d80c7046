use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

use crate::secrets::{KeySlot, KeyStore};

/// Top-level configuration loaded from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CompanionConfig {
    pub gateway: GatewayConfig,
    pub store: StoreConfig,
    pub router: EndpointConfig,
    pub summary: EndpointConfig,
    pub providers: ProvidersConfig,
    pub proxy: ProxyConfig,
    pub image: ImageConfig,
    pub transcription: TranscriptionConfig,
    pub pacing: PacingConfig,
    pub context: ContextConfig,
    pub memory: MemoryConfig,
    pub friends: FriendsConfig,
}

#[derive(Debug, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: default_bind(),
        }
    }
}

fn default_port() -> u16 {
    7300
}
fn default_bind() -> String {
    "127.0.0.1".into()
}

/// Durable store selection: `memory` (in-process) or `rest` (hosted backend).
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_kind")]
    pub kind: String,
    pub url: Option<String>,
    pub api_key: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: default_store_kind(),
            url: None,
            api_key: None,
        }
    }
}

fn default_store_kind() -> String {
    "memory".into()
}

/// An external HTTP endpoint (router classifier, persona summarizer).
/// No endpoint means the component always takes its fallback path.
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    pub endpoint: Option<String>,
    #[serde(default = "default_endpoint_timeout")]
    pub timeout_secs: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_endpoint_timeout(),
        }
    }
}

impl EndpointConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_endpoint_timeout() -> u64 {
    15
}

/// Completion providers, tried in order: vision, proxy, direct.
#[derive(Debug, Clone, Deserialize)]
pub struct ProvidersConfig {
    #[serde(default = "default_vision")]
    pub vision: ProviderConfig,
    #[serde(default = "default_proxy_provider")]
    pub proxy: ProviderConfig,
    #[serde(default = "default_direct")]
    pub direct: ProviderConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            vision: default_vision(),
            proxy: default_proxy_provider(),
            direct: default_direct(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_openai_base")]
    pub base_url: String,
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_provider_timeout")]
    pub timeout_secs: u64,
}

impl ProviderConfig {
    fn with_base_url(base_url: &str) -> Self {
        Self {
            enabled: default_enabled(),
            base_url: base_url.into(),
            api_key: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_provider_timeout(),
        }
    }
}

fn default_vision() -> ProviderConfig {
    ProviderConfig::with_base_url("https://api.openai.com/v1")
}
fn default_proxy_provider() -> ProviderConfig {
    ProviderConfig::with_base_url("http://127.0.0.1:7300/api/proxy")
}
fn default_direct() -> ProviderConfig {
    ProviderConfig::with_base_url("https://api.openai.com/v1")
}
fn default_enabled() -> bool {
    true
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_max_tokens() -> u32 {
    150
}
fn default_temperature() -> f32 {
    0.8
}
fn default_provider_timeout() -> u64 {
    30
}

/// Upstream for the same-origin `/api/proxy` route.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyConfig {
    pub upstream_base_url: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfig {
    #[serde(default = "default_openai_base")]
    pub base_url: String,
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub enhance_model: String,
    #[serde(default = "default_image_model")]
    pub model: String,
    #[serde(default = "default_image_size")]
    pub size: String,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base(),
            api_key: None,
            enhance_model: default_model(),
            model: default_image_model(),
            size: default_image_size(),
        }
    }
}

fn default_openai_base() -> String {
    "https://api.openai.com/v1".into()
}
fn default_image_model() -> String {
    "dall-e-3".into()
}
fn default_image_size() -> String {
    "1024x1024".into()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscriptionConfig {
    #[serde(default = "default_transcription_base")]
    pub base_url: String,
    pub api_key: Option<String>,
    #[serde(default = "default_poll_attempts")]
    pub poll_attempts: u32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            base_url: default_transcription_base(),
            api_key: None,
            poll_attempts: default_poll_attempts(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_transcription_base() -> String {
    "https://api.assemblyai.com/v2".into()
}
fn default_poll_attempts() -> u32 {
    60
}
fn default_poll_interval_ms() -> u64 {
    1000
}

/// Typing delay drawn uniformly per sentence.
#[derive(Debug, Clone, Deserialize)]
pub struct PacingConfig {
    #[serde(default = "default_min_delay")]
    pub min_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            min_delay_ms: default_min_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

fn default_min_delay() -> u64 {
    1000
}
fn default_max_delay() -> u64 {
    3000
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_short_term_capacity")]
    pub short_term_capacity: usize,
    #[serde(default = "default_routing_window")]
    pub routing_window: usize,
    #[serde(default = "default_generation_window")]
    pub generation_window: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            short_term_capacity: default_short_term_capacity(),
            routing_window: default_routing_window(),
            generation_window: default_generation_window(),
        }
    }
}

fn default_short_term_capacity() -> usize {
    crate::memory::short_term::DEFAULT_CAPACITY
}
fn default_routing_window() -> usize {
    crate::memory::ROUTING_WINDOW
}
fn default_generation_window() -> usize {
    crate::memory::GENERATION_WINDOW
}

#[derive(Debug, Clone, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_enabled")]
    pub daily_enabled: bool,
    #[serde(default = "default_flag_ttl")]
    pub local_flag_ttl_secs: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            daily_enabled: default_enabled(),
            local_flag_ttl_secs: default_flag_ttl(),
        }
    }
}

fn default_flag_ttl() -> u64 {
    3600
}

#[derive(Debug, Clone, Deserialize)]
pub struct FriendsConfig {
    #[serde(default = "default_max_active")]
    pub max_active: usize,
}

impl Default for FriendsConfig {
    fn default() -> Self {
        Self {
            max_active: default_max_active(),
        }
    }
}

fn default_max_active() -> usize {
    5
}

/// Load configuration from file or use defaults.
///
/// Search order:
/// 1. `COMPANION_CONFIG` env var
/// 2. `~/.companion/config.toml`
/// 3. Zero-config defaults (no file needed)
pub fn load() -> anyhow::Result<CompanionConfig> {
    let path = config_path();

    if path.exists() {
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
        let mut config: CompanionConfig = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("invalid config at {}: {e}", path.display()))?;

        resolve_api_keys(&mut config);
        validate(&config)?;

        info!("loaded config from {}", path.display());
        Ok(config)
    } else {
        info!("no config file found, using zero-config defaults");
        let mut config = CompanionConfig::default();
        resolve_api_keys(&mut config);
        Ok(config)
    }
}

pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("COMPANION_CONFIG") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    PathBuf::from(home).join(".companion").join("config.toml")
}

/// Resolve API keys from environment variables, then the key store, if
/// not set in config.
pub fn resolve_api_keys(config: &mut CompanionConfig) {
    let keys = KeyStore::locate();
    if config.providers.direct.api_key.is_none() {
        config.providers.direct.api_key = keys.resolve(KeySlot::OpenAi);
    }
    if config.providers.vision.api_key.is_none() {
        config.providers.vision.api_key = keys.resolve(KeySlot::OpenAi);
    }
    if config.proxy.api_key.is_none() {
        config.proxy.api_key = keys.resolve(KeySlot::Proxy);
    }
    if config.store.api_key.is_none() {
        config.store.api_key = keys.resolve(KeySlot::Store);
    }
    if config.image.api_key.is_none() {
        config.image.api_key = keys
            .resolve(KeySlot::Image)
            .or_else(|| config.providers.direct.api_key.clone());
    }
    if config.transcription.api_key.is_none() {
        config.transcription.api_key = keys.resolve(KeySlot::Transcription);
    }
}

fn check_url(field: &str, value: &str) -> anyhow::Result<()> {
    url::Url::parse(value).map_err(|e| anyhow::anyhow!("{field} is not a valid URL ({value}): {e}"))?;
    Ok(())
}

/// Validate the config and return clear error messages.
pub fn validate(config: &CompanionConfig) -> anyhow::Result<()> {
    match config.store.kind.as_str() {
        "memory" => {}
        "rest" => {
            let url = config
                .store
                .url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("store.url is required when store.kind = \"rest\""))?;
            check_url("store.url", url)?;
        }
        other => anyhow::bail!("invalid store kind '{other}': must be one of [\"memory\", \"rest\"]"),
    }

    for (name, provider) in [
        ("vision", &config.providers.vision),
        ("proxy", &config.providers.proxy),
        ("direct", &config.providers.direct),
    ] {
        if provider.max_tokens == 0 {
            anyhow::bail!("providers.{name}.max_tokens must be > 0");
        }
        check_url(&format!("providers.{name}.base_url"), &provider.base_url)?;
    }

    for (field, endpoint) in [
        ("router.endpoint", &config.router.endpoint),
        ("summary.endpoint", &config.summary.endpoint),
        ("proxy.upstream_base_url", &config.proxy.upstream_base_url),
    ] {
        if let Some(url) = endpoint {
            check_url(field, url)?;
        }
    }

    if config.pacing.min_delay_ms > config.pacing.max_delay_ms {
        anyhow::bail!(
            "pacing.min_delay_ms ({}) must not exceed pacing.max_delay_ms ({})",
            config.pacing.min_delay_ms,
            config.pacing.max_delay_ms
        );
    }

    if config.context.short_term_capacity == 0
        || config.context.routing_window == 0
        || config.context.generation_window == 0
    {
        anyhow::bail!("context windows must be > 0");
    }

    if config.friends.max_active == 0 {
        anyhow::bail!("friends.max_active must be > 0");
    }

    if config.transcription.poll_attempts == 0 {
        anyhow::bail!("transcription.poll_attempts must be > 0");
    }

    Ok(())
}
