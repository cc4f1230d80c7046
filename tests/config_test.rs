use companion::config::{CompanionConfig, validate};

#[test]
fn default_config_has_sensible_values() {
    let config = CompanionConfig::default();
    assert_eq!(config.gateway.port, 7300);
    assert_eq!(config.gateway.bind, "127.0.0.1");
    assert_eq!(config.store.kind, "memory");
    assert!(config.router.endpoint.is_none());
    assert!(config.summary.endpoint.is_none());
    assert_eq!(config.providers.direct.model, "gpt-4o-mini");
    assert_eq!(config.providers.direct.max_tokens, 150);
    assert_eq!(
        config.providers.proxy.base_url,
        "http://127.0.0.1:7300/api/proxy"
    );
    assert_eq!(config.pacing.min_delay_ms, 1000);
    assert_eq!(config.pacing.max_delay_ms, 3000);
    assert_eq!(config.context.short_term_capacity, 10);
    assert_eq!(config.context.routing_window, 10);
    assert_eq!(config.context.generation_window, 20);
    assert_eq!(config.memory.local_flag_ttl_secs, 3600);
    assert_eq!(config.friends.max_active, 5);
    assert_eq!(config.transcription.poll_attempts, 60);
    assert_eq!(config.transcription.poll_interval_ms, 1000);
    assert!(validate(&config).is_ok());
}

#[test]
fn valid_toml_parses_successfully() {
    let toml_str = r#"
[gateway]
port = 8080
bind = "0.0.0.0"

[store]
kind = "rest"
url = "https://db.example.com"
api_key = "anon-key"

[router]
endpoint = "https://router.example.com/route"
timeout_secs = 5

[providers.direct]
model = "gpt-4o"
api_key = "sk-test"

[providers.vision]
enabled = false

[pacing]
min_delay_ms = 0
max_delay_ms = 0
"#;

    let config: CompanionConfig = toml::from_str(toml_str).unwrap();
    assert_eq!(config.gateway.port, 8080);
    assert_eq!(config.gateway.bind, "0.0.0.0");
    assert_eq!(config.store.kind, "rest");
    assert_eq!(config.store.url.as_deref(), Some("https://db.example.com"));
    assert_eq!(
        config.router.endpoint.as_deref(),
        Some("https://router.example.com/route")
    );
    assert_eq!(config.router.timeout_secs, 5);
    assert_eq!(config.providers.direct.model, "gpt-4o");
    assert_eq!(config.providers.direct.api_key.as_deref(), Some("sk-test"));
    assert_eq!(config.providers.direct.base_url, "https://api.openai.com/v1");
    assert!(!config.providers.vision.enabled);
    assert!(config.providers.proxy.enabled);
    assert_eq!(config.pacing.max_delay_ms, 0);
    assert!(validate(&config).is_ok());
}

#[test]
fn partial_config_uses_defaults_for_missing_fields() {
    let config: CompanionConfig = toml::from_str("[friends]\nmax_active = 3\n").unwrap();
    assert_eq!(config.friends.max_active, 3);
    assert_eq!(config.gateway.port, 7300);
    assert_eq!(config.summary.timeout_secs, 15);
    assert!(config.memory.daily_enabled);
}

#[test]
fn rest_store_requires_url() {
    let config: CompanionConfig = toml::from_str("[store]\nkind = \"rest\"\n").unwrap();
    let err = validate(&config).unwrap_err();
    assert!(err.to_string().contains("store.url"));
}

#[test]
fn unknown_store_kind_rejected() {
    let config: CompanionConfig = toml::from_str("[store]\nkind = \"sqlite\"\n").unwrap();
    let err = validate(&config).unwrap_err();
    assert!(err.to_string().contains("invalid store kind"));
}

#[test]
fn bad_endpoint_url_rejected() {
    let config: CompanionConfig =
        toml::from_str("[summary]\nendpoint = \"not a url\"\n").unwrap();
    let err = validate(&config).unwrap_err();
    assert!(err.to_string().contains("summary.endpoint"));
}

#[test]
fn inverted_pacing_rejected() {
    let config: CompanionConfig =
        toml::from_str("[pacing]\nmin_delay_ms = 500\nmax_delay_ms = 100\n").unwrap();
    assert!(validate(&config).is_err());
}

#[test]
fn zero_max_tokens_rejected() {
    let config: CompanionConfig =
        toml::from_str("[providers.proxy]\nmax_tokens = 0\n").unwrap();
    let err = validate(&config).unwrap_err();
    assert!(err.to_string().contains("providers.proxy.max_tokens"));
}

#[test]
fn invalid_toml_is_an_error() {
    assert!(toml::from_str::<CompanionConfig>("[gateway\nport = 1").is_err());
}
