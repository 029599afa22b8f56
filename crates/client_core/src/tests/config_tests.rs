use super::*;

use std::{
    collections::HashMap,
    env,
    time::{SystemTime, UNIX_EPOCH},
};

#[test]
fn defaults_match_engine_recommendations() {
    let settings = Settings::default();
    assert_eq!(settings.typing_ttl(), Duration::from_secs(5));
    assert_eq!(settings.request_timeout(), Duration::from_secs(10));
}

#[test]
fn derives_ws_url_from_http_and_https() {
    let mut settings = Settings {
        server_url: "http://localhost:3001/".into(),
        ..Settings::default()
    };
    assert_eq!(settings.ws_url().expect("ws url"), "ws://localhost:3001/ws");

    settings.server_url = "https://chat.example.com".into();
    settings.ws_path = "socket".into();
    assert_eq!(
        settings.ws_url().expect("wss url"),
        "wss://chat.example.com/socket"
    );

    settings.server_url = "chat.example.com".into();
    assert!(settings.ws_url().is_err());
}

#[test]
fn app_prefixed_env_wins_over_chat_prefix() {
    let vars: HashMap<&str, &str> = HashMap::from([
        ("CHAT_SERVER_URL", "http://one:1"),
        ("APP__SERVER_URL", "http://two:2"),
        ("CHAT_TYPING_TTL_MS", "750"),
        ("APP__REQUEST_TIMEOUT_MS", "not-a-number"),
    ]);
    let mut settings = Settings::default();
    apply_env_overrides(&mut settings, |key| vars.get(key).map(|v| v.to_string()));

    assert_eq!(settings.server_url, "http://two:2");
    assert_eq!(settings.typing_ttl_ms, 750);
    assert_eq!(settings.request_timeout_ms, 10_000);
}

#[test]
fn reads_partial_toml_file() {
    let suffix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock")
        .as_nanos();
    let path = env::temp_dir().join(format!("chat_settings_test_{suffix}.toml"));
    fs::write(&path, "typing_ttl_ms = 1200\nws_path = \"/events\"\n").expect("write config");

    let raw = fs::read_to_string(&path).expect("read config");
    let settings: Settings = toml::from_str(&raw).expect("parse");
    assert_eq!(settings.typing_ttl_ms, 1200);
    assert_eq!(settings.ws_path, "/events");
    assert_eq!(settings.request_timeout_ms, 10_000);

    fs::remove_file(path).expect("cleanup");
}

#[test]
fn missing_file_falls_back_to_defaults() {
    let settings = load_settings("/definitely/not/here/chat.toml").expect("defaults");
    assert_eq!(settings.update_buffer, Settings::default().update_buffer);
}
