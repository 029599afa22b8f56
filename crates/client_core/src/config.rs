use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use serde::Deserialize;
use url::Url;

pub const DEFAULT_CONFIG_PATH: &str = "chat.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server_url: String,
    pub ws_path: String,
    pub typing_ttl_ms: u64,
    pub request_timeout_ms: u64,
    pub typing_sweep_interval_ms: u64,
    pub reconnect_delay_ms: u64,
    pub update_buffer: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:3001".into(),
            ws_path: "/ws".into(),
            typing_ttl_ms: 5_000,
            request_timeout_ms: 10_000,
            typing_sweep_interval_ms: 1_000,
            reconnect_delay_ms: 2_000,
            update_buffer: 256,
        }
    }
}

impl Settings {
    pub fn typing_ttl(&self) -> Duration {
        Duration::from_millis(self.typing_ttl_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn typing_sweep_interval(&self) -> Duration {
        Duration::from_millis(self.typing_sweep_interval_ms.max(1))
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn ws_url(&self) -> anyhow::Result<String> {
        let mut url = Url::parse(&self.server_url)
            .with_context(|| format!("invalid server_url '{}'", self.server_url))?;
        let scheme = match url.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => anyhow::bail!("server_url scheme must be http or https, got '{other}'"),
        };
        url.set_scheme(scheme)
            .map_err(|()| anyhow::anyhow!("cannot derive {scheme} url from '{}'", self.server_url))?;
        url.set_path(&self.ws_path);
        Ok(url.into())
    }
}

/// Defaults, then `path` if it exists, then environment overrides.
pub fn load_settings(path: impl AsRef<Path>) -> anyhow::Result<Settings> {
    let path = path.as_ref();
    let mut settings = match fs::read_to_string(path) {
        Ok(raw) => toml::from_str::<Settings>(&raw)
            .with_context(|| format!("failed to parse config file '{}'", path.display()))?,
        Err(_) => Settings::default(),
    };
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn apply_env_overrides(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    let pick = |keys: [&str; 2]| keys.iter().rev().find_map(|key| lookup(*key));

    if let Some(v) = pick(["CHAT_SERVER_URL", "APP__SERVER_URL"]) {
        settings.server_url = v;
    }
    if let Some(v) = pick(["CHAT_WS_PATH", "APP__WS_PATH"]) {
        settings.ws_path = v;
    }
    if let Some(v) = pick(["CHAT_TYPING_TTL_MS", "APP__TYPING_TTL_MS"]).and_then(|v| v.parse().ok()) {
        settings.typing_ttl_ms = v;
    }
    if let Some(v) =
        pick(["CHAT_REQUEST_TIMEOUT_MS", "APP__REQUEST_TIMEOUT_MS"]).and_then(|v| v.parse().ok())
    {
        settings.request_timeout_ms = v;
    }
    if let Some(v) =
        pick(["CHAT_RECONNECT_DELAY_MS", "APP__RECONNECT_DELAY_MS"]).and_then(|v| v.parse().ok())
    {
        settings.reconnect_delay_ms = v;
    }
    if let Some(v) = pick(["CHAT_TYPING_SWEEP_INTERVAL_MS", "APP__TYPING_SWEEP_INTERVAL_MS"])
        .and_then(|v| v.parse().ok())
    {
        settings.typing_sweep_interval_ms = v;
    }
    if let Some(v) =
        pick(["CHAT_UPDATE_BUFFER", "APP__UPDATE_BUFFER"]).and_then(|v| v.parse().ok())
    {
        settings.update_buffer = v;
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
