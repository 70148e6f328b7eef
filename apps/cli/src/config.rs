use std::{collections::HashMap, fs, time::Duration};

use chat_core::connection::{DEFAULT_HEARTBEAT, DEFAULT_RECONNECT_DELAY};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Settings {
    pub server_url: String,
    pub api_url: String,
    pub reconnect_delay_ms: u64,
    pub heartbeat_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: "ws://127.0.0.1:8443/ws".into(),
            api_url: "http://127.0.0.1:8443".into(),
            reconnect_delay_ms: DEFAULT_RECONNECT_DELAY.as_millis() as u64,
            heartbeat_ms: DEFAULT_HEARTBEAT.as_millis() as u64,
        }
    }
}

impl Settings {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms)
    }
}

pub fn load_settings() -> Settings {
    let mut settings = Settings::default();

    if let Ok(raw) = fs::read_to_string("chat.toml") {
        if let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(&raw) {
            if let Some(v) = file_cfg.get("server_url") {
                settings.server_url = v.clone();
            }
            if let Some(v) = file_cfg.get("api_url") {
                settings.api_url = v.clone();
            }
            if let Some(v) = file_cfg.get("reconnect_delay_ms") {
                if let Ok(parsed) = v.parse::<u64>() {
                    settings.reconnect_delay_ms = parsed;
                }
            }
            if let Some(v) = file_cfg.get("heartbeat_ms") {
                if let Ok(parsed) = v.parse::<u64>() {
                    settings.heartbeat_ms = parsed;
                }
            }
        }
    }

    if let Ok(v) = std::env::var("CHAT_SERVER_URL") {
        settings.server_url = v;
    }
    if let Ok(v) = std::env::var("CHAT_API_URL") {
        settings.api_url = v;
    }
    if let Ok(v) = std::env::var("CHAT_RECONNECT_DELAY_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.reconnect_delay_ms = parsed;
        }
    }
    if let Ok(v) = std::env::var("CHAT_HEARTBEAT_MS") {
        if let Ok(parsed) = v.parse::<u64>() {
            settings.heartbeat_ms = parsed;
        }
    }

    settings
}
