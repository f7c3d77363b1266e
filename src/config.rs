use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::{
    broker::{Backoff, SessionOptions},
    protocol::normalize_device_id,
    types::{Channel, ChannelConfig},
};

#[derive(Debug, Parser, Clone)]
#[command(name = "notify-relay")]
#[command(about = "Relays chat notifications to a remote peer over MQTT and routes replies back")]
pub struct Config {
    /// Preferences file (default: <config dir>/notify-relay/preferences.json)
    #[arg(long)]
    pub prefs: Option<PathBuf>,

    #[arg(long, default_value = "tcp://localhost:1883")]
    pub broker: String,

    /// MQTT client id (default: notify-relay-<hostname>)
    #[arg(long)]
    pub client_id: Option<String>,

    #[arg(long)]
    pub broker_username: Option<String>,

    #[arg(long)]
    pub broker_password: Option<String>,

    #[arg(long, default_value_t = 30)]
    pub keep_alive_secs: u64,

    #[arg(long, default_value_t = 1_000)]
    pub reconnect_base_ms: u64,

    #[arg(long, default_value_t = 30_000)]
    pub reconnect_max_ms: u64,

    #[arg(long, default_value = "https://api.api.ai/v1")]
    pub assistant_url: String,

    /// Client access token for the assistant service (falls back to NOTIFY_RELAY_ASSISTANT_TOKEN)
    #[arg(long)]
    pub assistant_token: Option<String>,

    #[arg(long, default_value = "en")]
    pub assistant_lang: String,

    #[arg(long, default_value_t = 4096)]
    pub max_greeted: usize,

    #[arg(long, default_value = "info")]
    pub log_level: String,

    #[arg(long, default_value_t = false)]
    pub json_output: bool,
}

impl Config {
    pub fn prefs_path(&self) -> PathBuf {
        self.prefs.clone().unwrap_or_else(default_prefs_path)
    }

    pub fn resolved_client_id(&self) -> String {
        self.client_id.clone().unwrap_or_else(|| {
            let host = hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "device".to_string());
            format!("notify-relay-{host}")
        })
    }

    pub fn resolved_assistant_token(&self) -> String {
        self.assistant_token
            .clone()
            .or_else(|| std::env::var("NOTIFY_RELAY_ASSISTANT_TOKEN").ok())
            .unwrap_or_default()
    }

    pub fn session_options(&self) -> SessionOptions {
        let credentials = match (&self.broker_username, &self.broker_password) {
            (Some(user), password) => Some((user.clone(), password.clone().unwrap_or_default())),
            (None, _) => None,
        };
        SessionOptions {
            endpoint: self.broker.clone(),
            client_id: self.resolved_client_id(),
            clean_session: false,
            keep_alive: Duration::from_secs(self.keep_alive_secs),
            credentials,
            backoff: Backoff::new(
                Duration::from_millis(self.reconnect_base_ms),
                Duration::from_millis(self.reconnect_max_ms),
            ),
        }
    }
}

fn default_prefs_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("notify-relay")
        .join("preferences.json")
}

/// Persisted user preferences. Read-only from the relay's point of view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Preferences {
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub assist_wa_msg: String,
    #[serde(default)]
    pub assist_fb_msg: String,
    #[serde(default)]
    pub is_assist_on: bool,
    #[serde(default)]
    pub is_notify_on: bool,
    #[serde(default)]
    pub is_wa_on: bool,
    #[serde(default)]
    pub is_fb_msg_on: bool,
}

impl Preferences {
    /// Missing file yields defaults; an unreadable or malformed one is an error.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::info!(
                target = "notify_relay::config",
                path = %path.display(),
                "no preferences file, using defaults"
            );
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read preferences {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse preferences {}", path.display()))
    }

    pub fn device_id(&self) -> String {
        normalize_device_id(&self.phone)
    }

    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            assist: self.is_assist_on,
            notify: self.is_notify_on,
            whatsapp: self.is_wa_on,
            messenger: self.is_fb_msg_on,
        }
    }

    pub fn relay_settings(&self) -> RelaySettings {
        RelaySettings {
            device_id: self.device_id(),
            whatsapp_greeting: self.assist_wa_msg.clone(),
            messenger_greeting: self.assist_fb_msg.clone(),
        }
    }
}

/// Static settings the engine needs besides the toggles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelaySettings {
    pub device_id: String,
    pub whatsapp_greeting: String,
    pub messenger_greeting: String,
}

impl RelaySettings {
    pub fn canned_message(&self, channel: Channel) -> &str {
        match channel {
            Channel::WhatsApp => &self.whatsapp_greeting,
            Channel::Messenger => &self.messenger_greeting,
        }
    }
}
