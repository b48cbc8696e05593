//! Server configuration.
//!
//! Settings live in a single `config.toml`, by default at
//! `~/.config/calwatch/config.toml`. Every key is optional:
//!
//! ```toml
//! listen_addr = "0.0.0.0:8080"
//! public_url = "https://hooks.example.com"
//! access_token = "env::GOOGLE_ACCESS_TOKEN"
//! channel_ttl_secs = 86400
//! renewal_margin_secs = 300
//! state_path = "/var/lib/calwatch/state.json"
//!
//! [notify]
//! desktop = false
//! forward_url = "https://consumer.example.com/reminders"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ServerError, ServerResult};

/// Path the provider delivers push notifications to.
pub const WEBHOOK_PATH: &str = "/webhook/calendar/events";

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    pub listen_addr: SocketAddr,

    /// Externally reachable base URL; pushes go to `{public_url}/webhook/calendar/events`.
    pub public_url: String,

    /// Provider API base URL.
    pub api_base_url: String,

    /// Bearer token for the provider. Accepts `env::VAR` and `pass::path` references.
    pub access_token: Option<String>,

    /// Timeout for provider requests, in seconds.
    pub request_timeout_secs: u64,

    /// Lifetime requested for each push channel, in seconds.
    pub channel_ttl_secs: u64,

    /// How long before expiry a channel is renewed, in seconds.
    pub renewal_margin_secs: u64,

    /// Token sent with watch requests and echoed back by the provider.
    pub channel_token: String,

    /// Where watcher state is persisted; `None` keeps it in memory only.
    pub state_path: Option<PathBuf>,

    /// Reminder delivery settings.
    pub notify: NotifyConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            public_url: "http://localhost:8080".to_string(),
            api_base_url: "https://www.googleapis.com/calendar/v3".to_string(),
            access_token: None,
            request_timeout_secs: 30,
            channel_ttl_secs: 24 * 60 * 60,
            renewal_margin_secs: 5 * 60,
            channel_token: "unused".to_string(),
            state_path: None,
            notify: NotifyConfig::default(),
        }
    }
}

/// How fired reminders are delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    /// Show a desktop notification for each reminder.
    pub desktop: bool,
    /// Application name used for desktop notifications.
    pub app_name: String,
    /// Desktop notification timeout in seconds.
    pub timeout_secs: u32,
    /// POST every reminder as JSON to this URL.
    pub forward_url: Option<String>,
    /// Buffer size of the in-process reminder broadcast.
    pub broadcast_capacity: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            desktop: false,
            app_name: "calwatch".to_string(),
            timeout_secs: 10,
            forward_url: None,
            broadcast_capacity: 256,
        }
    }
}

/// Parameters used every time a push channel is opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSettings {
    /// Full callback URL.
    pub callback_url: String,
    /// Token echoed back with every push.
    pub token: String,
    /// Requested lifetime in seconds.
    pub ttl_seconds: u64,
    /// Renewal happens this many seconds before expiry.
    pub renewal_margin_seconds: u64,
}

impl ChannelSettings {
    /// Creates channel settings.
    pub fn new(callback_url: impl Into<String>, ttl_seconds: u64, renewal_margin_seconds: u64) -> Self {
        Self {
            callback_url: callback_url.into(),
            token: "unused".to_string(),
            ttl_seconds,
            renewal_margin_seconds,
        }
    }
}

impl ServerConfig {
    /// Creates a configuration with the given public URL.
    pub fn new(public_url: impl Into<String>) -> Self {
        Self {
            public_url: public_url.into(),
            ..Default::default()
        }
    }

    /// Loads the configuration from the default path, or defaults when absent.
    pub fn load() -> ServerResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads the configuration from a specific file.
    pub fn load_from(path: &Path) -> ServerResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ServerError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content)
    }

    /// Parses a TOML document.
    pub fn from_toml(content: &str) -> ServerResult<Self> {
        toml::from_str(content).map_err(|e| ServerError::config(format!("failed to parse config: {}", e)))
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("calwatch")
            .join("config.toml")
    }

    /// Builder: set listen address.
    pub fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    /// Builder: set channel TTL.
    pub fn with_channel_ttl(mut self, ttl: Duration) -> Self {
        self.channel_ttl_secs = ttl.as_secs();
        self
    }

    /// Builder: set renewal margin.
    pub fn with_renewal_margin(mut self, margin: Duration) -> Self {
        self.renewal_margin_secs = margin.as_secs();
        self
    }

    /// Builder: set state file.
    pub fn with_state_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_path = Some(path.into());
        self
    }

    /// Provider request timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Full URL push notifications are delivered to.
    pub fn callback_url(&self) -> String {
        format!("{}{}", self.public_url.trim_end_matches('/'), WEBHOOK_PATH)
    }

    /// Settings for opening push channels.
    pub fn channel_settings(&self) -> ChannelSettings {
        ChannelSettings {
            callback_url: self.callback_url(),
            token: self.channel_token.clone(),
            ttl_seconds: self.channel_ttl_secs,
            renewal_margin_seconds: self.renewal_margin_secs,
        }
    }

    /// Checks values that would make channels unusable.
    pub fn validate(&self) -> ServerResult<()> {
        if self.channel_ttl_secs == 0 {
            return Err(ServerError::config("channel_ttl_secs must be positive"));
        }
        if self.renewal_margin_secs >= self.channel_ttl_secs {
            return Err(ServerError::config(format!(
                "renewal_margin_secs ({}) must be smaller than channel_ttl_secs ({})",
                self.renewal_margin_secs, self.channel_ttl_secs
            )));
        }
        let public = Url::parse(&self.public_url)
            .map_err(|e| ServerError::config(format!("invalid public_url: {}", e)))?;
        if !matches!(public.scheme(), "http" | "https") {
            return Err(ServerError::config("public_url must be an http(s) URL"));
        }
        if let Some(ref forward) = self.notify.forward_url {
            Url::parse(forward)
                .map_err(|e| ServerError::config(format!("invalid notify.forward_url: {}", e)))?;
        }
        if self.notify.broadcast_capacity == 0 {
            return Err(ServerError::config("notify.broadcast_capacity must be positive"));
        }
        Ok(())
    }
}
