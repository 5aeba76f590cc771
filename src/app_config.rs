use crate::scheduler::PollingConfig;
use config::Config;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    core: Core,
    proxy: Proxy,
    storage: Storage,
}

impl AppConfig {
    pub fn load() -> Self {
        Config::builder()
            .add_source(config::File::with_name("config").required(true))
            .add_source(config::File::with_name("config_local").required(false))
            .add_source(config::Environment::default())
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    pub fn core(&self) -> &Core {
        &self.core
    }

    pub fn proxy(&self) -> &Proxy {
        &self.proxy
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }
}

#[derive(Debug, Deserialize)]
pub struct Core {
    #[serde(with = "humantime_serde")]
    list_polling_interval: Duration,
    #[serde(with = "humantime_serde")]
    detail_polling_interval: Duration,
    #[serde(with = "humantime_serde")]
    command_grace: Duration,
    render_buffer_size: usize,
    notification_buffer_size: usize,
}

impl Core {
    pub fn polling(&self) -> PollingConfig {
        PollingConfig {
            list_interval: self.list_polling_interval,
            detail_interval: self.detail_polling_interval,
            command_grace: self.command_grace,
        }
    }

    pub fn render_buffer_size(&self) -> usize {
        self.render_buffer_size
    }

    pub fn notification_buffer_size(&self) -> usize {
        self.notification_buffer_size
    }
}

/// Seed values; a proxy configuration persisted by the app wins over these.
#[derive(Debug, Deserialize)]
pub struct Proxy {
    #[serde(default)]
    url: String,
    timeout_secs: u64,
}

impl Proxy {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout_secs
    }
}

#[derive(Debug, Deserialize)]
pub struct Storage {
    file: String,
}

impl Storage {
    pub fn file(&self) -> &str {
        &self.file
    }
}

#[cfg(test)]
pub struct AppConfigBuilder {
    config: AppConfig,
}

#[cfg(test)]
impl AppConfigBuilder {
    pub fn new() -> Self {
        AppConfigBuilder {
            config: AppConfig {
                core: Core {
                    list_polling_interval: Duration::from_secs(15),
                    detail_polling_interval: Duration::from_secs(3),
                    command_grace: Duration::from_millis(500),
                    render_buffer_size: 16,
                    notification_buffer_size: 16,
                },
                proxy: Proxy {
                    url: "http://proxy.local/relay".to_string(),
                    timeout_secs: 10,
                },
                storage: Storage {
                    file: "devices.json".to_string(),
                },
            },
        }
    }

    pub fn proxy_url(mut self, url: String) -> Self {
        self.config.proxy.url = url;
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}
