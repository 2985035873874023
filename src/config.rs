use std::collections::HashMap;

use config::{Config as ConfigLib, ConfigError, Environment, File};
use serde::Deserialize;

use crate::{card::CardType, channel::ChannelConfig};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub capture: CaptureSettings,
}

/// Defaults applied to capture calls built with
/// [`CaptureOptions::from_settings`](crate::capture::CaptureOptions::from_settings).
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureSettings {
    /// Inactivity timeout in seconds, unbounded when absent
    #[serde(default)]
    pub inactivity_timeout_secs: Option<u64>,
    /// Period of the watchdog checks in milliseconds
    pub watchdog_interval_ms: u64,
    /// Card type filter, any card when absent
    #[serde(default)]
    pub card_type: Option<CardType>,
    pub debug: bool,
    /// Passed through to the channel factory
    #[serde(default)]
    pub channel: ChannelConfig,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: None,
            watchdog_interval_ms: 200,
            card_type: None,
            debug: false,
            channel: ChannelConfig::default(),
        }
    }
}

impl CaptureSettings {
    /// Validates the configuration settings
    pub fn validate(&self) -> Result<(), String> {
        if self.watchdog_interval_ms == 0 {
            return Err("Watchdog interval must be greater than 0".to_string());
        }
        if self.inactivity_timeout_secs == Some(0) {
            return Err("Inactivity timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_sources(None)
    }

    pub fn load_with_sources(
        env_vars: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = ConfigLib::builder()
            .set_default("capture.watchdog_interval_ms", 200)?
            .set_default("capture.debug", false)?
            .add_source(File::with_name("config/settings").required(false));

        // Explicit overrides replace the process environment,
        // so tests don't pick up variables from the host
        if let Some(vars) = env_vars {
            for (key, value) in vars {
                builder = builder.set_override(&key, value)?;
            }
        } else {
            // e.g. CARD_CAPTURE_CAPTURE__INACTIVITY_TIMEOUT_SECS=30
            builder = builder.add_source(
                Environment::with_prefix("CARD_CAPTURE")
                    .prefix_separator("_")
                    .separator("__"),
            );
        }

        builder.build()?.try_deserialize()
    }
}
