use crate::polling::{
    DEFAULT_FRAME_INTERVAL, DEFAULT_SEAT_INTERVAL, DEFAULT_VIEWER_INTERVAL, PollingSettings,
};
use crate::recommend::VIEWER_THRESHOLD;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use time::UtcOffset;

pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";
pub const DEFAULT_SERVER_PORT: u16 = 8080;
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8081";
pub const DEFAULT_DETECTION_BASE_URL: &str = "http://localhost:5001";
/// Opening hours are published in Korea Standard Time.
pub const DEFAULT_UTC_OFFSET_MINUTES: i32 = 540;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub app: AppSection,
    pub logging: LoggingSection,
    #[serde(default)]
    pub server: Option<ServerSection>,
    #[serde(default)]
    pub upstream: Option<UpstreamSection>,
    #[serde(default)]
    pub polling: Option<PollingSection>,
    #[serde(default)]
    pub recommendation: Option<RecommendationSection>,
    #[serde(default)]
    pub forecast: Option<ForecastSection>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppSection {
    pub name: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingSection {
    pub level: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSection {
    /// Port to listen on (default: 8080)
    pub port: Option<u16>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct UpstreamSection {
    /// Base URL of the café, seat and viewer API
    pub api_base_url: Option<String>,
    /// Base URL of the frame detection service
    pub detection_base_url: Option<String>,
    /// Bearer credential sent to the café API
    pub credential: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct PollingSection {
    pub seat_interval_ms: Option<u64>,
    pub viewer_interval_ms: Option<u64>,
    pub frame_interval_ms: Option<u64>,
    #[serde(default)]
    pub live_video_cafe_ids: Vec<String>,
    pub video_length_secs: Option<u64>,
    pub utc_offset_minutes: Option<i32>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecommendationSection {
    pub viewer_threshold: Option<u32>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ForecastSection {
    pub history_path: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid utc offset of {0} minutes")]
    UtcOffset(i32),
}

pub fn load_default() -> Result<Config, ConfigError> {
    load_from_path(DEFAULT_CONFIG_PATH)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    let config: Config = toml::from_str(&contents)?;
    Ok(config)
}

impl Config {
    /// Returns the server port (default: 8080)
    pub fn server_port(&self) -> u16 {
        self.server
            .as_ref()
            .and_then(|s| s.port)
            .unwrap_or(DEFAULT_SERVER_PORT)
    }

    pub fn api_base_url(&self) -> &str {
        self.upstream
            .as_ref()
            .and_then(|u| u.api_base_url.as_deref())
            .unwrap_or(DEFAULT_API_BASE_URL)
    }

    pub fn detection_base_url(&self) -> &str {
        self.upstream
            .as_ref()
            .and_then(|u| u.detection_base_url.as_deref())
            .unwrap_or(DEFAULT_DETECTION_BASE_URL)
    }

    /// Returns the API credential, treating an empty string as missing.
    pub fn credential(&self) -> Option<&str> {
        self.upstream
            .as_ref()
            .and_then(|u| u.credential.as_deref())
            .filter(|c| !c.is_empty())
    }

    pub fn history_path(&self) -> Option<&Path> {
        let path = self.forecast.as_ref()?.history_path.as_deref()?;
        if path.as_os_str().is_empty() {
            None
        } else {
            Some(path)
        }
    }

    pub fn viewer_threshold(&self) -> u32 {
        self.recommendation
            .as_ref()
            .and_then(|r| r.viewer_threshold)
            .unwrap_or(VIEWER_THRESHOLD)
    }

    pub fn utc_offset(&self) -> Result<UtcOffset, ConfigError> {
        let minutes = self
            .polling
            .as_ref()
            .and_then(|p| p.utc_offset_minutes)
            .unwrap_or(DEFAULT_UTC_OFFSET_MINUTES);
        UtcOffset::from_whole_seconds(minutes.saturating_mul(60))
            .map_err(|_| ConfigError::UtcOffset(minutes))
    }

    /// Builds the polling settings, falling back to the default periods.
    pub fn polling_settings(&self) -> Result<PollingSettings, ConfigError> {
        let section = self.polling.clone().unwrap_or_default();
        let millis_or = |value: Option<u64>, default: Duration| {
            value
                .filter(|ms| *ms > 0)
                .map(Duration::from_millis)
                .unwrap_or(default)
        };
        Ok(PollingSettings {
            seat_interval: millis_or(section.seat_interval_ms, DEFAULT_SEAT_INTERVAL),
            viewer_interval: millis_or(section.viewer_interval_ms, DEFAULT_VIEWER_INTERVAL),
            frame_interval: millis_or(section.frame_interval_ms, DEFAULT_FRAME_INTERVAL),
            live_video_cafe_ids: section.live_video_cafe_ids.into_iter().collect(),
            video_length: section
                .video_length_secs
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            viewer_threshold: self.viewer_threshold(),
            utc_offset: self.utc_offset()?,
        })
    }
}
