//! Logging configuration
//!
//! Each service builds its configuration from the environment under its
//! own name (`clowdr-actions`, `clowdr-playout`):
//!
//! | Variable | Effect |
//! |---|---|
//! | `CLOWDR_LOG_FORMAT` | `json` (default) or `pretty` console output |
//! | `CLOWDR_LOG_DIR` | also write JSON lines to `<dir>/<service>.<date>` |
//! | `CLOWDR_LOG_ROTATION` | `daily` (default), `hourly` or `never` |
//! | `OTEL_EXPORTER_OTLP_ENDPOINT` | export spans over OTLP |
//! | `OTEL_TRACES_SAMPLER_ARG` | trace sample ratio, `0.0..=1.0` |
//!
//! `RUST_LOG` still overrides the level at init time.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_SERVICE: &str = "clowdr";

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Invalid value for {name}: {value}")]
pub struct InvalidSetting {
    pub name: &'static str,
    pub value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line
    #[default]
    Json,
    /// Human-readable
    Pretty,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" | "jsonl" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RotationStrategy {
    #[default]
    Daily,
    Hourly,
    /// Single file, truncated at startup
    Never,
}

impl FromStr for RotationStrategy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "hourly" => Ok(Self::Hourly),
            "never" => Ok(Self::Never),
            _ => Err(()),
        }
    }
}

/// Rolling JSON-lines files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileConfig {
    pub directory: PathBuf,
    /// File name prefix, normally the service name
    pub prefix: String,
    pub rotation: RotationStrategy,
}

/// OTLP span export
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OtelConfig {
    /// Collector endpoint, e.g. `http://localhost:4317`
    pub endpoint: String,
    pub service_name: String,
    /// 1.0 keeps every trace
    pub sample_ratio: f64,
    pub resource_attributes: BTreeMap<String, String>,
}

impl OtelConfig {
    pub fn new(service_name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            service_name: service_name.into(),
            sample_ratio: 1.0,
            resource_attributes: BTreeMap::new(),
        }
    }

    pub fn with_sample_ratio(mut self, ratio: f64) -> Self {
        self.sample_ratio = ratio.clamp(0.0, 1.0);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.resource_attributes.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    pub service: String,
    /// Level used when `RUST_LOG` is unset
    pub level: String,
    pub console: bool,
    pub format: LogFormat,
    pub ansi: bool,
    pub file: Option<FileConfig>,
    pub otel: Option<OtelConfig>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::for_service(DEFAULT_SERVICE)
    }
}

impl LogConfig {
    /// JSON lines on stdout at `info`, nothing else
    pub fn for_service(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            level: "info".to_string(),
            console: true,
            format: LogFormat::Json,
            ansi: false,
            file: None,
            otel: None,
        }
    }

    /// Verbose, colored, human-readable console output
    pub fn development() -> Self {
        Self {
            level: "debug".to_string(),
            format: LogFormat::Pretty,
            ansi: true,
            ..Self::default()
        }
    }

    /// JSON console plus daily files under `log_dir`
    pub fn production(log_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.file = Some(FileConfig {
            directory: log_dir.into(),
            prefix: config.service.clone(),
            rotation: RotationStrategy::Daily,
        });
        config
    }

    /// Warnings only, no colors
    pub fn testing() -> Self {
        Self {
            level: "warn".to_string(),
            ..Self::default()
        }
    }

    pub fn from_env(service: &str) -> Result<Self, InvalidSetting> {
        Self::from_lookup(service, |name| std::env::var(name).ok())
    }

    pub fn from_lookup(
        service: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, InvalidSetting> {
        let mut config = Self::for_service(service);
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(raw) = get("CLOWDR_LOG_FORMAT") {
            config.format = raw.parse().map_err(|_| InvalidSetting {
                name: "CLOWDR_LOG_FORMAT",
                value: raw.clone(),
            })?;
            config.ansi = config.format == LogFormat::Pretty;
        }

        if let Some(dir) = get("CLOWDR_LOG_DIR") {
            let rotation = match get("CLOWDR_LOG_ROTATION") {
                Some(raw) => raw.parse().map_err(|_| InvalidSetting {
                    name: "CLOWDR_LOG_ROTATION",
                    value: raw.clone(),
                })?,
                None => RotationStrategy::Daily,
            };
            config.file = Some(FileConfig {
                directory: PathBuf::from(dir),
                prefix: service.to_string(),
                rotation,
            });
        }

        if let Some(endpoint) = get("OTEL_EXPORTER_OTLP_ENDPOINT") {
            let mut otel = OtelConfig::new(service, endpoint);
            if let Some(raw) = get("OTEL_TRACES_SAMPLER_ARG") {
                let ratio: f64 = raw.trim().parse().map_err(|_| InvalidSetting {
                    name: "OTEL_TRACES_SAMPLER_ARG",
                    value: raw.clone(),
                })?;
                otel = otel.with_sample_ratio(ratio);
            }
            config.otel = Some(otel);
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_presets() {
        let config = LogConfig::default();
        assert_eq!(config.level, "info");
        assert_eq!(config.format, LogFormat::Json);
        assert!(config.file.is_none() && config.otel.is_none());

        let config = LogConfig::development();
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(config.ansi);

        let config = LogConfig::production("/var/log/clowdr");
        assert_eq!(config.file.map(|f| f.rotation), Some(RotationStrategy::Daily));
        assert_eq!(LogConfig::testing().level, "warn");
    }

    #[test]
    fn test_from_env_defaults() {
        let config = LogConfig::from_lookup("clowdr-actions", lookup(&[])).unwrap();
        assert_eq!(config, LogConfig::for_service("clowdr-actions"));
    }

    #[test]
    fn test_from_env_enables_outputs() {
        let config = LogConfig::from_lookup(
            "clowdr-playout",
            lookup(&[
                ("CLOWDR_LOG_FORMAT", "Pretty"),
                ("CLOWDR_LOG_DIR", "/tmp/logs"),
                ("CLOWDR_LOG_ROTATION", "hourly"),
                ("OTEL_EXPORTER_OTLP_ENDPOINT", "http://collector:4317"),
                ("OTEL_TRACES_SAMPLER_ARG", "2.5"),
            ]),
        )
        .unwrap();

        assert_eq!(config.format, LogFormat::Pretty);
        let file = config.file.unwrap();
        assert_eq!(file.prefix, "clowdr-playout");
        assert_eq!(file.rotation, RotationStrategy::Hourly);
        let otel = config.otel.unwrap();
        assert_eq!(otel.service_name, "clowdr-playout");
        assert_eq!(otel.sample_ratio, 1.0);
    }

    #[test]
    fn test_invalid_settings_are_named() {
        let err = LogConfig::from_lookup("svc", lookup(&[("CLOWDR_LOG_FORMAT", "xml")])).unwrap_err();
        assert_eq!(err.name, "CLOWDR_LOG_FORMAT");

        let err = LogConfig::from_lookup(
            "svc",
            lookup(&[("CLOWDR_LOG_DIR", "/tmp"), ("CLOWDR_LOG_ROTATION", "weekly")]),
        )
        .unwrap_err();
        assert_eq!(err.name, "CLOWDR_LOG_ROTATION");
    }
}
