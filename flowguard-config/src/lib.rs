//! # Flowguard Configuration System
//!
//! Hierarchical configuration for the capture-to-verdict pipeline.
//!
//! ## Features
//! - **Unified Configuration**: one document covers capture, the inference
//!   worker, notification, the CSV sink and telemetry
//! - **Validation**: runtime validation of every section after merging
//! - **Environment Awareness**: per-environment overrides and `FLOWGUARD_*`
//!   variables

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

mod capture;
mod error;
mod notify;
mod sink;
mod telemetry;
mod validation;
mod worker;

pub use capture::CaptureConfig;
pub use error::ConfigError;
pub use notify::NotifyConfig;
pub use sink::SinkConfig;
pub use telemetry::TelemetryConfig;
pub use worker::{ProcessConfig, ProtocolConfig, ShutdownConfig, WorkerConfig};

const BASE_FILE: &str = "config/flowguard.yaml";
const ENV_PREFIX: &str = "FLOWGUARD_";

/// Top-level configuration container for all Flowguard components.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, Default)]
#[serde(default)]
pub struct FlowguardConfig {
    /// Live capture parameters and flow timeouts.
    #[validate(nested)]
    pub capture: CaptureConfig,

    /// External inference worker: launch, line protocol, shutdown.
    #[validate(nested)]
    pub worker: WorkerConfig,

    /// Threat notification endpoint.
    #[validate(nested)]
    pub notify: NotifyConfig,

    /// Daily flow CSV files.
    #[validate(nested)]
    pub sink: SinkConfig,

    #[validate(nested)]
    pub telemetry: TelemetryConfig,
}

impl FlowguardConfig {
    /// Load configuration from default files and environment.
    ///
    /// Hierarchy:
    /// 1. Default Values
    /// 2. `config/flowguard.yaml` - base settings, skipped if missing
    /// 3. `config/<FLOWGUARD_ENV>.yaml` - environment-specific overrides
    /// 4. `FLOWGUARD_*` environment variables, nested keys split on `__`
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(FlowguardConfig::default()));

        if Path::new(BASE_FILE).exists() {
            figment = figment.merge(Yaml::file(BASE_FILE));
        }

        let env = std::env::var("FLOWGUARD_ENV").unwrap_or_else(|_| "production".into());
        let env_file = format!("config/{env}.yaml");
        if Path::new(&env_file).exists() {
            figment = figment.merge(Yaml::file(env_file));
        }

        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Load configuration from a specific file, still honouring the environment.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(PathBuf::from(path)));
        }

        Self::extract(
            Figment::from(Serialized::defaults(FlowguardConfig::default()))
                .merge(Yaml::file(path))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        figment
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                Ok(config)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn full_config_validation() {
        let config = FlowguardConfig::default();
        config.validate().expect("Default config should validate");
    }

    #[test]
    fn defaults_match_reference_deployment() {
        let config = FlowguardConfig::default();
        assert!(config.capture.promiscuous);
        assert_eq!(config.capture.snaplen, 65536);
        assert_eq!(config.capture.flow_timeout_secs, 120);
        assert_eq!(config.capture.activity_timeout_secs, 5);
        assert_eq!(config.worker.protocol.terminate_token, "__TERMINATE__");
        assert_eq!(config.worker.protocol.info_marker, "[INFO]");
        assert_eq!(config.worker.protocol.field_delimiter, ";");
        assert_eq!(config.notify.timeout_ms, 5000);
        assert!(config.notify.url.is_none());
    }

    #[test]
    fn base_file_and_environment_override() {
        Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file(
                "config/flowguard.yaml",
                r#"
capture:
  interface: wlan0
worker:
  process:
    script: models/detector.py
"#,
            )?;
            jail.set_env("FLOWGUARD_CAPTURE__SNAPLEN", "1500");
            jail.set_env("FLOWGUARD_NOTIFY__URL", "http://127.0.0.1:8080/alerts");

            let config = FlowguardConfig::load().expect("config loads");
            assert_eq!(config.capture.interface, "wlan0");
            assert_eq!(config.capture.snaplen, 1500);
            assert_eq!(
                config.worker.process.script,
                PathBuf::from("models/detector.py")
            );
            assert_eq!(
                config.notify.url.as_deref(),
                Some("http://127.0.0.1:8080/alerts")
            );
            Ok(())
        });
    }

    #[test]
    fn environment_file_overrides_base() {
        Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file("config/flowguard.yaml", "telemetry:\n  log_level: info\n")?;
            jail.create_file("config/staging.yaml", "telemetry:\n  log_level: debug\n")?;
            jail.set_env("FLOWGUARD_ENV", "staging");

            let config = FlowguardConfig::load().expect("config loads");
            assert_eq!(config.telemetry.log_level, "debug");
            Ok(())
        });
    }

    #[test]
    fn invalid_values_fail_validation() {
        Jail::expect_with(|jail| {
            jail.create_file("bad.yaml", "notify:\n  url: not a url\n")?;
            let err = FlowguardConfig::load_from_path("bad.yaml").unwrap_err();
            assert!(matches!(err, ConfigError::Validation(_)));
            Ok(())
        });
    }

    #[test]
    fn missing_file_is_reported() {
        let err = FlowguardConfig::load_from_path("/nonexistent/flowguard.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }
}
