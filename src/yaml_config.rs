//! YAML test plan support.
//!
//! A test plan captures one load profile (target, account pool, workflow
//! variant, ramp stages and thresholds) in a file that can be versioned next
//! to the results it produced. Environment variables still override any value
//! set here; see `Config::from_yaml_with_env_overrides`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration as StdDuration;
use thiserror::Error;

use crate::credentials::{LoginFormat, Role, DEFAULT_EMAIL_DOMAIN};
use crate::load_models::{ProfilePreset, RampProfile, Stage};
use crate::thresholds::Threshold;

/// Plan format versions this build understands.
pub const SUPPORTED_VERSIONS: &[&str] = &["1.0"];

/// Errors that can occur when loading or parsing a test plan.
#[derive(Error, Debug)]
pub enum YamlConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    Validation(String),

    #[error("Missing required field: {0}")]
    MissingField(String),
}

/// Duration format for YAML (e.g., "30s", "5m", "2h", or plain seconds).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum YamlDuration {
    Seconds(u64),
    String(String),
}

impl YamlDuration {
    pub fn to_std_duration(&self) -> Result<StdDuration, YamlConfigError> {
        match self {
            YamlDuration::Seconds(s) => Ok(StdDuration::from_secs(*s)),
            YamlDuration::String(s) => crate::utils::parse_duration_string(s)
                .map_err(|e| YamlConfigError::Validation(format!("Invalid duration '{}': {}", s, e))),
        }
    }
}

/// Metadata about the test plan.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct YamlMetadata {
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Target and HTTP client settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct YamlTargetConfig {
    #[serde(rename = "baseUrl")]
    pub base_url: Option<String>,

    #[serde(rename = "loginPath")]
    pub login_path: Option<String>,

    #[serde(rename = "logoutPath")]
    pub logout_path: Option<String>,

    pub timeout: Option<YamlDuration>,

    #[serde(rename = "skipTlsVerify")]
    pub skip_tls_verify: Option<bool>,

    #[serde(rename = "customHeaders")]
    pub custom_headers: Option<String>,
}

/// Login identifier rendering in YAML.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum YamlLoginFormat {
    Username,
    Email,
}

/// Account pool settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct YamlAccounts {
    pub role: Option<String>,

    #[serde(rename = "loginFormat")]
    pub login_format: Option<YamlLoginFormat>,

    #[serde(rename = "emailDomain")]
    pub email_domain: Option<String>,

    pub password: Option<String>,

    #[serde(rename = "poolSize")]
    pub pool_size: Option<usize>,
}

impl YamlAccounts {
    pub fn to_role(&self) -> Result<Option<Role>, YamlConfigError> {
        self.role
            .as_deref()
            .map(|r| r.parse::<Role>().map_err(YamlConfigError::Validation))
            .transpose()
    }

    /// Login format, when one is set. `emailDomain` only applies to email logins.
    pub fn to_login_format(&self) -> Option<LoginFormat> {
        self.login_format.map(|format| match format {
            YamlLoginFormat::Username => LoginFormat::Username,
            YamlLoginFormat::Email => LoginFormat::Email {
                domain: self
                    .email_domain
                    .clone()
                    .unwrap_or_else(|| DEFAULT_EMAIL_DOMAIN.to_string()),
            },
        })
    }
}

/// Workflow variant settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct YamlWorkflow {
    #[serde(rename = "csrfRequired")]
    pub csrf_required: Option<bool>,

    #[serde(rename = "trackLogout")]
    pub track_logout: Option<bool>,

    #[serde(rename = "tokenField")]
    pub token_field: Option<String>,

    #[serde(rename = "maxDwell")]
    pub max_dwell: Option<YamlDuration>,

    #[serde(rename = "iterationPause")]
    pub iteration_pause: Option<YamlDuration>,
}

/// One ramp stage in YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YamlStage {
    pub duration: YamlDuration,
    pub target: u64,
}

/// Ramp schedule: either a preset or explicit stages.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct YamlLoad {
    pub profile: Option<ProfilePreset>,

    #[serde(default)]
    pub stages: Vec<YamlStage>,

    #[serde(rename = "startVus")]
    pub start_vus: Option<u64>,

    #[serde(rename = "gracefulStop")]
    pub graceful_stop: Option<YamlDuration>,
}

impl YamlLoad {
    /// Ramp profile described by this section, if any.
    pub fn to_ramp_profile(&self) -> Result<Option<RampProfile>, YamlConfigError> {
        let mut profile = if !self.stages.is_empty() {
            let stages = self
                .stages
                .iter()
                .map(|s| Ok(Stage::new(s.duration.to_std_duration()?, s.target)))
                .collect::<Result<Vec<_>, YamlConfigError>>()?;
            let profile = RampProfile::new(stages);
            if profile.checked_total_duration().is_none() {
                return Err(YamlConfigError::Validation(
                    "load.stages: total duration is too large".to_string(),
                ));
            }
            profile
        } else if let Some(preset) = self.profile {
            preset.ramp_profile()
        } else {
            return Ok(None);
        };

        if let Some(start_vus) = self.start_vus {
            profile.start_vus = start_vus;
        }
        Ok(Some(profile))
    }
}

/// Root test plan structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct YamlConfig {
    pub version: String,

    #[serde(default)]
    pub metadata: YamlMetadata,

    #[serde(default)]
    pub config: YamlTargetConfig,

    #[serde(default)]
    pub accounts: YamlAccounts,

    #[serde(default)]
    pub workflow: YamlWorkflow,

    #[serde(default)]
    pub load: YamlLoad,

    /// Metric name to threshold expressions, e.g. `http_req_duration: ["p(95)<2000"]`.
    #[serde(default)]
    pub thresholds: BTreeMap<String, Vec<String>>,

    #[serde(rename = "summaryExport")]
    pub summary_export: Option<String>,
}

impl YamlConfig {
    /// Load a test plan from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, YamlConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Parse a test plan from a YAML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> Result<Self, YamlConfigError> {
        let config: YamlConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parsed thresholds, in metric order.
    pub fn to_thresholds(&self) -> Result<Vec<Threshold>, YamlConfigError> {
        let mut thresholds = Vec::new();
        for (metric, expressions) in &self.thresholds {
            for expression in expressions {
                let threshold = Threshold::parse(metric, expression).map_err(|e| {
                    YamlConfigError::Validation(format!("thresholds.{}: {}", metric, e))
                })?;
                thresholds.push(threshold);
            }
        }
        Ok(thresholds)
    }

    fn validate(&self) -> Result<(), YamlConfigError> {
        let mut errors = Vec::new();

        if !SUPPORTED_VERSIONS.contains(&self.version.as_str()) {
            errors.push(format!(
                "version: unsupported version '{}'. Supported: {}",
                self.version,
                SUPPORTED_VERSIONS.join(", ")
            ));
        }

        if let Some(url) = &self.config.base_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                errors.push(format!(
                    "config.baseUrl: URL must start with http:// or https://, got: {}",
                    url
                ));
            }
        }

        if let Err(e) = self.accounts.to_role() {
            errors.push(format!("accounts.role: {}", e));
        }
        if self.accounts.pool_size == Some(0) {
            errors.push("accounts.poolSize: must be greater than 0".to_string());
        }

        if self.load.profile.is_some() && !self.load.stages.is_empty() {
            errors.push("load: set either 'profile' or 'stages', not both".to_string());
        }
        if let Err(e) = self.load.to_ramp_profile() {
            errors.push(format!("load.stages: {}", e));
        }

        for (field, value) in [
            ("config.timeout", &self.config.timeout),
            ("workflow.maxDwell", &self.workflow.max_dwell),
            ("workflow.iterationPause", &self.workflow.iteration_pause),
            ("load.gracefulStop", &self.load.graceful_stop),
        ] {
            if let Some(Err(e)) = value.as_ref().map(YamlDuration::to_std_duration) {
                errors.push(format!("{}: {}", field, e));
            }
        }

        if let Err(e) = self.to_thresholds() {
            errors.push(e.to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(YamlConfigError::Validation(errors.join("; ")))
        }
    }
}
