use std::env;
use std::str::FromStr;
use thiserror::Error;
use tokio::time::Duration;

use crate::client::ClientConfig;
use crate::credentials::{CredentialPool, LoginFormat, Role, DEFAULT_EMAIL_DOMAIN, POOL_SIZE};
use crate::extractor::DEFAULT_TOKEN_FIELD;
use crate::load_models::{ProfilePreset, RampProfile};
use crate::thresholds::{parse_threshold_list, stress_thresholds, Threshold};
use crate::utils::{parse_bool_flag, parse_duration_string};
use crate::worker::{RunnerConfig, DEFAULT_GRACEFUL_STOP, DEFAULT_TICK};
use crate::workflow::{WorkflowConfig, DEFAULT_MAX_DWELL};
use crate::yaml_config::{YamlConfig, YamlConfigError};

/// Default port of the Prometheus scrape endpoint.
pub const DEFAULT_METRICS_PORT: u16 = 9090;

/// Errors raised while assembling the run configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{0} must be set (environment variable or config.baseUrl in the test plan)")]
    MissingBaseUrl(&'static str),

    #[error("Invalid value for {var}: {message}")]
    InvalidValue { var: &'static str, message: String },

    #[error("Failed to load test plan: {0}")]
    Yaml(#[from] YamlConfigError),
}

impl ConfigError {
    fn invalid(var: &'static str, message: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            var,
            message: message.into(),
        }
    }
}

/// Main configuration for a login load test.
#[derive(Debug, Clone)]
pub struct Config {
    pub base_url: String,
    pub login_path: String,
    pub logout_path: String,
    pub credentials: CredentialPool,
    pub csrf_required: bool,
    pub track_logout: bool,
    pub token_field: String,
    pub max_dwell: Duration,
    pub iteration_pause: Option<Duration>,
    pub profile: RampProfile,
    pub graceful_stop: Duration,
    pub thresholds: Vec<Threshold>,
    pub request_timeout: Duration,
    pub skip_tls_verify: bool,
    pub custom_headers: Option<String>,
    /// Port of the scrape endpoint; 0 disables it.
    pub metrics_port: u16,
    pub summary_export: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::build(None)
    }

    /// Loads configuration from a test plan, with environment variables
    /// taking precedence over the plan and the plan over defaults.
    pub fn from_yaml_with_env_overrides(yaml: &YamlConfig) -> Result<Self, ConfigError> {
        Self::build(Some(yaml))
    }

    /// Reads the plan named by `CONFIG_FILE` when set, otherwise the environment.
    pub fn load() -> Result<Self, ConfigError> {
        match env_string("CONFIG_FILE") {
            Some(path) => {
                let yaml = YamlConfig::from_file(&path)?;
                Self::from_yaml_with_env_overrides(&yaml)
            }
            None => Self::from_env(),
        }
    }

    fn build(yaml: Option<&YamlConfig>) -> Result<Self, ConfigError> {
        let target = yaml.map(|y| &y.config);
        let accounts = yaml.map(|y| &y.accounts);
        let workflow = yaml.map(|y| &y.workflow);
        let load = yaml.map(|y| &y.load);

        let base_url = env_string("BASE_URL")
            .or_else(|| target.and_then(|t| t.base_url.clone()))
            .ok_or(ConfigError::MissingBaseUrl("BASE_URL"))?;
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(ConfigError::invalid(
                "BASE_URL",
                format!("URL must start with http:// or https://, got: {}", base_url),
            ));
        }

        let login_path = env_string("LOGIN_PATH")
            .or_else(|| target.and_then(|t| t.login_path.clone()))
            .unwrap_or_else(|| "/web/login".to_string());
        let logout_path = env_string("LOGOUT_PATH")
            .or_else(|| target.and_then(|t| t.logout_path.clone()))
            .unwrap_or_else(|| "/web/logout".to_string());

        // Account pool
        let yaml_role = match accounts {
            Some(a) => a.to_role()?,
            None => None,
        };
        let role = match env_parsed::<Role>("ROLE")? {
            Some(role) => role,
            None => yaml_role.unwrap_or(Role::Staff),
        };

        let format = match env_string("LOGIN_FORMAT") {
            Some(f) => parse_login_format(&f)?,
            None => accounts
                .and_then(|a| a.to_login_format())
                .unwrap_or_else(|| role.default_login_format()),
        };
        // The domain never switches a username run to email logins.
        let email_domain =
            env_string("EMAIL_DOMAIN").or_else(|| accounts.and_then(|a| a.email_domain.clone()));
        let format = match (format, email_domain) {
            (LoginFormat::Email { .. }, Some(domain)) => LoginFormat::Email { domain },
            (format, _) => format,
        };

        let password = env_string("ACCOUNT_PASSWORD")
            .or_else(|| accounts.and_then(|a| a.password.clone()))
            .unwrap_or_else(|| role.default_password().to_string());

        let pool_size = match env_parsed::<usize>("POOL_SIZE")? {
            Some(size) => size,
            None => accounts.and_then(|a| a.pool_size).unwrap_or(POOL_SIZE),
        };
        if pool_size == 0 {
            return Err(ConfigError::invalid("POOL_SIZE", "must be greater than 0"));
        }

        let credentials = CredentialPool {
            role,
            format,
            password,
            pool_size,
        };

        // Workflow variant
        let csrf_required = env_bool("CSRF_REQUIRED")?
            .or_else(|| workflow.and_then(|w| w.csrf_required))
            .unwrap_or(true);
        let track_logout = env_bool("TRACK_LOGOUT")?
            .or_else(|| workflow.and_then(|w| w.track_logout))
            .unwrap_or(false);
        let token_field = env_string("TOKEN_FIELD")
            .or_else(|| workflow.and_then(|w| w.token_field.clone()))
            .unwrap_or_else(|| DEFAULT_TOKEN_FIELD.to_string());

        let max_dwell = match env_duration("MAX_DWELL")? {
            Some(d) => d,
            None => match workflow.and_then(|w| w.max_dwell.as_ref()) {
                Some(d) => d.to_std_duration()?,
                None => DEFAULT_MAX_DWELL,
            },
        };
        let iteration_pause = match env_duration("ITERATION_PAUSE")? {
            Some(d) => Some(d),
            None => workflow
                .and_then(|w| w.iteration_pause.as_ref())
                .map(|d| d.to_std_duration())
                .transpose()?,
        };
        let iteration_pause = iteration_pause.filter(|d| !d.is_zero());

        // Ramp schedule
        let env_preset = env_parsed::<ProfilePreset>("PROFILE")?;
        let yaml_preset = load.and_then(|l| l.profile);
        let mut profile = if let Some(stages) = env_string("STAGES") {
            RampProfile::parse(&stages).map_err(|e| ConfigError::invalid("STAGES", e))?
        } else if let Some(preset) = env_preset {
            preset.ramp_profile()
        } else {
            let from_yaml = match load {
                Some(l) => l.to_ramp_profile()?,
                None => None,
            };
            from_yaml.unwrap_or_else(RampProfile::smoke)
        };
        if let Some(start_vus) = env_parsed::<u64>("START_VUS")? {
            profile.start_vus = start_vus;
        } else if let Some(start_vus) = load.and_then(|l| l.start_vus) {
            profile.start_vus = start_vus;
        }

        let graceful_stop = match env_duration("GRACEFUL_STOP")? {
            Some(d) => d,
            None => match load.and_then(|l| l.graceful_stop.as_ref()) {
                Some(d) => d.to_std_duration()?,
                None => DEFAULT_GRACEFUL_STOP,
            },
        };

        // Thresholds: explicit lists win, the stress preset brings its own.
        let thresholds = if let Some(list) = env_string("THRESHOLDS") {
            parse_threshold_list(&list).map_err(|e| ConfigError::invalid("THRESHOLDS", e.to_string()))?
        } else {
            let from_yaml = match yaml {
                Some(y) => y.to_thresholds()?,
                None => Vec::new(),
            };
            let preset = if env_string("STAGES").is_some() {
                None
            } else {
                env_preset.or(yaml_preset)
            };
            if from_yaml.is_empty() && preset == Some(ProfilePreset::Stress) {
                stress_thresholds()
            } else {
                from_yaml
            }
        };

        // HTTP client
        let request_timeout = match env_duration("REQUEST_TIMEOUT")? {
            Some(d) => d,
            None => match target.and_then(|t| t.timeout.as_ref()) {
                Some(d) => d.to_std_duration()?,
                None => ClientConfig::default().request_timeout,
            },
        };
        if request_timeout.is_zero() {
            return Err(ConfigError::invalid("REQUEST_TIMEOUT", "must be greater than 0"));
        }
        let skip_tls_verify = env_bool("SKIP_TLS_VERIFY")?
            .or_else(|| target.and_then(|t| t.skip_tls_verify))
            .unwrap_or(false);
        let custom_headers =
            env_string("CUSTOM_HEADERS").or_else(|| target.and_then(|t| t.custom_headers.clone()));

        let metrics_port = env_parsed::<u16>("METRICS_PORT")?.unwrap_or(DEFAULT_METRICS_PORT);
        let summary_export = env_string("SUMMARY_EXPORT")
            .or_else(|| yaml.and_then(|y| y.summary_export.clone()));

        Ok(Config {
            base_url,
            login_path,
            logout_path,
            credentials,
            csrf_required,
            track_logout,
            token_field,
            max_dwell,
            iteration_pause,
            profile,
            graceful_stop,
            thresholds,
            request_timeout,
            skip_tls_verify,
            custom_headers,
            metrics_port,
            summary_export,
        })
    }

    /// Creates a ClientConfig from this Config.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            request_timeout: self.request_timeout,
            skip_tls_verify: self.skip_tls_verify,
            custom_headers: self.custom_headers.clone(),
        }
    }

    pub fn to_workflow_config(&self) -> WorkflowConfig {
        WorkflowConfig {
            base_url: self.base_url.clone(),
            login_path: self.login_path.clone(),
            logout_path: self.logout_path.clone(),
            csrf_required: self.csrf_required,
            track_logout: self.track_logout,
            token_field: self.token_field.clone(),
            credentials: self.credentials.clone(),
            max_dwell: self.max_dwell,
            iteration_pause: self.iteration_pause,
        }
    }

    pub fn to_runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            profile: self.profile.clone(),
            tick: DEFAULT_TICK,
            graceful_stop: self.graceful_stop,
        }
    }

    /// Prints the configuration summary.
    pub fn print_summary(&self, parsed_headers: &reqwest::header::HeaderMap) {
        let login_format = match &self.credentials.format {
            LoginFormat::Username => "username".to_string(),
            LoginFormat::Email { domain } => format!("email (@{})", domain),
        };
        let stages: Vec<String> = self.profile.stages.iter().map(|s| s.to_string()).collect();

        println!("Starting login load test:");
        println!("  Base URL: {}", self.base_url);
        println!("  Login path: {}", self.login_path);
        println!(
            "  Accounts: {} x {} ({})",
            self.credentials.pool_size, self.credentials.role, login_format
        );
        println!(
            "  CSRF token: {}",
            if self.csrf_required {
                format!("required ({})", self.token_field)
            } else {
                "not tracked".to_string()
            }
        );
        if self.track_logout {
            println!(
                "  Logout: {} after up to {:?}",
                self.logout_path, self.max_dwell
            );
        } else {
            println!("  Logout: not tracked");
        }
        if let Some(pause) = self.iteration_pause {
            println!("  Iteration pause: {:?}", pause);
        }
        println!(
            "  Stages: {} (start {} VUs, total {:?}, peak {} VUs)",
            stages.join(", "),
            self.profile.start_vus,
            self.profile.total_duration(),
            self.profile.peak_target()
        );
        println!("  Graceful stop: {:?}", self.graceful_stop);
        println!("  Request timeout: {:?}", self.request_timeout);
        println!("  Skip TLS Verify: {}", self.skip_tls_verify);

        if self.thresholds.is_empty() {
            println!("  Thresholds: none");
        } else {
            println!("  Thresholds:");
            for threshold in &self.thresholds {
                println!("    - {}", threshold);
            }
        }

        if !parsed_headers.is_empty() {
            println!("  Custom Headers:");
            for (name, value) in parsed_headers {
                println!("    {}: {}", name, value.to_str().unwrap_or("<non-utf8>"));
            }
        }

        if self.metrics_port == 0 {
            println!("  Metrics endpoint: disabled");
        } else {
            println!("  Metrics endpoint: :{}/metrics", self.metrics_port);
        }
        if let Some(path) = &self.summary_export {
            println!("  Summary export: {}", path);
        }
    }
}

fn parse_login_format(s: &str) -> Result<LoginFormat, ConfigError> {
    match s.trim().to_lowercase().as_str() {
        "username" => Ok(LoginFormat::Username),
        "email" => Ok(LoginFormat::Email {
            domain: DEFAULT_EMAIL_DOMAIN.to_string(),
        }),
        other => Err(ConfigError::invalid(
            "LOGIN_FORMAT",
            format!("'{}'. Expected 'username' or 'email'.", other),
        )),
    }
}

/// Non-empty value of an environment variable.
fn env_string(var: &str) -> Option<String> {
    env::var(var).ok().filter(|v| !v.trim().is_empty())
}

fn env_parsed<T>(var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: ToString,
{
    env_string(var)
        .map(|v| {
            v.trim()
                .parse::<T>()
                .map_err(|e| ConfigError::invalid(var, format!("'{}': {}", v, e.to_string())))
        })
        .transpose()
}

fn env_duration(var: &'static str) -> Result<Option<Duration>, ConfigError> {
    env_string(var)
        .map(|v| parse_duration_string(&v).map_err(|e| ConfigError::invalid(var, e)))
        .transpose()
}

fn env_bool(var: &'static str) -> Result<Option<bool>, ConfigError> {
    env_string(var)
        .map(|v| {
            parse_bool_flag(&v).ok_or_else(|| {
                ConfigError::invalid(var, format!("'{}'. Expected true or false.", v))
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_format_parsing() {
        assert_eq!(parse_login_format("username").unwrap(), LoginFormat::Username);
        assert_eq!(
            parse_login_format("Email").unwrap(),
            LoginFormat::Email {
                domain: DEFAULT_EMAIL_DOMAIN.to_string()
            }
        );
        assert!(parse_login_format("phone").is_err());
    }
}
