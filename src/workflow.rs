//! The login (and optional logout) iteration executed by every virtual user.
//!
//! One iteration walks
//! `Start -> PageFetched -> TokenExtracted -> Submitted -> Succeeded [-> LoggedOut]`
//! and falls to `Failed` as soon as a precondition does not hold. Failures are
//! observational only: they bump counters, get logged at debug level and end
//! the iteration. Nothing is retried and nothing is returned as an error.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::client::SessionClientFactory;
use crate::credentials::CredentialPool;
use crate::errors::{is_accepted_status, FailureKind, TransportError};
use crate::extractor::{ExtractionError, TokenExtractor, DEFAULT_TOKEN_FIELD};
use crate::metrics::{Counter, MetricsSink, Trend};
use crate::session::Session;

/// Credential submissions at or above this many milliseconds land in `over_1min`.
pub const SLOW_LOGIN_MS: u64 = 60_000;

/// Upper bound (exclusive) of the default session dwell time.
pub const DEFAULT_MAX_DWELL: Duration = Duration::from_secs(120);

/// Behaviour of a login iteration.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    pub base_url: String,
    pub login_path: String,
    pub logout_path: String,
    /// Fetch and echo the anti-forgery token; also disables redirect following.
    pub csrf_required: bool,
    /// Log out after a successful login, following a random dwell.
    pub track_logout: bool,
    pub token_field: String,
    pub credentials: CredentialPool,
    /// Dwell times are drawn uniformly from `[0, max_dwell)`.
    pub max_dwell: Duration,
    /// Pause at the end of every iteration.
    pub iteration_pause: Option<Duration>,
}

impl WorkflowConfig {
    pub fn new(base_url: impl Into<String>, credentials: CredentialPool) -> Self {
        Self {
            base_url: base_url.into(),
            login_path: "/web/login".to_string(),
            logout_path: "/web/logout".to_string(),
            csrf_required: true,
            track_logout: false,
            token_field: DEFAULT_TOKEN_FIELD.to_string(),
            credentials,
            max_dwell: DEFAULT_MAX_DWELL,
            iteration_pause: None,
        }
    }

    pub fn login_url(&self) -> String {
        join_url(&self.base_url, &self.login_path)
    }

    pub fn logout_url(&self) -> String {
        join_url(&self.base_url, &self.logout_path)
    }
}

fn join_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    if path.starts_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

/// Source of the simulated time a user stays logged in.
pub trait DwellSource: Send + Sync {
    fn next_dwell(&self) -> Duration;
}

/// Uniformly random dwell in `[0, max)`.
#[derive(Debug, Clone)]
pub struct RandomDwell {
    pub max: Duration,
}

impl DwellSource for RandomDwell {
    fn next_dwell(&self) -> Duration {
        let max_ms = self.max.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
    }
}

/// Always the same dwell. Mostly useful in tests.
#[derive(Debug, Clone)]
pub struct FixedDwell(pub Duration);

impl DwellSource for FixedDwell {
    fn next_dwell(&self) -> Duration {
        self.0
    }
}

/// What happened to the logout step of a successful login.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutStatus {
    NotTracked,
    LoggedOut,
    Rejected,
}

/// Terminal state of one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    Failed(FailureKind),
    LoggedIn { logout: LogoutStatus },
}

impl IterationOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, IterationOutcome::LoggedIn { .. })
    }
}

/// Maps a credential POST duration onto its latency bucket counter.
pub fn latency_bucket(duration_ms: u64) -> Counter {
    if duration_ms < SLOW_LOGIN_MS {
        Counter::Under1Min
    } else {
        Counter::Over1Min
    }
}

struct Exchange {
    status: Option<u16>,
    body: String,
    elapsed: Duration,
}

/// Login workflow shared by all virtual users.
pub struct LoginWorkflow {
    config: WorkflowConfig,
    clients: SessionClientFactory,
    extractor: TokenExtractor,
    dwell: Arc<dyn DwellSource>,
    login_url: String,
    logout_url: String,
}

impl LoginWorkflow {
    pub fn new(
        config: WorkflowConfig,
        clients: SessionClientFactory,
    ) -> Result<Self, ExtractionError> {
        let dwell = Arc::new(RandomDwell {
            max: config.max_dwell,
        });
        Self::with_dwell(config, clients, dwell)
    }

    /// Same as `new`, with an explicit dwell source.
    pub fn with_dwell(
        config: WorkflowConfig,
        clients: SessionClientFactory,
        dwell: Arc<dyn DwellSource>,
    ) -> Result<Self, ExtractionError> {
        let extractor = TokenExtractor::new(&config.token_field)?;
        let login_url = config.login_url();
        let logout_url = config.logout_url();

        Ok(Self {
            config,
            clients,
            extractor,
            dwell,
            login_url,
            logout_url,
        })
    }

    /// Runs one login cycle for the given 0-based virtual user index.
    pub async fn run_iteration(&self, vu_index: u64, sink: &dyn MetricsSink) -> IterationOutcome {
        let outcome = self.execute(vu_index, sink).await;

        if let Some(pause) = self.config.iteration_pause {
            sleep(pause).await;
        }
        sink.increment(Counter::Iterations);

        outcome
    }

    async fn execute(&self, vu_index: u64, sink: &dyn MetricsSink) -> IterationOutcome {
        let credential = self.config.credentials.credentials_for(vu_index);

        // Redirects are only surfaced when the token is tracked.
        let mut session = match Session::open(&self.clients, !self.config.csrf_required) {
            Ok(session) => session,
            Err(e) => {
                warn!(vu = vu_index, error = %e, "Failed to open session");
                return fail_login(sink, vu_index, FailureKind::PageUnavailable);
            }
        };

        // Login page
        let page = self
            .exchange(sink, session.client().get(&self.login_url), true)
            .await;
        if page.status != Some(200) || page.body.is_empty() {
            debug!(
                vu = vu_index,
                status = ?page.status,
                body_len = page.body.len(),
                "Login page unavailable"
            );
            return fail_login(sink, vu_index, FailureKind::PageUnavailable);
        }
        sink.increment(Counter::RequestSuccess);

        // Anti-forgery token
        if self.config.csrf_required {
            match self.extractor.extract(&page.body) {
                Some(token) => session.set_token(token),
                None => return fail_login(sink, vu_index, FailureKind::TokenMissing),
            }
        }

        // Credentials
        let mut form: Vec<(&str, &str)> = vec![
            ("login", credential.login.as_str()),
            ("password", credential.password.as_str()),
            ("redirect", ""),
        ];
        if let Some(token) = session.token() {
            form.push((self.extractor.field(), token));
        }

        let submit = self
            .exchange(
                sink,
                session
                    .client()
                    .post(&self.login_url)
                    .form(&form),
                false,
            )
            .await;
        let duration_ms = submit.elapsed.as_millis() as u64;
        sink.observe(Trend::Latency, duration_ms);

        let accepted = submit.status.map(is_accepted_status).unwrap_or(false);
        let outcome = if accepted {
            sink.increment(Counter::LoginSuccess);
            sink.increment(Counter::RequestSuccess);
            debug!(
                vu = vu_index,
                login = %credential.login,
                status = ?submit.status,
                duration_ms,
                "Login accepted"
            );
            None
        } else {
            Some(fail_login(sink, vu_index, FailureKind::AuthRejected))
        };

        sink.increment(latency_bucket(duration_ms));

        if let Some(failed) = outcome {
            return failed;
        }

        if !self.config.track_logout {
            return IterationOutcome::LoggedIn {
                logout: LogoutStatus::NotTracked,
            };
        }

        // Session dwell, then logout on the same jar
        let dwell = self.dwell.next_dwell();
        debug!(vu = vu_index, dwell_ms = dwell.as_millis() as u64, "Dwelling before logout");
        sleep(dwell).await;

        let logout = self
            .exchange(sink, session.client().get(&self.logout_url), false)
            .await;
        if logout.status.map(is_accepted_status).unwrap_or(false) {
            sink.increment(Counter::LogoutSuccess);
            IterationOutcome::LoggedIn {
                logout: LogoutStatus::LoggedOut,
            }
        } else {
            sink.increment(Counter::LogoutFail);
            debug!(
                vu = vu_index,
                status = ?logout.status,
                reason = FailureKind::LogoutRejected.label(),
                "Logout failed"
            );
            IterationOutcome::LoggedIn {
                logout: LogoutStatus::Rejected,
            }
        }
    }

    /// Sends a request and records the engine-level request metrics.
    ///
    /// The body is always consumed; it is only kept when `keep_body` is set.
    async fn exchange(
        &self,
        sink: &dyn MetricsSink,
        request: reqwest::RequestBuilder,
        keep_body: bool,
    ) -> Exchange {
        let start = Instant::now();
        sink.increment(Counter::HttpReqs);

        let (status, body) = match request.send().await {
            Ok(mut response) => {
                let status = response.status().as_u16();
                let mut body = Vec::new();
                loop {
                    match response.chunk().await {
                        Ok(Some(chunk)) => {
                            if keep_body {
                                body.extend_from_slice(&chunk);
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            debug!(
                                status,
                                error = %e,
                                error_category = TransportError::from_reqwest_error(&e).label(),
                                "Failed to read response body"
                            );
                            break;
                        }
                    }
                }
                (Some(status), String::from_utf8_lossy(&body).into_owned())
            }
            Err(e) => {
                debug!(
                    error = %e,
                    error_category = TransportError::from_reqwest_error(&e).label(),
                    "Request failed"
                );
                (None, String::new())
            }
        };

        let elapsed = start.elapsed();
        sink.observe(Trend::HttpReqDuration, elapsed.as_millis() as u64);
        if !status.map(|s| (200..400).contains(&s)).unwrap_or(false) {
            sink.increment(Counter::HttpReqFailed);
        }

        Exchange {
            status,
            body,
            elapsed,
        }
    }
}

fn fail_login(sink: &dyn MetricsSink, vu_index: u64, kind: FailureKind) -> IterationOutcome {
    sink.increment(Counter::RequestFail);
    sink.increment(Counter::LoginFail);
    debug!(vu = vu_index, reason = kind.label(), "Login iteration failed");
    IterationOutcome::Failed(kind)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::Role;

    #[test]
    fn latency_bucket_boundary() {
        assert_eq!(latency_bucket(0), Counter::Under1Min);
        assert_eq!(latency_bucket(59_999), Counter::Under1Min);
        assert_eq!(latency_bucket(60_000), Counter::Over1Min);
        assert_eq!(latency_bucket(120_000), Counter::Over1Min);
    }

    #[test]
    fn random_dwell_stays_below_max() {
        let dwell = RandomDwell {
            max: Duration::from_millis(50),
        };
        for _ in 0..1000 {
            assert!(dwell.next_dwell() < Duration::from_millis(50));
        }
    }

    #[test]
    fn zero_max_dwell_is_zero() {
        let dwell = RandomDwell { max: Duration::ZERO };
        assert_eq!(dwell.next_dwell(), Duration::ZERO);
    }

    #[test]
    fn urls_are_joined_once() {
        let mut config =
            WorkflowConfig::new("http://odoo.local:8069/", CredentialPool::for_role(Role::Staff));
        assert_eq!(config.login_url(), "http://odoo.local:8069/web/login");
        assert_eq!(config.logout_url(), "http://odoo.local:8069/web/logout");

        config.login_path = "web/login".to_string();
        assert_eq!(config.login_url(), "http://odoo.local:8069/web/login");
    }

    #[test]
    fn defaults_track_the_token() {
        let config = WorkflowConfig::new("http://x", CredentialPool::for_role(Role::Student));
        assert!(config.csrf_required);
        assert!(!config.track_logout);
        assert_eq!(config.token_field, "csrf_token");
        assert_eq!(config.max_dwell, Duration::from_secs(120));
    }

    #[test]
    fn outcome_success_flag() {
        assert!(IterationOutcome::LoggedIn {
            logout: LogoutStatus::Rejected
        }
        .is_success());
        assert!(!IterationOutcome::Failed(FailureKind::TokenMissing).is_success());
    }
}
