//! Integration tests for YAML test plans, including the plans shipped in `plans/`.

use login_loadtest::credentials::{LoginFormat, Role};
use login_loadtest::load_models::RampProfile;
use login_loadtest::yaml_config::{YamlConfig, YamlConfigError};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::NamedTempFile;

fn shipped_plan(name: &str) -> YamlConfig {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("plans")
        .join(name);
    YamlConfig::from_file(&path)
        .unwrap_or_else(|e| panic!("{} failed to load: {}", path.display(), e))
}

#[test]
fn faculty_smoke_plan() {
    let plan = shipped_plan("faculty-smoke.yaml");

    assert_eq!(
        plan.config.base_url.as_deref(),
        Some("http://4.253.33.191:8069")
    );
    assert_eq!(plan.accounts.to_role().unwrap(), Some(Role::Staff));
    assert_eq!(plan.accounts.to_login_format(), Some(LoginFormat::Username));
    assert_eq!(plan.workflow.csrf_required, Some(true));
    assert_eq!(plan.workflow.track_logout, Some(false));
    assert_eq!(
        plan.load.to_ramp_profile().unwrap(),
        Some(RampProfile::smoke())
    );
    assert!(plan.to_thresholds().unwrap().is_empty());
}

#[test]
fn student_logout_plan() {
    let plan = shipped_plan("student-logout.yaml");

    assert_eq!(
        plan.config.base_url.as_deref(),
        Some("http://4.253.40.132:8069")
    );
    assert_eq!(plan.accounts.to_role().unwrap(), Some(Role::Student));
    assert_eq!(
        plan.accounts.to_login_format(),
        Some(LoginFormat::Email {
            domain: "st.futminna.edu.ng".to_string()
        })
    );
    assert_eq!(plan.workflow.track_logout, Some(true));
    assert_eq!(
        plan.workflow
            .max_dwell
            .as_ref()
            .map(|d| d.to_std_duration().unwrap()),
        Some(Duration::from_secs(120))
    );
    assert_eq!(
        plan.load
            .graceful_stop
            .as_ref()
            .map(|d| d.to_std_duration().unwrap()),
        Some(Duration::from_secs(150))
    );
    assert_eq!(plan.summary_export.as_deref(), Some("student-logout-summary.json"));
}

#[test]
fn faculty_stress_plan() {
    let plan = shipped_plan("faculty-stress.yaml");

    assert_eq!(plan.workflow.csrf_required, Some(false));
    assert_eq!(
        plan.workflow
            .iteration_pause
            .as_ref()
            .map(|d| d.to_std_duration().unwrap()),
        Some(Duration::from_secs(1))
    );
    assert_eq!(
        plan.load.to_ramp_profile().unwrap(),
        Some(RampProfile::stress())
    );

    let thresholds: Vec<String> = plan
        .to_thresholds()
        .unwrap()
        .iter()
        .map(|t| t.to_string())
        .collect();
    assert_eq!(
        thresholds,
        vec!["http_req_duration: p(95)<2000", "http_req_failed: rate<0.05"]
    );
}

#[test]
fn plan_loads_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
version: "1.0"
metadata:
  name: "tmp"
config:
  baseUrl: "https://odoo.example.com"
load:
  stages:
    - duration: 1m30s
      target: 25
"#
    )
    .unwrap();

    let plan = YamlConfig::from_file(file.path()).unwrap();
    assert_eq!(plan.metadata.name.as_deref(), Some("tmp"));
    let profile = plan.load.to_ramp_profile().unwrap().unwrap();
    assert_eq!(profile.total_duration(), Duration::from_secs(90));
    assert_eq!(profile.peak_target(), 25);
}

#[test]
fn missing_file_is_a_read_error() {
    assert!(matches!(
        YamlConfig::from_file("/nonexistent/plan.yaml"),
        Err(YamlConfigError::FileRead(_))
    ));
}

#[test]
fn malformed_yaml_is_a_parse_error() {
    assert!(matches!(
        YamlConfig::from_str("version: [unterminated"),
        Err(YamlConfigError::YamlParse(_))
    ));
}

#[test]
fn unknown_profile_is_a_parse_error() {
    let yaml = r#"
version: "1.0"
load:
  profile: soak
"#;
    assert!(matches!(
        YamlConfig::from_str(yaml),
        Err(YamlConfigError::YamlParse(_))
    ));
}

#[test]
fn unknown_threshold_metric_is_rejected() {
    let yaml = r#"
version: "1.0"
thresholds:
  checks: ["rate>0.99"]
"#;
    let err = YamlConfig::from_str(yaml).unwrap_err();
    assert!(matches!(err, YamlConfigError::Validation(_)));
    assert!(err.to_string().contains("thresholds.checks"));
}
