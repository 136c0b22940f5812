use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use login_loadtest::client::SessionClientFactory;
use login_loadtest::config::Config;
use login_loadtest::metrics::{
    gather_metrics_string, register_metrics, start_metrics_server, MetricsSink, PrometheusSink,
};
use login_loadtest::report::RunReport;
use login_loadtest::thresholds::evaluate_all;
use login_loadtest::worker::run_profile;
use login_loadtest::workflow::LoginWorkflow;

/// Exit code used when at least one threshold was crossed.
const THRESHOLDS_FAILED_EXIT_CODE: i32 = 99;

/// Prints helpful configuration documentation.
fn print_config_help() {
    eprintln!("Required (environment variable or test plan):");
    eprintln!("  BASE_URL                - Application root, e.g. http://4.253.33.191:8069");
    eprintln!();
    eprintln!("Test plan:");
    eprintln!("  CONFIG_FILE             - YAML test plan; environment variables override it");
    eprintln!();
    eprintln!("Accounts:");
    eprintln!("  ROLE                    - staff or student (default: staff)");
    eprintln!("  LOGIN_FORMAT            - username or email (default: username for staff, email for student)");
    eprintln!("  EMAIL_DOMAIN            - Domain of email logins, ignored for username logins");
    eprintln!("                            (default: st.futminna.edu.ng)");
    eprintln!("  ACCOUNT_PASSWORD        - Shared password (default: staff123 / student123)");
    eprintln!("  POOL_SIZE               - Number of provisioned accounts (default: 500, must be > 0)");
    eprintln!();
    eprintln!("Workflow:");
    eprintln!("  CSRF_REQUIRED           - Fetch and echo the form token (default: true)");
    eprintln!("  TRACK_LOGOUT            - Log out after a random dwell (default: false)");
    eprintln!("  TOKEN_FIELD             - Hidden input carrying the token (default: csrf_token)");
    eprintln!("  LOGIN_PATH              - Login form path (default: /web/login)");
    eprintln!("  LOGOUT_PATH             - Logout path (default: /web/logout)");
    eprintln!("  MAX_DWELL               - Upper bound of the dwell before logout (default: 2m)");
    eprintln!("  ITERATION_PAUSE         - Sleep at the end of every iteration (default: none)");
    eprintln!();
    eprintln!("Load profile:");
    eprintln!("  PROFILE                 - smoke or stress (default: smoke)");
    eprintln!("  STAGES                  - Explicit stages, e.g. 30s:100,1m:100,30s:0");
    eprintln!("  START_VUS               - VUs before the first stage (default: 0)");
    eprintln!("  GRACEFUL_STOP           - Time in-flight iterations get at the end (default: 30s)");
    eprintln!("  THRESHOLDS              - metric:expr pairs separated by ';', e.g.");
    eprintln!("                            http_req_duration:p(95)<2000;http_req_failed:rate<0.05");
    eprintln!();
    eprintln!("HTTP client:");
    eprintln!("  REQUEST_TIMEOUT         - Per-request timeout (default: 60s)");
    eprintln!("  SKIP_TLS_VERIFY         - Skip TLS certificate verification (default: false)");
    eprintln!("  CUSTOM_HEADERS          - Comma-separated headers (use \\, for literal commas)");
    eprintln!();
    eprintln!("Output:");
    eprintln!("  METRICS_PORT            - Prometheus endpoint port, 0 disables it (default: 9090)");
    eprintln!("  METRIC_NAMESPACE        - Prometheus metric namespace (default: login_loadtest)");
    eprintln!("  SUMMARY_EXPORT          - Write the end-of-run summary as JSON to this path");
    eprintln!("  LOG_FORMAT              - text or json (default: text)");
    eprintln!("  RUST_LOG                - Log filter (default: info)");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|f| f.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    init_tracing();

    // Register Prometheus metrics
    register_metrics()?;

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}\n", e);
            print_config_help();
            std::process::exit(1);
        }
    };

    let clients = SessionClientFactory::new(&config.to_client_config())?;
    config.print_summary(clients.headers());

    let workflow = Arc::new(LoginWorkflow::new(config.to_workflow_config(), clients)?);
    let sink = Arc::new(PrometheusSink::new());

    let registry = prometheus::default_registry().clone();
    if config.metrics_port != 0 {
        let registry = registry.clone();
        let port = config.metrics_port;
        tokio::spawn(async move {
            start_metrics_server(port, registry).await;
        });
    }

    let summary = run_profile(workflow, sink.clone(), config.to_runner_config()).await;

    let snapshot = sink.snapshot();
    let results = evaluate_all(&config.thresholds, &snapshot);
    let report = RunReport::new(summary.elapsed, summary.peak_vus, snapshot, results);

    println!("\n--- SUMMARY ---\n{}", report.render());

    let final_metrics_output = gather_metrics_string(&registry);
    println!("\n--- FINAL METRICS ---\n{}", final_metrics_output);
    println!("--- END OF FINAL METRICS ---\n");

    if let Some(path) = &config.summary_export {
        match report.export_json(path) {
            Ok(()) => info!(path = %path, "Summary exported"),
            Err(e) => error!(path = %path, error = %e, "Failed to export summary"),
        }
    }

    if !report.thresholds_passed() {
        error!("One or more thresholds were crossed");
        std::process::exit(THRESHOLDS_FAILED_EXIT_CODE);
    }

    Ok(())
}
