pub mod client;
pub mod config;
pub mod credentials;
pub mod errors;
pub mod extractor;
pub mod load_models;
pub mod metrics;
pub mod percentiles;
pub mod report;
pub mod session;
pub mod thresholds;
pub mod utils;
pub mod worker;
pub mod workflow;
pub mod yaml_config;
