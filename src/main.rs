use admission::{config::AdmissionConfig, init_admission_server, init_tracing};
use anyhow::Context;
use std::env;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    init_tracing();

    // Get config file path from command line or use default
    let config_path = env::args()
        .nth(1)
        .unwrap_or_else(|| "config/admission.yaml".to_string());

    // Load configuration
    let config = AdmissionConfig::from_file(&config_path).with_context(|| {
        format!(
            "failed to load configuration from {} (usage: admission [config_file])",
            config_path
        )
    })?;

    // Start the admission server
    init_admission_server(config)
        .await
        .context("admission server error")?;

    Ok(())
}
