// SPDX-License-Identifier: MIT

use anyhow::Result;
use clap::Parser;
use claude_proxy::{config::Config, logging, proxy, AppContext};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "claude-proxy",
    about = "Content-aware reverse proxy for Claude API traffic",
    version
)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(long, default_value = "./configs/config.yaml", env = "CLAUDE_PROXY_CONFIG")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(1);
        }
    };

    let _log_guard = logging::init(&config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "claude-proxy starting"
    );
    log_config_summary(&config);

    let ctx = Arc::new(AppContext::new(config)?);
    proxy::server::run(ctx).await
}

fn log_config_summary(config: &Config) {
    info!(
        port = config.proxy.port,
        service_count = config.services.len(),
        "configuration loaded"
    );

    for service in &config.services {
        info!(
            id = %service.id,
            name = %service.name,
            url = %service.url,
            role = %service.role,
            supports_thinking = service.supports_thinking,
            "configured service"
        );
    }

    for level in 1..=5u8 {
        if let Some(id) = config.difficulty_mapping.get(&level.to_string()) {
            let name = config
                .services
                .iter()
                .find(|s| &s.id == id)
                .map(|s| s.name.as_str())
                .unwrap_or_default();
            info!(level, service_id = %id, service_name = %name, "difficulty mapping");
        }
    }

    info!(
        evaluator_fallback = config.features.evaluator_fallback,
        service_auto_switch = config.features.service_auto_switch,
        request_logging = config.features.request_logging,
        "feature flags"
    );
}
