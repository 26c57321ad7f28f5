// SPDX-License-Identifier: MIT
//! claude-proxy: a content-aware reverse proxy for Claude API traffic.
//!
//! Each incoming messages request is classified by a secondary "evaluator"
//! model into a difficulty level 1-5, then forwarded to the executor
//! provider mapped to that level. Warm-up requests are broadcast to every
//! executor instead.

pub mod config;
pub mod evaluator;
pub mod logging;
pub mod models;
pub mod providers;
pub mod proxy;
pub mod retry;

use anyhow::{Context, Result};
use std::sync::Arc;

use config::Config;
use evaluator::EvaluatorClient;
use providers::ProviderRegistry;

/// Shared state handed to every handler and background task.
pub struct AppContext {
    pub config: Arc<Config>,
    pub registry: Arc<ProviderRegistry>,
    pub evaluator: EvaluatorClient,
    /// Shared upstream client. No client-wide timeout: per-request deadlines
    /// (`request_timeout`, the warm-up 10s, the evaluator's outer deadline)
    /// are applied at the call sites.
    pub http: reqwest::Client,
}

impl AppContext {
    pub fn new(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let registry = Arc::new(ProviderRegistry::from_config(&config)?);

        let http = reqwest::Client::builder()
            .pool_idle_timeout(config.proxy.idle_timeout())
            .pool_max_idle_per_host(10)
            .build()
            .context("failed to build HTTP client")?;

        let evaluator = EvaluatorClient::new(http.clone(), config.clone(), registry.clone());

        Ok(Self {
            config,
            registry,
            evaluator,
            http,
        })
    }
}
