// SPDX-License-Identifier: MIT
//! Logging: subscriber setup and the proxy's structured records.
//!
//! Two sinks: a compact console layer, and a JSON layer writing daily files
//! under `logging.output_path` (one JSON record per line). The returned
//! guard must live as long as the process or buffered file output is lost.

use anyhow::{Context, Result};
use std::time::{Duration, Instant};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LogSettings;
use crate::models::Evaluation;

pub fn init(settings: &LogSettings) -> Result<WorkerGuard> {
    std::fs::create_dir_all(&settings.output_path).with_context(|| {
        format!(
            "failed to create log directory {}",
            settings.output_path.display()
        )
    })?;

    let file_appender = tracing_appender::rolling::Builder::new()
        .rotation(Rotation::DAILY)
        .filename_prefix("claude-proxy")
        .filename_suffix("log")
        .build(&settings.output_path)
        .context("failed to create rolling log file")?;
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(settings.level.clone()));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().compact())
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(file_writer),
        )
        .init();

    Ok(guard)
}

/// One proxied request, emitted after the response is fully relayed.
pub struct RequestLog {
    pub user_id: String,
    pub session_id: String,
    pub method: String,
    pub path: String,
    pub request_body: String,
    pub started: Instant,
}

impl RequestLog {
    pub fn emit(&self, status: u16) {
        info!(
            target: "request",
            user_id = %self.user_id,
            session_id = %self.session_id,
            method = %self.method,
            path = %self.path,
            status,
            duration_ms = self.started.elapsed().as_millis() as u64,
            request_body = %self.request_body,
            "API request"
        );
    }
}

/// One evaluator verdict, emitted as soon as classification settles.
pub fn log_evaluator_decision(
    user_id: &str,
    session_id: &str,
    evaluation: &Evaluation,
    elapsed: Duration,
) {
    info!(
        target: "evaluator",
        user_id,
        session_id,
        difficulty_level = evaluation.difficulty_level,
        reasoning = %evaluation.reasoning,
        duration_ms = elapsed.as_millis() as u64,
        "evaluator decision"
    );
}
