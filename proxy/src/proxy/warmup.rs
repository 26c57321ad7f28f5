// SPDX-License-Identifier: MIT
//! Warm-up broadcast: fan the request out to every executor at once.
//!
//! Claude Code sends a `Warmup` request to pre-heat provider-side prompt
//! caches. Routing it to one executor would leave the others cold, so the
//! broadcast sends it everywhere and answers the client with whichever
//! success lands first. "First" is task completion order, not registry
//! order; warm-up is latency plumbing, not semantics.

use anyhow::{bail, Context, Result};
use axum::http::request::Parts;
use axum::response::Response;
use bytes::Bytes;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::config::Service;
use crate::logging::RequestLog;
use crate::models::ChatRequest;
use crate::proxy::handler::{relay_buffered_response, relay_streaming_response};
use crate::proxy::rewrite;
use crate::AppContext;

/// Per-executor deadline; a cache warm-up that takes longer than this has
/// already failed its purpose.
const WARMUP_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) async fn handle_warmup(
    ctx: &Arc<AppContext>,
    parts: &Parts,
    chat_request: &ChatRequest,
    body: Bytes,
    user_id: &str,
    session_id: &str,
    start: Instant,
) -> Result<Response> {
    let executors: Vec<Service> = ctx
        .registry
        .executors()
        .into_iter()
        .cloned()
        .collect();

    info!(
        service_count = executors.len(),
        user_id,
        session_id,
        "starting warm-up broadcast"
    );

    let total = executors.len();
    let (tx, mut rx) = mpsc::channel::<(Service, Result<reqwest::Response>)>(total);

    for service in executors {
        let tx = tx.clone();
        let client = ctx.http.clone();
        let method = parts.method.clone();
        let uri = parts.uri.clone();
        let headers = parts.headers.clone();
        let body = body.clone();

        tokio::spawn(async move {
            let outcome = async {
                let outbound = rewrite::build_target_request(
                    &client, method, &uri, &headers, &service, &body,
                )?;
                outbound
                    .timeout(WARMUP_TIMEOUT)
                    .send()
                    .await
                    .context("warm-up request failed")
            }
            .await;

            match &outcome {
                Ok(response) => info!(
                    service = %service.name,
                    status = response.status().as_u16(),
                    "warm-up request succeeded"
                ),
                Err(err) => warn!(
                    service = %service.name,
                    error = %format!("{err:#}"),
                    "warm-up request failed"
                ),
            }

            let _ = tx.send((service, outcome)).await;
        });
    }
    drop(tx);

    // Wait for every executor to report; keep the first success, release
    // the connections of the rest.
    let mut first_success: Option<reqwest::Response> = None;
    let mut success_count = 0usize;
    let mut failed_count = 0usize;

    while let Some((_service, outcome)) = rx.recv().await {
        match outcome {
            Ok(response) => {
                success_count += 1;
                if first_success.is_none() {
                    first_success = Some(response);
                } else {
                    tokio::spawn(async move {
                        if let Err(err) = response.bytes().await {
                            error!(error = %err, "failed to drain warm-up response body");
                        }
                    });
                }
            }
            Err(_) => failed_count += 1,
        }
    }

    info!(
        total,
        success = success_count,
        failed = failed_count,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "warm-up broadcast complete"
    );

    let Some(response) = first_success else {
        bail!("warm-up failed on every executor");
    };

    let status = response.status().as_u16();
    let request_log = ctx.config.features.request_logging.then(|| RequestLog {
        user_id: user_id.to_string(),
        session_id: session_id.to_string(),
        method: "WARMUP".to_string(),
        path: parts.uri.path().to_string(),
        request_body: String::from_utf8_lossy(&body).into_owned(),
        started: start,
    });

    if chat_request.stream {
        relay_streaming_response(response, request_log)
    } else {
        let relayed = relay_buffered_response(response).await?;
        if let Some(log) = request_log {
            log.emit(status);
        }
        Ok(relayed)
    }
}
