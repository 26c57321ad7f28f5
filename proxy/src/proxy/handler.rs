// SPDX-License-Identifier: MIT
//! The proxy engine: classify the request, pick an executor, forward, and
//! relay the response.
//!
//! Requests reach this handler through the router fallback; anything whose
//! path is not a Claude messages endpoint is refused here. Errors before
//! upstream contact become a single `500 {"error", "details"}` response. A
//! failure mid-relay on a streaming response cannot be turned into a status
//! code any more; it is logged and the connection is dropped.

use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::codec::{FramedRead, LinesCodec};
use tokio_util::io::StreamReader;
use tracing::{error, info};

use crate::logging::{self, RequestLog};
use crate::models::{is_warmup_request, parse_user_info, ChatRequest};
use crate::proxy::{rewrite, warmup};
use crate::AppContext;

/// Paths served by the proxy engine; everything else is not ours.
const PROXY_PATH_PREFIXES: [&str; 4] = [
    "/api/v1/messages",
    "/v1/messages",
    "/anthropic/v1/messages",
    "/api/anthropic/v1/messages",
];

/// Request bodies are buffered in full before forwarding; cap them so a
/// misbehaving client cannot balloon memory.
const MAX_REQUEST_BODY_SIZE: usize = 50 * 1024 * 1024;

pub fn should_proxy(path: &str) -> bool {
    PROXY_PATH_PREFIXES
        .iter()
        .any(|prefix| path.starts_with(prefix))
}

/// Router fallback: every non-`/health`/`/status` request lands here.
pub async fn proxy_handler(State(ctx): State<Arc<AppContext>>, request: Request) -> Response {
    if !should_proxy(request.uri().path()) {
        return StatusCode::NOT_FOUND.into_response();
    }

    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    match handle_proxy_request(ctx, request, start).await {
        Ok(response) => response,
        Err(err) => {
            error!(
                method = %method,
                path = %path,
                error = %format!("{err:#}"),
                "proxy request failed"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "error": "proxy request failed",
                    "details": format!("{err:#}"),
                })),
            )
                .into_response()
        }
    }
}

async fn handle_proxy_request(
    ctx: Arc<AppContext>,
    request: Request,
    start: Instant,
) -> Result<Response> {
    let (parts, body) = request.into_parts();
    let body_bytes = axum::body::to_bytes(body, MAX_REQUEST_BODY_SIZE)
        .await
        .context("failed to read request body")?;

    let chat_request: ChatRequest =
        serde_json::from_slice(&body_bytes).context("failed to parse request body")?;
    let (user_id, session_id) = parse_user_info(&chat_request.metadata);

    if is_warmup_request(&chat_request) {
        info!(%user_id, %session_id, "warm-up request detected, broadcasting to all executors");
        return warmup::handle_warmup(&ctx, &parts, &chat_request, body_bytes, &user_id, &session_id, start)
            .await;
    }

    let evaluator_timeout = ctx.config.proxy.evaluator_timeout();
    let evaluation = tokio::time::timeout(evaluator_timeout, ctx.evaluator.evaluate(&chat_request))
        .await
        .map_err(|_| {
            anyhow!(
                "difficulty evaluation timed out after {}s",
                evaluator_timeout.as_secs()
            )
        })?
        .context("difficulty evaluation failed")?;

    if ctx.config.features.request_logging {
        logging::log_evaluator_decision(&user_id, &session_id, &evaluation, start.elapsed());
    }

    let level_key = evaluation.difficulty_level.to_string();
    let service_id = ctx
        .config
        .difficulty_mapping
        .get(&level_key)
        .with_context(|| format!("no difficulty mapping configured for level {level_key}"))?;
    let service = ctx.registry.get(service_id)?;

    let outbound = rewrite::build_target_request(
        &ctx.http,
        parts.method.clone(),
        &parts.uri,
        &parts.headers,
        service,
        &body_bytes,
    )?;

    let upstream = outbound
        .timeout(ctx.config.proxy.request_timeout())
        .send()
        .await
        .with_context(|| format!("failed to reach service {}", service.id))?;

    let request_log = ctx.config.features.request_logging.then(|| RequestLog {
        user_id,
        session_id,
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        request_body: String::from_utf8_lossy(&body_bytes).into_owned(),
        started: start,
    });

    if chat_request.stream {
        relay_streaming_response(upstream, request_log)
    } else {
        let status = upstream.status().as_u16();
        let response = relay_buffered_response(upstream).await?;
        if let Some(log) = request_log {
            log.emit(status);
        }
        Ok(response)
    }
}

// ─── Response relays ──────────────────────────────────────────────────────────

/// Mirror a fully-buffered upstream response: status, headers, body bytes.
pub(crate) async fn relay_buffered_response(upstream: reqwest::Response) -> Result<Response> {
    let status = upstream.status();
    let upstream_headers = upstream.headers().clone();
    let body = upstream
        .bytes()
        .await
        .context("failed to read upstream response body")?;

    let mut builder = Response::builder().status(status);
    let headers = builder.headers_mut().expect("fresh response builder");
    for (name, value) in &upstream_headers {
        // Framing headers are recomputed by hyper for the buffered body.
        if matches!(name.as_str(), "content-length" | "transfer-encoding" | "connection") {
            continue;
        }
        headers.append(name, value.clone());
    }

    builder
        .body(Body::from(body))
        .context("failed to build relay response")
}

/// Relay an SSE upstream line by line.
///
/// The proxy's own SSE headers are set first and win; the copy loop skips
/// those keys. Lines are re-terminated with `\n` and buffered per event: a
/// blank line ends an SSE event and flushes one body frame downstream, as
/// does end of stream. `request_log` is emitted once the upstream is fully
/// relayed.
pub(crate) fn relay_streaming_response(
    upstream: reqwest::Response,
    request_log: Option<RequestLog>,
) -> Result<Response> {
    let status = upstream.status();
    let upstream_headers = upstream.headers().clone();

    let mut builder = Response::builder().status(status);
    let headers = builder.headers_mut().expect("fresh response builder");
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert(
        HeaderName::from_static("x-accel-buffering"),
        HeaderValue::from_static("no"),
    );
    for (name, value) in &upstream_headers {
        if matches!(
            name.as_str(),
            "content-type" | "cache-control" | "connection" | "content-length" | "transfer-encoding"
        ) {
            continue;
        }
        headers.append(name, value.clone());
    }

    let byte_stream = upstream.bytes_stream().map_err(std::io::Error::other);
    let mut lines = FramedRead::new(
        StreamReader::new(byte_stream),
        LinesCodec::new_with_max_length(1024 * 1024),
    );

    let (tx, rx) = mpsc::channel::<std::io::Result<Bytes>>(64);
    tokio::spawn(async move {
        let mut event = String::new();
        loop {
            match lines.next().await {
                Some(Ok(line)) => {
                    let is_event_end = line.is_empty();
                    event.push_str(&line);
                    event.push('\n');
                    if is_event_end
                        && tx.send(Ok(Bytes::from(std::mem::take(&mut event)))).await.is_err()
                    {
                        // Downstream went away; nothing left to relay.
                        return;
                    }
                }
                Some(Err(err)) => {
                    error!(error = %err, "error reading upstream stream, dropping connection");
                    let _ = tx.send(Err(std::io::Error::other(err))).await;
                    return;
                }
                None => break,
            }
        }
        if !event.is_empty() {
            let _ = tx.send(Ok(Bytes::from(event))).await;
        }
        if let Some(log) = request_log {
            log.emit(status.as_u16());
        }
    });

    builder
        .body(Body::from_stream(ReceiverStream::new(rx)))
        .context("failed to build streaming relay response")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_predicate_matches_messages_paths() {
        for path in [
            "/api/v1/messages",
            "/v1/messages",
            "/v1/messages/count_tokens",
            "/anthropic/v1/messages",
            "/api/anthropic/v1/messages",
        ] {
            assert!(should_proxy(path), "{path} should be proxied");
        }
    }

    #[test]
    fn proxy_predicate_rejects_other_paths() {
        for path in ["/health", "/status", "/", "/v1/complete", "/api/v2/messages"] {
            assert!(!should_proxy(path), "{path} should not be proxied");
        }
    }
}
