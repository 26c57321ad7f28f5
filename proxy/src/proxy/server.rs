// SPDX-License-Identifier: MIT
//! HTTP surface: router, CORS, control endpoints, graceful shutdown.
//!
//! `/health` and `/status` are the only routed endpoints; everything else
//! falls through to the proxy engine, which decides whether the path is a
//! messages endpoint. CORS is fully permissive and answers preflights with
//! 204 before any other middleware runs the request.

use anyhow::{Context, Result};
use axum::{
    extract::{Request, State},
    http::{HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::Local;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::proxy::handler::proxy_handler;
use crate::AppContext;

/// How long in-flight requests get to finish after a shutdown signal.
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(30);

pub async fn run(ctx: Arc<AppContext>) -> Result<()> {
    let port = ctx.config.proxy.port;
    info!(
        port,
        read_timeout = ctx.config.proxy.read_timeout,
        write_timeout = ctx.config.proxy.write_timeout,
        idle_timeout = ctx.config.proxy.idle_timeout,
        request_timeout = ctx.config.proxy.request_timeout,
        "starting proxy server"
    );

    let app = build_router(ctx);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!("proxy server listening on {addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("server stopped");
    Ok(())
}

pub fn build_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .fallback(proxy_handler)
        .layer(middleware::from_fn(cors))
        .layer(middleware::from_fn_with_state(ctx.clone(), access_log))
        .with_state(ctx)
}

// ─── Control endpoints ────────────────────────────────────────────────────────

async fn health() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "time": Local::now().to_rfc3339(),
    }))
}

async fn status(State(ctx): State<Arc<AppContext>>) -> Json<Value> {
    let services: Vec<Value> = ctx
        .registry
        .services()
        .iter()
        .map(|service| {
            json!({
                "id": service.id,
                "name": service.name,
                "role": service.role.to_string(),
                "url": service.url,
            })
        })
        .collect();

    Json(json!({
        "status": "running",
        "config": {
            "port": ctx.config.proxy.port,
            "evaluator_fallback": ctx.config.features.evaluator_fallback,
            "service_auto_switch": ctx.config.features.service_auto_switch,
            "request_logging": ctx.config.features.request_logging,
        },
        "services": services,
        "difficulty_mapping": ctx.config.difficulty_mapping,
        "time": Local::now().to_rfc3339(),
    }))
}

// ─── Middleware ───────────────────────────────────────────────────────────────

async fn cors(request: Request, next: Next) -> Response {
    if request.method() == Method::OPTIONS {
        let mut response = StatusCode::NO_CONTENT.into_response();
        apply_cors_headers(&mut response);
        return response;
    }

    let mut response = next.run(request).await;
    apply_cors_headers(&mut response);
    response
}

fn apply_cors_headers(response: &mut Response) {
    let headers = response.headers_mut();
    headers.insert(
        "access-control-allow-origin",
        HeaderValue::from_static("*"),
    );
    headers.insert(
        "access-control-allow-credentials",
        HeaderValue::from_static("true"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static(
            "Content-Type, Content-Length, Accept-Encoding, X-CSRF-Token, Authorization, \
             accept, origin, Cache-Control, X-Requested-With",
        ),
    );
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("POST, OPTIONS, GET, PUT, DELETE"),
    );
}

async fn access_log(
    State(ctx): State<Arc<AppContext>>,
    request: Request,
    next: Next,
) -> Response {
    if !ctx.config.features.request_logging {
        return next.run(request).await;
    }

    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let user_agent = request
        .headers()
        .get("user-agent")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let response = next.run(request).await;

    info!(
        target: "http",
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        latency_ms = start.elapsed().as_millis() as u64,
        user_agent = %user_agent,
        "HTTP request"
    );
    response
}

// ─── Shutdown ─────────────────────────────────────────────────────────────────

/// Resolves on SIGINT or SIGTERM. Once it fires, a watchdog gives in-flight
/// connections [`SHUTDOWN_DRAIN`] to finish before forcing the process out.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received, draining connections");
    tokio::spawn(async {
        tokio::time::sleep(SHUTDOWN_DRAIN).await;
        warn!("drain window elapsed, forcing exit");
        std::process::exit(1);
    });
}
