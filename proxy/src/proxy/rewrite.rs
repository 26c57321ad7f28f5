// SPDX-License-Identifier: MIT
//! Rewriting a client request for a chosen upstream provider.
//!
//! The outbound request keeps the client's method, query string, body, and
//! headers, with three exceptions: `Host` follows the provider URL,
//! `Authorization` carries the provider's own credential, and providers
//! flagged `supports_thinking: false` get the top-level `thinking` field
//! stripped from the JSON body. Message-framing headers are left to the
//! HTTP client, which recomputes them for the possibly-resized body.

use anyhow::{Context, Result};
use axum::http::{HeaderMap, HeaderValue, Method, Uri};
use bytes::Bytes;
use reqwest::header::AUTHORIZATION;
use reqwest::Url;
use tracing::{debug, warn};

use crate::config::Service;

/// Build the outbound request for `service` from the original request parts.
pub fn build_target_request(
    client: &reqwest::Client,
    method: Method,
    original_uri: &Uri,
    headers: &HeaderMap,
    service: &Service,
    body: &Bytes,
) -> Result<reqwest::RequestBuilder> {
    let mut url = Url::parse(&service.url)
        .with_context(|| format!("invalid url for service {}: {}", service.id, service.url))?;
    url.set_query(original_uri.query());

    let body = if service.supports_thinking {
        body.clone()
    } else {
        match strip_thinking(body) {
            Ok(stripped) => {
                debug!(service = %service.name, "removed thinking field from request body");
                Bytes::from(stripped)
            }
            Err(err) => {
                warn!(
                    service = %service.name,
                    error = %err,
                    "failed to sanitize request body, forwarding original"
                );
                body.clone()
            }
        }
    };

    let mut outbound_headers = HeaderMap::with_capacity(headers.len() + 1);
    for (name, value) in headers {
        // Host and Authorization are replaced below; the framing headers
        // belong to the client, not the original request.
        if matches!(
            name.as_str(),
            "host" | "authorization" | "content-length" | "transfer-encoding" | "connection"
        ) {
            continue;
        }
        outbound_headers.append(name, value.clone());
    }
    let bearer = HeaderValue::from_str(&format!("Bearer {}", service.api_key))
        .with_context(|| format!("invalid api key for service {}", service.id))?;
    outbound_headers.insert(AUTHORIZATION, bearer);

    Ok(client
        .request(method, url)
        .headers(outbound_headers)
        .body(body))
}

/// Remove the top-level `thinking` field from a JSON object body.
fn strip_thinking(body: &[u8]) -> Result<Vec<u8>> {
    let mut object: serde_json::Map<String, serde_json::Value> =
        serde_json::from_slice(body).context("request body is not a JSON object")?;
    object.remove("thinking");
    serde_json::to_vec(&object).context("failed to re-encode sanitized body")
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Role;

    fn service(supports_thinking: bool) -> Service {
        Service {
            id: "exec-1".to_string(),
            name: "executor one".to_string(),
            url: "https://exec.example.com/v1/messages".to_string(),
            api_key: "cr_secret".to_string(),
            role: Role::Executor,
            supports_thinking,
        }
    }

    fn build(
        service: &Service,
        uri: &str,
        headers: HeaderMap,
        body: &str,
    ) -> reqwest::Request {
        let client = reqwest::Client::new();
        build_target_request(
            &client,
            Method::POST,
            &uri.parse().unwrap(),
            &headers,
            service,
            &Bytes::from(body.to_string()),
        )
        .unwrap()
        .build()
        .unwrap()
    }

    fn body_json(request: &reqwest::Request) -> serde_json::Value {
        serde_json::from_slice(request.body().unwrap().as_bytes().unwrap()).unwrap()
    }

    #[test]
    fn query_string_is_preserved_verbatim() {
        let request = build(&service(true), "/v1/messages?beta=true&x=1", HeaderMap::new(), "{}");
        assert_eq!(
            request.url().as_str(),
            "https://exec.example.com/v1/messages?beta=true&x=1"
        );
    }

    #[test]
    fn authorization_is_replaced_with_provider_credential() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Bearer client-token".parse().unwrap());
        headers.insert("anthropic-version", "2023-06-01".parse().unwrap());

        let request = build(&service(true), "/v1/messages", headers, "{}");
        assert_eq!(
            request.headers().get("authorization").unwrap(),
            "Bearer cr_secret"
        );
        assert_eq!(
            request.headers().get("anthropic-version").unwrap(),
            "2023-06-01"
        );
    }

    #[test]
    fn host_header_is_not_copied() {
        let mut headers = HeaderMap::new();
        headers.insert("host", "localhost:27015".parse().unwrap());

        let request = build(&service(true), "/v1/messages", headers, "{}");
        assert!(request.headers().get("host").is_none());
        assert_eq!(request.url().host_str(), Some("exec.example.com"));
    }

    #[test]
    fn thinking_is_stripped_when_unsupported() {
        let body = r#"{"model":"x","thinking":{"type":"enabled"},"messages":[],"max_tokens":5}"#;
        let request = build(&service(false), "/v1/messages", HeaderMap::new(), body);

        let forwarded = body_json(&request);
        assert!(forwarded.get("thinking").is_none());
        assert_eq!(forwarded["model"], "x");
        assert_eq!(forwarded["max_tokens"], 5);
    }

    #[test]
    fn thinking_is_kept_when_supported() {
        let body = r#"{"model":"x","thinking":{"type":"enabled"}}"#;
        let request = build(&service(true), "/v1/messages", HeaderMap::new(), body);
        assert!(body_json(&request).get("thinking").is_some());
    }

    #[test]
    fn undecodable_body_is_forwarded_unchanged() {
        let body = "this is not json";
        let request = build(&service(false), "/v1/messages", HeaderMap::new(), body);
        assert_eq!(
            request.body().unwrap().as_bytes().unwrap(),
            body.as_bytes()
        );
    }

    #[test]
    fn body_without_thinking_survives_sanitizing() {
        let body = r#"{"model":"x","messages":[{"role":"user","content":"hi"}]}"#;
        let request = build(&service(false), "/v1/messages", HeaderMap::new(), body);
        let forwarded = body_json(&request);
        assert_eq!(forwarded["model"], "x");
        assert_eq!(forwarded["messages"][0]["content"], "hi");
    }
}
