// SPDX-License-Identifier: MIT
//! Wire types for the Claude messages API, as far as the proxy needs to
//! understand them.
//!
//! The proxy forwards the client's raw body bytes; these types exist so the
//! request path can read the transcript (classification, warm-up detection)
//! and so the evaluator client can build its own outbound request. The one
//! wire quirk handled here is the polymorphic `content` field: clients send
//! either a bare string or an array of blocks, and the canonical emitted
//! form is always the array.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;

/// Text a first user message must carry, verbatim, to count as a cache
/// warm-up request.
pub const WARMUP_TEXT: &str = "Warmup";

// ─── Request body ─────────────────────────────────────────────────────────────

/// A Claude messages-API request, reduced to the fields the proxy reads.
///
/// Unknown fields are ignored on parse; the original bytes are what gets
/// forwarded upstream, never a re-serialisation of this struct.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub model: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<Vec<SystemMessage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<serde_json::Value>>,
    #[serde(default, skip_serializing_if = "RequestMetadata::is_empty")]
    pub metadata: RequestMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: String,
    #[serde(deserialize_with = "content_from_wire")]
    pub content: Vec<ContentBlock>,
}

impl Message {
    /// A single-text-block user or assistant message.
    pub fn text(role: &str, text: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: vec![ContentBlock::text(text)],
        }
    }
}

/// Accept `"content": "hello"` as well as `"content": [{...}]`.
///
/// The string form is promoted to a single `text` block, so the rest of the
/// crate only ever sees the array variant.
fn content_from_wire<'de, D>(deserializer: D) -> Result<Vec<ContentBlock>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum WireContent {
        Text(String),
        Blocks(Vec<ContentBlock>),
    }

    Ok(match WireContent::deserialize(deserializer)? {
        WireContent::Text(text) => vec![ContentBlock::text(text)],
        WireContent::Blocks(blocks) => blocks,
    })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: text.into(),
            cache_control: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMessage {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_control: Option<CacheControl>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheControl {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestMetadata {
    #[serde(default)]
    pub user_id: String,
}

impl RequestMetadata {
    pub fn is_empty(&self) -> bool {
        self.user_id.is_empty()
    }
}

// ─── User / session identity ──────────────────────────────────────────────────

// Shape: user_<USERID>_account__session_<SESSIONID>. The session suffix is
// optional; anything that does not start with the user/account frame parses
// to empty strings.
static USER_ID_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^user_(.+?)_account(?:.*?__session_(.+))?").expect("user id regex")
});

/// Split `metadata.user_id` into `(user_id, session_id)`.
///
/// Returns `("", "")` when the value does not match the fixed shape; a
/// matching user with a missing session yields an empty session id.
pub fn parse_user_info(metadata: &RequestMetadata) -> (String, String) {
    let Some(caps) = USER_ID_RE.captures(&metadata.user_id) else {
        return (String::new(), String::new());
    };

    let user = caps.get(1).map(|m| m.as_str().to_string()).unwrap_or_default();
    let session = caps.get(2).map(|m| m.as_str().to_string()).unwrap_or_default();
    (user, session)
}

// ─── Warm-up detection ────────────────────────────────────────────────────────

/// A warm-up request is Claude Code pre-heating the provider-side prompt
/// cache: the first message is a `user` message with a text block that is
/// exactly [`WARMUP_TEXT`].
pub fn is_warmup_request(request: &ChatRequest) -> bool {
    let Some(first) = request.messages.first() else {
        return false;
    };
    if first.role != "user" {
        return false;
    }

    first
        .content
        .iter()
        .any(|block| block.kind == "text" && block.text == WARMUP_TEXT)
}

// ─── Classification bookkeeping ───────────────────────────────────────────────

/// One prior request in a session's history window, fed back into the
/// evaluator prompt on later turns.
#[derive(Debug, Clone)]
pub struct RequestSummary {
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub message_count: usize,
    /// Reserved; never populated by the current request path.
    pub token_count: u32,
    pub difficulty_level: u8,
    pub response_time: Duration,
}

/// Per-(user, session) state held by the context store. An absent context
/// and an empty one are indistinguishable to callers.
#[derive(Debug, Clone, Default)]
pub struct UserContext {
    pub user_id: String,
    pub session_id: String,
    pub request_history: Vec<RequestSummary>,
}

/// Outcome of a difficulty evaluation: a level in 1..=5 plus the evaluator's
/// raw answer for logging.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    pub difficulty_level: u8,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reasoning: String,
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(user_id: &str) -> RequestMetadata {
        RequestMetadata {
            user_id: user_id.to_string(),
        }
    }

    #[test]
    fn parse_user_info_standard_shape() {
        let (user, session) = parse_user_info(&meta(
            "user_4d9e1ae2fbecbcb2af13c108249fe9dcd2c3dc9f9bb8a482196b2fea322b71d9_account__session_88b74551-e948-440a-94a2-ebea22189fa9",
        ));
        assert_eq!(
            user,
            "4d9e1ae2fbecbcb2af13c108249fe9dcd2c3dc9f9bb8a482196b2fea322b71d9"
        );
        assert_eq!(session, "88b74551-e948-440a-94a2-ebea22189fa9");
    }

    #[test]
    fn parse_user_info_empty() {
        assert_eq!(parse_user_info(&meta("")), (String::new(), String::new()));
    }

    #[test]
    fn parse_user_info_incomplete() {
        assert_eq!(
            parse_user_info(&meta("user_12345")),
            (String::new(), String::new())
        );
    }

    #[test]
    fn parse_user_info_user_without_session() {
        let (user, session) = parse_user_info(&meta("user_ABC_account"));
        assert_eq!(user, "ABC");
        assert_eq!(session, "");
    }

    #[test]
    fn parse_user_info_short_cases_from_wire() {
        assert_eq!(
            parse_user_info(&meta("user_ABC_account__session_XYZ")),
            ("ABC".to_string(), "XYZ".to_string())
        );
        assert_eq!(
            parse_user_info(&meta("user_ABC")),
            (String::new(), String::new())
        );
    }

    #[test]
    fn content_accepts_bare_string_and_emits_array() {
        let msg: Message =
            serde_json::from_str(r#"{"role":"user","content":"Write a quicksort"}"#).unwrap();
        assert_eq!(msg.content.len(), 1);
        assert_eq!(msg.content[0].kind, "text");
        assert_eq!(msg.content[0].text, "Write a quicksort");

        let emitted = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            emitted,
            serde_json::json!({
                "role": "user",
                "content": [{"type": "text", "text": "Write a quicksort"}],
            })
        );
    }

    #[test]
    fn content_accepts_block_array() {
        let msg: Message = serde_json::from_str(
            r#"{"role":"user","content":[{"type":"text","text":"hi"},{"type":"image"}]}"#,
        )
        .unwrap();
        assert_eq!(msg.content.len(), 2);
        assert_eq!(msg.content[0].text, "hi");
        assert_eq!(msg.content[1].kind, "image");
    }

    #[test]
    fn warmup_detected_on_exact_text() {
        let req: ChatRequest = serde_json::from_str(
            r#"{"messages":[{"role":"user","content":[{"type":"text","text":"Warmup"}]}]}"#,
        )
        .unwrap();
        assert!(is_warmup_request(&req));
    }

    #[test]
    fn warmup_rejects_empty_messages() {
        let req = ChatRequest::default();
        assert!(!is_warmup_request(&req));
    }

    #[test]
    fn warmup_rejects_assistant_first_message() {
        let req = ChatRequest {
            messages: vec![Message::text("assistant", "Warmup")],
            ..Default::default()
        };
        assert!(!is_warmup_request(&req));
    }

    #[test]
    fn warmup_rejects_inexact_text() {
        for text in ["warmup", "Warmup ", "Warmup please"] {
            let req = ChatRequest {
                messages: vec![Message::text("user", text)],
                ..Default::default()
            };
            assert!(!is_warmup_request(&req), "{text:?} must not trigger warm-up");
        }
    }

    #[test]
    fn warmup_checks_only_first_message() {
        let req = ChatRequest {
            messages: vec![
                Message::text("user", "hello"),
                Message::text("user", "Warmup"),
            ],
            ..Default::default()
        };
        assert!(!is_warmup_request(&req));
    }

    #[test]
    fn chat_request_parses_full_body() {
        let req: ChatRequest = serde_json::from_str(
            r#"{
                "model": "claude-3-5-sonnet",
                "messages": [{"role":"user","content":"Write a quicksort"}],
                "system": [{"type":"text","text":"be terse"}],
                "metadata": {"user_id":"user_A_account__session_B"},
                "max_tokens": 1024,
                "stream": true
            }"#,
        )
        .unwrap();
        assert_eq!(req.model, "claude-3-5-sonnet");
        assert_eq!(req.messages.len(), 1);
        assert!(req.stream);
        assert_eq!(parse_user_info(&req.metadata), ("A".into(), "B".into()));
    }
}
