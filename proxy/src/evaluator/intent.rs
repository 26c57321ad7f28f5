// SPDX-License-Identifier: MIT
//! Current-task extraction from a noisy transcript.
//!
//! Claude Code transcripts interleave the human's actual request with tool
//! results, command echoes, and system reminders, all inside `user`
//! messages. The evaluator should only ever see the human's request, so the
//! extraction walks messages newest-first and drops auxiliary blocks before
//! anything else looks at the text.
//!
//! Everything here is pure: no I/O, no state.

use crate::models::Message;

/// Returned when the transcript contains no extractable user task at all.
pub const NO_TASK_SENTINEL: &str = "无法提取有效的用户任务内容";

/// Cap applied to the extracted task before it enters the prompt.
const MAX_TASK_CHARS: usize = 500;

/// How many user messages the summary fallback may draw from.
const RECENT_CONTEXT_MESSAGES: usize = 3;

/// The summary fallback only picks short blocks; long ones are almost always
/// pasted tool output that slipped past the marker checks.
const RECENT_CONTEXT_MAX_LEN: usize = 200;

// Markers of tooling-generated content. Matching is case-sensitive and the
// first hit wins.
const AUXILIARY_MARKERS: [&str; 6] = [
    "<system-reminder>",
    "<tool_result>",
    "tool_result",
    "<command-name>",
    "<local-command-stdout>",
    "tool_use_id",
];

const AUXILIARY_PREFIXES: [&str; 3] = [
    "User has answered your questions:",
    "File created successfully",
    "Todos have been modified",
];

/// True when a text block originates from tooling rather than the human.
pub fn is_auxiliary_content(text: &str) -> bool {
    if AUXILIARY_MARKERS.iter().any(|marker| text.contains(marker)) {
        return true;
    }
    AUXILIARY_PREFIXES
        .iter()
        .any(|prefix| text.starts_with(prefix))
}

/// Best-effort description of what the user is asking for in the current
/// turn, capped at [`MAX_TASK_CHARS`] characters.
pub fn current_task(messages: &[Message]) -> String {
    let mut task = extract_user_intent(messages)
        .unwrap_or_else(|| extract_recent_context(messages, RECENT_CONTEXT_MESSAGES));

    if task.chars().count() > MAX_TASK_CHARS {
        task = task.chars().take(MAX_TASK_CHARS).collect::<String>() + "...";
    }
    task
}

/// The newest user message's non-auxiliary text, blocks joined with single
/// spaces. `None` when no user message carries any such text.
fn extract_user_intent(messages: &[Message]) -> Option<String> {
    for message in messages.iter().rev() {
        if message.role != "user" {
            continue;
        }

        let texts: Vec<&str> = message
            .content
            .iter()
            .filter(|block| block.kind == "text")
            .map(|block| block.text.trim())
            .filter(|text| !text.is_empty() && !is_auxiliary_content(text))
            .collect();

        if !texts.is_empty() {
            return Some(texts.join(" "));
        }
    }
    None
}

/// Fallback: a short chronological digest of the last few user messages,
/// joined with ` → `. Yields [`NO_TASK_SENTINEL`] when even that is empty.
fn extract_recent_context(messages: &[Message], recent_count: usize) -> String {
    let mut parts: Vec<&str> = Vec::new();
    let mut user_messages = 0;

    for message in messages.iter().rev() {
        if user_messages >= recent_count {
            break;
        }
        if message.role != "user" {
            continue;
        }
        user_messages += 1;

        for block in &message.content {
            if block.kind != "text" || is_auxiliary_content(&block.text) {
                continue;
            }
            let text = block.text.trim();
            if !text.is_empty() && text.len() < RECENT_CONTEXT_MAX_LEN {
                parts.insert(0, text);
                break;
            }
        }
    }

    if parts.is_empty() {
        NO_TASK_SENTINEL.to_string()
    } else {
        parts.join(" → ")
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContentBlock, Message};

    fn user(texts: &[&str]) -> Message {
        Message {
            role: "user".to_string(),
            content: texts.iter().map(|text| ContentBlock::text(*text)).collect(),
        }
    }

    fn assistant(text: &str) -> Message {
        Message::text("assistant", text)
    }

    #[test]
    fn auxiliary_markers_are_detected() {
        for text in [
            "<system-reminder>contents</system-reminder>",
            "here is a <tool_result> block",
            "raw tool_result json",
            "<command-name>/clear</command-name>",
            "<local-command-stdout>ok</local-command-stdout>",
            "{\"tool_use_id\": \"toolu_1\"}",
            "User has answered your questions: yes",
            "File created successfully at /tmp/x",
            "Todos have been modified successfully",
        ] {
            assert!(is_auxiliary_content(text), "{text:?} should be auxiliary");
        }
    }

    #[test]
    fn plain_requests_are_not_auxiliary() {
        assert!(!is_auxiliary_content("write a quicksort in rust"));
        // Prefix markers only match at the start.
        assert!(!is_auxiliary_content("the File created successfully note"));
    }

    #[test]
    fn latest_user_message_wins() {
        let messages = vec![
            user(&["first request"]),
            assistant("done"),
            user(&["second request"]),
        ];
        assert_eq!(current_task(&messages), "second request");
    }

    #[test]
    fn blocks_within_a_message_join_with_spaces() {
        let messages = vec![user(&["fix the bug", "in the parser"])];
        assert_eq!(current_task(&messages), "fix the bug in the parser");
    }

    #[test]
    fn auxiliary_blocks_are_dropped_from_the_current_message() {
        let messages = vec![user(&[
            "<system-reminder>contextual note</system-reminder>",
            "rename the helper",
        ])];
        assert_eq!(current_task(&messages), "rename the helper");
    }

    #[test]
    fn walks_past_tool_only_messages_to_an_earlier_request() {
        let messages = vec![
            user(&["write the migration"]),
            assistant("ok"),
            user(&["run the tests"]),
            assistant("ok"),
            user(&["<tool_result>exit 0</tool_result>"]),
        ];
        assert_eq!(current_task(&messages), "run the tests");
    }

    #[test]
    fn digest_joins_indented_tool_echoes_chronologically() {
        // Prefix markers only match at column zero, so indented echoes are
        // invisible to the primary walk but still feed the digest.
        let messages = vec![
            user(&["  File created successfully at src/a.rs"]),
            assistant("ok"),
            user(&["  Todos have been modified to track the rollout"]),
        ];
        assert_eq!(
            current_task(&messages),
            "File created successfully at src/a.rs → Todos have been modified to track the rollout"
        );
    }

    #[test]
    fn digest_skips_long_blocks() {
        let long = format!("  File created successfully {}", "x".repeat(250));
        let messages = vec![user(&[&long]), user(&["tool_use_id noise"])];
        assert_eq!(current_task(&messages), NO_TASK_SENTINEL);
    }

    #[test]
    fn empty_transcript_yields_sentinel() {
        assert_eq!(current_task(&[]), NO_TASK_SENTINEL);
        let only_tooling = vec![user(&["<tool_result>…</tool_result>"])];
        assert_eq!(current_task(&only_tooling), NO_TASK_SENTINEL);
    }

    #[test]
    fn long_task_is_capped_with_ellipsis() {
        let long = "词".repeat(600);
        let messages = vec![user(&[&long])];
        let task = current_task(&messages);
        assert_eq!(task.chars().count(), 503);
        assert!(task.ends_with("..."));
    }

    #[test]
    fn non_text_blocks_are_ignored() {
        let messages = vec![Message {
            role: "user".to_string(),
            content: vec![
                ContentBlock {
                    kind: "image".to_string(),
                    text: String::new(),
                    cache_control: None,
                },
                ContentBlock::text("describe this image"),
            ],
        }];
        assert_eq!(current_task(&messages), "describe this image");
    }
}
