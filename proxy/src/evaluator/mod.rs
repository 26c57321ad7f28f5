// SPDX-License-Identifier: MIT
//! Difficulty evaluation: intent extraction, per-session context, and the
//! evaluator-provider client.

pub mod client;
pub mod context;
pub mod intent;

pub use client::{build_evaluation_prompt, parse_difficulty_level, EvaluatorClient};
pub use context::ContextStore;
