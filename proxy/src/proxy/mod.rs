// SPDX-License-Identifier: MIT
//! Request-path subsystem: HTTP surface, proxy engine, request rewriting,
//! and the warm-up broadcaster.

pub mod handler;
pub mod rewrite;
pub mod server;
pub mod warmup;
