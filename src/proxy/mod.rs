//! Proxy request lifecycle.
//!
//! # Responsibilities
//! - Drive the per-request state machine: route, input guardrails,
//!   forward, output guardrails, respond
//! - Produce endpoint-shaped refusal bodies for blocked requests

pub mod handler;
pub mod response_builder;

pub use handler::{proxy_handler, AppState, BlockContext, RequestId};
pub use response_builder::{build_blocked_response, REFUSAL_MESSAGE};
