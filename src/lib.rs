//! LLM API gateway.
//!
//! A reverse proxy that sits between client applications and upstream LLM
//! HTTP APIs, interposing a pipeline of pluggable content-safety guardrails
//! on request and response bodies and recording every transaction to
//! durable storage without adding synchronous latency.
//!
//! # Architecture Overview
//!
//! ```text
//!                  ┌──────────────────────────────────────────────────┐
//!                  │                    GATEWAY                       │
//!  Client Request  │  ┌──────────┐   ┌─────────┐   ┌──────────────┐  │
//!  ────────────────┼─▶│middleware│──▶│ capture │──▶│ proxy handler│  │
//!                  │  └──────────┘   └─────────┘   └──────┬───────┘  │
//!                  │                                      │          │
//!                  │                 ┌─────────────┐      ▼          │
//!                  │                 │  guardrail  │  ┌──────────┐   │    Upstream
//!                  │                 │  executor   │◀─┤ provider ├───┼──▶ LLM API
//!                  │                 └──────┬──────┘  └──────────┘   │
//!                  │                        │ metrics                │
//!                  │  ┌──────────┐   ┌──────▼──────┐                 │
//!  Client Response │  │ log sink │   │metrics sink │   (async,      │
//!  ◀───────────────┼──┤          │   │             │    batched)    │
//!                  │  └────┬─────┘   └──────┬──────┘                 │
//!                  │       └───────┬────────┘                        │
//!                  │               ▼                                 │
//!                  │          PostgreSQL                             │
//!                  └──────────────────────────────────────────────────┘
//! ```

// Core subsystems
pub mod config;
pub mod guardrails;
pub mod providers;
pub mod proxy;

// Transport
pub mod http;

// Persistence
pub mod storage;

// Cross-cutting concerns
pub mod lifecycle;

pub use config::Config;
pub use guardrails::{Executor, Registry};
pub use lifecycle::Shutdown;
pub use proxy::AppState;
