//! HTTP server subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum router, service endpoints)
//!     → middleware.rs (recovery, access log, CORS, content-type)
//!     → capture.rs (request id, body capture, log submission)
//!     → proxy handler (route, guardrails, forward)
//! ```

pub mod capture;
pub mod compression;
pub mod middleware;
pub mod server;

pub use server::build_router;
