//! Lifecycle management.
//!
//! # Data Flow
//! ```text
//! Shutdown:
//!     Signal received → Stop accepting → Drain handlers (30s)
//!         → Close sinks (final flushes, 30s each) → Close storage → Exit
//! ```

pub mod shutdown;

pub use shutdown::{wait_for_signal, Shutdown};
