//! Process plumbing for the checkout server.
//!
//! | Module | Description | Feature |
//! |--------|-------------|---------|
//! | [`sig_down`] | SIGTERM / SIGINT handling for graceful shutdown | - |
//! | [`telemetry`] | Log subscriber, HTTP request spans, OTLP export | OTLP export behind `telemetry` |

pub mod sig_down;
pub mod telemetry;

pub use sig_down::*;
pub use telemetry::*;
