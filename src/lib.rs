//! ==============================================================================
//! lib.rs - iot sensor telemetry dashboard
//! ==============================================================================
//!
//! layout:
//!     - domain.rs / stats.rs: readings, signal tiers, aggregates
//!     - source/: where readings come from (rest poll, realtime push, mock, memory)
//!     - presenter.rs: the sans-i/o dashboard state machine
//!     - dashboard.rs: the tokio task that drives the presenter
//!     - render.rs / server.rs: html + json surface
//!
//! ==============================================================================

pub mod config;
pub mod dashboard;
pub mod domain;
pub mod error;
pub mod presenter;
pub mod render;
pub mod server;
pub mod session;
pub mod source;
pub mod stats;
