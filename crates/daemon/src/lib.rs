//! Gearflow scheduler daemon
//!
//! Composition root: settings, SQLite wiring and the optional OTLP layer.
//! The binary in `main.rs` adds logging, the orphan sweeper and the RPC server.

pub mod settings;
pub mod telemetry;
pub mod wiring;

pub use settings::DaemonSettings;
pub use wiring::{build_services, Wiring};
