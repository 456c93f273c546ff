//! Infrastructure adapters and runtime bootstrap.

pub mod dns;
pub mod edge;
pub mod error;
pub mod files;
pub mod http;
pub mod telemetry;
pub mod visit_log;
