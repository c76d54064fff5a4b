//! Error types for homeagent core
//!
//! Re-exported from the shared `ha-error` crate so every crate agrees on one enum.

pub use ha_error::{AgentError, Result};
