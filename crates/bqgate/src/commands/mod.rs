//! Command handlers for the bqgate CLI.

pub mod auth;
pub mod logging;
pub mod mcp;

pub use auth::*;
pub use logging::*;
pub use mcp::*;
