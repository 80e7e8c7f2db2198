//! # keygate-server
//!
//! HTTP server for the Keygate identity broker: configuration loading,
//! tracing, app assembly and the background garbage collector.

pub mod config;
pub mod middleware;
pub mod observability;
pub mod server;

pub use server::{KeygateServer, ServerBuilder, ServerError, build_app, build_state};
