//! HTTP middleware for the read API.

pub mod logging;

pub use logging::request_logging;
