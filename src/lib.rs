//! EdgeWatch Backend Library
//!
//! Flags unusually large Polymarket trades and ranks the traders behind them
//! by how unlikely their track record is under chance alone.

pub mod api;
pub mod config;
pub mod middleware;
pub mod models;
pub mod scrapers;
pub mod signals;
