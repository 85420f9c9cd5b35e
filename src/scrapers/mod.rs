pub mod polymarket_api;

pub use polymarket_api::{MarketDataSource, PolymarketDataClient, DATA_API_BASE};
