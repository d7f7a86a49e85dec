pub mod broadcast;
pub mod cache;
pub mod config;
pub mod detector;
pub mod engine;
pub mod error;
pub mod history;
pub mod query;
pub mod reporter;
pub mod server;
pub mod source;
pub mod state;
pub mod types;

use std::time::Duration;

/// Kalshi trade API base URL (public, no auth required for listings)
pub const KALSHI_API_BASE: &str = "https://api.elections.kalshi.com/trade-api/v2";

/// Case-insensitive substrings that mark a market as crypto-related.
pub const CRYPTO_KEYWORDS: &[&str] = &[
    "btc", "eth", "crypto", "bitcoin", "ethereum", "sol", "solana", "bch",
];

/// Markets at or below this volume are never checked for a volume surge.
pub const WHALE_VOLUME_MINIMUM: f64 = 1_000_000.0;

/// Growth multiple over the trailing mean that counts as a surge.
pub const VOLUME_SURGE_THRESHOLD: f64 = 3.0;

/// Absolute close-price move (percentage points) that counts as an odds flip.
pub const ODDS_CHANGE_THRESHOLD: f64 = 15.0;

/// Percent change in summed bid depth that counts as an order-book shift.
pub const ORDER_BOOK_DEPTH_CHANGE_THRESHOLD: f64 = 25.0;

/// Per-market volume readings kept for surge and trend analytics.
pub const VOLUME_WINDOW: usize = 20;

/// Global whale signal log capacity.
pub const SIGNAL_LOG_CAPACITY: usize = 100;

/// Number of most-recent signals pushed to subscribers after each cycle.
pub const BROADCAST_ALERT_COUNT: usize = 5;

/// Outbound messages buffered per subscriber before it counts as stalled.
pub const SUBSCRIBER_BUFFER: usize = 32;

/// Upper bound on a single WebSocket write before the subscriber is dropped.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(5);
