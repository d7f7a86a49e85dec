use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::types::Market;

/// The cached market list and the time it was fetched.
#[derive(Debug, Clone, Default)]
pub struct MarketSnapshot {
    pub markets: Vec<Market>,
    /// `None` until the first successful cycle.
    pub timestamp: Option<DateTime<Utc>>,
}

impl MarketSnapshot {
    pub fn is_empty(&self) -> bool {
        self.markets.is_empty()
    }
}

/// Latest snapshot, swapped wholesale by a single writer.
///
/// Readers clone the `Arc` under the lock and never hold it while working on
/// the data, so a reader sees either the old or the new snapshot, never a
/// mix of the two.
#[derive(Debug, Default)]
pub struct MarketCache {
    current: RwLock<Arc<MarketSnapshot>>,
}

impl MarketCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, markets: Vec<Market>, timestamp: DateTime<Utc>) -> Arc<MarketSnapshot> {
        let snapshot = Arc::new(MarketSnapshot {
            markets,
            timestamp: Some(timestamp),
        });
        *self.current.write() = Arc::clone(&snapshot);
        snapshot
    }

    pub fn read(&self) -> Arc<MarketSnapshot> {
        Arc::clone(&self.current.read())
    }
}
