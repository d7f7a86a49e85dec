use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::info;

use crate::broadcast::{Broadcaster, SubscriberId, Subscription};
use crate::cache::{MarketCache, MarketSnapshot};
use crate::detector::{DepthSource, WhaleDetector};
use crate::error::TrackerError;
use crate::history::{SignalLog, VolumeSeries, WhaleAnalytics, analytics};
use crate::source::MarketSource;
use crate::types::{Market, StreamMessage, WhaleSignal};
use crate::BROADCAST_ALERT_COUNT;

/// Phase of the update pump's cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PumpPhase {
    Idle,
    Fetching,
    Detecting,
    Publishing,
    Sleeping,
}

/// Outcome of one applied cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub timestamp: DateTime<Utc>,
    pub market_count: usize,
    pub signals: Vec<WhaleSignal>,
    pub delivered: usize,
}

/// Process-wide tracker state, built once at startup and shared by
/// reference with the pump, the query API and every connection.
pub struct Tracker {
    cache: MarketCache,
    detector: Mutex<WhaleDetector>,
    signals: RwLock<SignalLog>,
    broadcaster: Broadcaster,
    phase: RwLock<PumpPhase>,
}

impl Tracker {
    pub fn new(depth: Box<dyn DepthSource>) -> Self {
        Self::with_broadcaster(depth, Broadcaster::new())
    }

    pub fn with_broadcaster(depth: Box<dyn DepthSource>, broadcaster: Broadcaster) -> Self {
        Self {
            cache: MarketCache::new(),
            detector: Mutex::new(WhaleDetector::new(depth)),
            signals: RwLock::new(SignalLog::new()),
            broadcaster,
            phase: RwLock::new(PumpPhase::Idle),
        }
    }

    pub fn snapshot(&self) -> Arc<MarketSnapshot> {
        self.cache.read()
    }

    pub fn phase(&self) -> PumpPhase {
        *self.phase.read()
    }

    pub fn set_phase(&self, phase: PumpPhase) {
        *self.phase.write() = phase;
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    /// Up to `n` most recent signals from the global log, oldest first.
    pub fn recent_signals(&self, n: usize) -> Vec<WhaleSignal> {
        self.signals.read().recent(n)
    }

    pub fn analytics(&self) -> WhaleAnalytics {
        // detector lock is released before the view is computed
        let windows: Vec<(String, VolumeSeries)> = self
            .detector
            .lock()
            .volume_windows()
            .map(|(id, series)| (id.to_string(), series.clone()))
            .collect();
        let log = self.signals.read();
        analytics(
            &log,
            windows.iter().map(|(id, series)| (id.as_str(), series)),
        )
    }

    /// Run detection over a fresh market list, swap the cache, extend the
    /// signal log and publish the update. Leaves the pump phase untouched.
    ///
    /// The detector lock is held for the whole step, so concurrent callers
    /// (the pump and a forced refresh) apply their cycles one at a time.
    pub fn apply_markets(&self, markets: Vec<Market>, now: DateTime<Utc>) -> CycleReport {
        self.apply(markets, now, |_| {})
    }

    /// [`Tracker::apply_markets`] for the pump, which also reports the
    /// detecting and publishing phases.
    pub fn apply_pump_cycle(&self, markets: Vec<Market>, now: DateTime<Utc>) -> CycleReport {
        self.apply(markets, now, |phase| self.set_phase(phase))
    }

    fn apply(
        &self,
        markets: Vec<Market>,
        now: DateTime<Utc>,
        on_phase: impl Fn(PumpPhase),
    ) -> CycleReport {
        let mut detector = self.detector.lock();

        on_phase(PumpPhase::Detecting);
        detector.begin_cycle();
        let mut fired = Vec::new();
        for market in &markets {
            let signals = detector.evaluate(&market.key(), market, now);
            for s in &signals {
                info!(
                    kind = s.kind.as_str(),
                    ticker = %s.ticker,
                    severity = ?s.severity,
                    "Whale detected"
                );
            }
            fired.extend(signals);
        }
        detector.prune_stale();

        on_phase(PumpPhase::Publishing);
        let snapshot = self.cache.replace(markets, now);
        let recent = {
            let mut log = self.signals.write();
            log.append(fired.iter().cloned());
            log.recent(BROADCAST_ALERT_COUNT)
        };

        let delivered = self
            .broadcaster
            .publish(&StreamMessage::market_update(snapshot.markets.clone(), now));
        if !recent.is_empty() {
            let count = recent.len();
            self.broadcaster.publish(&StreamMessage::whale_alerts(recent));
            info!("Broadcasted {count} whale alerts");
        }

        info!(
            "Market data updated. Total markets: {}, whale activities: {}",
            snapshot.markets.len(),
            fired.len()
        );
        CycleReport {
            timestamp: now,
            market_count: snapshot.markets.len(),
            signals: fired,
            delivered,
        }
    }

    /// Out-of-band fetch and apply, bypassing the pump's timer.
    ///
    /// Fails with [`TrackerError::RefreshFailed`] when the source yields
    /// nothing, leaving the cache untouched. The pump phase is only ever
    /// written by the pump.
    pub async fn refresh(&self, source: &dyn MarketSource) -> Result<CycleReport, TrackerError> {
        let markets = source.fetch().await;
        if markets.is_empty() {
            return Err(TrackerError::RefreshFailed);
        }
        Ok(self.apply_markets(markets, Utc::now()))
    }

    /// Register a subscriber, queueing the current snapshot first when there
    /// is one.
    pub fn subscribe(&self) -> Subscription {
        self.broadcaster.register(|| {
            let snapshot = self.cache.read();
            let timestamp = snapshot.timestamp?;
            if snapshot.is_empty() {
                return None;
            }
            Some(StreamMessage::initial_data(
                snapshot.markets.clone(),
                timestamp,
            ))
        })
    }

    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        self.broadcaster.unregister(id)
    }

    pub fn heartbeat(&self) -> StreamMessage {
        StreamMessage::heartbeat(self.broadcaster.subscriber_count())
    }
}
