use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::history::VolumeSeries;
use crate::types::{
    Direction, Market, MarketHistoryEntry, OrderBookSnapshot, Severity, SignalData, SignalKind,
    WhaleSignal,
};
use crate::{
    ODDS_CHANGE_THRESHOLD, ORDER_BOOK_DEPTH_CHANGE_THRESHOLD, VOLUME_SURGE_THRESHOLD,
    WHALE_VOLUME_MINIMUM,
};

/// Surge multiple at which severity escalates to high.
const VOLUME_SURGE_HIGH: f64 = 5.0;

/// Odds move (points) at which severity escalates to high.
const ODDS_CHANGE_HIGH: f64 = 25.0;

/// Depth change (percent) at which severity escalates to high.
const ORDER_BOOK_CHANGE_HIGH: f64 = 50.0;

/// Cycles a market may be absent from the listing before its state is dropped.
pub const STALE_AFTER_CYCLES: u64 = 5;

/// Multiplier ranges for the three synthesized depth levels, best first.
const LEVEL_MULTIPLIERS: [(f64, f64); 3] = [(0.8, 1.2), (0.6, 0.9), (0.4, 0.7)];

/// Source of depth multipliers for order-book synthesis.
pub trait DepthSource: Send {
    /// Draw a multiplier in `[low, high)`.
    fn multiplier(&mut self, low: f64, high: f64) -> f64;
}

/// Uniformly random multipliers backed by a seedable RNG.
pub struct RandomDepth {
    rng: StdRng,
}

impl RandomDepth {
    pub fn from_os_rng() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl DepthSource for RandomDepth {
    fn multiplier(&mut self, low: f64, high: f64) -> f64 {
        self.rng.random_range(low..high)
    }
}

/// Always returns the midpoint of the range. Holds synthesized depth fixed.
#[derive(Debug, Default, Clone, Copy)]
pub struct MidpointDepth;

impl DepthSource for MidpointDepth {
    fn multiplier(&mut self, low: f64, high: f64) -> f64 {
        (low + high) / 2.0
    }
}

/// Synthesize a three-level book scaled by `max(1, volume / 1M)`.
///
/// Not a real feed: the upstream listing carries no depth.
pub fn synthesize_order_book(volume: f64, depth: &mut dyn DepthSource) -> OrderBookSnapshot {
    let base = (volume / 1_000_000.0).max(1.0);
    let bids = synthesize_side(base, depth);
    let asks = synthesize_side(base, depth);
    OrderBookSnapshot { bids, asks }
}

fn synthesize_side(base: f64, depth: &mut dyn DepthSource) -> [f64; 3] {
    LEVEL_MULTIPLIERS.map(|(low, high)| (base * depth.multiplier(low, high)).max(1.0))
}

/// Percent change in summed bid depth; zero when the previous depth is zero.
pub fn order_book_change(previous: &OrderBookSnapshot, current: &OrderBookSnapshot) -> f64 {
    let prev = previous.bid_depth();
    if prev == 0.0 {
        return 0.0;
    }
    (current.bid_depth() - prev).abs() / prev * 100.0
}

#[derive(Debug)]
struct TrackedMarket {
    last: MarketHistoryEntry,
    volumes: VolumeSeries,
    last_seen_cycle: u64,
}

/// Per-market anomaly detector.
///
/// Owns the last reading and the volume window of every market it has
/// evaluated. An entry exists for a market id iff it has been evaluated at
/// least once and has not since gone stale.
pub struct WhaleDetector {
    markets: HashMap<String, TrackedMarket>,
    depth: Box<dyn DepthSource>,
    cycle: u64,
    emitted: u64,
}

impl WhaleDetector {
    pub fn new(depth: Box<dyn DepthSource>) -> Self {
        Self {
            markets: HashMap::new(),
            depth,
            cycle: 0,
            emitted: 0,
        }
    }

    /// Mark the start of a new cycle for staleness tracking.
    pub fn begin_cycle(&mut self) {
        self.cycle += 1;
    }

    /// Drop state for markets unseen for more than [`STALE_AFTER_CYCLES`] cycles.
    ///
    /// Returns the number of markets pruned.
    pub fn prune_stale(&mut self) -> usize {
        let before = self.markets.len();
        let cycle = self.cycle;
        self.markets
            .retain(|_, tracked| cycle.saturating_sub(tracked.last_seen_cycle) < STALE_AFTER_CYCLES);
        let pruned = before - self.markets.len();
        if pruned > 0 {
            debug!("Pruned {pruned} stale market(s) from detector state");
        }
        pruned
    }

    pub fn tracked_count(&self) -> usize {
        self.markets.len()
    }

    pub fn history(&self, market_id: &str) -> Option<&MarketHistoryEntry> {
        self.markets.get(market_id).map(|t| &t.last)
    }

    pub fn volume_series(&self, market_id: &str) -> Option<&VolumeSeries> {
        self.markets.get(market_id).map(|t| &t.volumes)
    }

    /// All volume windows keyed by market id.
    pub fn volume_windows(&self) -> impl Iterator<Item = (&str, &VolumeSeries)> {
        self.markets
            .iter()
            .map(|(id, tracked)| (id.as_str(), &tracked.volumes))
    }

    /// Evaluate one market against its retained history.
    ///
    /// The first sighting only seeds history. Afterwards the volume surge,
    /// odds flip and order-book shift checks all run, and every signal that
    /// fires is returned in that order. History is overwritten with the
    /// current reading on every call.
    pub fn evaluate(
        &mut self,
        market_id: &str,
        market: &Market,
        now: DateTime<Utc>,
    ) -> Vec<WhaleSignal> {
        let volume = market.volume;
        let odds = market.close_price;
        let book = synthesize_order_book(volume, self.depth.as_mut());
        let current = MarketHistoryEntry {
            volume,
            odds,
            order_book: book,
            timestamp: now,
        };

        let Some(tracked) = self.markets.get_mut(market_id) else {
            self.markets.insert(
                market_id.to_string(),
                TrackedMarket {
                    last: current,
                    volumes: VolumeSeries::new(),
                    last_seen_cycle: self.cycle,
                },
            );
            return Vec::new();
        };

        let previous = std::mem::replace(&mut tracked.last, current);
        tracked.last_seen_cycle = self.cycle;
        let mut fired = Vec::new();

        if volume > WHALE_VOLUME_MINIMUM {
            tracked.volumes.record(volume);
            let growth = tracked
                .volumes
                .mean_excluding_last()
                .filter(|mean| *mean > 0.0)
                .map_or(1.0, |mean| volume / mean);
            if growth >= VOLUME_SURGE_THRESHOLD {
                fired.push((
                    SignalKind::VolumeSurge,
                    85,
                    escalate(growth, VOLUME_SURGE_HIGH),
                    Severity::High,
                    format!("Volume surge: {growth:.1}x trailing average"),
                    SignalData::VolumeSurge {
                        current_value: volume,
                        previous_value: previous.volume,
                        growth_multiple: growth,
                    },
                ));
            }
        }

        let delta = odds - previous.odds;
        if delta.abs() >= ODDS_CHANGE_THRESHOLD {
            let change = delta.abs();
            let direction = if delta > 0.0 { Direction::Up } else { Direction::Down };
            fired.push((
                SignalKind::OddsFlip,
                75,
                escalate(change, ODDS_CHANGE_HIGH),
                Severity::Medium,
                format!("Odds moved {change:.1} points"),
                SignalData::OddsFlip {
                    current_value: odds,
                    previous_value: previous.odds,
                    change_percent: change,
                    direction,
                },
            ));
        }

        let current_book = &tracked.last.order_book;
        let change = order_book_change(&previous.order_book, current_book);
        if change >= ORDER_BOOK_DEPTH_CHANGE_THRESHOLD {
            fired.push((
                SignalKind::OrderBookShift,
                70,
                escalate(change, ORDER_BOOK_CHANGE_HIGH),
                Severity::Medium,
                format!("Bid depth shifted {change:.1}%"),
                SignalData::OrderBookShift {
                    change_percent: change,
                    previous_value: previous.order_book.bid_depth(),
                    current_value: current_book.bid_depth(),
                },
            ));
        }

        fired
            .into_iter()
            .map(|(kind, confidence, severity, market_impact, description, data)| {
                self.emitted += 1;
                WhaleSignal {
                    id: format!(
                        "{}_{market_id}_{}_{}",
                        kind.id_prefix(),
                        now.timestamp_micros(),
                        self.emitted
                    ),
                    kind,
                    market_id: market_id.to_string(),
                    ticker: market.ticker.clone(),
                    confidence,
                    severity,
                    market_impact,
                    description,
                    data,
                    timestamp: now,
                }
            })
            .collect()
    }
}

fn escalate(value: f64, high_at: f64) -> Severity {
    if value >= high_at {
        Severity::High
    } else {
        Severity::Medium
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    /// Replays a scripted list of multipliers, then falls back to the midpoint.
    struct ScriptedDepth(Vec<f64>);

    impl DepthSource for ScriptedDepth {
        fn multiplier(&mut self, low: f64, high: f64) -> f64 {
            if self.0.is_empty() {
                (low + high) / 2.0
            } else {
                self.0.remove(0)
            }
        }
    }

    fn fixed_detector() -> WhaleDetector {
        WhaleDetector::new(Box::new(MidpointDepth))
    }

    fn make_market(volume: f64, close_price: f64) -> Market {
        Market {
            id: Some("m1".to_string()),
            ticker: "BTC-100K".to_string(),
            title: "Bitcoin above 100k?".to_string(),
            volume,
            close_price,
            liquidity: 0.0,
            status: "open".to_string(),
            category: None,
            frequency: None,
            volume_millions: volume / 1_000_000.0,
            last_updated: Utc::now(),
        }
    }

    fn kinds(signals: &[WhaleSignal]) -> Vec<SignalKind> {
        signals.iter().map(|s| s.kind).collect()
    }

    // ── synthesize_order_book ──────────────────────────────────────

    #[test]
    fn book_scales_with_volume() {
        let book = synthesize_order_book(10_000_000.0, &mut MidpointDepth);
        assert!(approx_eq(book.bids[0], 10.0));
        assert!(approx_eq(book.bids[1], 7.5));
        assert!(approx_eq(book.bids[2], 5.5));
        assert_eq!(book.bids, book.asks);
        assert!(approx_eq(book.bid_depth(), 23.0));
    }

    #[test]
    fn book_floors_levels_at_one() {
        let book = synthesize_order_book(0.0, &mut MidpointDepth);
        assert_eq!(book.bids, [1.0, 1.0, 1.0]);
        assert_eq!(book.asks, [1.0, 1.0, 1.0]);
    }

    #[test]
    fn random_book_levels_within_range() {
        let mut depth = RandomDepth::seeded(7);
        for _ in 0..50 {
            let book = synthesize_order_book(5_000_000.0, &mut depth);
            for (level, (low, high)) in book.bids.iter().zip(LEVEL_MULTIPLIERS) {
                assert!(*level >= 5.0 * low && *level < 5.0 * high);
            }
        }
    }

    #[test]
    fn seeded_depth_is_deterministic() {
        let a = synthesize_order_book(3_000_000.0, &mut RandomDepth::seeded(42));
        let b = synthesize_order_book(3_000_000.0, &mut RandomDepth::seeded(42));
        assert_eq!(a, b);
    }

    #[test]
    fn book_change_zero_previous() {
        let zero = OrderBookSnapshot {
            bids: [0.0; 3],
            asks: [0.0; 3],
        };
        let book = synthesize_order_book(0.0, &mut MidpointDepth);
        assert!(approx_eq(order_book_change(&zero, &book), 0.0));
    }

    // ── evaluate: baseline ─────────────────────────────────────────

    #[test]
    fn first_sighting_seeds_without_signal() {
        let mut d = fixed_detector();
        let now = Utc::now();
        assert!(d.history("m1").is_none());
        let signals = d.evaluate("m1", &make_market(5_000_000.0, 40.0), now);
        assert!(signals.is_empty());
        let entry = d.history("m1").unwrap();
        assert!(approx_eq(entry.volume, 5_000_000.0));
        assert!(approx_eq(entry.odds, 40.0));
        assert_eq!(entry.timestamp, now);
        // the seeding sighting does not feed the volume window
        assert!(d.volume_series("m1").unwrap().is_empty());
    }

    #[test]
    fn unchanged_input_is_quiet() {
        let mut d = fixed_detector();
        let m = make_market(2_000_000.0, 55.0);
        assert!(d.evaluate("m1", &m, Utc::now()).is_empty());
        assert!(d.evaluate("m1", &m, Utc::now()).is_empty());
        assert!(d.evaluate("m1", &m, Utc::now()).is_empty());
    }

    #[test]
    fn history_overwritten_every_call() {
        let mut d = fixed_detector();
        d.evaluate("m1", &make_market(100.0, 50.0), Utc::now());
        d.evaluate("m1", &make_market(200.0, 52.0), Utc::now());
        let entry = d.history("m1").unwrap();
        assert!(approx_eq(entry.volume, 200.0));
        assert!(approx_eq(entry.odds, 52.0));
    }

    // ── evaluate: volume surge ─────────────────────────────────────

    #[test]
    fn volume_surge_fires_medium() {
        let mut d = fixed_detector();
        let readings = [1_200_000.0, 1_200_000.0, 1_200_000.0, 1_210_000.0];
        for v in readings {
            assert!(d.evaluate("m1", &make_market(v, 50.0), Utc::now()).is_empty());
        }
        let signals = d.evaluate("m1", &make_market(4_000_000.0, 50.0), Utc::now());
        let surge: Vec<_> = signals
            .iter()
            .filter(|s| s.kind == SignalKind::VolumeSurge)
            .collect();
        assert_eq!(surge.len(), 1);
        assert_eq!(surge[0].severity, Severity::Medium);
        assert_eq!(surge[0].confidence, 85);
        match &surge[0].data {
            SignalData::VolumeSurge {
                growth_multiple,
                previous_value,
                ..
            } => {
                assert!(*growth_multiple >= 3.3 && *growth_multiple < 3.4);
                assert!(approx_eq(*previous_value, 1_210_000.0));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn volume_surge_high_severity() {
        let mut d = fixed_detector();
        for v in [1_100_000.0, 1_100_000.0, 1_100_000.0] {
            d.evaluate("m1", &make_market(v, 50.0), Utc::now());
        }
        let signals = d.evaluate("m1", &make_market(6_000_000.0, 50.0), Utc::now());
        let surge = signals
            .iter()
            .find(|s| s.kind == SignalKind::VolumeSurge)
            .unwrap();
        assert_eq!(surge.severity, Severity::High);
    }

    #[test]
    fn volume_surge_needs_three_prior_readings() {
        let mut d = fixed_detector();
        d.evaluate("m1", &make_market(1_100_000.0, 50.0), Utc::now());
        d.evaluate("m1", &make_market(1_100_000.0, 50.0), Utc::now());
        // third reading overall: window holds only one prior reading
        let signals = d.evaluate("m1", &make_market(9_000_000.0, 50.0), Utc::now());
        assert!(!kinds(&signals).contains(&SignalKind::VolumeSurge));
    }

    #[test]
    fn volume_below_minimum_never_surges() {
        let mut d = fixed_detector();
        for v in [100.0, 100.0, 100.0, 100.0] {
            d.evaluate("m1", &make_market(v, 50.0), Utc::now());
        }
        let signals = d.evaluate("m1", &make_market(1_000_000.0, 50.0), Utc::now());
        assert!(signals.is_empty());
        assert!(d.volume_series("m1").unwrap().is_empty());
    }

    #[test]
    fn volume_window_bounded() {
        let mut d = fixed_detector();
        for _ in 0..30 {
            d.evaluate("m1", &make_market(2_000_000.0, 50.0), Utc::now());
        }
        assert_eq!(d.volume_series("m1").unwrap().len(), 20);
    }

    // ── evaluate: odds flip ────────────────────────────────────────

    #[test]
    fn odds_flip_boundary_fires() {
        let mut d = fixed_detector();
        d.evaluate("m1", &make_market(100.0, 50.0), Utc::now());
        let signals = d.evaluate("m1", &make_market(100.0, 65.0), Utc::now());
        assert_eq!(kinds(&signals), vec![SignalKind::OddsFlip]);
        assert_eq!(signals[0].severity, Severity::Medium);
        match &signals[0].data {
            SignalData::OddsFlip {
                direction,
                change_percent,
                ..
            } => {
                assert_eq!(*direction, Direction::Up);
                assert!(approx_eq(*change_percent, 15.0));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn odds_just_below_threshold_is_quiet() {
        let mut d = fixed_detector();
        d.evaluate("m1", &make_market(100.0, 50.0), Utc::now());
        let signals = d.evaluate("m1", &make_market(100.0, 64.99), Utc::now());
        assert!(signals.is_empty());
    }

    #[test]
    fn odds_flip_down_high() {
        let mut d = fixed_detector();
        d.evaluate("m1", &make_market(100.0, 80.0), Utc::now());
        let signals = d.evaluate("m1", &make_market(100.0, 50.0), Utc::now());
        assert_eq!(signals[0].severity, Severity::High);
        match &signals[0].data {
            SignalData::OddsFlip { direction, .. } => assert_eq!(*direction, Direction::Down),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    // ── evaluate: order book shift ─────────────────────────────────

    #[test]
    fn order_book_shift_fires() {
        // first book at the range bottoms, second at the midpoints
        let mut script = vec![0.8, 0.6, 0.4, 0.8, 0.6, 0.4];
        script.extend([1.0, 0.75, 0.55, 1.0, 0.75, 0.55]);
        let mut d = WhaleDetector::new(Box::new(ScriptedDepth(script)));
        let m = make_market(10_000_000.0, 50.0);
        d.evaluate("m1", &m, Utc::now());
        let signals = d.evaluate("m1", &m, Utc::now());
        assert_eq!(kinds(&signals), vec![SignalKind::OrderBookShift]);
        let s = &signals[0];
        assert_eq!(s.severity, Severity::Medium);
        match &s.data {
            SignalData::OrderBookShift {
                change_percent,
                previous_value,
                current_value,
            } => {
                assert!(approx_eq(*previous_value, 18.0));
                assert!(approx_eq(*current_value, 23.0));
                assert!(approx_eq(*change_percent, 5.0 / 18.0 * 100.0));
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn order_book_tracks_volume_growth() {
        let mut d = fixed_detector();
        d.evaluate("m1", &make_market(10_000_000.0, 50.0), Utc::now());
        // depth doubles with volume: a 100% change
        let signals = d.evaluate("m1", &make_market(20_000_000.0, 50.0), Utc::now());
        let shift = signals
            .iter()
            .find(|s| s.kind == SignalKind::OrderBookShift)
            .unwrap();
        assert_eq!(shift.severity, Severity::High);
    }

    // ── evaluate: simultaneous triggers ────────────────────────────

    #[test]
    fn all_fired_signals_returned_in_order() {
        let mut d = fixed_detector();
        for _ in 0..4 {
            d.evaluate("m1", &make_market(2_000_000.0, 20.0), Utc::now());
        }
        let signals = d.evaluate("m1", &make_market(12_000_000.0, 60.0), Utc::now());
        assert_eq!(
            kinds(&signals),
            vec![
                SignalKind::VolumeSurge,
                SignalKind::OddsFlip,
                SignalKind::OrderBookShift
            ]
        );
        let ids: std::collections::HashSet<_> = signals.iter().map(|s| &s.id).collect();
        assert_eq!(ids.len(), 3);
        assert!(signals.iter().all(|s| s.market_id == "m1" && s.ticker == "BTC-100K"));
    }

    #[test]
    fn ids_unique_across_calls_with_same_clock() {
        let mut d = fixed_detector();
        let now = Utc::now();
        d.evaluate("m1", &make_market(100.0, 10.0), now);
        let a = d.evaluate("m1", &make_market(100.0, 50.0), now);
        let b = d.evaluate("m1", &make_market(100.0, 10.0), now);
        assert!(a[0].id.starts_with("odds_m1_"));
        assert_ne!(a[0].id, b[0].id);
    }

    // ── staleness ──────────────────────────────────────────────────

    #[test]
    fn stale_markets_pruned() {
        let mut d = fixed_detector();
        let now = Utc::now();
        d.begin_cycle();
        d.evaluate("gone", &make_market(100.0, 50.0), now);
        d.evaluate("kept", &make_market(100.0, 50.0), now);
        assert_eq!(d.prune_stale(), 0);

        for n in 1..=STALE_AFTER_CYCLES {
            d.begin_cycle();
            d.evaluate("kept", &make_market(100.0, 50.0), now + Duration::seconds(n as i64));
            let pruned = d.prune_stale();
            if n < STALE_AFTER_CYCLES {
                assert_eq!(pruned, 0);
            } else {
                assert_eq!(pruned, 1);
            }
        }
        assert!(d.history("gone").is_none());
        assert!(d.history("kept").is_some());
        assert_eq!(d.tracked_count(), 1);
    }
}
