use std::collections::{HashMap, VecDeque};

use indexmap::IndexMap;
use serde::Serialize;

use crate::types::{SignalKind, WhaleSignal};
use crate::{SIGNAL_LOG_CAPACITY, VOLUME_WINDOW};

/// Number of signals reported as recent activity in analytics.
const RECENT_ACTIVITY: usize = 5;

/// Number of tickers reported as most active in analytics.
const MOST_ACTIVE: usize = 5;

/// Readings required before a market shows up in volume trends.
const MIN_TREND_POINTS: usize = 3;

/// FIFO window of the most recent volume readings for one market.
#[derive(Debug, Clone, Default)]
pub struct VolumeSeries {
    readings: VecDeque<f64>,
}

impl VolumeSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a reading, evicting the oldest once the window is full.
    pub fn record(&mut self, volume: f64) {
        self.readings.push_back(volume);
        while self.readings.len() > VOLUME_WINDOW {
            self.readings.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn readings(&self) -> Vec<f64> {
        self.readings.iter().copied().collect()
    }

    /// Mean of every reading except the newest.
    ///
    /// `None` until the series holds at least three readings.
    pub fn mean_excluding_last(&self) -> Option<f64> {
        if self.readings.len() < 3 {
            return None;
        }
        let prior = self.readings.len() - 1;
        Some(self.readings.iter().take(prior).sum::<f64>() / prior as f64)
    }
}

/// Append-only whale signal log capped at the most recent entries.
#[derive(Debug, Clone, Default)]
pub struct SignalLog {
    signals: VecDeque<WhaleSignal>,
}

impl SignalLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extend the log and drop the oldest entries beyond capacity.
    pub fn append(&mut self, signals: impl IntoIterator<Item = WhaleSignal>) {
        self.signals.extend(signals);
        while self.signals.len() > SIGNAL_LOG_CAPACITY {
            self.signals.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Up to `n` most recent signals, oldest first.
    pub fn recent(&self, n: usize) -> Vec<WhaleSignal> {
        let skip = self.signals.len().saturating_sub(n);
        self.signals.iter().skip(skip).cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WhaleSignal> {
        self.signals.iter()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Increasing,
    Decreasing,
    Flat,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VolumeTrend {
    pub recent_average: f64,
    pub trend: Trend,
    pub volatility: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WhaleAnalytics {
    pub total_whale_signals: usize,
    pub signal_types: IndexMap<SignalKind, usize>,
    pub most_active_markets: IndexMap<String, usize>,
    pub recent_activity: Vec<WhaleSignal>,
    pub volume_trends: HashMap<String, VolumeTrend>,
}

/// Sample standard deviation; zero for fewer than two points.
pub fn sample_std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    var.sqrt()
}

/// Direction, recent average and volatility over one market's window.
pub fn volume_trend(readings: &[f64]) -> Option<VolumeTrend> {
    let (first, last) = (readings.first()?, readings.last()?);
    let tail = &readings[readings.len().saturating_sub(3)..];
    let recent_average = tail.iter().sum::<f64>() / tail.len() as f64;
    let trend = if last > first {
        Trend::Increasing
    } else if last < first {
        Trend::Decreasing
    } else {
        Trend::Flat
    };
    Some(VolumeTrend {
        recent_average,
        trend,
        volatility: sample_std_dev(readings),
    })
}

/// Aggregate view over the signal log and the per-market volume windows.
pub fn analytics<'a>(
    log: &SignalLog,
    volumes: impl IntoIterator<Item = (&'a str, &'a VolumeSeries)>,
) -> WhaleAnalytics {
    let mut signal_types: IndexMap<SignalKind, usize> = IndexMap::new();
    let mut by_ticker: IndexMap<String, usize> = IndexMap::new();
    for signal in log.iter() {
        *signal_types.entry(signal.kind).or_default() += 1;
        *by_ticker.entry(signal.ticker.clone()).or_default() += 1;
    }

    // Stable sort keeps first-encountered order among equal counts.
    by_ticker.sort_by(|_, a, _, b| b.cmp(a));
    by_ticker.truncate(MOST_ACTIVE);

    let volume_trends = volumes
        .into_iter()
        .filter(|(_, series)| series.len() >= MIN_TREND_POINTS)
        .filter_map(|(id, series)| Some((id.to_string(), volume_trend(&series.readings())?)))
        .collect();

    WhaleAnalytics {
        total_whale_signals: log.len(),
        signal_types,
        most_active_markets: by_ticker,
        recent_activity: log.recent(RECENT_ACTIVITY),
        volume_trends,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Severity, SignalData};
    use chrono::Utc;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-6
    }

    fn make_signal(n: usize, kind: SignalKind, ticker: &str) -> WhaleSignal {
        WhaleSignal {
            id: format!("sig_{n}"),
            kind,
            market_id: ticker.to_lowercase(),
            ticker: ticker.to_string(),
            confidence: 70,
            severity: Severity::Medium,
            market_impact: Severity::Medium,
            description: String::new(),
            data: SignalData::HighVolume { current_value: 0.0 },
            timestamp: Utc::now(),
        }
    }

    // ── VolumeSeries ───────────────────────────────────────────────

    #[test]
    fn series_keeps_last_twenty_in_order() {
        let mut series = VolumeSeries::new();
        for v in 0..25 {
            series.record(v as f64);
        }
        assert_eq!(series.len(), 20);
        let expected: Vec<f64> = (5..25).map(|v| v as f64).collect();
        assert_eq!(series.readings(), expected);
    }

    #[test]
    fn mean_excluding_last_requires_three() {
        let mut series = VolumeSeries::new();
        series.record(1.0);
        series.record(2.0);
        assert_eq!(series.mean_excluding_last(), None);
        series.record(100.0);
        assert!(approx_eq(series.mean_excluding_last().unwrap(), 1.5));
    }

    // ── SignalLog ──────────────────────────────────────────────────

    #[test]
    fn log_keeps_most_recent_hundred() {
        let mut log = SignalLog::new();
        for n in 0..150 {
            log.append([make_signal(n, SignalKind::OddsFlip, "BTC")]);
        }
        assert_eq!(log.len(), 100);
        let ids: Vec<String> = log.iter().map(|s| s.id.clone()).collect();
        let expected: Vec<String> = (50..150).map(|n| format!("sig_{n}")).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn log_bulk_append_trims_front() {
        let mut log = SignalLog::new();
        log.append((0..120).map(|n| make_signal(n, SignalKind::OddsFlip, "BTC")));
        assert_eq!(log.len(), 100);
        assert_eq!(log.iter().next().unwrap().id, "sig_20");
    }

    #[test]
    fn recent_returns_tail() {
        let mut log = SignalLog::new();
        log.append((0..3).map(|n| make_signal(n, SignalKind::OddsFlip, "BTC")));
        let recent = log.recent(5);
        assert_eq!(recent.len(), 3);
        let recent = log.recent(2);
        assert_eq!(recent[0].id, "sig_1");
        assert_eq!(recent[1].id, "sig_2");
    }

    // ── statistics ─────────────────────────────────────────────────

    #[test]
    fn std_dev_small_inputs() {
        assert!(approx_eq(sample_std_dev(&[]), 0.0));
        assert!(approx_eq(sample_std_dev(&[4.0]), 0.0));
    }

    #[test]
    fn std_dev_sample() {
        // mean 5, squared deviations sum 32, n-1 = 7
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!(approx_eq(sample_std_dev(&v), (32.0f64 / 7.0).sqrt()));
    }

    #[test]
    fn trend_direction() {
        assert_eq!(volume_trend(&[1.0, 2.0, 3.0]).unwrap().trend, Trend::Increasing);
        assert_eq!(volume_trend(&[3.0, 2.0, 1.0]).unwrap().trend, Trend::Decreasing);
        assert_eq!(volume_trend(&[2.0, 5.0, 2.0]).unwrap().trend, Trend::Flat);
        assert!(volume_trend(&[]).is_none());
    }

    #[test]
    fn trend_recent_average_uses_last_three() {
        let t = volume_trend(&[100.0, 1.0, 2.0, 3.0]).unwrap();
        assert!(approx_eq(t.recent_average, 2.0));
    }

    // ── analytics ──────────────────────────────────────────────────

    #[test]
    fn analytics_counts_and_ranking() {
        let mut log = SignalLog::new();
        let tickers = ["ETH", "BTC", "SOL", "BTC", "ETH", "BCH", "XRP", "DOGE", "BTC"];
        for (n, t) in tickers.iter().enumerate() {
            let kind = if n % 2 == 0 {
                SignalKind::OddsFlip
            } else {
                SignalKind::OrderBookShift
            };
            log.append([make_signal(n, kind, t)]);
        }
        let a = analytics(&log, std::iter::empty());
        assert_eq!(a.total_whale_signals, 9);
        assert_eq!(a.signal_types[&SignalKind::OddsFlip], 5);
        assert_eq!(a.signal_types[&SignalKind::OrderBookShift], 4);

        let ranked: Vec<(&str, usize)> = a
            .most_active_markets
            .iter()
            .map(|(k, v)| (k.as_str(), *v))
            .collect();
        // ties (count 1) keep first-encountered order: SOL, BCH, XRP
        assert_eq!(
            ranked,
            vec![("BTC", 3), ("ETH", 2), ("SOL", 1), ("BCH", 1), ("XRP", 1)]
        );
        assert_eq!(a.recent_activity.len(), 5);
        assert_eq!(a.recent_activity.last().unwrap().id, "sig_8");
    }

    #[test]
    fn analytics_volume_trends_need_three_points() {
        let mut short = VolumeSeries::new();
        short.record(1.0);
        short.record(2.0);
        let mut long = VolumeSeries::new();
        for v in [3.0, 2.0, 1.0] {
            long.record(v);
        }
        let log = SignalLog::new();
        let a = analytics(&log, [("short", &short), ("long", &long)]);
        assert!(!a.volume_trends.contains_key("short"));
        let t = &a.volume_trends["long"];
        assert_eq!(t.trend, Trend::Decreasing);
        assert!(approx_eq(t.volatility, 1.0));
    }
}
