//! Read-only views served by the HTTP API.
//!
//! Every view is computed from one snapshot `Arc` and a copy of the signal
//! log taken up front, so a concurrent pump cycle never shows through half
//! way.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::state::{CycleReport, PumpPhase, Tracker};
use crate::types::{Market, Severity, SignalData, SignalKind, WhaleSignal};
use crate::{
    ODDS_CHANGE_THRESHOLD, ORDER_BOOK_DEPTH_CHANGE_THRESHOLD, VOLUME_SURGE_THRESHOLD,
    WHALE_VOLUME_MINIMUM,
};

/// Default `limit` for the top-markets view.
pub const DEFAULT_TOP_LIMIT: usize = 5;

/// Signals from the global log considered by the alerts view.
const ALERT_WINDOW: usize = 10;

/// Markets above this volume are flagged as trending.
const TRENDING_VOLUME: f64 = 1_000_000.0;

/// Markets above this liquidity are flagged as highly liquid.
const HIGH_LIQUIDITY: f64 = 50_000.0;

const HIGH_VOLUME_CONFIDENCE: u8 = 80;

#[derive(Debug, Clone, Serialize)]
pub struct SnapshotView {
    pub markets: Vec<Market>,
    pub count: usize,
    pub timestamp: DateTime<Utc>,
}

/// The cached market list. Before the first cycle this is empty and
/// stamped with the current time.
pub fn snapshot(tracker: &Tracker) -> SnapshotView {
    let snap = tracker.snapshot();
    SnapshotView {
        markets: snap.markets.clone(),
        count: snap.markets.len(),
        timestamp: snap.timestamp.unwrap_or_else(Utc::now),
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub status: &'static str,
    pub timestamp: DateTime<Utc>,
    pub last_update: Option<DateTime<Utc>>,
    pub active_connections: usize,
    pub total_markets: usize,
    pub websocket_enabled: bool,
    pub pump_phase: PumpPhase,
}

pub fn status(tracker: &Tracker) -> StatusView {
    let snap = tracker.snapshot();
    StatusView {
        status: "running",
        timestamp: Utc::now(),
        last_update: snap.timestamp.filter(|_| !snap.is_empty()),
        active_connections: tracker.broadcaster().subscriber_count(),
        total_markets: snap.markets.len(),
        websocket_enabled: true,
        pump_phase: tracker.phase(),
    }
}

/// Markets sorted by volume, descending. Ties keep cache order.
fn by_volume(markets: &[Market], limit: usize) -> Vec<Market> {
    let mut sorted = markets.to_vec();
    sorted.sort_by(|a, b| b.volume.total_cmp(&a.volume));
    sorted.truncate(limit);
    sorted
}

#[derive(Debug, Clone, Serialize)]
pub struct TopMarketsView {
    pub markets: Vec<Market>,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
}

pub fn top_markets(tracker: &Tracker, limit: usize) -> TopMarketsView {
    let snap = tracker.snapshot();
    if snap.is_empty() {
        return TopMarketsView {
            markets: Vec::new(),
            count: 0,
            error: Some("No data available"),
        };
    }
    let markets = by_volume(&snap.markets, limit);
    TopMarketsView {
        count: markets.len(),
        markets,
        error: None,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Outcome {
    pub title: &'static str,
    pub description: &'static str,
    pub probability: f64,
}

/// Presentation record for the detailed top-5 view.
#[derive(Debug, Clone, Serialize)]
pub struct MarketDetail {
    pub id: String,
    pub question: String,
    pub category: String,
    pub last_update: DateTime<Utc>,
    pub volume: f64,
    pub cadence: String,
    pub trending: bool,
    pub outcomes: [Outcome; 2],
    pub high_volume: bool,
    pub high_liquidity: bool,
    pub recent: bool,
    pub status: String,
    pub ticker_symbol: String,
}

impl MarketDetail {
    pub fn from_market(m: &Market) -> Self {
        let p = m.close_price / 100.0;
        Self {
            id: m.id.clone().unwrap_or_else(|| m.ticker.clone()),
            question: if m.title.is_empty() {
                "N/A".to_string()
            } else {
                m.title.clone()
            },
            category: m.category.clone().unwrap_or_else(|| "Crypto".to_string()),
            last_update: m.last_updated,
            volume: m.volume,
            cadence: m.frequency.clone().unwrap_or_else(|| "Annually".to_string()),
            trending: m.volume > TRENDING_VOLUME,
            outcomes: [
                Outcome {
                    title: "YES",
                    description: "YES outcome",
                    probability: p,
                },
                Outcome {
                    title: "NO",
                    description: "NO outcome",
                    probability: 1.0 - p,
                },
            ],
            high_volume: m.volume > WHALE_VOLUME_MINIMUM,
            high_liquidity: m.liquidity > HIGH_LIQUIDITY,
            recent: true,
            status: m.status.clone(),
            ticker_symbol: m.ticker.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TopDetailView {
    pub markets: Vec<MarketDetail>,
    pub count: usize,
    pub timestamp: DateTime<Utc>,
}

pub fn top5_detailed(tracker: &Tracker) -> TopDetailView {
    let snap = tracker.snapshot();
    let markets: Vec<MarketDetail> = by_volume(&snap.markets, DEFAULT_TOP_LIMIT)
        .iter()
        .map(MarketDetail::from_market)
        .collect();
    TopDetailView {
        count: markets.len(),
        markets,
        timestamp: Utc::now(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DetectionTypes {
    pub volume_surge: bool,
    pub odds_flip: bool,
    pub order_book_shift: bool,
    pub high_volume: bool,
}

impl DetectionTypes {
    fn from_alerts(alerts: &[WhaleSignal]) -> Self {
        let has = |kind| alerts.iter().any(|a| a.kind == kind);
        Self {
            volume_surge: has(SignalKind::VolumeSurge),
            odds_flip: has(SignalKind::OddsFlip),
            order_book_shift: has(SignalKind::OrderBookShift),
            high_volume: has(SignalKind::HighVolume),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Thresholds {
    pub volume_surge_multiplier: f64,
    pub odds_change_percent: f64,
    pub order_book_change_percent: f64,
    pub minimum_volume: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            volume_surge_multiplier: VOLUME_SURGE_THRESHOLD,
            odds_change_percent: ODDS_CHANGE_THRESHOLD,
            order_book_change_percent: ORDER_BOOK_DEPTH_CHANGE_THRESHOLD,
            minimum_volume: WHALE_VOLUME_MINIMUM,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertsData {
    pub alerts: Vec<WhaleSignal>,
    pub count: usize,
    pub whale_signals_count: usize,
    pub high_volume_count: usize,
    pub detection_types: DetectionTypes,
    pub thresholds: Thresholds,
}

#[derive(Debug, Clone, Serialize)]
pub struct WhaleAlertsView {
    pub data: AlertsData,
    pub timestamp: DateTime<Utc>,
    pub status: &'static str,
}

/// Standing alert for a cached market trading above the whale minimum.
pub fn high_volume_alert(market: &Market) -> WhaleSignal {
    let key = market.key();
    WhaleSignal {
        id: format!("{}_{key}", SignalKind::HighVolume.id_prefix()),
        kind: SignalKind::HighVolume,
        market_id: key,
        ticker: market.ticker.clone(),
        confidence: HIGH_VOLUME_CONFIDENCE,
        severity: Severity::Medium,
        market_impact: Severity::High,
        description: format!(
            "High volume trading detected: ${}",
            group_thousands(market.volume)
        ),
        data: SignalData::HighVolume {
            current_value: market.volume,
        },
        timestamp: market.last_updated,
    }
}

/// Merge recent detector signals with standing high-volume alerts.
///
/// Real signals win on id collisions; the result is newest first.
pub fn whale_alerts(tracker: &Tracker) -> WhaleAlertsView {
    let recent = tracker.recent_signals(ALERT_WINDOW);
    let snap = tracker.snapshot();
    let high_volume: Vec<WhaleSignal> = snap
        .markets
        .iter()
        .filter(|m| m.volume > WHALE_VOLUME_MINIMUM)
        .map(high_volume_alert)
        .collect();

    let whale_signals_count = recent.len();
    let high_volume_count = high_volume.len();

    let mut seen = HashSet::new();
    let mut alerts: Vec<WhaleSignal> = recent
        .into_iter()
        .chain(high_volume)
        .filter(|a| seen.insert(a.id.clone()))
        .collect();
    alerts.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));

    WhaleAlertsView {
        data: AlertsData {
            count: alerts.len(),
            whale_signals_count,
            high_volume_count,
            detection_types: DetectionTypes::from_alerts(&alerts),
            thresholds: Thresholds::default(),
            alerts,
        },
        timestamp: Utc::now(),
        status: "success",
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshView {
    pub success: bool,
    pub message: &'static str,
    pub count: usize,
    pub timestamp: DateTime<Utc>,
    pub whale_signals: usize,
}

impl From<&CycleReport> for RefreshView {
    fn from(report: &CycleReport) -> Self {
        Self {
            success: true,
            message: "Data refreshed successfully",
            count: report.market_count,
            timestamp: report.timestamp,
            whale_signals: report.signals.len(),
        }
    }
}

/// `1234567.8` -> `"1,234,568"`.
fn group_thousands(value: f64) -> String {
    let digits = format!("{:.0}", value.abs());
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    if value < 0.0 {
        out.insert(0, '-');
    }
    out
}
