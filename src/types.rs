use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A crypto-filtered market as cached and broadcast for one cycle.
///
/// Markets are rebuilt from the upstream listing every cycle and replaced
/// wholesale; nothing mutates a `Market` after it has been fetched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    #[serde(default)]
    pub id: Option<String>,
    pub ticker: String,
    pub title: String,
    pub volume: f64,
    /// Last close price in cents, i.e. probability x 100.
    pub close_price: f64,
    pub liquidity: f64,
    pub status: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub frequency: Option<String>,
    pub volume_millions: f64,
    pub last_updated: DateTime<Utc>,
}

impl Market {
    /// Identity key: upstream `id` when present, else the lowercased ticker.
    pub fn key(&self) -> String {
        match &self.id {
            Some(id) if !id.is_empty() => id.clone(),
            _ => self.ticker.to_lowercase(),
        }
    }
}

/// Three-level synthesized depth on each side of the book.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBookSnapshot {
    pub bids: [f64; 3],
    pub asks: [f64; 3],
}

impl OrderBookSnapshot {
    pub fn bid_depth(&self) -> f64 {
        self.bids.iter().sum()
    }

    pub fn ask_depth(&self) -> f64 {
        self.asks.iter().sum()
    }
}

/// Last reading retained per market id, used as the baseline for the next one.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketHistoryEntry {
    pub volume: f64,
    pub odds: f64,
    pub order_book: OrderBookSnapshot,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    VolumeSurge,
    OddsFlip,
    OrderBookShift,
    /// Only synthesized by the alerts view for markets above the whale minimum.
    HighVolume,
}

impl SignalKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalKind::VolumeSurge => "volume_surge",
            SignalKind::OddsFlip => "odds_flip",
            SignalKind::OrderBookShift => "order_book_shift",
            SignalKind::HighVolume => "high_volume",
        }
    }

    /// Short prefix used when deriving signal ids.
    pub fn id_prefix(&self) -> &'static str {
        match self {
            SignalKind::VolumeSurge => "vol",
            SignalKind::OddsFlip => "odds",
            SignalKind::OrderBookShift => "book",
            SignalKind::HighVolume => "hv",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
}

/// Type-specific payload of a whale signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SignalData {
    VolumeSurge {
        current_value: f64,
        previous_value: f64,
        growth_multiple: f64,
    },
    OddsFlip {
        current_value: f64,
        previous_value: f64,
        change_percent: f64,
        direction: Direction,
    },
    OrderBookShift {
        change_percent: f64,
        previous_value: f64,
        current_value: f64,
    },
    HighVolume {
        current_value: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WhaleSignal {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: SignalKind,
    pub market_id: String,
    pub ticker: String,
    pub confidence: u8,
    pub severity: Severity,
    pub market_impact: Severity,
    pub description: String,
    pub data: SignalData,
    pub timestamp: DateTime<Utc>,
}

// ── Stream envelope ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    InitialData,
    MarketUpdate,
    WhaleAlerts,
    Heartbeat,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketUpdate {
    pub markets: Vec<Market>,
    pub timestamp: DateTime<Utc>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct WhaleAlerts {
    pub alerts: Vec<WhaleSignal>,
    pub timestamp: DateTime<Utc>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Heartbeat {
    pub timestamp: DateTime<Utc>,
    pub connections: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum MessageData {
    Markets(MarketUpdate),
    Alerts(WhaleAlerts),
    Heartbeat(Heartbeat),
}

/// `{type, data, timestamp}` envelope pushed to every subscriber.
#[derive(Debug, Clone, Serialize)]
pub struct StreamMessage {
    #[serde(rename = "type")]
    pub kind: MessageKind,
    pub data: MessageData,
    pub timestamp: DateTime<Utc>,
}

impl StreamMessage {
    pub fn initial_data(markets: Vec<Market>, snapshot_at: DateTime<Utc>) -> Self {
        Self::markets(MessageKind::InitialData, markets, snapshot_at)
    }

    pub fn market_update(markets: Vec<Market>, snapshot_at: DateTime<Utc>) -> Self {
        Self::markets(MessageKind::MarketUpdate, markets, snapshot_at)
    }

    fn markets(kind: MessageKind, markets: Vec<Market>, snapshot_at: DateTime<Utc>) -> Self {
        let count = markets.len();
        Self {
            kind,
            data: MessageData::Markets(MarketUpdate {
                markets,
                timestamp: snapshot_at,
                count,
            }),
            timestamp: Utc::now(),
        }
    }

    pub fn whale_alerts(alerts: Vec<WhaleSignal>) -> Self {
        let now = Utc::now();
        let count = alerts.len();
        Self {
            kind: MessageKind::WhaleAlerts,
            data: MessageData::Alerts(WhaleAlerts {
                alerts,
                timestamp: now,
                count,
            }),
            timestamp: now,
        }
    }

    pub fn heartbeat(connections: usize) -> Self {
        let now = Utc::now();
        Self {
            kind: MessageKind::Heartbeat,
            data: MessageData::Heartbeat(Heartbeat {
                timestamp: now,
                connections,
            }),
            timestamp: now,
        }
    }
}
