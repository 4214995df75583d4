// =============================================================================
// Live Records — positions and watchlist rows held by the store
// =============================================================================
//
// Derived economics on a position (invested, current value, P&L, net change)
// are always recomputed from the source fields. The REST snapshot decoder has
// no slot for them, so values sent by the peer are ignored.
// =============================================================================

use serde::{Deserialize, Serialize};

/// Percentage change from `old` to `new`, guarded so the result is always
/// finite: `old == 0` (or any non-finite outcome) yields `0.0`.
pub fn percent_change(old: f64, new: f64) -> f64 {
    if old == 0.0 {
        return 0.0;
    }
    let pct = (new - old) / old * 100.0;
    if pct.is_finite() {
        pct
    } else {
        0.0
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

// ---------------------------------------------------------------------------
// PositionRecord
// ---------------------------------------------------------------------------

/// One open position, keyed by `instrument`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionRecord {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub instrument: String,
    #[serde(rename = "qty")]
    pub quantity: f64,
    pub avg_cost: f64,
    #[serde(rename = "ltp")]
    pub last_traded_price: f64,
    pub day_change_percent: Option<f64>,
    pub buy_date: Option<String>,
    pub stop_loss_target: Option<String>,
    pub notes: Option<String>,
    pub account_id: Option<String>,

    // ── Derived ─────────────────────────────────────────────────────────
    pub invested: f64,
    pub current_value: f64,
    pub pnl: f64,
    pub net_change_percent: f64,
}

impl PositionRecord {
    /// Build a record from source fields; derived fields are computed here.
    pub fn new(instrument: impl Into<String>, quantity: f64, avg_cost: f64, last_traded_price: f64) -> Self {
        let mut rec = Self {
            id: None,
            instrument: instrument.into(),
            quantity,
            avg_cost,
            last_traded_price,
            day_change_percent: None,
            buy_date: None,
            stop_loss_target: None,
            notes: None,
            account_id: None,
            invested: 0.0,
            current_value: 0.0,
            pnl: 0.0,
            net_change_percent: 0.0,
        };
        rec.recompute();
        rec
    }

    /// Replace the last traded price and refresh every derived field.
    pub fn apply_price(&mut self, last_traded_price: f64) {
        self.last_traded_price = last_traded_price;
        self.recompute();
    }

    /// Recompute derived fields from the source fields.
    pub fn recompute(&mut self) {
        self.invested = finite_or_zero(self.quantity * self.avg_cost);
        self.current_value = finite_or_zero(self.quantity * self.last_traded_price);
        self.pnl = finite_or_zero(self.current_value - self.invested);
        self.net_change_percent = percent_change(self.avg_cost, self.last_traded_price);
    }
}

/// Position shape served by `GET /positions`.
#[derive(Debug, Clone, Deserialize)]
pub struct PositionSnapshot {
    #[serde(default, deserialize_with = "de_opt_id")]
    pub id: Option<String>,
    pub instrument: String,
    pub qty: f64,
    pub avg_cost: f64,
    #[serde(default)]
    pub ltp: f64,
    #[serde(default)]
    pub day_change_percent: Option<f64>,
    #[serde(default)]
    pub buy_date: Option<String>,
    #[serde(default)]
    pub stop_loss_target: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default, alias = "zerodha_account_id")]
    pub account_id: Option<String>,
}

impl From<PositionSnapshot> for PositionRecord {
    fn from(s: PositionSnapshot) -> Self {
        let mut rec = PositionRecord::new(s.instrument, s.qty, s.avg_cost, s.ltp);
        rec.id = s.id;
        rec.day_change_percent = s.day_change_percent;
        rec.buy_date = s.buy_date;
        rec.stop_loss_target = s.stop_loss_target;
        rec.notes = s.notes;
        rec.account_id = s.account_id;
        rec
    }
}

// ---------------------------------------------------------------------------
// WatchlistRecord
// ---------------------------------------------------------------------------

/// One watchlist row, keyed by `trading_symbol`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistRecord {
    #[serde(default, deserialize_with = "de_opt_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "tradingsymbol")]
    pub trading_symbol: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument_token: Option<i64>,
    #[serde(rename = "ltp", default)]
    pub last_traded_price: Option<f64>,
}

impl WatchlistRecord {
    pub fn new(trading_symbol: impl Into<String>) -> Self {
        Self {
            id: None,
            trading_symbol: trading_symbol.into(),
            instrument_token: None,
            last_traded_price: None,
        }
    }
}

// The REST layer hands out integer row ids; the view layer treats them as
// opaque strings.
fn de_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum IdRepr {
        Text(String),
        Int(i64),
    }

    Ok(Option::<IdRepr>::deserialize(deserializer)?.map(|id| match id {
        IdRepr::Text(s) => s,
        IdRepr::Int(n) => n.to_string(),
    }))
}
