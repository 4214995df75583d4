// =============================================================================
// Message Dispatcher — classifies raw frames and routes typed events
// =============================================================================
//
// A frame is one or more newline-delimited JSON objects of the shape
//   { "type": "tick" | "order", "data": { ... } }
//
// Each line is decoded through `LiveFrame`, a tagged enum that fails closed:
// if the line is not JSON, has no `type`, names an unknown `type`, or carries
// a `data` payload that does not match the schema, nothing is applied and a
// diagnostic is recorded here (never in the store).
//
// Dispatch is synchronous and preserves arrival order.
// =============================================================================

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::live::events::{OrderEvent, TickEvent};
use crate::live::merger::EntityMerger;
use crate::types::ChannelName;

/// Maximum number of diagnostics retained.
const MAX_DIAGNOSTICS: usize = 50;
/// Raw payload excerpt kept with a diagnostic.
const EXCERPT_LEN: usize = 120;

/// A decoded streaming frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum LiveFrame {
    Tick(TickEvent),
    Order(OrderEvent),
}

/// Why a frame line was dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DropReason {
    /// Not parseable as a JSON object.
    Malformed,
    /// Valid JSON without a string `type`.
    MissingType,
    /// `type` is not one the console understands.
    UnknownType(String),
    /// Known `type`, but `data` does not match its schema.
    InvalidPayload(String),
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed frame"),
            Self::MissingType => write!(f, "frame without type discriminator"),
            Self::UnknownType(t) => write!(f, "unknown frame type '{t}'"),
            Self::InvalidPayload(e) => write!(f, "invalid payload: {e}"),
        }
    }
}

/// A recorded drop, kept for the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct Diagnostic {
    pub channel: ChannelName,
    pub reason: DropReason,
    pub excerpt: String,
    pub at: String,
}

/// Result of dispatching one line.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    Tick,
    Order,
    Dropped(DropReason),
}

/// Running totals, serialised by the health endpoint.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DispatchStats {
    pub ticks: u64,
    pub orders: u64,
    pub dropped: u64,
}

pub struct MessageDispatcher {
    merger: Arc<EntityMerger>,
    ticks: AtomicU64,
    orders: AtomicU64,
    dropped: AtomicU64,
    diagnostics: Mutex<VecDeque<Diagnostic>>,
}

impl MessageDispatcher {
    pub fn new(merger: Arc<EntityMerger>) -> Self {
        Self {
            merger,
            ticks: AtomicU64::new(0),
            orders: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            diagnostics: Mutex::new(VecDeque::with_capacity(MAX_DIAGNOSTICS)),
        }
    }

    /// Dispatch every non-blank line of `payload`, in order.
    pub fn dispatch(&self, channel: ChannelName, payload: &str) -> Vec<Dispatched> {
        payload
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(|line| self.dispatch_line(channel, line))
            .collect()
    }

    fn dispatch_line(&self, channel: ChannelName, line: &str) -> Dispatched {
        match classify(line) {
            Ok(LiveFrame::Tick(tick)) => {
                self.ticks.fetch_add(1, Ordering::Relaxed);
                self.merger.apply_tick(&tick);
                Dispatched::Tick
            }
            Ok(LiveFrame::Order(event)) => {
                self.orders.fetch_add(1, Ordering::Relaxed);
                self.merger.apply_order_update(&event);
                Dispatched::Order
            }
            Err(reason) => {
                self.record_drop(channel, line, reason.clone());
                Dispatched::Dropped(reason)
            }
        }
    }

    fn record_drop(&self, channel: ChannelName, line: &str, reason: DropReason) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        warn!(channel = %channel, reason = %reason, "dropping frame");

        let excerpt: String = line.chars().take(EXCERPT_LEN).collect();
        let mut diags = self.diagnostics.lock();
        diags.push_back(Diagnostic {
            channel,
            reason,
            excerpt,
            at: Utc::now().to_rfc3339(),
        });
        while diags.len() > MAX_DIAGNOSTICS {
            diags.pop_front();
        }
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            ticks: self.ticks.load(Ordering::Relaxed),
            orders: self.orders.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn recent_diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.lock().iter().cloned().collect()
    }
}

/// Decode one line into a [`LiveFrame`], or explain why it was rejected.
pub fn classify(line: &str) -> Result<LiveFrame, DropReason> {
    let value: serde_json::Value = serde_json::from_str(line).map_err(|_| DropReason::Malformed)?;
    let kind = match value.as_object() {
        Some(obj) => match obj.get("type").and_then(|t| t.as_str()) {
            Some(kind) => kind.to_string(),
            None => return Err(DropReason::MissingType),
        },
        None => return Err(DropReason::Malformed),
    };
    if kind != "tick" && kind != "order" {
        return Err(DropReason::UnknownType(kind));
    }
    serde_json::from_value(value).map_err(|e| DropReason::InvalidPayload(e.to_string()))
}
