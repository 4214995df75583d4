// =============================================================================
// Shared types used across the trade console live layer
// =============================================================================

use serde::{Deserialize, Serialize};

/// The two logical streaming channels the console keeps open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelName {
    Ticks,
    Orders,
}

impl ChannelName {
    /// Every channel, in start order.
    pub const ALL: [ChannelName; 2] = [ChannelName::Ticks, ChannelName::Orders];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ticks => "ticks",
            Self::Orders => "orders",
        }
    }
}

impl std::fmt::Display for ChannelName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Lifecycle state of a single channel socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for ChannelState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Open => write!(f, "Open"),
            Self::Closing => write!(f, "Closing"),
            Self::Closed => write!(f, "Closed"),
        }
    }
}

/// Order status as reported by the order-update feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Executed,
    Failed,
    Cancelled,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Executed => write!(f, "executed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Per-channel connectivity, as shown by the dashboard indicators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityFlags {
    pub ticks_connected: bool,
    pub orders_connected: bool,
}

impl ConnectivityFlags {
    pub fn get(&self, channel: ChannelName) -> bool {
        match channel {
            ChannelName::Ticks => self.ticks_connected,
            ChannelName::Orders => self.orders_connected,
        }
    }

    pub fn set(&mut self, channel: ChannelName, connected: bool) {
        match channel {
            ChannelName::Ticks => self.ticks_connected = connected,
            ChannelName::Orders => self.orders_connected = connected,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_names_serialize_lowercase() {
        assert_eq!(serde_json::to_string(&ChannelName::Ticks).unwrap(), "\"ticks\"");
        assert_eq!(ChannelName::Orders.to_string(), "orders");
    }

    #[test]
    fn order_status_parses_wire_values() {
        let s: OrderStatus = serde_json::from_str("\"cancelled\"").unwrap();
        assert_eq!(s, OrderStatus::Cancelled);
        assert!(serde_json::from_str::<OrderStatus>("\"CANCELLED\"").is_err());
    }

    #[test]
    fn connectivity_flags_are_per_channel() {
        let mut flags = ConnectivityFlags::default();
        flags.set(ChannelName::Orders, true);
        assert!(flags.get(ChannelName::Orders));
        assert!(!flags.get(ChannelName::Ticks));
    }
}
