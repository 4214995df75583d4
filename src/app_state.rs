// =============================================================================
// Console Session — one application session of the live layer
// =============================================================================
//
// Ties the live components together for the lifetime of a session:
//
//   store ← merger ← dispatcher ← sockets (supervisor)
//                 ↖ snapshot client (REST seed / refresh)
//
// Created at session start, shared as `Arc<ConsoleSession>` with the API
// layer, and torn down by `logout()`, which closes every channel
// intentionally and disposes the store.
// =============================================================================

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{info, warn};

use crate::channel::{ChannelLease, ChannelSupervisor};
use crate::live::{DispatchStats, EntityMerger, LiveStateStore, MessageDispatcher};
use crate::runtime_config::RuntimeConfig;
use crate::types::{ChannelName, ChannelState, ConnectivityFlags};
use crate::upstream::SnapshotClient;

/// Outcome of one snapshot refresh; a failed collection keeps its previous
/// contents.
#[derive(Debug, Clone, Serialize)]
pub struct RefreshReport {
    pub positions: Option<usize>,
    pub watchlist: Option<usize>,
    pub errors: Vec<String>,
}

/// Per-channel status line for the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStatus {
    pub channel: ChannelName,
    pub state: ChannelState,
    pub connected: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionHealth {
    pub session_id: String,
    pub version: u64,
    pub uptime_secs: u64,
    pub connectivity: ConnectivityFlags,
    pub channels: Vec<ChannelStatus>,
    pub dispatch: DispatchStats,
    pub last_refresh_error: Option<String>,
}

pub struct ConsoleSession {
    pub runtime_config: Arc<RwLock<RuntimeConfig>>,
    pub store: Arc<LiveStateStore>,
    pub merger: Arc<EntityMerger>,
    pub dispatcher: Arc<MessageDispatcher>,
    pub supervisor: Arc<ChannelSupervisor>,
    client: SnapshotClient,
    /// The session's own hold on the channels; released at logout.
    lease: parking_lot::Mutex<Option<ChannelLease>>,
    last_refresh_error: RwLock<Option<String>>,
    start_time: Instant,
}

impl ConsoleSession {
    /// Build every component. Must run inside a tokio runtime; channels are
    /// not started until [`ConsoleSession::start`].
    pub fn new(config: RuntimeConfig) -> Result<Arc<Self>> {
        let client = SnapshotClient::new(&config)?;
        let store = Arc::new(LiveStateStore::new());
        let merger = Arc::new(EntityMerger::new(store.clone()));
        let dispatcher = Arc::new(MessageDispatcher::new(merger.clone()));
        let supervisor = ChannelSupervisor::new(&config, store.clone(), dispatcher.clone());

        Ok(Arc::new(Self {
            runtime_config: Arc::new(RwLock::new(config)),
            store,
            merger,
            dispatcher,
            supervisor,
            client,
            lease: parking_lot::Mutex::new(None),
            last_refresh_error: RwLock::new(None),
            start_time: Instant::now(),
        }))
    }

    /// Seed the collections and open the channels.
    pub async fn start(&self) -> RefreshReport {
        let report = self.refresh_snapshots().await;
        let mut lease = self.lease.lock();
        if lease.is_none() {
            *lease = Some(self.supervisor.acquire());
        }
        report
    }

    /// Re-fetch both REST collections. Each successful fetch fully replaces
    /// its collection; live events keep applying to the new baseline.
    pub async fn refresh_snapshots(&self) -> RefreshReport {
        let mut report = RefreshReport {
            positions: None,
            watchlist: None,
            errors: Vec::new(),
        };

        match self.client.fetch_positions().await {
            Ok(positions) => {
                report.positions = Some(positions.len());
                self.merger.replace_positions(positions);
            }
            Err(e) => {
                warn!(error = %e, "positions snapshot failed");
                report.errors.push(format!("positions: {e:#}"));
            }
        }

        match self.client.fetch_watchlist().await {
            Ok(rows) => {
                report.watchlist = Some(rows.len());
                self.merger.replace_watchlist(rows);
            }
            Err(e) => {
                warn!(error = %e, "watchlist snapshot failed");
                report.errors.push(format!("watchlist: {e:#}"));
            }
        }

        *self.last_refresh_error.write() = if report.errors.is_empty() {
            None
        } else {
            Some(report.errors.join("; "))
        };
        report
    }

    pub fn health(&self) -> SessionHealth {
        let connectivity = self.store.connectivity();
        let channels = self
            .supervisor
            .channel_states()
            .into_iter()
            .map(|(channel, state)| ChannelStatus {
                channel,
                state,
                connected: connectivity.get(channel),
            })
            .collect();

        SessionHealth {
            session_id: self.store.session_id().to_string(),
            version: self.store.version(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            connectivity,
            channels,
            dispatch: self.dispatcher.stats(),
            last_refresh_error: self.last_refresh_error.read().clone(),
        }
    }

    /// End the session: close channels intentionally, stop the drivers and
    /// dispose the store.
    pub async fn logout(&self) {
        let lease = self.lease.lock().take();
        drop(lease);
        self.supervisor.shutdown().await;
        self.store.dispose();
        info!(session_id = %self.store.session_id(), "console session ended");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_config() -> RuntimeConfig {
        RuntimeConfig {
            // Port 9 (discard) on loopback: refused quickly, never served.
            api_base_url: "http://127.0.0.1:9".into(),
            ws_host: "ws://127.0.0.1:9".into(),
            request_timeout_ms: 500,
            connect_timeout_ms: 500,
            ..RuntimeConfig::default()
        }
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_collections() {
        let session = ConsoleSession::new(offline_config()).unwrap();
        session
            .merger
            .replace_watchlist(vec![crate::live::WatchlistRecord::new("INFY")]);

        let report = session.refresh_snapshots().await;
        assert!(report.positions.is_none());
        assert_eq!(report.errors.len(), 2);
        assert_eq!(session.store.watchlist().len(), 1);
        assert!(session.health().last_refresh_error.is_some());

        session.logout().await;
    }

    #[tokio::test]
    async fn logout_disposes_store_and_stops_channels() {
        let session = ConsoleSession::new(offline_config()).unwrap();
        session.start().await;
        assert!(session.supervisor.is_running());
        assert_eq!(session.health().channels.len(), 2);

        session.logout().await;
        assert!(!session.supervisor.is_running());
        assert!(session.store.is_disposed());
        assert!(!session.store.connectivity().ticks_connected);
    }
}
