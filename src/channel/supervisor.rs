// =============================================================================
// Channel Supervisor — owns the named channel set for a console session
// =============================================================================
//
// Builds one socket + driver task per channel at construction, then:
//   start()     connect every channel (idempotent)
//   stop()      close every channel intentionally, cancel retries (idempotent)
//   acquire()   reference-counted lease; the first lease starts the channels,
//               dropping the last one stops them, so any number of consumers
//               share one subscription lifecycle per channel
//   shutdown()  stop and end the driver tasks (session end)
//
// Must be constructed inside a tokio runtime.
// =============================================================================

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::channel::driver::{run_channel, ChannelCommand, TimerScheduler};
use crate::channel::socket::ChannelSocket;
use crate::live::dispatcher::MessageDispatcher;
use crate::live::store::LiveStateStore;
use crate::runtime_config::RuntimeConfig;
use crate::types::{ChannelName, ChannelState, ConnectivityFlags};

struct ChannelHandle {
    socket: Arc<ChannelSocket>,
    commands: UnboundedSender<ChannelCommand>,
}

pub struct ChannelSupervisor {
    channels: HashMap<ChannelName, ChannelHandle>,
    store: Arc<LiveStateStore>,
    scheduler: Arc<TimerScheduler>,
    running: AtomicBool,
    leases: Mutex<usize>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ChannelSupervisor {
    /// Create sockets and spawn one idle driver per channel.
    pub fn new(
        config: &RuntimeConfig,
        store: Arc<LiveStateStore>,
        dispatcher: Arc<MessageDispatcher>,
    ) -> Arc<Self> {
        let mut senders = HashMap::new();
        let mut receivers = HashMap::new();
        for name in ChannelName::ALL {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.insert(name, tx);
            receivers.insert(name, rx);
        }

        let scheduler = Arc::new(TimerScheduler::new(senders.clone()));
        let mut channels = HashMap::new();
        let mut tasks = Vec::new();

        for (name, rx) in receivers {
            let socket = Arc::new(ChannelSocket::new(
                name,
                config.channel_endpoint(name),
                &config.backoff,
                store.clone(),
                dispatcher.clone(),
                scheduler.clone(),
            ));
            tasks.push(tokio::spawn(run_channel(socket.clone(), rx, config.connect_timeout())));
            if let Some(commands) = senders.remove(&name) {
                channels.insert(name, ChannelHandle { socket, commands });
            }
        }

        info!(channels = channels.len(), "channel supervisor ready");

        Arc::new(Self {
            channels,
            store,
            scheduler,
            running: AtomicBool::new(false),
            leases: Mutex::new(0),
            tasks: Mutex::new(tasks),
        })
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Connect every channel. Returns `false` if already running.
    pub fn start(&self) -> bool {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("channel supervisor already running");
            return false;
        }
        for name in ChannelName::ALL {
            if let Some(handle) = self.channels.get(&name) {
                self.send(name, &handle.commands, ChannelCommand::Connect);
            }
        }
        info!("channels started");
        true
    }

    /// Close every channel intentionally. Returns `false` if not running.
    pub fn stop(&self) -> bool {
        if !self.running.swap(false, Ordering::SeqCst) {
            debug!("channel supervisor already stopped");
            return false;
        }
        for name in ChannelName::ALL {
            if let Some(handle) = self.channels.get(&name) {
                handle.socket.close();
                self.send(name, &handle.commands, ChannelCommand::Close);
            }
        }
        info!("channels stopped");
        true
    }

    /// Stop all channels and wait for the driver tasks to finish.
    pub async fn shutdown(&self) {
        self.stop();
        for (name, handle) in &self.channels {
            handle.socket.close();
            self.send(*name, &handle.commands, ChannelCommand::Shutdown);
        }
        let tasks = std::mem::take(&mut *self.tasks.lock());
        for task in tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "channel driver task ended abnormally");
            }
        }
        info!("channel supervisor shut down");
    }

    /// Take a consumer lease on the channels.
    pub fn acquire(self: &Arc<Self>) -> ChannelLease {
        let mut leases = self.leases.lock();
        *leases += 1;
        if *leases == 1 {
            self.start();
        }
        debug!(leases = *leases, "channel lease acquired");
        ChannelLease {
            supervisor: Arc::clone(self),
        }
    }

    fn release(&self) {
        let mut leases = self.leases.lock();
        *leases = leases.saturating_sub(1);
        if *leases == 0 {
            self.stop();
        }
        debug!(leases = *leases, "channel lease released");
    }

    fn send(&self, name: ChannelName, commands: &UnboundedSender<ChannelCommand>, command: ChannelCommand) {
        if commands.send(command).is_err() {
            warn!(channel = %name, command = ?command, "channel driver is gone");
        }
    }

    // ── Read-only accessors ─────────────────────────────────────────────

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn lease_count(&self) -> usize {
        *self.leases.lock()
    }

    pub fn is_connected(&self, name: ChannelName) -> bool {
        self.store.connectivity().get(name)
    }

    pub fn connectivity(&self) -> ConnectivityFlags {
        self.store.connectivity()
    }

    pub fn channel_state(&self, name: ChannelName) -> Option<ChannelState> {
        self.channels.get(&name).map(|h| h.socket.state())
    }

    pub fn channel_states(&self) -> Vec<(ChannelName, ChannelState)> {
        ChannelName::ALL
            .iter()
            .filter_map(|name| self.channel_state(*name).map(|s| (*name, s)))
            .collect()
    }

    pub fn pending_reconnects(&self) -> usize {
        self.scheduler.pending_count()
    }
}

/// A consumer's hold on the channel set. Dropping the last lease stops the
/// channels.
pub struct ChannelLease {
    supervisor: Arc<ChannelSupervisor>,
}

impl ChannelLease {
    pub fn supervisor(&self) -> &Arc<ChannelSupervisor> {
        &self.supervisor
    }
}

impl Drop for ChannelLease {
    fn drop(&mut self) {
        self.supervisor.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use futures_util::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;

    use crate::live::merger::EntityMerger;
    use crate::live::records::WatchlistRecord;
    use crate::runtime_config::BackoffParams;

    const TICK: &str = r#"{"type":"tick","data":{"instrument_token":"INFY","ltp":1500.5,"timestamp":1700000000}}"#;

    /// Local feed that sends `frames` to every client, then either holds the
    /// connection open or closes it. Returns the base URL and an accept counter.
    async fn spawn_feed(frames: Vec<String>, hold_open: bool) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = accepted.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                let frames = frames.clone();
                tokio::spawn(async move {
                    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    for frame in frames {
                        if ws.send(Message::Text(frame)).await.is_err() {
                            return;
                        }
                    }
                    if hold_open {
                        while let Some(Ok(_)) = ws.next().await {}
                    } else {
                        let _ = ws.close(None).await;
                    }
                });
            }
        });
        (format!("ws://{addr}"), accepted)
    }

    /// Local peer that runs `handler` on every upgraded connection.
    async fn spawn_peer<F, Fut>(handler: F) -> String
    where
        F: Fn(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handler = Arc::new(handler);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let handler = handler.clone();
                tokio::spawn(async move {
                    if let Ok(ws) = tokio_tungstenite::accept_async(stream).await {
                        handler(ws).await;
                    }
                });
            }
        });
        format!("ws://{addr}")
    }

    fn session(ws_host: String) -> (Arc<ChannelSupervisor>, Arc<LiveStateStore>) {
        session_with_timeout(ws_host, 2_000)
    }

    fn session_with_timeout(ws_host: String, connect_timeout_ms: u64) -> (Arc<ChannelSupervisor>, Arc<LiveStateStore>) {
        let config = RuntimeConfig {
            ws_host,
            connect_timeout_ms,
            backoff: BackoffParams {
                base_delay_ms: 20,
                max_delay_ms: 100,
                multiplier: 2.0,
            },
            ..RuntimeConfig::default()
        };
        let store = Arc::new(LiveStateStore::new());
        let merger = Arc::new(EntityMerger::new(store.clone()));
        merger.replace_watchlist(vec![WatchlistRecord::new("INFY")]);
        let dispatcher = Arc::new(MessageDispatcher::new(merger));
        (ChannelSupervisor::new(&config, store.clone(), dispatcher), store)
    }

    async fn wait_until(f: impl Fn() -> bool) -> bool {
        for _ in 0..200 {
            if f() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        f()
    }

    #[tokio::test]
    async fn start_connects_both_channels_and_merges_ticks() {
        let (url, _) = spawn_feed(vec![TICK.to_string()], true).await;
        let (supervisor, store) = session(url);

        assert!(supervisor.start());
        assert!(!supervisor.start());

        assert!(wait_until(|| {
            let c = store.connectivity();
            c.ticks_connected && c.orders_connected
        })
        .await);
        assert!(wait_until(|| store.watchlist()[0].last_traded_price == Some(1500.5)).await);
        assert_eq!(supervisor.channel_state(ChannelName::Ticks), Some(ChannelState::Open));

        assert!(supervisor.stop());
        assert!(!supervisor.stop());
        assert!(wait_until(|| {
            let c = store.connectivity();
            !c.ticks_connected && !c.orders_connected
        })
        .await);
        assert!(wait_until(|| supervisor.channel_state(ChannelName::Orders) == Some(ChannelState::Closed)).await);

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn unintended_close_reconnects_until_stopped() {
        let (url, accepted) = spawn_feed(vec![TICK.to_string()], false).await;
        let (supervisor, store) = session(url);

        supervisor.start();
        assert!(wait_until(|| accepted.load(Ordering::SeqCst) >= 6).await);
        assert_eq!(store.watchlist()[0].last_traded_price, Some(1500.5));

        supervisor.stop();
        tokio::time::sleep(Duration::from_millis(300)).await;
        let settled = accepted.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(accepted.load(Ordering::SeqCst), settled);
        assert!(!store.connectivity().ticks_connected);
        assert_eq!(supervisor.pending_reconnects(), 0);

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn unreachable_peer_keeps_flags_down() {
        // Reserve a port, then free it so nothing is listening there.
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (supervisor, store) = session(format!("ws://{addr}"));
        supervisor.start();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!store.connectivity().ticks_connected);
        assert!(!store.connectivity().orders_connected);
        supervisor.shutdown().await;
        assert_eq!(supervisor.channel_state(ChannelName::Ticks), Some(ChannelState::Closed));
    }

    #[tokio::test]
    async fn leases_share_one_lifecycle() {
        let (url, accepted) = spawn_feed(Vec::new(), true).await;
        let (supervisor, store) = session(url);

        let first = supervisor.acquire();
        let second = supervisor.acquire();
        assert!(supervisor.is_running());
        assert_eq!(supervisor.lease_count(), 2);
        assert!(wait_until(|| {
            let c = store.connectivity();
            c.ticks_connected && c.orders_connected
        })
        .await);
        let third = supervisor.acquire();
        tokio::time::sleep(Duration::from_millis(100)).await;
        // One transport per channel no matter how many consumers.
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
        drop(third);

        drop(first);
        assert!(supervisor.is_running());
        drop(second);
        assert!(!supervisor.is_running());
        assert!(wait_until(|| !store.connectivity().ticks_connected).await);

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn stalled_handshake_counts_as_failure() {
        // Accepts TCP but never answers the upgrade request.
        let listener = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let (supervisor, store) = session_with_timeout(format!("ws://{addr}"), 100);
        supervisor.start();
        let ticks = supervisor.channels[&ChannelName::Ticks].socket.clone();
        assert!(wait_until(|| ticks.consecutive_failures() >= 2).await);
        assert!(!store.connectivity().ticks_connected);

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn binary_frames_are_dispatched_as_text() {
        let url = spawn_peer(|mut ws| async move {
            let frame = r#"{"type":"tick","data":{"instrument_token":"INFY","ltp":7.0,"timestamp":1700000000}}"#;
            if ws.send(Message::Binary(frame.as_bytes().to_vec())).await.is_err() {
                return;
            }
            while let Some(Ok(_)) = ws.next().await {}
        })
        .await;
        let (supervisor, store) = session(url);

        supervisor.start();
        assert!(wait_until(|| store.watchlist()[0].last_traded_price == Some(7.0)).await);

        supervisor.shutdown().await;
    }

    #[tokio::test]
    async fn peer_ping_is_answered() {
        let ponged = Arc::new(AtomicUsize::new(0));
        let seen = ponged.clone();
        let url = spawn_peer(move |mut ws| {
            let seen = seen.clone();
            async move {
                if ws.send(Message::Ping(vec![1, 2, 3])).await.is_err() {
                    return;
                }
                while let Some(Ok(msg)) = ws.next().await {
                    if let Message::Pong(payload) = msg {
                        if payload == vec![1, 2, 3] {
                            seen.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
            }
        })
        .await;
        let (supervisor, store) = session(url);

        supervisor.start();
        assert!(wait_until(|| ponged.load(Ordering::SeqCst) >= 1).await);
        assert!(store.connectivity().ticks_connected);

        supervisor.shutdown().await;
    }
}
