// =============================================================================
// Channel Socket — lifecycle state machine for one streaming connection
// =============================================================================
//
//   Idle ──connect──> Connecting ──open──> Open ──close()──> Closing ──> Closed
//                          │                 │                             ▲
//                          └── fail/timeout ─┴── error / remote close ─────┘
//
//   connect()       valid from Idle / Closed only; anything else is a no-op,
//                   so a channel never holds two transports.
//   on_open()       flag true, backoff reset.
//   on_frame()      forwarded to the dispatcher only while Open.
//   on_transport_closed()
//                   flag false; schedules a retry unless the close was
//                   intentional.
//   close()         intentional: Closing, pending retry cancelled, later
//                   retries ignored until the next explicit connect().
//
// Transitions take `&self`; the transport side of a channel is driven by one
// task (see `driver`), so lifecycle callbacks for a channel never race each
// other. Side effects (flags, dispatch, scheduling) run after the state lock
// is released.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::channel::backoff::Backoff;
use crate::live::dispatcher::{Dispatched, MessageDispatcher};
use crate::live::store::LiveStateStore;
use crate::runtime_config::BackoffParams;
use crate::types::{ChannelName, ChannelState};

/// Arranges a future retry for a channel. The timer implementation lives in
/// the driver; tests substitute a recording spy.
pub trait ReconnectScheduler: Send + Sync {
    fn schedule(&self, channel: ChannelName, delay: Duration);
    fn cancel(&self, channel: ChannelName);
}

/// Why a transport went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCause {
    ConnectFailed,
    RemoteClosed,
    TransportError,
    Local,
}

impl std::fmt::Display for CloseCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectFailed => write!(f, "connect failed"),
            Self::RemoteClosed => write!(f, "closed by peer"),
            Self::TransportError => write!(f, "transport error"),
            Self::Local => write!(f, "closed locally"),
        }
    }
}

struct SocketInner {
    state: ChannelState,
    /// Set by `close()`; cleared by the next explicit `connect()`.
    intentional: bool,
    backoff: Backoff,
}

pub struct ChannelSocket {
    name: ChannelName,
    endpoint: String,
    inner: Mutex<SocketInner>,
    store: Arc<LiveStateStore>,
    dispatcher: Arc<MessageDispatcher>,
    scheduler: Arc<dyn ReconnectScheduler>,
}

impl ChannelSocket {
    pub fn new(
        name: ChannelName,
        endpoint: impl Into<String>,
        backoff: &BackoffParams,
        store: Arc<LiveStateStore>,
        dispatcher: Arc<MessageDispatcher>,
        scheduler: Arc<dyn ReconnectScheduler>,
    ) -> Self {
        Self {
            name,
            endpoint: endpoint.into(),
            inner: Mutex::new(SocketInner {
                state: ChannelState::Idle,
                intentional: false,
                backoff: Backoff::new(backoff),
            }),
            store,
            dispatcher,
            scheduler,
        }
    }

    pub fn name(&self) -> ChannelName {
        self.name
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Endpoint without its query string, safe to log.
    pub fn redacted_endpoint(&self) -> &str {
        self.endpoint.split('?').next().unwrap_or_default()
    }

    pub fn state(&self) -> ChannelState {
        self.inner.lock().state
    }

    pub fn is_stopped(&self) -> bool {
        self.inner.lock().intentional
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.inner.lock().backoff.failures()
    }

    // ── Transitions ─────────────────────────────────────────────────────

    /// Explicit connect. Re-arms a stopped channel. Returns `true` when the
    /// caller should now establish a transport.
    pub fn connect(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.intentional = false;
        Self::begin_connect(self.name, &mut inner)
    }

    /// Scheduled retry. Ignored once the channel was closed intentionally.
    pub fn retry(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.intentional {
            debug!(channel = %self.name, "retry ignored — channel stopped");
            return false;
        }
        Self::begin_connect(self.name, &mut inner)
    }

    fn begin_connect(name: ChannelName, inner: &mut SocketInner) -> bool {
        match inner.state {
            ChannelState::Idle | ChannelState::Closed => {
                inner.state = ChannelState::Connecting;
                debug!(channel = %name, "channel connecting");
                true
            }
            other => {
                debug!(channel = %name, state = %other, "connect ignored — transport already live");
                false
            }
        }
    }

    /// Transport established. Returns `false` if the channel is no longer
    /// waiting for it (e.g. closed while connecting); the caller must then
    /// drop the transport and report `on_transport_closed(Local)`.
    pub fn on_open(&self) -> bool {
        {
            let mut inner = self.inner.lock();
            if inner.state != ChannelState::Connecting {
                debug!(channel = %self.name, state = %inner.state, "open ignored");
                return false;
            }
            inner.state = ChannelState::Open;
            inner.backoff.reset();
        }
        self.store.set_connected(self.name, true);
        info!(channel = %self.name, endpoint = %self.redacted_endpoint(), "channel open");
        true
    }

    /// Inbound frame. Only forwarded while Open; malformed content is the
    /// dispatcher's concern and never changes the socket state.
    pub fn on_frame(&self, payload: &str) -> Vec<Dispatched> {
        if self.state() != ChannelState::Open {
            debug!(channel = %self.name, "frame ignored — channel not open");
            return Vec::new();
        }
        self.dispatcher.dispatch(self.name, payload)
    }

    /// Transport failed or closed. Returns the scheduled retry delay, if any.
    pub fn on_transport_closed(&self, cause: CloseCause) -> Option<Duration> {
        let delay = {
            let mut inner = self.inner.lock();
            if matches!(inner.state, ChannelState::Idle | ChannelState::Closed) {
                return None;
            }
            inner.state = ChannelState::Closed;
            if inner.intentional {
                None
            } else {
                Some(inner.backoff.next_delay())
            }
        };

        self.store.set_connected(self.name, false);

        match delay {
            Some(delay) => {
                warn!(
                    channel = %self.name,
                    cause = %cause,
                    retry_in_ms = delay.as_millis() as u64,
                    "channel closed — scheduling reconnect"
                );
                self.scheduler.schedule(self.name, delay);
            }
            None => info!(channel = %self.name, cause = %cause, "channel closed"),
        }
        delay
    }

    /// Intentional close. Returns `true` if a transport is live and must be
    /// torn down by the driver.
    pub fn close(&self) -> bool {
        let live = {
            let mut inner = self.inner.lock();
            inner.intentional = true;
            match inner.state {
                ChannelState::Connecting | ChannelState::Open => {
                    inner.state = ChannelState::Closing;
                    true
                }
                ChannelState::Closing => true,
                ChannelState::Idle | ChannelState::Closed => false,
            }
        };
        self.scheduler.cancel(self.name);
        debug!(channel = %self.name, live, "channel close requested");
        live
    }
}
