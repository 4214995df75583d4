// =============================================================================
// Channel Driver — tokio-tungstenite transport for one channel socket
// =============================================================================
//
// One task per channel. The task sits idle until told to connect, then runs a
// session: connect (bounded by a timeout), pump frames into the socket until
// the transport ends or a command interrupts it, report the close, and go
// back to waiting. Retries arrive as `Retry` commands from `TimerScheduler`.
//
// Frames of a channel are handled by this task alone, so per-channel arrival
// order is preserved end to end.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::channel::socket::{ChannelSocket, CloseCause, ReconnectScheduler};
use crate::types::ChannelName;

/// How long a local close waits for the close frame to be flushed.
const CLOSE_FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

/// Instructions sent to a channel driver task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelCommand {
    /// Explicit start.
    Connect,
    /// Backoff timer fired.
    Retry,
    /// Intentional close; the task keeps running.
    Close,
    /// Close and end the task.
    Shutdown,
}

enum SessionEnd {
    Closed,
    Shutdown,
}

// =============================================================================
// Timer scheduler
// =============================================================================

/// Arms one tokio timer per channel that sends `Retry` when it fires.
/// Re-scheduling or cancelling aborts the pending timer.
pub struct TimerScheduler {
    senders: HashMap<ChannelName, UnboundedSender<ChannelCommand>>,
    pending: Mutex<HashMap<ChannelName, JoinHandle<()>>>,
}

impl TimerScheduler {
    pub fn new(senders: HashMap<ChannelName, UnboundedSender<ChannelCommand>>) -> Self {
        Self {
            senders,
            pending: Mutex::new(HashMap::new()),
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().values().filter(|h| !h.is_finished()).count()
    }
}

impl ReconnectScheduler for TimerScheduler {
    fn schedule(&self, channel: ChannelName, delay: Duration) {
        let Some(tx) = self.senders.get(&channel).cloned() else {
            warn!(channel = %channel, "no driver registered — reconnect not scheduled");
            return;
        };
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                warn!(channel = %channel, "no tokio runtime — reconnect not scheduled");
                return;
            }
        };

        let handle = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(ChannelCommand::Retry);
        });
        if let Some(previous) = self.pending.lock().insert(channel, handle) {
            previous.abort();
        }
    }

    fn cancel(&self, channel: ChannelName) {
        if let Some(handle) = self.pending.lock().remove(&channel) {
            handle.abort();
            debug!(channel = %channel, "pending reconnect cancelled");
        }
    }
}

// =============================================================================
// Driver task
// =============================================================================

/// Drive `socket` from `commands` until `Shutdown` or the sender side drops.
pub async fn run_channel(
    socket: Arc<ChannelSocket>,
    mut commands: UnboundedReceiver<ChannelCommand>,
    connect_timeout: Duration,
) {
    let name = socket.name();
    info!(channel = %name, "channel driver started");

    while let Some(command) = commands.recv().await {
        let proceed = match command {
            ChannelCommand::Connect => socket.connect(),
            ChannelCommand::Retry => socket.retry(),
            // Nothing is live between sessions; the socket was already marked
            // stopped by whoever sent the command.
            ChannelCommand::Close => false,
            ChannelCommand::Shutdown => break,
        };
        if proceed {
            if let SessionEnd::Shutdown = run_session(&socket, &mut commands, connect_timeout).await {
                break;
            }
        }
    }

    socket.close();
    socket.on_transport_closed(CloseCause::Local);
    info!(channel = %name, "channel driver stopped");
}

async fn run_session(
    socket: &ChannelSocket,
    commands: &mut UnboundedReceiver<ChannelCommand>,
    connect_timeout: Duration,
) -> SessionEnd {
    let name = socket.name();
    info!(channel = %name, endpoint = %socket.redacted_endpoint(), "connecting channel");

    // ── Connect phase ───────────────────────────────────────────────────
    let connect = tokio::time::timeout(connect_timeout, connect_async(socket.endpoint().to_string()));
    tokio::pin!(connect);

    let ws_stream = loop {
        tokio::select! {
            result = &mut connect => match result {
                Ok(Ok((ws_stream, _response))) => break ws_stream,
                Ok(Err(e)) => {
                    warn!(channel = %name, error = %e, "channel connect failed");
                    socket.on_transport_closed(CloseCause::ConnectFailed);
                    return SessionEnd::Closed;
                }
                Err(_) => {
                    warn!(channel = %name, timeout_ms = connect_timeout.as_millis() as u64, "channel connect timed out");
                    socket.on_transport_closed(CloseCause::ConnectFailed);
                    return SessionEnd::Closed;
                }
            },
            command = commands.recv() => match command {
                Some(ChannelCommand::Connect | ChannelCommand::Retry) => {
                    debug!(channel = %name, "already connecting");
                }
                Some(ChannelCommand::Close) => {
                    socket.on_transport_closed(CloseCause::Local);
                    return SessionEnd::Closed;
                }
                Some(ChannelCommand::Shutdown) | None => {
                    socket.on_transport_closed(CloseCause::Local);
                    return SessionEnd::Shutdown;
                }
            },
        }
    };

    if !socket.on_open() {
        // Closed while the handshake was in flight.
        socket.on_transport_closed(CloseCause::Local);
        return SessionEnd::Closed;
    }

    // ── Frame pump ──────────────────────────────────────────────────────
    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    socket.on_frame(&text);
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        socket.on_frame(&text);
                    }
                    Err(_) => warn!(channel = %name, "non UTF-8 binary frame dropped"),
                },
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = write.send(Message::Pong(data)).await {
                        warn!(channel = %name, error = %e, "failed to answer ping");
                        socket.on_transport_closed(CloseCause::TransportError);
                        return SessionEnd::Closed;
                    }
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    info!(channel = %name, frame = ?frame, "close frame received");
                    socket.on_transport_closed(CloseCause::RemoteClosed);
                    return SessionEnd::Closed;
                }
                Some(Err(e)) => {
                    warn!(channel = %name, error = %e, "channel read error");
                    socket.on_transport_closed(CloseCause::TransportError);
                    return SessionEnd::Closed;
                }
                None => {
                    warn!(channel = %name, "channel stream ended");
                    socket.on_transport_closed(CloseCause::RemoteClosed);
                    return SessionEnd::Closed;
                }
            },
            command = commands.recv() => {
                let end = match command {
                    Some(ChannelCommand::Connect | ChannelCommand::Retry) => {
                        debug!(channel = %name, "already open");
                        continue;
                    }
                    Some(ChannelCommand::Close) => SessionEnd::Closed,
                    Some(ChannelCommand::Shutdown) | None => SessionEnd::Shutdown,
                };
                if tokio::time::timeout(CLOSE_FLUSH_TIMEOUT, write.send(Message::Close(None))).await.is_err() {
                    debug!(channel = %name, "close frame not flushed in time");
                }
                socket.on_transport_closed(CloseCause::Local);
                return end;
            }
        }
    }
}
