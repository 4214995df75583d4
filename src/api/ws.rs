// =============================================================================
// WebSocket Handler — push feed of the live store
// =============================================================================
//
// Clients connect to `/api/v1/ws?token=<token>` and receive:
//   1. A full `LiveSnapshot` on connect.
//   2. A fresh snapshot on every 500 ms tick where the store version moved.
//
// Client text frames are ignored apart from logging; pings are answered.
// The feed ends when the client goes away or the session is disposed.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures_util::{Sink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use crate::api::auth::validate_token;
use crate::app_state::ConsoleSession;

const PUSH_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(session): State<Arc<ConsoleSession>>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let token = query.token.unwrap_or_default();
    if !validate_token(&token) {
        warn!("live feed connection rejected: invalid token");
        return (StatusCode::FORBIDDEN, "Invalid or missing token").into_response();
    }

    info!("live feed connection accepted");
    ws.on_upgrade(move |socket| handle_feed(socket, session))
        .into_response()
}

async fn handle_feed(socket: WebSocket, session: Arc<ConsoleSession>) {
    let (mut sender, mut receiver) = socket.split();

    let mut last_sent = match send_snapshot(&mut sender, &session).await {
        Ok(version) => version,
        Err(e) => {
            warn!(error = %e, "failed to send initial live snapshot");
            return;
        }
    };

    let mut push = interval(PUSH_INTERVAL);

    loop {
        tokio::select! {
            _ = push.tick() => {
                if session.store.is_disposed() {
                    let _ = sender.send(Message::Close(None)).await;
                    info!("session ended; closing live feed");
                    break;
                }
                if session.store.version() == last_sent {
                    continue;
                }
                match send_snapshot(&mut sender, &session).await {
                    Ok(version) => last_sent = version,
                    Err(e) => {
                        debug!(error = %e, "live feed send failed; disconnecting");
                        break;
                    }
                }
            }

            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    debug!(msg = %text, "live feed client message ignored");
                }
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = sender.send(Message::Pong(data)).await {
                        debug!(error = %e, "failed to send pong; disconnecting");
                        break;
                    }
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Binary(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    info!("live feed client disconnected");
                    break;
                }
                Some(Err(e)) => {
                    warn!(error = %e, "live feed receive error");
                    break;
                }
            },
        }
    }
}

/// Send the current snapshot; returns the version it carried.
async fn send_snapshot<S>(sender: &mut S, session: &ConsoleSession) -> Result<u64, axum::Error>
where
    S: Sink<Message, Error = axum::Error> + Unpin,
{
    let snapshot = session.store.snapshot();
    match serde_json::to_string(&snapshot) {
        Ok(json) => {
            sender.send(Message::Text(json)).await?;
            debug!(version = snapshot.version, "live snapshot sent");
        }
        Err(e) => warn!(error = %e, "failed to serialise live snapshot"),
    }
    Ok(snapshot.version)
}

#[cfg(test)]
mod tests {
    use crate::api::rest::tests::{serve_session, TEST_ADMIN_TOKEN};
    use crate::live::WatchlistRecord;
    use futures_util::StreamExt;
    use tokio_tungstenite::{connect_async, tungstenite::Message};

    async fn next_snapshot<S>(read: &mut S) -> serde_json::Value
    where
        S: futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        loop {
            let msg = tokio::time::timeout(std::time::Duration::from_secs(5), read.next())
                .await
                .expect("snapshot in time")
                .expect("stream open")
                .expect("frame");
            if let Message::Text(text) = msg {
                return serde_json::from_str(&text).unwrap();
            }
        }
    }

    #[tokio::test]
    async fn pushes_snapshot_on_connect_and_on_change() {
        let (session, addr) = serve_session().await;
        let url = format!("ws://{addr}/api/v1/ws?token={TEST_ADMIN_TOKEN}");
        let (stream, _) = connect_async(url).await.unwrap();
        let (_write, mut read) = stream.split();

        let first = next_snapshot(&mut read).await;
        assert_eq!(first["watchlist"].as_array().unwrap().len(), 0);

        session.merger.replace_watchlist(vec![WatchlistRecord::new("TCS")]);
        let second = next_snapshot(&mut read).await;
        assert_eq!(second["watchlist"][0]["tradingsymbol"], "TCS");
        assert!(second["version"].as_u64().unwrap() > first["version"].as_u64().unwrap());

        session.logout().await;
    }

    #[tokio::test]
    async fn rejects_bad_token() {
        let (session, addr) = serve_session().await;
        let url = format!("ws://{addr}/api/v1/ws?token=nope");
        assert!(connect_async(url).await.is_err());
        session.logout().await;
    }
}
