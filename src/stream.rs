//! Event stream transport - WebSocket subscriber with reconnect
//!
//! Connects to the backend's events endpoint, subscribes to the analysis
//! topics, and forwards frames to the engine's ingress. Reconnects with
//! exponential backoff (1 s → 60 s) on failure or disconnect. Backoff
//! only resets after a connection stays up for [`STABLE_CONNECTION`].

use crate::engine::{Activation, Engine};
use crate::event::{StreamEnvelope, TOPICS};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

/// Minimum time a connection must last before backoff is reset.
const STABLE_CONNECTION: Duration = Duration::from_secs(30);

const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Buffered envelopes between the socket reader and the ingress task.
const CHANNEL_CAPACITY: usize = 64;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum ConnectionEnd {
    /// The connection dropped or activation was postponed; reconnect.
    Dropped,
    /// The session is not authorized; stop for good.
    Denied,
}

/// Run the subscriber loop until the session is no longer authorized.
pub async fn run(engine: Arc<Engine>, url: &str) {
    let mut backoff = Duration::from_secs(1);

    loop {
        match connect_async(url).await {
            Ok((ws, _response)) => {
                info!("event stream connected");
                let connected_at = tokio::time::Instant::now();

                match drive(&engine, ws).await {
                    ConnectionEnd::Denied => {
                        warn!("session is not authorized; stopping the monitor");
                        return;
                    }
                    ConnectionEnd::Dropped => {
                        info!("event stream disconnected");
                    }
                }

                // Only reset backoff if the connection was stable
                if connected_at.elapsed() >= STABLE_CONNECTION {
                    backoff = Duration::from_secs(1);
                }
            }
            Err(e) => {
                debug!("event stream unavailable: {e}, retrying in {:?}", backoff);
            }
        }

        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

/// Drive one live connection: subscribe, activate the engine, then pump
/// frames into the ingress until the socket ends.
async fn drive(engine: &Engine, mut ws: WsStream) -> ConnectionEnd {
    let subscribe = serde_json::json!({ "subscribe": TOPICS });
    if let Err(e) = ws.send(Message::Text(subscribe.to_string())).await {
        warn!("failed to subscribe to analysis topics: {e}");
        return ConnectionEnd::Dropped;
    }

    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    match engine.activate(rx).await {
        Activation::Started => {}
        Activation::Denied => return ConnectionEnd::Denied,
        Activation::Unavailable => {
            debug!("identity endpoint unreachable, postponing activation");
            return ConnectionEnd::Dropped;
        }
    }

    while let Some(frame) = ws.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<StreamEnvelope>(&text) {
                Ok(envelope) => {
                    if tx.send(envelope).await.is_err() {
                        break;
                    }
                }
                Err(e) => warn!("malformed stream frame: {e}"),
            },
            Ok(Message::Close(_)) => {
                debug!("server closed the event stream");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                warn!("event stream error: {e}");
                break;
            }
        }
    }

    engine.suspend();
    ConnectionEnd::Dropped
}
