/*!
 * # WebSocket Tunnel
 *
 * Socket upgrades bypass content rewriting entirely: the inbound upgrade is
 * accepted, the target is dialed with the same identity treatment as plain
 * requests, and frames are relayed verbatim in both directions until either
 * side closes. The agent already rewrote the socket URL to embed the real
 * target before the upgrade reached the gateway, so nothing here inspects
 * payloads.
 */

use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};
use actix_ws::{AggregatedMessage, AggregatedMessageStream, CloseReason, Session};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as UpstreamMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::codec;
use crate::error::{GatewayError, Result};

/// Inbound headers carried onto the outbound dial. The handshake fields
/// (key, version, upgrade, connection) are regenerated by the client.
const CARRIED_HEADERS: [&str; 4] = [
    "cookie",
    "user-agent",
    "accept-language",
    "sec-websocket-protocol",
];

pub fn is_websocket_upgrade(req: &HttpRequest) -> bool {
    req.headers()
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false)
}

/// Socket-upgrade counterpart of a target URL: `http`/`https` map onto
/// `ws`/`wss`, socket schemes pass through.
pub fn socket_url(target: &Url) -> Result<Url> {
    let scheme = match target.scheme() {
        "http" => "ws",
        "https" => "wss",
        "ws" | "wss" => return Ok(target.clone()),
        other => {
            return Err(GatewayError::MalformedTarget(format!(
                "cannot tunnel scheme {}",
                other
            )))
        }
    };
    let mut upstream = target.clone();
    upstream
        .set_scheme(scheme)
        .map_err(|_| GatewayError::MalformedTarget(format!("cannot tunnel {}", target)))?;
    Ok(upstream)
}

/// Accept the inbound upgrade and bridge it to `target`.
pub async fn open(req: &HttpRequest, payload: web::Payload, target: &Url) -> Result<HttpResponse> {
    let upstream_url = socket_url(target)?;

    let mut dial = upstream_url
        .as_str()
        .into_client_request()
        .map_err(|e| GatewayError::OutboundFetch(e.to_string()))?;

    // Same identity treatment as plain forwarding: the target sees itself.
    if let Ok(value) = HeaderValue::from_str(&codec::target_origin(target)) {
        dial.headers_mut().insert("origin", value);
    }
    for name in CARRIED_HEADERS {
        if let Some(value) = req.headers().get(name) {
            if let (Ok(name), Ok(value)) = (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_bytes(value.as_bytes()),
            ) {
                dial.headers_mut().insert(name, value);
            }
        }
    }

    info!("opening tunnel to {}", upstream_url);
    let (upstream, _) = connect_async(dial)
        .await
        .map_err(|e| GatewayError::OutboundFetch(format!("socket dial failed: {}", e)))?;

    let (response, session, msg_stream) = actix_ws::handle(req, payload)
        .map_err(|e| GatewayError::OutboundFetch(format!("upgrade failed: {}", e)))?;

    actix_web::rt::spawn(relay(
        session,
        msg_stream.aggregate_continuations(),
        upstream,
    ));

    Ok(response)
}

/// Pump frames both ways; either side closing (or erroring) ends the tunnel.
async fn relay(
    session: Session,
    mut client_rx: AggregatedMessageStream,
    upstream: WebSocketStream<MaybeTlsStream<TcpStream>>,
) {
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    let client_to_upstream = async {
        while let Some(msg) = client_rx.recv().await {
            let msg = match msg {
                Ok(msg) => msg,
                Err(e) => {
                    warn!("client socket error: {}", e);
                    break;
                }
            };
            let frame = match msg {
                AggregatedMessage::Text(text) => UpstreamMessage::Text(text.to_string()),
                AggregatedMessage::Binary(data) => UpstreamMessage::Binary(data.to_vec()),
                AggregatedMessage::Ping(data) => UpstreamMessage::Ping(data.to_vec()),
                AggregatedMessage::Pong(data) => UpstreamMessage::Pong(data.to_vec()),
                AggregatedMessage::Close(reason) => {
                    let _ = upstream_tx
                        .send(UpstreamMessage::Close(reason.map(to_upstream_close)))
                        .await;
                    break;
                }
            };
            if upstream_tx.send(frame).await.is_err() {
                break;
            }
        }
    };

    let upstream_to_client = async move {
        let mut session = session;
        while let Some(msg) = upstream_rx.next().await {
            let msg = match msg {
                Ok(msg) => msg,
                Err(e) => {
                    warn!("target socket error: {}", e);
                    break;
                }
            };
            let delivered = match msg {
                UpstreamMessage::Text(text) => session.text(text).await,
                UpstreamMessage::Binary(data) => session.binary(data).await,
                UpstreamMessage::Ping(data) => session.ping(&data).await,
                UpstreamMessage::Pong(data) => session.pong(&data).await,
                UpstreamMessage::Close(frame) => {
                    let _ = session.close(frame.map(to_client_close)).await;
                    return;
                }
                UpstreamMessage::Frame(_) => Ok(()),
            };
            if delivered.is_err() {
                break;
            }
        }
    };

    tokio::select! {
        _ = client_to_upstream => {}
        _ = upstream_to_client => {}
    }
    debug!("tunnel closed");
}

fn to_upstream_close(reason: CloseReason) -> CloseFrame<'static> {
    CloseFrame {
        code: CloseCode::from(u16::from(reason.code)),
        reason: reason.description.unwrap_or_default().into(),
    }
}

fn to_client_close(frame: CloseFrame<'_>) -> CloseReason {
    CloseReason {
        code: u16::from(frame.code).into(),
        description: if frame.reason.is_empty() {
            None
        } else {
            Some(frame.reason.into_owned())
        },
    }
}
