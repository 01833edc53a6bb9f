/*!
 * # Request Forwarder
 *
 * Owns the shared outbound HTTP client and the three response paths that
 * need no content rewriting: issuing the call itself, re-anchoring redirect
 * `Location` headers under the gateway prefix, and streaming non-HTML
 * bodies straight through.
 */

use actix_web::{http::StatusCode, HttpResponse};
use bytes::Bytes;
use futures::{stream::StreamExt, Stream};
use pin_project::pin_project;
use reqwest::header::{HeaderMap, LOCATION};
use reqwest::{Client, Method};
use std::{
    convert::Infallible,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::{debug, error};
use url::Url;

use crate::codec::TargetContext;
use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::headers;

/// Tuning for the shared outbound client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub request_timeout: Option<Duration>,
    pub pool_idle_timeout: Duration,
    pub pool_max_idle_per_host: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(30)),
            pool_idle_timeout: Duration::from_secs(90),
            pool_max_idle_per_host: 32,
        }
    }
}

impl From<&Config> for ClientConfig {
    fn from(config: &Config) -> Self {
        Self {
            request_timeout: config.get_request_timeout(),
            ..Self::default()
        }
    }
}

/// Shared outbound HTTP client.
///
/// Redirect following is disabled: the gateway must see and rewrite every
/// redirect itself, or the browser silently ends up on the wrong apparent
/// URL. Compressed bodies are decoded by the client so the transformer
/// always works on plain text.
#[derive(Clone)]
pub struct ProxyClient {
    pub config: Arc<ClientConfig>,
    client: Client,
}

impl ProxyClient {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .danger_accept_invalid_certs(true)
            .redirect(reqwest::redirect::Policy::none())
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .pool_idle_timeout(config.pool_idle_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }

        let client = builder.build().map_err(|e| {
            error!("failed to create outbound HTTP client: {}", e);
            GatewayError::Config(e.to_string())
        })?;

        Ok(Self {
            config: Arc::new(config),
            client,
        })
    }

    /// Issue the outbound call with the sanitized headers and original body.
    pub async fn forward(
        &self,
        method: Method,
        target: &Url,
        headers: HeaderMap,
        body: Bytes,
    ) -> Result<reqwest::Response> {
        debug!("forwarding {} {}", method, target);
        let mut request = self.client.request(method, target.clone()).headers(headers);
        if !body.is_empty() {
            request = request.body(body);
        }

        match request.send().await {
            Ok(response) => Ok(response),
            Err(e) if e.is_timeout() => {
                error!("outbound request to {} timed out", target);
                Err(GatewayError::OutboundFetch(format!(
                    "timeout contacting {}",
                    target
                )))
            }
            Err(e) => {
                error!("outbound request to {} failed: {}", target, e);
                Err(GatewayError::OutboundFetch(e.to_string()))
            }
        }
    }
}

/// Redirect family the gateway rewrites rather than follows.
pub fn is_redirect(status: reqwest::StatusCode) -> bool {
    matches!(status.as_u16(), 301 | 302 | 303 | 307 | 308)
}

/// Rebuild a redirect response with its `Location` re-anchored under the
/// gateway prefix. Relative locations are resolved against the target
/// first, so the re-encoded form is always absolute. Status, body, and
/// every other header pass through unchanged.
pub fn rewrite_redirect(response: reqwest::Response, ctx: &TargetContext) -> HttpResponse {
    let status =
        StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = HttpResponse::build(status);

    for (name, value) in response.headers() {
        if name == LOCATION || headers::should_strip_response_header(name) {
            continue;
        }
        builder.append_header((name.as_str(), value.as_bytes()));
    }

    if let Some(location) = response
        .headers()
        .get(LOCATION)
        .and_then(|v| v.to_str().ok())
    {
        let absolute = ctx
            .target
            .join(location)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| location.to_string());
        debug!("rewriting redirect {} -> {}", location, absolute);
        builder.insert_header(("Location", ctx.encode(&absolute)));
    }

    builder.streaming(stream_body(response))
}

/// Channel-backed passthrough for bodies that need no rewriting. The pump
/// task drops the sender on upstream error, which ends the stream.
#[pin_project]
pub struct StreamingBody {
    #[pin]
    rx: mpsc::Receiver<Bytes>,
}

impl Stream for StreamingBody {
    type Item = std::result::Result<Bytes, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.project();
        this.rx.get_mut().poll_recv(cx).map(|opt| opt.map(Ok))
    }
}

/// Spawn the pump task and return the response body as a stream.
pub fn stream_body(response: reqwest::Response) -> StreamingBody {
    let (tx, rx) = mpsc::channel(2);

    tokio::spawn(async move {
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(bytes) => {
                    if tx.send(bytes).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("error streaming response body: {}", e);
                    break;
                }
            }
        }
    });

    StreamingBody { rx }
}
