/*!
 * # Request Dispatch
 *
 * One catch-all handler routes every inbound request: geographic gate,
 * preflight, prefix check (failing over to session recovery), landing page,
 * health segment, then the forwarding pipeline — decode, sanitize, forward,
 * and either rewrite (redirects, HTML) or stream the response through.
 */

use actix_web::http::{Method, StatusCode};
use actix_web::{web, HttpRequest, HttpResponse};
use futures::StreamExt;
use reqwest::header::CONTENT_TYPE;
use tracing::{debug, info};

use crate::codec::{self, TargetContext};
use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::headers;
use crate::health::{self, GatewayMetrics};
use crate::landing;
use crate::proxy::{self, ProxyClient};
use crate::rewrite;
use crate::session;
use crate::tunnel;

pub async fn dispatch(
    req: HttpRequest,
    payload: web::Payload,
    config: web::Data<Config>,
    client: web::Data<ProxyClient>,
    metrics: web::Data<GatewayMetrics>,
) -> Result<HttpResponse> {
    // The geographic gate runs before any other logic.
    let country = req
        .headers()
        .get(headers::COUNTRY_HEADER)
        .and_then(|v| v.to_str().ok());
    if !config.is_country_allowed(country) {
        return Err(GatewayError::GeoDenied(
            country.unwrap_or("unknown").to_string(),
        ));
    }

    if req.method() == Method::OPTIONS {
        return Ok(preflight());
    }

    metrics.record_request();

    let secret = config.secret();
    let path = req.uri().path().to_string();

    // Anything not under the prefix belongs to the recovery engine.
    let rest = match path.strip_prefix(&secret) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.to_string(),
        _ => {
            metrics.record_recovery();
            return session::recover(&req, payload, config.get_ref()).await;
        }
    };

    if rest.is_empty() || rest == "/" {
        return Ok(HttpResponse::Ok()
            .content_type("text/html; charset=utf-8")
            .body(landing::landing_page(&secret)));
    }

    // Reserved segment: targets always decode to a scheme-qualified URL,
    // so this can never shadow one.
    if rest == "/__health" {
        return Ok(health::health_report(metrics.get_ref()));
    }

    let conn = req.connection_info().clone();
    let target = codec::decode(&rest, conn.scheme(), req.uri().query())?;
    let ctx = TargetContext {
        target,
        scheme: conn.scheme().to_string(),
        gateway_host: conn.host().to_string(),
        secret,
    };

    if tunnel::is_websocket_upgrade(&req) {
        metrics.record_tunnel();
        return tunnel::open(&req, payload, &ctx.target).await;
    }

    forward(req, payload, &ctx, client.get_ref(), metrics.get_ref()).await
}

/// The plain-HTTP pipeline: buffer the inbound body, forward, then pick the
/// response path (redirect rewrite, HTML transform, or passthrough).
async fn forward(
    req: HttpRequest,
    mut payload: web::Payload,
    ctx: &TargetContext,
    client: &ProxyClient,
    metrics: &GatewayMetrics,
) -> Result<HttpResponse> {
    let mut body = web::BytesMut::new();
    while let Some(chunk) = payload.next().await {
        let chunk = chunk.map_err(|e| GatewayError::BodyRead(e.to_string()))?;
        body.extend_from_slice(&chunk);
    }

    let method = reqwest::Method::from_bytes(req.method().as_str().as_bytes())
        .unwrap_or(reqwest::Method::GET);
    let outbound_headers = headers::sanitize(req.headers(), &ctx.target);

    let response = client
        .forward(method, &ctx.target, outbound_headers, body.freeze())
        .await?;

    if proxy::is_redirect(response.status()) {
        return Ok(proxy::rewrite_redirect(response, ctx));
    }

    let status =
        StatusCode::from_u16(response.status().as_u16()).unwrap_or(StatusCode::BAD_GATEWAY);
    let is_html = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.contains("text/html"))
        .unwrap_or(false);

    let mut builder = HttpResponse::build(status);
    for (name, value) in response.headers() {
        if headers::should_strip_response_header(name) {
            continue;
        }
        builder.append_header((name.as_str(), value.as_bytes()));
    }
    headers::apply_gateway_headers(&mut builder);

    if is_html {
        metrics.record_rewrite();
        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::OutboundFetch(e.to_string()))?;
        let rewritten = rewrite::transform_html(&text, ctx);
        info!("rewrote {} for {}", ctx.target, ctx.gateway_host);

        // The session base follows HTML documents only; sub-resources must
        // never steer later recovery at their own origin.
        builder.cookie(session::session_cookie(&ctx.target));
        Ok(builder.body(rewritten))
    } else {
        debug!("streaming {} through unchanged", ctx.target);
        Ok(builder.streaming(proxy::stream_body(response)))
    }
}

/// Preflights are answered at the gateway; they never reach the target.
fn preflight() -> HttpResponse {
    let mut builder = HttpResponse::NoContent();
    headers::set_cors_headers(&mut builder);
    builder.finish()
}
