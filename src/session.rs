/*!
 * # Session Recovery Engine
 *
 * The gateway's only cross-request state is a client-held cookie recording
 * the last HTML target served. When a request arrives without the secret
 * prefix (typically a page's own absolute-path fetch that raced the agent),
 * the intended target is reconstructed from that cookie, or failing that
 * from the Referer header, and the request is redirected back under the
 * prefix. Socket upgrades are tunneled directly instead: a redirect would
 * terminate the upgrade attempt.
 *
 * Best-effort by design: cross-origin leakage is not recoverable here.
 */

use actix_web::cookie::{Cookie, SameSite};
use actix_web::http::header;
use actix_web::{web, HttpRequest, HttpResponse};
use percent_encoding::{percent_decode_str, utf8_percent_encode};
use tracing::{debug, info};
use url::Url;

use crate::codec::{self, TARGET_ENCODE};
use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::tunnel;

/// Name of the client-held record of the last HTML target.
pub const SESSION_COOKIE: &str = "__proxy_session";

/// Cookie carrying `target` as the current session base. Appended to HTML
/// responses only; sub-resource responses must never overwrite it, or
/// recovery would aim at the wrong origin.
pub fn session_cookie(target: &Url) -> Cookie<'static> {
    Cookie::build(
        SESSION_COOKIE,
        utf8_percent_encode(target.as_str(), TARGET_ENCODE).to_string(),
    )
    .path("/")
    .same_site(SameSite::Lax)
    .http_only(true)
    .finish()
}

/// The stored session target, if the request carries one.
pub fn stored_target(req: &HttpRequest) -> Option<String> {
    let cookie = req.cookie(SESSION_COOKIE)?;
    percent_decode_str(cookie.value())
        .decode_utf8()
        .ok()
        .map(|value| value.into_owned())
}

/// Handle a request that arrived without the secret prefix.
pub async fn recover(
    req: &HttpRequest,
    payload: web::Payload,
    config: &Config,
) -> Result<HttpResponse> {
    let secret = config.secret();
    let conn = req.connection_info().clone();
    let scheme = conn.scheme();
    let gateway_host = conn.host();
    let path = req.uri().path();
    let query = req.uri().query();

    // The stored session base wins: resolve the stray path against it.
    if let Some(stored) = stored_target(req) {
        if let Ok(base) = Url::parse(&stored) {
            if let Ok(mut resolved) = base.join(path) {
                resolved.set_query(query);

                if tunnel::is_websocket_upgrade(req) {
                    // A 302 would kill the upgrade; bridge it silently.
                    info!("tunneling stray socket upgrade to {}", resolved);
                    return tunnel::open(req, payload, &resolved).await;
                }

                let fixed = codec::absolute(scheme, gateway_host, &secret, resolved.as_str());
                info!("recovered {} -> {}", path, resolved);
                return Ok(HttpResponse::Found()
                    .insert_header((header::LOCATION, fixed))
                    .finish());
            }
        }
    }

    // Fallback: a Referer that carries the prefix names the target origin.
    // Only the origin is taken; the inbound path and query are re-applied,
    // which assumes same-origin navigation.
    if let Some(referer) = req
        .headers()
        .get(header::REFERER)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(origin) = referred_origin(referer, &secret, scheme) {
            let query = query.map(|q| format!("?{}", q)).unwrap_or_default();
            let fixed = format!(
                "{}://{}{}/{}{}{}",
                scheme, gateway_host, secret, origin, path, query
            );
            debug!("recovered {} via referer {}", path, origin);
            return Ok(HttpResponse::Found()
                .insert_header((header::LOCATION, fixed))
                .finish());
        }
    }

    Err(GatewayError::RecoveryExhausted)
}

/// Extract the embedded target origin from a gateway-shaped Referer.
fn referred_origin(referer: &str, secret: &str, default_scheme: &str) -> Option<String> {
    let referer = Url::parse(referer).ok()?;
    let rest = referer.path().strip_prefix(secret)?;
    let encoded = rest.strip_prefix('/').unwrap_or(rest);
    let decoded = percent_decode_str(encoded).decode_utf8().ok()?;
    let embedded = Url::parse(&codec::ensure_scheme(&decoded, default_scheme)).ok()?;
    embedded.host_str()?;
    Some(codec::target_origin(&embedded))
}
