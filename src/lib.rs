/*!
 * # mirrorgate
 *
 * A transparent forwarding gateway: a browser visits any target site
 * through a single gateway origin, and every outbound reference is
 * rewritten so navigation, sub-resource loads, form submissions, and
 * WebSocket connections keep flowing through the gateway.
 *
 * ## How a request travels
 *
 * 1. Geographic gate, then `OPTIONS` preflights are answered locally.
 * 2. Paths under the secret prefix are proxied: the [`codec`] decodes the
 *    embedded target, [`headers`] sanitizes the identity headers, and
 *    [`proxy`] issues the outbound call without following redirects.
 * 3. Redirects get their `Location` re-anchored under the prefix; HTML
 *    passes through [`rewrite`] (base-tag injection, root-relative
 *    patching, [`agent`] script injection); everything else streams
 *    through unchanged.
 * 4. Paths *without* the prefix are handed to [`session`] recovery, which
 *    reconstructs the intended target from the session cookie or the
 *    Referer and redirects — or, for socket upgrades, tunnels via
 *    [`tunnel`].
 *
 * Requests are handled independently; the session cookie is the only
 * cross-request state and it lives entirely in the client.
 */

/// Client-side interception script generation
pub mod agent;
/// Gateway path <-> target URL translation
pub mod codec;
/// Startup configuration from flags and environment
pub mod config;
/// Error taxonomy and response mapping
pub mod error;
/// Request sanitization and response header policy
pub mod headers;
/// Process health counters and report
pub mod health;
/// Landing document
pub mod landing;
/// Outbound client, forwarding, redirect rewriting, passthrough
pub mod proxy;
/// HTML response transformation
pub mod rewrite;
/// Catch-all request dispatch
pub mod routes;
/// Session cookie and prefix-less request recovery
pub mod session;
/// WebSocket tunneling
pub mod tunnel;

use actix_web::{web, App, HttpServer};
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::health::GatewayMetrics;
use crate::proxy::{ClientConfig, ProxyClient};

/// Run the gateway with the given configuration.
pub async fn run(config: Config) -> Result<()> {
    let bind_addr = config.get_bind_addr()?;
    info!("starting gateway on {}", bind_addr);
    info!("secret prefix is {}", config.secret());
    if let Some(timeout) = config.get_request_timeout() {
        info!("outbound timeout set to {}s", timeout.as_secs());
    } else {
        info!("no outbound timeout configured");
    }

    let metrics = web::Data::new(GatewayMetrics::default());
    let client = web::Data::new(ProxyClient::new(ClientConfig::from(&config))?);
    let config = web::Data::new(config);

    HttpServer::new(move || {
        App::new()
            .app_data(config.clone())
            .app_data(client.clone())
            .app_data(metrics.clone())
            .default_service(web::route().to(routes::dispatch))
    })
    .bind(bind_addr)?
    .run()
    .await?;

    info!("gateway shut down");
    Ok(())
}
