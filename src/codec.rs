/*!
 * # URL Codec
 *
 * Bidirectional mapping between gateway paths and target URLs. A proxied
 * reference always has the shape
 * `<gateway-origin><secret>/<percent-encoded-absolute-target-url>`; the
 * codec builds that shape on the way out and recovers the target on the
 * way in. Everything else in the gateway depends on this module.
 */

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use url::Url;

use crate::error::{GatewayError, Result};

/// Characters escaped when a target URL is embedded in a gateway path.
///
/// Matches the component encoding browsers apply: alphanumerics and
/// `- _ . ! ~ * ' ( )` pass through, everything else is percent-escaped.
pub const TARGET_ENCODE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// Gateway path for `target`: `<secret>/<percent-encoded-target>`.
pub fn encode(secret: &str, target: &str) -> String {
    format!("{}/{}", secret, utf8_percent_encode(target, TARGET_ENCODE))
}

/// Fully qualified gateway URL for `target`.
pub fn absolute(scheme: &str, gateway_host: &str, secret: &str, target: &str) -> String {
    format!("{}://{}{}", scheme, gateway_host, encode(secret, target))
}

fn has_recognized_scheme(url: &str) -> bool {
    url.starts_with("http://")
        || url.starts_with("https://")
        || url.starts_with("ws://")
        || url.starts_with("wss://")
}

/// Prefix `url` with `default_scheme` unless it already carries a
/// recognized scheme. The gateway is scheme-agnostic from the caller's
/// point of view: a bare `example.com/x` inherits the inbound scheme.
pub fn ensure_scheme(url: &str, default_scheme: &str) -> String {
    if has_recognized_scheme(url) {
        url.to_string()
    } else {
        format!("{}://{}", default_scheme, url)
    }
}

/// Decode the gateway path remainder (everything after the secret prefix,
/// leading slash included) back into the absolute target URL.
///
/// `query` is the gateway request's own query string; it is merged onto the
/// decoded target with `?` when the target has no query yet and `&` when it
/// already does.
pub fn decode(rest: &str, default_scheme: &str, query: Option<&str>) -> Result<Url> {
    let encoded = rest.strip_prefix('/').unwrap_or(rest);
    let decoded = percent_decode_str(encoded)
        .decode_utf8()
        .map_err(|e| GatewayError::MalformedTarget(e.to_string()))?;

    let mut target = ensure_scheme(&decoded, default_scheme);
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        target.push(if target.contains('?') { '&' } else { '?' });
        target.push_str(query);
    }

    Url::parse(&target).map_err(|e| GatewayError::MalformedTarget(format!("{}: {}", target, e)))
}

/// `scheme://host[:port]` for a target, with socket schemes mapped back to
/// their HTTP counterparts (a socket endpoint's origin is its HTTP origin).
pub fn target_origin(url: &Url) -> String {
    let scheme = match url.scheme() {
        "ws" => "http",
        "wss" => "https",
        other => other,
    };
    match url.port() {
        Some(port) => format!("{}://{}:{}", scheme, url.host_str().unwrap_or_default(), port),
        None => format!("{}://{}", scheme, url.host_str().unwrap_or_default()),
    }
}

/// Everything the forwarding and rewriting pipeline needs to know about a
/// single request: the decoded target plus the gateway identity the
/// response must keep projecting. Built once per request, never shared.
#[derive(Debug, Clone)]
pub struct TargetContext {
    /// Absolute URL of the resource being fetched on the caller's behalf.
    pub target: Url,
    /// Scheme of the inbound gateway request.
    pub scheme: String,
    /// Host (and port) the browser used to reach the gateway.
    pub gateway_host: String,
    /// Normalized secret prefix.
    pub secret: String,
}

impl TargetContext {
    pub fn gateway_origin(&self) -> String {
        format!("{}://{}", self.scheme, self.gateway_host)
    }

    /// `host[:port]` of the target.
    pub fn target_host(&self) -> String {
        match (self.target.host_str(), self.target.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            _ => String::new(),
        }
    }

    pub fn target_origin(&self) -> String {
        target_origin(&self.target)
    }

    /// Gateway URL for an arbitrary absolute target reference.
    pub fn encode(&self, target: &str) -> String {
        absolute(&self.scheme, &self.gateway_host, &self.secret, target)
    }

    /// Base URL injected into rewritten documents: gateway origin + secret +
    /// the directory of the target (the target URL truncated after its last
    /// `/`). Document-relative references resolve against this without any
    /// further rewriting.
    pub fn proxy_base_url(&self) -> String {
        let href = self.target.as_str();
        let dir_end = href.rfind('/').map(|i| i + 1).unwrap_or(href.len());
        format!(
            "{}://{}{}/{}",
            self.scheme,
            self.gateway_host,
            self.secret,
            &href[..dir_end]
        )
    }
}
