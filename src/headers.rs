/*!
 * # Header Sanitizer
 *
 * Request-side: strips edge-injected headers and rewrites the identity
 * headers (`Host`, `Origin`, `Referer`) so the target sees itself, not the
 * gateway. Response-side: the strip list for headers that must never be
 * copied back to the browser, plus the cache/CORS set applied to every
 * rewritten response.
 */

use actix_web::http::header::HeaderMap as InboundHeaderMap;
use actix_web::HttpResponseBuilder;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, HOST, ORIGIN, REFERER};
use url::Url;

use crate::codec;

/// Edge platforms prefix the metadata they inject with this; none of it is
/// meaningful to the target.
const EDGE_HEADER_PREFIX: &str = "cf-";

/// Header carrying the request country, injected by the edge.
pub const COUNTRY_HEADER: &str = "cf-ipcountry";

/// Inbound headers never forwarded to the target. `host`/`origin`/`referer`
/// are re-set to the target's identity; `x-forwarded-host` and `via` leak
/// the gateway and can break origin checks; `content-length` is recomputed
/// by the outbound client; `accept-encoding` is delegated to the outbound
/// client so response bodies arrive decoded and rewritable.
const DROPPED_REQUEST_HEADERS: [&str; 6] = [
    "host",
    "origin",
    "referer",
    "x-forwarded-host",
    "via",
    "accept-encoding",
];

/// Response headers never copied back to the browser: hop-by-hop fields,
/// body-framing fields invalidated by rewriting, and the policy headers
/// that would block the injected script or framing through the gateway.
const STRIPPED_RESPONSE_HEADERS: [&str; 10] = [
    "connection",
    "keep-alive",
    "te",
    "trailers",
    "transfer-encoding",
    "content-length",
    "content-encoding",
    "content-security-policy",
    "content-security-policy-report-only",
    "x-frame-options",
];

/// Build the outbound header map for `target` from the inbound request
/// headers.
pub fn sanitize(inbound: &InboundHeaderMap, target: &Url) -> HeaderMap {
    let mut out = HeaderMap::new();

    for (name, value) in inbound.iter() {
        let lower = name.as_str().to_ascii_lowercase();
        if lower.starts_with(EDGE_HEADER_PREFIX) || DROPPED_REQUEST_HEADERS.contains(&lower.as_str())
        {
            continue;
        }
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_str().as_bytes()),
            HeaderValue::from_bytes(value.as_bytes()),
        ) {
            out.append(name, value);
        }
    }

    let host = match (target.host_str(), target.port()) {
        (Some(host), Some(port)) => format!("{}:{}", host, port),
        (Some(host), None) => host.to_string(),
        _ => String::new(),
    };
    let origin = codec::target_origin(target);

    if let Ok(value) = HeaderValue::from_str(&host) {
        out.insert(HOST, value);
    }
    if let Ok(value) = HeaderValue::from_str(&origin) {
        out.insert(ORIGIN, value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("{}/", origin)) {
        out.insert(REFERER, value);
    }

    out
}

/// Whether a target response header is withheld from the gateway response.
pub fn should_strip_response_header(name: &HeaderName) -> bool {
    STRIPPED_RESPONSE_HEADERS
        .iter()
        .any(|&h| h.eq_ignore_ascii_case(name.as_str()))
}

/// Cache and CORS treatment for every rewritten response: rewritten content
/// must never be served stale, and the gateway answers for any origin.
pub fn apply_gateway_headers(builder: &mut HttpResponseBuilder) {
    builder.insert_header(("Cache-Control", "no-store"));
    set_cors_headers(builder);
}

pub fn set_cors_headers(builder: &mut HttpResponseBuilder) {
    builder.insert_header(("Access-Control-Allow-Origin", "*"));
    builder.insert_header(("Access-Control-Allow-Methods", "GET, POST, PUT, DELETE, OPTIONS"));
    builder.insert_header(("Access-Control-Allow-Headers", "*"));
    builder.insert_header(("Access-Control-Allow-Credentials", "true"));
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    fn sanitized(target: &str) -> HeaderMap {
        let req = TestRequest::default()
            .insert_header(("cf-connecting-ip", "203.0.113.9"))
            .insert_header(("cf-ipcountry", "US"))
            .insert_header(("x-forwarded-host", "gw.example"))
            .insert_header(("via", "1.1 edge"))
            .insert_header(("accept-encoding", "gzip"))
            .insert_header(("user-agent", "test-agent"))
            .to_http_request();
        sanitize(req.headers(), &Url::parse(target).unwrap())
    }

    #[test]
    fn test_edge_headers_dropped() {
        let out = sanitized("https://a.com/x");
        assert!(out.get("cf-connecting-ip").is_none());
        assert!(out.get("cf-ipcountry").is_none());
        assert!(out.get("x-forwarded-host").is_none());
        assert!(out.get("via").is_none());
        assert!(out.get("accept-encoding").is_none());
    }

    #[test]
    fn test_ordinary_headers_survive() {
        let out = sanitized("https://a.com/x");
        assert_eq!(out.get("user-agent").unwrap(), "test-agent");
    }

    #[test]
    fn test_identity_headers_point_at_target() {
        let out = sanitized("https://a.com/x");
        assert_eq!(out.get(HOST).unwrap(), "a.com");
        assert_eq!(out.get(ORIGIN).unwrap(), "https://a.com");
        assert_eq!(out.get(REFERER).unwrap(), "https://a.com/");
    }

    #[test]
    fn test_host_keeps_port() {
        let out = sanitized("http://a.com:8080/x");
        assert_eq!(out.get(HOST).unwrap(), "a.com:8080");
        assert_eq!(out.get(ORIGIN).unwrap(), "http://a.com:8080");
    }

    #[test]
    fn test_response_strip_list() {
        assert!(should_strip_response_header(&HeaderName::from_static(
            "content-security-policy"
        )));
        assert!(should_strip_response_header(&HeaderName::from_static(
            "x-frame-options"
        )));
        assert!(should_strip_response_header(&HeaderName::from_static(
            "transfer-encoding"
        )));
        assert!(!should_strip_response_header(&HeaderName::from_static(
            "content-type"
        )));
        assert!(!should_strip_response_header(&HeaderName::from_static(
            "set-cookie"
        )));
    }
}
