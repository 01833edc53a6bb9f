use actix_web::cookie::Cookie;
use actix_web::http::{header, StatusCode};
use actix_web::{test, web, App};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use mirrorgate::codec;
use mirrorgate::config::Config;
use mirrorgate::health::GatewayMetrics;
use mirrorgate::proxy::{ClientConfig, ProxyClient};
use mirrorgate::routes;

fn config() -> Config {
    Config {
        bind: "127.0.0.1:0".to_string(),
        secret_path: "/gate".to_string(),
        allow_countries: "*".to_string(),
        request_timeout: 5,
    }
}

macro_rules! test_app {
    ($cfg:expr) => {{
        let metrics = web::Data::new(GatewayMetrics::default());
        let client = web::Data::new(ProxyClient::new(ClientConfig::default()).unwrap());
        let config = web::Data::new($cfg);
        test::init_service(
            App::new()
                .app_data(config)
                .app_data(client)
                .app_data(metrics)
                .default_service(web::route().to(routes::dispatch)),
        )
        .await
    }};
}

/// Serve one canned HTTP response per connection, like a scripted target.
async fn spawn_upstream(response: String) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let response = response.clone();
            tokio::spawn(async move {
                // Read the request head before answering.
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                loop {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            head.extend_from_slice(&buf[..n]);
                            if head.windows(4).any(|w| w == b"\r\n\r\n") {
                                break;
                            }
                        }
                    }
                }
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });

    port
}

fn html_response(body: &str) -> String {
    format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    )
}

#[actix_web::test]
async fn test_landing_page_at_prefix() {
    let app = test_app!(config());

    for uri in ["/gate", "/gate/"] {
        let req = test::TestRequest::get().uri(uri).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = test::read_body(resp).await;
        let body = std::str::from_utf8(&body).unwrap();
        assert!(body.contains("id=\"urlForm\""));
        assert!(body.contains("'/gate'"));
    }
}

#[actix_web::test]
async fn test_preflight_answered_at_gateway() {
    let app = test_app!(config());

    let req = test::TestRequest::with_uri("/anywhere/at/all")
        .method(actix_web::http::Method::OPTIONS)
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(
        resp.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );
    assert_eq!(
        resp.headers().get("access-control-allow-methods").unwrap(),
        "GET, POST, PUT, DELETE, OPTIONS"
    );
}

#[actix_web::test]
async fn test_geo_denial_happens_first() {
    let mut cfg = config();
    cfg.allow_countries = "US".to_string();
    let app = test_app!(cfg);

    let denied = test::TestRequest::get()
        .uri("/gate/")
        .insert_header(("cf-ipcountry", "FR"))
        .to_request();
    let resp = test::call_service(&app, denied).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let missing = test::TestRequest::get().uri("/gate/").to_request();
    let resp = test::call_service(&app, missing).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let allowed = test::TestRequest::get()
        .uri("/gate/")
        .insert_header(("cf-ipcountry", "us"))
        .to_request();
    let resp = test::call_service(&app, allowed).await;
    assert_eq!(resp.status(), StatusCode::OK);
}

#[actix_web::test]
async fn test_unrecoverable_request_is_404() {
    let app = test_app!(config());

    let req = test::TestRequest::get().uri("/app.js").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn test_recovery_redirects_via_session_cookie() {
    let app = test_app!(config());

    let req = test::TestRequest::get()
        .uri("/app.js?v=1")
        .cookie(Cookie::new(
            "__proxy_session",
            "https%3A%2F%2Fa.com%2Findex.html",
        ))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::FOUND);
    let location = resp
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(
        location.ends_with("/gate/https%3A%2F%2Fa.com%2Fapp.js%3Fv%3D1"),
        "unexpected location: {}",
        location
    );
}

#[actix_web::test]
async fn test_recovery_redirects_via_referer_origin() {
    let app = test_app!(config());

    let req = test::TestRequest::get()
        .uri("/style.css")
        .insert_header((
            header::REFERER,
            "http://localhost/gate/https%3A%2F%2Fa.com%2Fdir%2Fpage.html",
        ))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::FOUND);
    let location = resp
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(
        location.ends_with("/gate/https://a.com/style.css"),
        "unexpected location: {}",
        location
    );
}

#[actix_web::test]
async fn test_html_response_is_rewritten_and_sets_session() {
    let page = r#"<html><head><title>t</title></head><body><a href="/p">x</a></body></html>"#;
    let port = spawn_upstream(html_response(page)).await;
    let target = format!("http://127.0.0.1:{}/dir/page.html", port);

    let app = test_app!(config());
    let req = test::TestRequest::get()
        .uri(&codec::encode("/gate", &target))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers().get("cache-control").unwrap(), "no-store");
    assert_eq!(
        resp.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );
    let cookie = resp
        .headers()
        .get(header::SET_COOKIE)
        .expect("HTML response must set the session cookie")
        .to_str()
        .unwrap();
    assert!(cookie.starts_with("__proxy_session="));
    assert!(cookie.contains("SameSite=Lax"));

    let body = test::read_body(resp).await;
    let body = std::str::from_utf8(&body).unwrap();
    assert!(body.contains(&format!("/gate/http://127.0.0.1:{}/p", port)));
    assert!(body.contains("<base href="));
    assert!(body.contains("function proxyUrl"));
}

#[actix_web::test]
async fn test_non_html_response_never_touches_session() {
    let response =
        "HTTP/1.1 200 OK\r\nContent-Type: image/png\r\nContent-Length: 8\r\nConnection: close\r\n\r\nnot-real"
            .to_string();
    let port = spawn_upstream(response).await;
    let target = format!("http://127.0.0.1:{}/logo.png", port);

    let app = test_app!(config());
    let req = test::TestRequest::get()
        .uri(&codec::encode("/gate", &target))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert!(resp.headers().get(header::SET_COOKIE).is_none());
    assert_eq!(resp.headers().get("cache-control").unwrap(), "no-store");

    let body = test::read_body(resp).await;
    assert_eq!(&body[..], b"not-real");
}

#[actix_web::test]
async fn test_redirect_location_stays_under_prefix() {
    let response = "HTTP/1.1 302 Found\r\nLocation: /new\r\nX-Upstream: yes\r\nContent-Length: 0\r\nConnection: close\r\n\r\n".to_string();
    let port = spawn_upstream(response).await;
    let target = format!("http://127.0.0.1:{}/x", port);

    let app = test_app!(config());
    let req = test::TestRequest::get()
        .uri(&codec::encode("/gate", &target))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::FOUND);
    let location = resp
        .headers()
        .get(header::LOCATION)
        .unwrap()
        .to_str()
        .unwrap();
    let expected = codec::encode("/gate", &format!("http://127.0.0.1:{}/new", port));
    assert!(
        location.ends_with(&expected),
        "unexpected location: {}",
        location
    );
    // Everything besides Location passes through untouched.
    assert_eq!(resp.headers().get("x-upstream").unwrap(), "yes");
}

#[actix_web::test]
async fn test_outbound_failure_maps_to_500_json() {
    // Nothing listens on this port.
    let target = "http://127.0.0.1:9/down";

    let app = test_app!(config());
    let req = test::TestRequest::get()
        .uri(&codec::encode("/gate", target))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = test::read_body(resp).await;
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert!(json["error"].as_str().unwrap().contains("outbound"));
}

#[actix_web::test]
async fn test_health_segment_inside_prefix() {
    let app = test_app!(config());

    let req = test::TestRequest::get().uri("/gate/__health").to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::OK);
    let body = test::read_body(resp).await;
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["status"], "ok");
    assert!(json["requests_total"].as_u64().unwrap() >= 1);
}
