mod common;

use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::get;
use axum::Router;
use freeradio_daemon::proxy::{self, ProxyState};
use freeradio_proto::stations::proxy_url;

const AAC_BYTES: &[u8] = &[0xff, 0xf1, 0x50, 0x80, 0x00, 0x1f, 0xfc, 0x00, 0x01, 0x02];

async fn upstream() -> String {
    let app = Router::new()
        .route(
            "/live.aac",
            get(|| async { ([(header::CONTENT_TYPE, "audio/aac")], AAC_BYTES) }),
        )
        .route(
            "/untyped",
            get(|| async { axum::body::Body::from(&b"raw"[..]) }),
        )
        .route(
            "/headers",
            get(|headers: HeaderMap| async move {
                let ua = headers
                    .get(header::USER_AGENT)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                let icy = headers
                    .get("icy-metadata")
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string();
                format!("{}|{}", ua, icy)
            }),
        );
    common::serve(app).await
}

async fn proxy_base() -> String {
    let state = ProxyState::new().expect("proxy client");
    common::serve(proxy::router(state)).await
}

#[tokio::test]
async fn missing_url_parameter_is_bad_request() {
    let base = proxy_base().await;
    let resp = reqwest::get(format!("{}/api/stream", base)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = resp.text().await.unwrap();
    assert_eq!(body, "Missing url parameter");
}

#[tokio::test]
async fn upstream_status_is_propagated() {
    let base = proxy_base().await;
    let up = upstream().await;
    let url = proxy_url(&base, &format!("{}/missing.mp3", up)).unwrap();

    let resp = reqwest::get(url).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(resp.text().await.unwrap(), "Stream error: 404");
}

#[tokio::test]
async fn relays_body_and_content_type() {
    let base = proxy_base().await;
    let up = upstream().await;
    let url = proxy_url(&base, &format!("{}/live.aac", up)).unwrap();

    let resp = reqwest::get(url).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "audio/aac");
    assert_eq!(resp.headers()[header::CACHE_CONTROL], "no-cache, no-store");
    assert_eq!(resp.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    assert_eq!(resp.bytes().await.unwrap().as_ref(), AAC_BYTES);
}

#[tokio::test]
async fn missing_content_type_defaults_to_mpeg() {
    let base = proxy_base().await;
    let up = upstream().await;
    let url = proxy_url(&base, &format!("{}/untyped", up)).unwrap();

    let resp = reqwest::get(url).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(resp.headers()[header::CONTENT_TYPE], "audio/mpeg");
    assert_eq!(resp.text().await.unwrap(), "raw");
}

#[tokio::test]
async fn sends_client_identifier_and_icy_request() {
    let base = proxy_base().await;
    let up = upstream().await;
    let url = proxy_url(&base, &format!("{}/headers", up)).unwrap();

    let body = reqwest::get(url).await.unwrap().text().await.unwrap();
    assert_eq!(body, "Mozilla/5.0 (compatible; FreeRadio/1.0)|1");
}

#[tokio::test]
async fn unreachable_upstream_is_server_error() {
    let base = proxy_base().await;
    let url = proxy_url(&base, &common::dead_url().await).unwrap();

    let resp = reqwest::get(url).await.unwrap();
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(resp.text().await.unwrap(), "Failed to fetch stream");
}
