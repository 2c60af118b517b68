use std::time::Duration;

use axum::http::{self, Method, Request, StatusCode};
use http_body_util::BodyExt;
use mock_server::{app, Echo, MockServer, CLOSE_EVERY};
use tower::ServiceExt;

async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_bytes(response: axum::response::Response) -> bytes::Bytes {
    response.into_body().collect().await.unwrap().to_bytes()
}

fn get(uri: &str) -> Request<String> {
    Request::builder().uri(uri).body(String::new()).unwrap()
}

fn upload(method: &str, uri: &str, content_type: &str, body: &str) -> Request<String> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(http::header::CONTENT_TYPE, content_type)
        .body(body.to_string())
        .unwrap()
}

// --- canned ---

#[tokio::test]
async fn coucou_is_canned() {
    let resp = app().oneshot(get("/coucou")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_bytes(resp).await, "coucou");
}

#[tokio::test]
async fn unknown_path_is_404() {
    let resp = app().oneshot(get("/nothing")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn custom_canned_response() {
    let router = MockServer::new()
        .respond(Method::GET, "/teapot", StatusCode::IM_A_TEAPOT, "short and stout")
        .router();
    let resp = router.oneshot(get("/teapot")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::IM_A_TEAPOT);
    assert_eq!(body_bytes(resp).await, "short and stout");
}

// --- special endpoints ---

#[tokio::test]
async fn timeout_never_answers() {
    let pending = tokio::time::timeout(Duration::from_millis(100), app().oneshot(get("/timeout"))).await;
    assert!(pending.is_err());
}

#[tokio::test]
async fn connection_close_is_204_with_close() {
    let resp = app().oneshot(get("/connection-close")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    assert_eq!(resp.headers()[http::header::CONNECTION], "close");
}

#[tokio::test]
async fn headers_are_echoed_as_json() {
    let req = Request::builder()
        .uri("/headers")
        .header("accept", "*/*")
        .header("someheader", "somevalue")
        .body(String::new())
        .unwrap();
    let resp = app().oneshot(req).await.unwrap();
    let json: serde_json::Value = body_json(resp).await;
    assert_eq!(json["accept"], "*/*");
    assert_eq!(json["someheader"], "somevalue");
}

#[tokio::test]
async fn query_params_are_echoed_raw() {
    let resp = app().oneshot(get("/query-params?value=hello")).await.unwrap();
    assert_eq!(body_bytes(resp).await, "?value=hello");
}

#[tokio::test]
async fn counter_closes_every_hundredth_response() {
    let router = app();
    for n in 1..=CLOSE_EVERY {
        let resp = router.clone().oneshot(get("/counter")).await.unwrap();
        let close = resp.headers().get(http::header::CONNECTION).is_some();
        assert_eq!(close, n == CLOSE_EVERY, "response {n}");
        assert_eq!(body_bytes(resp).await, n.to_string());
    }
}

// --- uploads ---

#[tokio::test]
async fn post_is_echoed() {
    let resp = app()
        .oneshot(upload("POST", "/post-test", "application/x-nothing", "post body"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let echo: Echo = body_json(resp).await;
    assert_eq!(echo.verb, "POST");
    assert_eq!(echo.payload, "post body");
    assert_eq!(echo.content_type, "application/x-nothing");
}

#[tokio::test]
async fn large_put_is_not_limited() {
    let body = "this is one big body,".repeat(100_000);
    let resp = app()
        .oneshot(upload("PUT", "/put-test", "text/plain", &body))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let echo: Echo = body_json(resp).await;
    assert_eq!(echo.verb, "PUT");
    assert_eq!(echo.payload.len(), body.len());
}

#[tokio::test]
async fn delete_is_200() {
    let req = Request::builder()
        .method("DELETE")
        .uri("/deleteMe")
        .body(String::new())
        .unwrap();
    let resp = app().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert!(body_bytes(resp).await.is_empty());
}
