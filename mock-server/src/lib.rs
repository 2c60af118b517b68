//! HTTP server the client is tested against.
//!
//! Besides canned responses it offers endpoints that misbehave on purpose:
//! one never answers, one closes the connection after responding, and a
//! counter closes every hundredth connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

/// Every `CLOSE_EVERY`th `/counter` response closes its connection.
pub const CLOSE_EVERY: u64 = 100;

/// Body of the `POST`/`PUT` echo.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Echo {
    pub verb: String,
    pub payload: String,
    #[serde(rename = "type")]
    pub content_type: String,
}

#[derive(Clone, Debug)]
struct Canned {
    status: StatusCode,
    body: String,
}

#[derive(Clone, Default)]
struct AppState {
    canned: Arc<HashMap<(Method, String), Canned>>,
    counter: Arc<AtomicU64>,
}

/// Builder for the router, with canned responses.
#[derive(Debug, Default)]
pub struct MockServer {
    canned: HashMap<(Method, String), Canned>,
}

impl MockServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `method path` with a fixed status and body.
    pub fn respond(mut self, method: Method, path: &str, status: StatusCode, body: &str) -> Self {
        self.canned.insert(
            (method, path.to_string()),
            Canned {
                status,
                body: body.to_string(),
            },
        );
        self
    }

    pub fn router(self) -> Router {
        let state = AppState {
            canned: Arc::new(self.canned),
            counter: Arc::default(),
        };
        Router::new()
            .route("/timeout", get(never_answer))
            .route("/connection-close", get(connection_close))
            .route("/headers", get(echo_headers))
            .route("/query-params", get(query_params))
            .route("/counter", get(counter))
            .fallback(fallback)
            .layer(DefaultBodyLimit::disable())
            .with_state(state)
    }
}

/// The standard app: special endpoints plus `GET /coucou` → 200 "coucou".
pub fn app() -> Router {
    MockServer::new()
        .respond(Method::GET, "/coucou", StatusCode::OK, "coucou")
        .router()
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    serve(listener, app()).await
}

pub async fn serve(listener: TcpListener, router: Router) -> Result<(), std::io::Error> {
    axum::serve(listener, router).await
}

async fn never_answer() -> StatusCode {
    std::future::pending::<()>().await;
    StatusCode::OK
}

async fn connection_close() -> impl IntoResponse {
    (StatusCode::NO_CONTENT, [(header::CONNECTION, "close")])
}

async fn echo_headers(headers: HeaderMap) -> Json<serde_json::Map<String, serde_json::Value>> {
    let map = headers
        .iter()
        .map(|(name, value)| {
            let value = String::from_utf8_lossy(value.as_bytes()).into_owned();
            (name.as_str().to_string(), serde_json::Value::String(value))
        })
        .collect();
    Json(map)
}

async fn query_params(uri: Uri) -> String {
    format!("?{}", uri.query().unwrap_or(""))
}

async fn counter(State(state): State<AppState>) -> Response {
    let n = state.counter.fetch_add(1, Ordering::Relaxed) + 1;
    if n % CLOSE_EVERY == 0 {
        tracing::debug!(n, "closing connection after counter response");
        ([(header::CONNECTION, "close")], n.to_string()).into_response()
    } else {
        n.to_string().into_response()
    }
}

async fn fallback(State(state): State<AppState>, method: Method, uri: Uri, headers: HeaderMap, body: Bytes) -> Response {
    if let Some(canned) = state.canned.get(&(method.clone(), uri.path().to_string())) {
        return (canned.status, canned.body.clone()).into_response();
    }

    if method == Method::POST || method == Method::PUT {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        tracing::debug!(%method, path = uri.path(), len = body.len(), "echoing upload");
        return Json(Echo {
            verb: method.as_str().to_string(),
            payload: String::from_utf8_lossy(&body).into_owned(),
            content_type,
        })
        .into_response();
    }

    if method == Method::DELETE {
        return StatusCode::OK.into_response();
    }

    StatusCode::NOT_FOUND.into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn echo_uses_type_as_the_json_key() {
        let echo = Echo {
            verb: "POST".to_string(),
            payload: "x".to_string(),
            content_type: "text/plain".to_string(),
        };
        let json = serde_json::to_value(&echo).unwrap();
        assert_eq!(json["type"], "text/plain");
        assert_eq!(json["verb"], "POST");
    }

    #[test]
    fn canned_responses_are_keyed_by_method_and_path() {
        let server = MockServer::new()
            .respond(Method::GET, "/a", StatusCode::OK, "a")
            .respond(Method::POST, "/a", StatusCode::CREATED, "b");
        assert_eq!(server.canned.len(), 2);
        assert_eq!(server.canned[&(Method::POST, "/a".to_string())].status, StatusCode::CREATED);
    }
}
