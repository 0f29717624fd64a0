//! Router and request handlers.

use std::{sync::Arc, time::Duration};

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{sse::Event, IntoResponse, Response, Sse},
    routing::{delete, get, head, post, put},
    Router,
};
use futures::stream::Stream;
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::{debug, info, warn};

use rill_protocol::cursor::{generate_response_cursor, parse_cursor, CursorOptions};
use rill_protocol::etag::etag_matches;
use rill_protocol::expiry::{parse_expires_at, parse_ttl};
use rill_protocol::headers;
use rill_protocol::StoreError;
use rill_store::{AppendOptions, PutOptions, StreamStore};

use crate::ServerOptions;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn StreamStore>,
    pub options: ServerOptions,
}

/// Query parameters for GET requests.
#[derive(Debug, Deserialize)]
pub struct ReadQuery {
    pub offset: Option<String>,
    pub live: Option<String>,
    pub cursor: Option<String>,
}

/// Create the router with all stream endpoints.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::HEAD,
            Method::OPTIONS,
        ])
        .allow_headers(Any)
        .expose_headers(Any);

    Router::new()
        .route("/{*path}", put(handle_create))
        .route("/{*path}", head(handle_head))
        .route("/{*path}", get(handle_read))
        .route("/{*path}", post(handle_append))
        .route("/{*path}", delete(handle_delete))
        .layer(cors)
        .with_state(state)
}

/// PUT - create a stream (idempotent).
async fn handle_create(
    State(state): State<AppState>,
    Path(path): Path<String>,
    request_headers: HeaderMap,
    body: Body,
) -> impl IntoResponse {
    let path = format!("/{}", path);
    debug!(path = %path, "creating stream");

    let content_type = request_headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(headers::DEFAULT_CONTENT_TYPE)
        .to_string();

    let ttl_header = request_headers
        .get(headers::STREAM_TTL)
        .and_then(|v| v.to_str().ok());
    let expires_at_header = request_headers
        .get(headers::STREAM_EXPIRES_AT)
        .and_then(|v| v.to_str().ok());

    if ttl_header.is_some() && expires_at_header.is_some() {
        return (
            StatusCode::BAD_REQUEST,
            "Cannot specify both Stream-TTL and Stream-Expires-At",
        )
            .into_response();
    }

    let ttl_seconds = match ttl_header {
        Some(value) => match parse_ttl(value) {
            Some(ttl) => Some(ttl),
            None => {
                return (StatusCode::BAD_REQUEST, "Invalid Stream-TTL value").into_response()
            }
        },
        None => None,
    };

    let expires_at = match expires_at_header {
        Some(value) => match parse_expires_at(value) {
            Some(expires_at) => Some(expires_at),
            None => {
                return (StatusCode::BAD_REQUEST, "Invalid Stream-Expires-At timestamp")
                    .into_response()
            }
        },
        None => None,
    };

    let body_bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return (StatusCode::BAD_REQUEST, "Failed to read body").into_response(),
    };
    let data = if body_bytes.is_empty() {
        None
    } else {
        Some(body_bytes)
    };

    let options = PutOptions {
        content_type: Some(content_type.clone()),
        ttl_seconds,
        expires_at,
        data,
    };

    match state.store.put(&path, options).await {
        Ok(outcome) => {
            let mut response = Response::builder()
                .status(if outcome.created {
                    StatusCode::CREATED
                } else {
                    StatusCode::OK
                })
                .header(headers::STREAM_NEXT_OFFSET, &outcome.next_offset)
                .header(header::CONTENT_TYPE, &content_type);

            if outcome.created {
                response = response.header(header::LOCATION, &path);
            }
            response.body(Body::empty()).unwrap().into_response()
        }
        Err(e) => error_response(&path, e),
    }
}

/// HEAD - stream metadata.
async fn handle_head(State(state): State<AppState>, Path(path): Path<String>) -> Response {
    let path = format!("/{}", path);

    match state.store.head(&path).await {
        Ok(head) => {
            let mut response = Response::builder()
                .status(StatusCode::OK)
                .header(headers::STREAM_NEXT_OFFSET, &head.next_offset)
                .header(header::ETAG, &head.etag);

            if let Some(ct) = &head.content_type {
                response = response.header(header::CONTENT_TYPE, ct.as_str());
            }
            response.body(Body::empty()).unwrap()
        }
        Err(e) => error_response(&path, e),
    }
}

/// GET - snapshot read, long-poll, or SSE.
async fn handle_read(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<ReadQuery>,
    request_headers: HeaderMap,
) -> Response {
    let path = format!("/{}", path);

    let cursor_options = state.options.cursor_options();
    let client_cursor = query.cursor.as_deref().and_then(parse_cursor);
    let response_cursor = generate_response_cursor(client_cursor, &cursor_options);

    match query.live.as_deref() {
        Some(mode @ ("sse" | "long-poll")) => {
            // Live reads resume from a known position; an offset is mandatory.
            let Some(offset) = query.offset.clone() else {
                return (
                    StatusCode::BAD_REQUEST,
                    "live mode requires an offset parameter",
                )
                    .into_response();
            };
            if mode == "sse" {
                handle_sse(state, path, offset, response_cursor, cursor_options).await
            } else {
                handle_long_poll(state, path, offset, response_cursor).await
            }
        }
        Some(other) => (
            StatusCode::BAD_REQUEST,
            format!("unknown live mode: {other}"),
        )
            .into_response(),
        None => {
            handle_snapshot(state, path, query.offset, response_cursor, request_headers).await
        }
    }
}

/// Immediate snapshot read, with conditional-request support.
async fn handle_snapshot(
    state: AppState,
    path: String,
    offset: Option<String>,
    cursor: u64,
    request_headers: HeaderMap,
) -> Response {
    let snapshot = match state.store.get(&path, offset.as_deref()).await {
        Ok(snapshot) => snapshot,
        Err(e) => return error_response(&path, e),
    };

    if let Some(if_none_match) = request_headers
        .get(header::IF_NONE_MATCH)
        .and_then(|v| v.to_str().ok())
    {
        if etag_matches(if_none_match, &snapshot.etag) {
            return Response::builder()
                .status(StatusCode::NOT_MODIFIED)
                .header(headers::STREAM_NEXT_OFFSET, &snapshot.next_offset)
                .header(headers::STREAM_CURSOR, cursor.to_string())
                .header(header::ETAG, &snapshot.etag)
                .body(Body::empty())
                .unwrap();
        }
    }

    let body = state.store.format_response(&path, &snapshot.messages).await;

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(headers::STREAM_NEXT_OFFSET, &snapshot.next_offset)
        .header(headers::STREAM_CURSOR, cursor.to_string())
        .header(headers::STREAM_UP_TO_DATE, snapshot.up_to_date.to_string())
        .header(header::ETAG, &snapshot.etag);

    if let Some(ct) = &snapshot.content_type {
        response = response.header(header::CONTENT_TYPE, ct.as_str());
    }
    response.body(Body::from(body)).unwrap()
}

/// A single wait cycle; the response is always the post-wait snapshot.
async fn handle_long_poll(state: AppState, path: String, offset: String, cursor: u64) -> Response {
    if let Err(e) = state
        .store
        .wait_for_data(&path, &offset, state.options.long_poll_timeout_ms)
        .await
    {
        return error_response(&path, e);
    }

    // Data, timeout, and deletion all converge here: the snapshot carries
    // the authoritative offset and ETag, and a deleted stream reads as 404.
    let snapshot = match state.store.get(&path, Some(offset.as_str())).await {
        Ok(snapshot) => snapshot,
        Err(e) => return error_response(&path, e),
    };
    let body = state.store.format_response(&path, &snapshot.messages).await;

    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(headers::STREAM_NEXT_OFFSET, &snapshot.next_offset)
        .header(headers::STREAM_CURSOR, cursor.to_string())
        .header(headers::STREAM_UP_TO_DATE, "true")
        .header(header::ETAG, &snapshot.etag);

    if let Some(ct) = &snapshot.content_type {
        response = response.header(header::CONTENT_TYPE, ct.as_str());
    }
    response.body(Body::from(body)).unwrap()
}

/// SSE streaming: replay, then wait-notify cycles.
async fn handle_sse(
    state: AppState,
    path: String,
    offset: String,
    cursor: u64,
    cursor_options: CursorOptions,
) -> Response {
    let stream = create_sse_stream(state, path, offset, cursor, cursor_options);

    Sse::new(stream)
        .keep_alive(
            axum::response::sse::KeepAlive::new()
                .interval(Duration::from_secs(15))
                .text("keepalive"),
        )
        .into_response()
}

fn create_sse_stream(
    state: AppState,
    path: String,
    mut offset: String,
    cursor: u64,
    cursor_options: CursorOptions,
) -> impl Stream<Item = Result<Event, std::convert::Infallible>> {
    async_stream::stream! {
        let mut current_cursor = cursor;

        // Replay whatever is already committed past the requested offset.
        match state.store.get(&path, Some(offset.as_str())).await {
            Ok(snapshot) => {
                if !snapshot.messages.is_empty() {
                    let body = state.store.format_response(&path, &snapshot.messages).await;
                    yield Ok(Event::default()
                        .event("data")
                        .data(String::from_utf8_lossy(&body).into_owned()));
                }
                offset = snapshot.next_offset.clone();
                current_cursor = generate_response_cursor(Some(current_cursor), &cursor_options);
                yield Ok(control_event(&offset, current_cursor, snapshot.up_to_date));
            }
            Err(e) => {
                yield Ok(Event::default().event("error").data(e.to_string()));
                return;
            }
        }

        loop {
            match state
                .store
                .wait_for_data(&path, &offset, state.options.long_poll_timeout_ms)
                .await
            {
                Err(e) => {
                    yield Ok(Event::default().event("error").data(e.to_string()));
                    break;
                }
                Ok(outcome) if outcome.timed_out => {
                    // Refresh the client's cursor and offset after a quiet cycle.
                    current_cursor =
                        generate_response_cursor(Some(current_cursor), &cursor_options);
                    yield Ok(control_event(&offset, current_cursor, true));
                }
                Ok(outcome) => {
                    if outcome.messages.is_empty() {
                        // Resolved empty without a timeout: the stream vanished.
                        yield Ok(Event::default()
                            .event("error")
                            .data(format!("stream deleted: {path}")));
                        break;
                    }
                    match state.store.get(&path, Some(offset.as_str())).await {
                        Ok(snapshot) => {
                            let body =
                                state.store.format_response(&path, &snapshot.messages).await;
                            yield Ok(Event::default()
                                .event("data")
                                .data(String::from_utf8_lossy(&body).into_owned()));
                            offset = snapshot.next_offset.clone();
                            current_cursor =
                                generate_response_cursor(Some(current_cursor), &cursor_options);
                            yield Ok(control_event(&offset, current_cursor, snapshot.up_to_date));
                        }
                        Err(e) => {
                            yield Ok(Event::default().event("error").data(e.to_string()));
                            break;
                        }
                    }
                }
            }
        }
    }
}

fn control_event(next_offset: &str, cursor: u64, up_to_date: bool) -> Event {
    let control = serde_json::json!({
        "streamNextOffset": next_offset,
        "streamCursor": cursor.to_string(),
        "upToDate": up_to_date,
    });
    Event::default().event("control").data(control.to_string())
}

/// POST - append to a stream.
async fn handle_append(
    State(state): State<AppState>,
    Path(path): Path<String>,
    request_headers: HeaderMap,
    body: Body,
) -> impl IntoResponse {
    let path = format!("/{}", path);

    let Some(content_type) = request_headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
    else {
        return (StatusCode::BAD_REQUEST, "Content-Type is required on append").into_response();
    };

    let seq = request_headers
        .get(headers::STREAM_SEQ)
        .and_then(|v| v.to_str().ok())
        .map(String::from);

    let body_bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => return (StatusCode::BAD_REQUEST, "Failed to read body").into_response(),
    };
    if body_bytes.is_empty() {
        return (StatusCode::BAD_REQUEST, "Empty body not allowed").into_response();
    }

    let options = AppendOptions {
        content_type: Some(content_type),
        seq,
    };

    match state.store.append(&path, body_bytes, options).await {
        Ok(next_offset) => Response::builder()
            .status(StatusCode::OK)
            .header(headers::STREAM_NEXT_OFFSET, next_offset)
            .body(Body::empty())
            .unwrap()
            .into_response(),
        Err(e) => error_response(&path, e),
    }
}

/// DELETE - remove a stream. Idempotent at the wire: always 204.
async fn handle_delete(State(state): State<AppState>, Path(path): Path<String>) -> Response {
    let path = format!("/{}", path);

    match state.store.delete(&path).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(&path, e),
    }
}

/// Map a store error onto the wire.
fn error_response(path: &str, error: StoreError) -> Response {
    if error.is_payload_too_large() {
        return (StatusCode::PAYLOAD_TOO_LARGE, error.to_string()).into_response();
    }

    let status = match &error {
        StoreError::StreamNotFound(_) => StatusCode::NOT_FOUND,
        StoreError::SequenceConflict { .. }
        | StoreError::ContentTypeMismatch { .. }
        | StoreError::StreamConflict { .. } => StatusCode::CONFLICT,
        StoreError::InvalidJson(_) | StoreError::InvalidOffset(_) => StatusCode::BAD_REQUEST,
        StoreError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        StoreError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status == StatusCode::INTERNAL_SERVER_ERROR {
        warn!(path = %path, error = %error, "stream operation failed");
    }
    (status, error.to_string()).into_response()
}

/// Start the server.
pub async fn start_server(
    store: Arc<dyn StreamStore>,
    options: ServerOptions,
) -> std::io::Result<()> {
    let state = AppState {
        store,
        options: options.clone(),
    };
    let router = create_router(state);

    let addr = format!("{}:{}", options.host, options.port);
    info!("starting durable streams server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    use rill_store::memory::MemoryStreamStore;

    use super::*;

    fn create_test_app() -> Router {
        let state = AppState {
            store: MemoryStreamStore::new(),
            options: ServerOptions::default(),
        };
        create_router(state)
    }

    fn header_value<'a>(response: &'a Response, name: &str) -> &'a str {
        response
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }

    async fn body_bytes(response: Response) -> Vec<u8> {
        axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    #[tokio::test]
    async fn test_create_and_read_empty_json_stream() {
        let app = create_test_app();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/s1")
                    .header("Content-Type", "application/json")
                    .body(Body::from("[]"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            header_value(&response, "stream-next-offset"),
            "0000000000000000_0000000000000000"
        );

        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/s1?offset=-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(header_value(&response, "stream-up-to-date"), "true");
        assert_eq!(body_bytes(response).await, b"[]");
    }

    #[tokio::test]
    async fn test_append_raw_bytes_with_exact_offsets() {
        let app = create_test_app();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/s2")
                    .header("Content-Type", "application/octet-stream")
                    .body(Body::from("hello"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(
            header_value(&response, "stream-next-offset"),
            "0000000000000001_0000000000000005"
        );

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/s2")
                    .header("Content-Type", "application/octet-stream")
                    .body(Body::from(" world"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            header_value(&response, "stream-next-offset"),
            "0000000000000002_000000000000000b"
        );

        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/s2?offset=0000000000000000_0000000000000005")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, b" world");
    }

    #[tokio::test]
    async fn test_json_append_convention() {
        let app = create_test_app();

        app.clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/s3")
                    .header("Content-Type", "application/json")
                    .body(Body::from("{\"a\":1}"))
                    .unwrap(),
            )
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/s3")
                    .header("Content-Type", "application/json")
                    .body(Body::from("[{\"a\":2},{\"a\":3}]"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/s3?offset=-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_bytes(response).await, b"[{\"a\":1},{\"a\":2},{\"a\":3}]");
    }

    #[tokio::test]
    async fn test_idempotent_put_conflicts() {
        let app = create_test_app();

        let put = |ct: &str, ttl: &str| {
            Request::builder()
                .method("PUT")
                .uri("/s4")
                .header("Content-Type", ct)
                .header("Stream-TTL", ttl)
                .body(Body::empty())
                .unwrap()
        };

        let response = app.clone().oneshot(put("application/json", "60")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = app.clone().oneshot(put("application/json", "120")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app.clone().oneshot(put("text/plain", "60")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let response = app.oneshot(put("application/json", "60")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_sequence_conflict() {
        let app = create_test_app();

        app.clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/s5")
                    .header("Content-Type", "application/octet-stream")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let post = |seq: &str, data: &'static str| {
            Request::builder()
                .method("POST")
                .uri("/s5")
                .header("Content-Type", "application/octet-stream")
                .header("Stream-Seq", seq)
                .body(Body::from(data))
                .unwrap()
        };

        let response = app.clone().oneshot(post("00000005", "a")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.clone().oneshot(post("00000005", "b")).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_bytes(response).await;
        assert!(String::from_utf8_lossy(&body).contains("> 00000005"));

        let response = app.oneshot(post("00000006", "c")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_long_poll_wakes_on_append() {
        let store = MemoryStreamStore::new();
        let state = AppState {
            store: store.clone(),
            options: ServerOptions::default(),
        };
        let app = create_router(state);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/s6")
                    .header("Content-Type", "application/octet-stream")
                    .body(Body::from("x"))
                    .unwrap(),
            )
            .await
            .unwrap();
        let offset = header_value(&response, "stream-next-offset").to_string();

        let poll = {
            let app = app.clone();
            let uri = format!("/s6?offset={offset}&live=long-poll");
            tokio::spawn(async move {
                app.oneshot(
                    Request::builder()
                        .method("GET")
                        .uri(uri)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap()
            })
        };

        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        app.oneshot(
            Request::builder()
                .method("POST")
                .uri("/s6")
                .header("Content-Type", "application/octet-stream")
                .body(Body::from("y"))
                .unwrap(),
        )
        .await
        .unwrap();

        let response = poll.await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            header_value(&response, "stream-next-offset"),
            "0000000000000002_0000000000000002"
        );
        assert_eq!(header_value(&response, "stream-up-to-date"), "true");
        assert_eq!(body_bytes(response).await, b"y");
    }

    #[tokio::test]
    async fn test_long_poll_requires_offset() {
        let app = create_test_app();
        app.clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/s")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/s?live=long-poll")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_etag_matching_returns_not_modified() {
        let app = create_test_app();

        app.clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/s")
                    .header("Content-Type", "application/octet-stream")
                    .body(Body::from("abc"))
                    .unwrap(),
            )
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/s?offset=-1")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let etag = header_value(&response, "etag").to_string();
        assert!(!etag.is_empty());

        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/s?offset=-1")
                    .header("If-None-Match", &etag)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_MODIFIED);
        assert_eq!(header_value(&response, "etag"), etag);
        assert!(body_bytes(response).await.is_empty());
    }

    #[tokio::test]
    async fn test_append_missing_stream_is_not_found() {
        let app = create_test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/nope")
                    .header("Content-Type", "text/plain")
                    .body(Body::from("x"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_append_requires_content_type_and_body() {
        let app = create_test_app();
        app.clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/s")
                    .header("Content-Type", "text/plain")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/s")
                    .body(Body::from("x"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/s")
                    .header("Content-Type", "text/plain")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_empty_json_array_append_rejected() {
        let app = create_test_app();
        app.clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/s")
                    .header("Content-Type", "application/json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/s")
                    .header("Content-Type", "application/json")
                    .body(Body::from("[]"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_ttl_and_expires_at_are_mutually_exclusive() {
        let app = create_test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/s")
                    .header("Stream-TTL", "60")
                    .header("Stream-Expires-At", "2030-01-01T00:00:00Z")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_invalid_ttl_rejected() {
        let app = create_test_app();
        for ttl in ["0", "007", "-5", "60s"] {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("PUT")
                        .uri("/s")
                        .header("Stream-TTL", ttl)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "ttl {ttl:?}");
        }
    }

    #[tokio::test]
    async fn test_head_and_delete() {
        let app = create_test_app();
        app.clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/s")
                    .header("Content-Type", "text/plain")
                    .body(Body::from("abc"))
                    .unwrap(),
            )
            .await
            .unwrap();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("HEAD")
                    .uri("/s")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            header_value(&response, "stream-next-offset"),
            "0000000000000001_0000000000000003"
        );
        assert!(!header_value(&response, "etag").is_empty());

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/s")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("HEAD")
                    .uri("/s")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        // Deletes are idempotent at the wire.
        let response = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/s")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_invalid_offset_rejected() {
        let app = create_test_app();
        app.clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/s")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/s?offset=bogus")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (
                StoreError::StreamNotFound("/s".to_string()),
                StatusCode::NOT_FOUND,
            ),
            (
                StoreError::SequenceConflict {
                    expected: "1".to_string(),
                    received: "1".to_string(),
                },
                StatusCode::CONFLICT,
            ),
            (
                StoreError::ContentTypeMismatch {
                    expected: "application/json".to_string(),
                    received: "text/plain".to_string(),
                },
                StatusCode::CONFLICT,
            ),
            (
                StoreError::StreamConflict { attribute: "ttl" },
                StatusCode::CONFLICT,
            ),
            (
                StoreError::InvalidJson("bad".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (StoreError::PayloadTooLarge, StatusCode::PAYLOAD_TOO_LARGE),
            (
                StoreError::Storage("string or blob too big".to_string()),
                StatusCode::PAYLOAD_TOO_LARGE,
            ),
            (
                StoreError::Storage("disk I/O error".to_string()),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            let description = error.to_string();
            assert_eq!(
                error_response("/s", error).status(),
                expected,
                "{description}"
            );
        }
    }

    #[tokio::test]
    async fn test_put_defaults_content_type() {
        let app = create_test_app();
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/s")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(header_value(&response, "location"), "/s");

        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/s")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(
            header_value(&response, "content-type"),
            "application/octet-stream"
        );
    }
}
