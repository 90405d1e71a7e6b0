//! Request lifecycle events.
//!
//! # Responsibilities
//! - Assign a `RequestId` before the handler runs
//! - Emit `HTTP_START` on entry and exactly one `HTTP_END` per request,
//!   cancelled ones included
//! - Emit `HTTP_EXCEPTION` for server errors and cancellations
//!
//! The middleware never alters the handler's response apart from adding the
//! `x-request-id` header.

use std::net::SocketAddr;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::Response,
    Router,
};

use crate::observability::events::{Emitter, Event};
use crate::upstream::context::{RequestId, X_REQUEST_ID};

/// Wrap every route of `router` with [`request_lifecycle`].
pub fn instrument(router: Router, emitter: Emitter) -> Router {
    router.layer(middleware::from_fn_with_state(emitter, request_lifecycle))
}

/// Status recorded in `HTTP_END` when the request is dropped before a
/// response exists (client gone, outer timeout, handler panic).
pub const CANCELLED_STATUS: u16 = 499;

/// One request between `HTTP_START` and `HTTP_END`. Dropping it ends the
/// request, so a cancelled handler still gets its terminal events.
#[derive(Debug)]
struct InFlightRequest {
    request_id: RequestId,
    method: String,
    path: String,
    started_at: Instant,
    status: Option<StatusCode>,
    emitter: Emitter,
}

impl InFlightRequest {
    fn finish(mut self, status: StatusCode) {
        self.status = Some(status);
    }
}

impl Drop for InFlightRequest {
    fn drop(&mut self) {
        let elapsed = self.started_at.elapsed();
        let error = match self.status {
            Some(status) if status.is_server_error() => {
                Some(status.canonical_reason().unwrap_or("server error"))
            }
            Some(_) => None,
            None => Some("cancelled"),
        };

        if let Some(error) = error {
            self.emitter.emit(Event::HttpException {
                request_id: Some(self.request_id.to_string()),
                method: self.method.clone(),
                path: self.path.clone(),
                elapsed: Some(elapsed),
                error: error.to_string(),
            });
        }

        self.emitter.emit(Event::HttpEnd {
            request_id: self.request_id.to_string(),
            method: std::mem::take(&mut self.method),
            path: std::mem::take(&mut self.path),
            status: self.status.map_or(CANCELLED_STATUS, |s| s.as_u16()),
            elapsed,
        });
    }
}

pub async fn request_lifecycle(
    State(emitter): State<Emitter>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let request_id = RequestId::new();
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    let remote_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "-".to_string());

    emitter.emit(Event::HttpStart {
        request_id: request_id.to_string(),
        method: method.clone(),
        path: path.clone(),
        remote_addr,
    });

    let in_flight = InFlightRequest {
        request_id: request_id.clone(),
        method,
        path,
        started_at: Instant::now(),
        status: None,
        emitter,
    };

    req.extensions_mut().insert(request_id.clone());
    let mut response = next.run(req).await;
    in_flight.finish(response.status());

    if let Ok(value) = HeaderValue::from_str(request_id.as_str()) {
        response.headers_mut().insert(X_REQUEST_ID, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::events::Tag;
    use crate::upstream::context::RequestContext;
    use axum::routing::get;
    use std::time::Duration;
    use tower::ServiceExt;

    async fn echo_request_id(ctx: RequestContext) -> String {
        ctx.request_id.map(|id| id.to_string()).unwrap_or_default()
    }

    fn app(emitter: Emitter) -> Router {
        let router = Router::new()
            .route("/user", get(echo_request_id))
            .route("/boom", get(|| async { StatusCode::INTERNAL_SERVER_ERROR }))
            .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
            .route(
                "/hang",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    "late"
                }),
            );
        instrument(router, emitter)
    }

    #[tokio::test]
    async fn test_start_and_end_around_handler() {
        let (emitter, sink) = Emitter::memory();
        let response = app(emitter)
            .oneshot(Request::get("/user").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let header = response.headers().get(X_REQUEST_ID).unwrap().to_str().unwrap().to_string();
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(body, header.as_bytes());

        let events = sink.events();
        assert_eq!(sink.tags(), vec![Tag::HttpStart, Tag::HttpEnd]);
        match &events[0] {
            Event::HttpStart { request_id, method, path, remote_addr } => {
                assert_eq!(request_id, &header);
                assert_eq!(method, "GET");
                assert_eq!(path, "/user");
                assert_eq!(remote_addr, "-");
            }
            other => panic!("unexpected event: {:?}", other),
        }
        match &events[1] {
            Event::HttpEnd { request_id, status, .. } => {
                assert_eq!(request_id, &header);
                assert_eq!(*status, 200);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_server_error_emits_exception() {
        let (emitter, sink) = Emitter::memory();
        let response = app(emitter)
            .oneshot(Request::get("/boom").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        assert_eq!(sink.tags(), vec![Tag::HttpStart, Tag::HttpException, Tag::HttpEnd]);
        match &sink.events()[1] {
            Event::HttpException { error, elapsed, request_id, .. } => {
                assert_eq!(error, "Internal Server Error");
                assert!(elapsed.is_some());
                assert!(request_id.is_some());
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_client_error_is_not_an_exception() {
        let (emitter, sink) = Emitter::memory();
        app(emitter)
            .oneshot(Request::get("/missing").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(sink.tags(), vec![Tag::HttpStart, Tag::HttpEnd]);
    }

    #[tokio::test]
    async fn test_remote_addr_from_connect_info() {
        let (emitter, sink) = Emitter::memory();
        let mut req = Request::get("/user").body(Body::empty()).unwrap();
        let addr: SocketAddr = "10.1.2.3:5555".parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(addr));
        app(emitter).oneshot(req).await.unwrap();

        match &sink.events()[0] {
            Event::HttpStart { remote_addr, .. } => assert_eq!(remote_addr, "10.1.2.3"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dropped_request_still_ends() {
        let (emitter, sink) = Emitter::memory();
        let pending = app(emitter).oneshot(Request::get("/hang").body(Body::empty()).unwrap());
        let outcome = tokio::time::timeout(Duration::from_millis(100), pending).await;
        assert!(outcome.is_err());

        assert_eq!(sink.tags(), vec![Tag::HttpStart, Tag::HttpException, Tag::HttpEnd]);
        let events = sink.events();
        match &events[1] {
            Event::HttpException { error, .. } => assert_eq!(error, "cancelled"),
            other => panic!("unexpected event: {:?}", other),
        }
        match &events[2] {
            Event::HttpEnd { status, path, elapsed, .. } => {
                assert_eq!(*status, CANCELLED_STATUS);
                assert_eq!(path, "/hang");
                assert!(*elapsed >= Duration::from_millis(50));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
