//! HTTP endpoints for counter-server.
//!
//! Serves the entry page, the WebSocket upgrade and Prometheus metrics.

mod metrics;
pub mod page;

use crate::protocol::{ws_handler, SOCKET_PATH};
use crate::service::CounterService;
use axum::{routing::get, Extension, Router};
use std::sync::Arc;

pub use page::EntryPage;

/// Build the HTTP router with all endpoints.
pub fn build_router(service: Arc<CounterService>, page: EntryPage) -> Router {
    let mut router = Router::new()
        .route("/", get(page::page_handler))
        .route(SOCKET_PATH, get(ws_handler));

    if service.config().http.metrics_enabled {
        router = router.route("/metrics", get(metrics::metrics_handler));
    }

    router.layer(Extension(service)).layer(Extension(page))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::store::MemoryStore;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    async fn test_service(config: Config) -> Arc<CounterService> {
        let store = Arc::new(MemoryStore::new());
        Arc::new(CounterService::load(config, store).await.unwrap())
    }

    async fn get_status(app: Router, uri: &str) -> StatusCode {
        app.oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[tokio::test]
    async fn entry_page_returns_html() {
        let service = test_service(Config::default()).await;
        let app = build_router(service, EntryPage::embedded());

        let response = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()["content-type"].to_str().unwrap();
        assert!(content_type.starts_with("text/html"));
    }

    #[tokio::test]
    async fn metrics_endpoint_reports_counter() {
        let service = test_service(Config::default()).await;
        let (id, _rx) = service.connect().await.unwrap();
        service
            .apply(id, counter_types::ClientEvent::Decrement)
            .await
            .unwrap();
        let app = build_router(service, EntryPage::embedded());

        let response = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("counter_server_counter_value -1"));
        assert!(text.contains("counter_server_connections_active 1"));
        assert!(text.contains("counter_server_decrements_total 1"));
    }

    #[tokio::test]
    async fn metrics_can_be_disabled() {
        let mut config = Config::default();
        config.http.metrics_enabled = false;
        let app = build_router(test_service(config).await, EntryPage::embedded());

        assert_eq!(get_status(app, "/metrics").await, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn socket_requires_upgrade() {
        let service = test_service(Config::default()).await;
        let app = build_router(service, EntryPage::embedded());

        // A plain GET is not a WebSocket handshake.
        assert!(get_status(app, SOCKET_PATH).await.is_client_error());
    }

    #[tokio::test]
    async fn unknown_route_is_not_found() {
        let service = test_service(Config::default()).await;
        let app = build_router(service, EntryPage::embedded());
        assert_eq!(get_status(app, "/api/counter").await, StatusCode::NOT_FOUND);
    }
}
