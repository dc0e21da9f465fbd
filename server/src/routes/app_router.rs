use axum::{
    extract::State,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderValue, Method, StatusCode,
    },
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;

use crate::{request_tracing, ServerConfigRef, ServerState};

use super::{mail, trials};

pub struct AppRouter;

impl AppRouter {
    pub fn create(state: ServerState) -> anyhow::Result<Router> {
        let origin = state.config.settings.origin.parse::<HeaderValue>()?;
        let cors_layer = CorsLayer::new()
            .allow_origin(origin)
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([CONTENT_TYPE, AUTHORIZATION]);

        let router = Router::new()
            .route("/", get(handler_root))
            .route("/api/health", get(|| async { Json(json!({ "ok": true })) }))
            .route("/api/trials", get(trials::list))
            .route("/api/trials/meta", get(trials::list_noise))
            .route("/api/trials/:id", get(trials::get_one))
            .route("/api/send", post(mail::send))
            .route("/api/preview", post(mail::preview))
            .route("/api/templates", get(mail::templates))
            .fallback(handler_404)
            .with_state(state);

        Ok(request_tracing::with_request_tracing(router).layer(cors_layer))
    }
}

async fn handler_root(State(config): State<ServerConfigRef>) -> Json<Value> {
    Json(json!({
        "ok": true,
        "service": "trials-backend",
        "time": Utc::now().with_timezone(&config.timezone).to_rfc3339(),
    }))
}

pub async fn handler_404() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "Route does not exist")
}

#[cfg(test)]
mod tests {
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    use super::*;
    use crate::testing::common::{body_json, TestApp};

    #[tokio::test]
    async fn test_root_and_health() {
        let app = TestApp::new();

        let resp = app.router().oneshot(Request::get("/").body(Body::empty()).unwrap()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["ok"], true);
        assert_eq!(body["service"], "trials-backend");

        let resp = app
            .router()
            .oneshot(Request::get("/api/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_json(resp).await, json!({ "ok": true }));
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let app = TestApp::new();
        let resp = app
            .router()
            .oneshot(Request::get("/api/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_cors_and_request_id() {
        let app = TestApp::new();
        let resp = app
            .router()
            .oneshot(
                Request::get("/api/health")
                    .header("origin", "http://localhost:3000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        let headers = resp.headers();
        assert_eq!(
            headers["access-control-allow-origin"],
            "http://localhost:3000"
        );
        assert_eq!(headers["access-control-allow-credentials"], "true");
        assert!(headers.contains_key("x-request-id"));
    }
}
