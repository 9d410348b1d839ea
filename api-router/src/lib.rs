use api_state::ApiState;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    middleware::from_fn_with_state,
    routing::{delete, get, post},
    Router,
};
use middleware_api_auth::api_auth;
use routes::{
    job::{active_jobs, cancel_job, create_job, delete_job, execute_job, job_exists},
    probes::{live, ready},
};

pub mod api_state;
pub mod error;
mod extract;
pub mod middleware_api_auth;
mod routes;

/// Router for the job gateway
pub fn api_routes<S>(app_state: &ApiState) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
    ApiState: FromRef<S>,
{
    // Public, unauthenticated endpoints (for k8s/systemd probes)
    let public = Router::new()
        .route("/ready", get(ready))
        .route("/live", get(live));

    // Protected API endpoints (require auth)
    let protected = Router::new()
        .route("/job", post(job_exists))
        .route("/job/create", post(create_job))
        .route("/job/execute", post(execute_job))
        .route("/job/cancel", post(cancel_job))
        .route("/job/delete", delete(delete_job))
        .route("/job/active", post(active_jobs))
        .layer(DefaultBodyLimit::max(
            app_state.config.request_max_body_bytes,
        ))
        .route_layer(from_fn_with_state(app_state.clone(), api_auth));

    public.merge(protected)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{header::CONTENT_TYPE, Method, Request, StatusCode},
    };
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use common::{
        catalog::JsonTestCaseCatalog, dispatch::RecordingDispatcher,
        storage::memory_store::MemoryJobStore, utils::config::AppConfig,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::middleware_api_auth::{derive_api_key, API_KEY_HEADER, CLIENT_ID_HEADER};

    const SECRET: &str = "test-secret";
    const CLIENT: &str = "grader";

    struct TestApp {
        router: Router,
        dispatcher: Arc<RecordingDispatcher>,
    }

    fn test_app(config: AppConfig) -> TestApp {
        let catalog = JsonTestCaseCatalog::default()
            .with_challenge(7, 3, 1.5)
            .with_challenge(8, 0, 1.0);
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let state = ApiState::with_components(
            &config,
            Arc::new(MemoryJobStore::new()),
            Arc::new(catalog),
            dispatcher.clone(),
        );

        TestApp {
            router: Router::new().merge(api_routes(&state)).with_state(state),
            dispatcher,
        }
    }

    fn test_config() -> AppConfig {
        AppConfig {
            api_secret_key: SECRET.into(),
            ..Default::default()
        }
    }

    async fn call(app: &TestApp, method: Method, uri: &str, body: Value) -> (StatusCode, Value) {
        let api_key = derive_api_key(SECRET, CLIENT).expect("api key");
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header(CONTENT_TYPE, "application/json")
            .header(CLIENT_ID_HEADER, CLIENT)
            .header(API_KEY_HEADER, api_key)
            .body(Body::from(body.to_string()))
            .expect("request");
        send(app, request).await
    }

    async fn send(app: &TestApp, request: Request<Body>) -> (StatusCode, Value) {
        let response = app
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("router response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn create_body(user_id: i64, challenge_id: i64, code: &str) -> Value {
        json!({
            "userId": user_id,
            "challengeId": challenge_id,
            "codeLanguage": "python3",
            "code": STANDARD.encode(code),
        })
    }

    async fn create(app: &TestApp, user_id: i64) -> String {
        let (status, body) = call(
            app,
            Method::POST,
            "/job/create",
            create_body(user_id, 7, "print(1)"),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        body["jobId"].as_str().expect("job id").to_string()
    }

    #[tokio::test]
    async fn probes_are_public() {
        let app = test_app(test_config());
        for uri in ["/live", "/ready"] {
            let request = Request::builder()
                .uri(uri)
                .body(Body::empty())
                .expect("request");
            let (status, body) = send(&app, request).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["status"], "ok");
        }
    }

    #[tokio::test]
    async fn job_routes_require_a_valid_api_key() {
        let app = test_app(test_config());

        let missing = Request::builder()
            .method(Method::POST)
            .uri("/job/create")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(create_body(1, 7, "x").to_string()))
            .expect("request");
        let (status, body) = send(&app, missing).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body, json!({"success": false, "error": "Access denied"}));

        let wrong = Request::builder()
            .method(Method::POST)
            .uri("/job/create")
            .header(CONTENT_TYPE, "application/json")
            .header(CLIENT_ID_HEADER, "someone-else")
            .header(API_KEY_HEADER, derive_api_key(SECRET, CLIENT).expect("key"))
            .body(Body::from(create_body(1, 7, "x").to_string()))
            .expect("request");
        let (status, _) = send(&app, wrong).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn full_job_lifecycle_over_http() {
        let app = test_app(test_config());
        let job_id = create(&app, 1).await;
        let target = json!({"jobId": job_id, "userId": 1});

        let (status, body) = call(&app, Method::POST, "/job", target.clone()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"success": true}));

        let (status, body) = call(&app, Method::POST, "/job/execute", target.clone()).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body, json!({"success": true, "totalTestCases": 3}));
        assert_eq!(app.dispatcher.sent().await.len(), 1);

        for _ in 0..2 {
            let (status, body) = call(&app, Method::POST, "/job/cancel", target.clone()).await;
            assert_eq!(status, StatusCode::ACCEPTED);
            assert_eq!(body, json!({"success": true}));
        }

        let (status, _) = call(&app, Method::DELETE, "/job/delete", target.clone()).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = call(&app, Method::POST, "/job", target.clone()).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["success"], false);

        let (status, _) = call(&app, Method::POST, "/job/execute", target).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(app.dispatcher.sent().await.len(), 1);
    }

    #[tokio::test]
    async fn third_job_exceeds_quota() {
        let app = test_app(test_config());
        create(&app, 1).await;
        create(&app, 1).await;

        let (status, body) = call(
            &app,
            Method::POST,
            "/job/create",
            create_body(1, 7, "print(1)"),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(body["success"], false);

        let (status, body) = call(&app, Method::POST, "/job/active", json!({"userId": 1})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["jobIds"].as_array().map(Vec::len), Some(2));
        assert_eq!(body["remaining"], 0);
    }

    #[tokio::test]
    async fn create_rejects_bad_submissions() {
        let app = test_app(test_config());

        let mut bad_code = create_body(1, 7, "x");
        bad_code["code"] = json!("%%% not base64 %%%");
        let (status, body) = call(&app, Method::POST, "/job/create", bad_code).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "'code' field is not in a valid format");

        let oversized = "a".repeat(1024 * 1024 + 1);
        let (status, body) = call(
            &app,
            Method::POST,
            "/job/create",
            create_body(1, 7, &oversized),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]
            .as_str()
            .is_some_and(|e| e.starts_with("Source code size exceeds")));

        let (status, body) = call(
            &app,
            Method::POST,
            "/job/create",
            create_body(1, 7, "   \n"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Empty source file");

        let mut bad_language = create_body(1, 7, "x");
        bad_language["codeLanguage"] = json!("cobol");
        let (status, _) = call(&app, Method::POST, "/job/create", bad_language).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let mut bad_user = create_body(1, 7, "x");
        bad_user["userId"] = json!("one");
        let (status, body) = call(&app, Method::POST, "/job/create", bad_user).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);

        let (status, _) = call(&app, Method::POST, "/job/active", json!({})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_or_empty_challenge_is_not_found() {
        let app = test_app(test_config());
        for challenge_id in [8, 404] {
            let (status, body) = call(
                &app,
                Method::POST,
                "/job/create",
                create_body(1, challenge_id, "x"),
            )
            .await;
            assert_eq!(status, StatusCode::NOT_FOUND);
            assert_eq!(body["success"], false);
        }

        let mut bad_code = create_body(1, 404, "x");
        bad_code["code"] = json!("%%% not base64 %%%");
        let (status, _) = call(&app, Method::POST, "/job/create", bad_code).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn non_json_body_is_bad_request() {
        let app = test_app(test_config());
        let request = Request::builder()
            .method(Method::POST)
            .uri("/job/execute")
            .header(CLIENT_ID_HEADER, CLIENT)
            .header(API_KEY_HEADER, derive_api_key(SECRET, CLIENT).expect("key"))
            .body(Body::from("jobId=1"))
            .expect("request");
        let (status, body) = send(&app, request).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
    }

    #[tokio::test]
    async fn user_id_scoping_follows_config() {
        let app = test_app(test_config());
        let job_id = create(&app, 1).await;

        let (status, body) = call(&app, Method::POST, "/job/execute", json!({"jobId": job_id})).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "'userId' field is required");

        let (status, _) = call(
            &app,
            Method::POST,
            "/job/cancel",
            json!({"jobId": job_id, "userId": 2}),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let unscoped = test_app(AppConfig {
            scope_jobs_to_user: false,
            ..test_config()
        });
        let job_id = create(&unscoped, 1).await;
        let (status, _) = call(
            &unscoped,
            Method::POST,
            "/job/execute",
            json!({"jobId": job_id}),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }
}
