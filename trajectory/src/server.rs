//! HTTP routes for the trajectory service
//!
//! Classification and SQLite access are blocking, so every handler that
//! touches them hops onto the blocking pool.

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use trajectory_core::trajectory::{ClassifyInput, LlmClient, TrajectoryClassifier};
use trajectory_core::{AnalyzeRequest, AnalyzeResponse, Database, ProgressIndicator};

/// Upper bound for `?limit=` on the history route
const MAX_HISTORY_LIMIT: usize = 100;

/// State shared across handlers
pub struct AppState {
    pub db: Arc<Database>,
    /// `None` runs heuristics only
    pub llm: Option<Arc<dyn LlmClient>>,
    /// Default page size for indicator history
    pub recent_limit: usize,
}

pub type SharedState = Arc<AppState>;

/// Create the service router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/trajectory/analyze", post(analyze))
        .route("/api/sessions/:id/indicators", get(session_indicators))
        .with_state(state)
}

/// Health check endpoint
pub async fn health() -> impl IntoResponse {
    "OK"
}

/// POST /api/trajectory/analyze
pub async fn analyze(
    State(state): State<SharedState>,
    payload: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(json) => json,
        Err(rejection) => {
            tracing::debug!(error = %rejection.body_text(), "Rejected analyze body");
            return error_response(StatusCode::BAD_REQUEST, rejection.body_text());
        }
    };

    let result = tokio::task::spawn_blocking(move || run_analysis(&state, request)).await;

    match result {
        Ok(Ok(response)) => Json(response).into_response(),
        Ok(Err(e)) if e.is_client_error() => {
            error_response(StatusCode::BAD_REQUEST, e.to_string())
        }
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Trajectory analysis failed");
            internal_error()
        }
        Err(e) => {
            tracing::error!(error = %e, "Trajectory analysis task panicked");
            internal_error()
        }
    }
}

fn run_analysis(
    state: &AppState,
    request: AnalyzeRequest,
) -> trajectory_core::Result<AnalyzeResponse> {
    let input = ClassifyInput::try_from(request)?;

    let mut classifier = TrajectoryClassifier::new(state.db.as_ref());
    if let Some(client) = state.llm.as_deref() {
        classifier = classifier.with_llm(client);
    }

    let classification = classifier.classify(
        &input.session_id,
        &input.recent_messages,
        &input.trajectory_rules,
    );
    Ok(classification.into_response())
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryResponse {
    pub session_id: String,
    pub indicators: Vec<ProgressIndicator>,
}

/// GET /api/sessions/:id/indicators
pub async fn session_indicators(
    State(state): State<SharedState>,
    Path(session_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let limit = query
        .limit
        .unwrap_or(state.recent_limit)
        .min(MAX_HISTORY_LIMIT);

    let lookup_id = session_id.clone();
    let result =
        tokio::task::spawn_blocking(move || state.db.recent_indicators(&lookup_id, limit)).await;

    match result {
        Ok(Ok(indicators)) => Json(HistoryResponse {
            session_id,
            indicators,
        })
        .into_response(),
        Ok(Err(e)) => {
            tracing::error!(
                session_id = %session_id,
                error = %e,
                "Failed to load indicator history"
            );
            internal_error()
        }
        Err(e) => {
            tracing::error!(
                session_id = %session_id,
                error = %e,
                "Indicator history task panicked"
            );
            internal_error()
        }
    }
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn internal_error() -> Response {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;
    use trajectory_core::config::{LlmConfig, LlmProvider};
    use trajectory_core::trajectory::create_client;

    fn state_with(llm: Option<Arc<dyn LlmClient>>) -> SharedState {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        Arc::new(AppState {
            db: Arc::new(db),
            llm,
            recent_limit: 5,
        })
    }

    fn test_state() -> SharedState {
        state_with(None)
    }

    /// Ollama-shaped endpoint that always gives `reply` as the model output
    async fn ollama_stub(reply: &str) -> String {
        let body = json!({ "response": reply, "done": true });
        let app = Router::new().route(
            "/api/generate",
            post(move || {
                let body = body.clone();
                async move { Json(body) }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{addr}")
    }

    async fn send(state: SharedState, request: Request<Body>) -> (StatusCode, Value) {
        let response = create_router(state).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn post_json(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/trajectory/analyze")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn short_reply_request(session_id: &str) -> String {
        json!({
            "sessionId": session_id,
            "recentMessages": [
                {"role": "seeker", "content": "ok", "created_at": "2026-03-01T09:00:00Z"},
                {"role": "agent", "content": "What happened this week?", "created_at": "2026-03-01T09:01:00Z"},
                {"role": "seeker", "content": "not much", "created_at": "2026-03-01T09:02:00Z"},
                {"role": "seeker", "content": "same", "created_at": "2026-03-01T09:03:00Z"}
            ],
            "trajectoryRules": []
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_health() {
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = create_router(test_state()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_analyze_returns_indicator() {
        let (status, body) = send(test_state(), post_json(&short_reply_request("s-1"))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["matched"], true);
        assert_eq!(body["indicator"]["type"], "drift");
        assert_eq!(body["indicator"]["sessionId"], "s-1");
        assert_eq!(body["indicator"]["detail"]["pattern"], "disengagement");
        assert!(body["indicator"]["id"].is_i64());
    }

    #[tokio::test]
    async fn test_analyze_without_match_returns_null_indicator() {
        let request = json!({
            "sessionId": "s-1",
            "recentMessages": [],
            "trajectoryRules": []
        });
        let (status, body) = send(test_state(), post_json(&request.to_string())).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "indicator": null, "matched": false }));
    }

    #[tokio::test]
    async fn test_missing_session_id_is_bad_request() {
        let request = json!({ "recentMessages": [], "trajectoryRules": [] });
        let (status, body) = send(test_state(), post_json(&request.to_string())).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("sessionId"));
    }

    #[tokio::test]
    async fn test_malformed_json_is_bad_request() {
        let (status, body) = send(test_state(), post_json("{\"sessionId\": ")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_history_lists_newest_first() {
        let state = test_state();
        for session in ["s-1", "s-1", "s-2"] {
            let (status, _) = send(state.clone(), post_json(&short_reply_request(session))).await;
            assert_eq!(status, StatusCode::OK);
        }

        let request = Request::builder()
            .uri("/api/sessions/s-1/indicators?limit=1")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(state.clone(), request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["sessionId"], "s-1");
        let indicators = body["indicators"].as_array().unwrap();
        assert_eq!(indicators.len(), 1);
        assert_eq!(state.db.count_indicators("s-1").unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_analyze_consults_provider_rules_over_http() {
        let endpoint = ollama_stub(
            r#"```json {"indicator_type":"leap","matched_rule_index":0,"reason":"pitching investors first"}```"#,
        )
        .await;
        let client = create_client(&LlmConfig {
            provider: LlmProvider::Ollama,
            model: "test-model".to_string(),
            endpoint: Some(endpoint),
            api_key: None,
            timeout_secs: 5,
        })
        .unwrap();
        let state = state_with(Some(Arc::from(client)));

        let request = json!({
            "sessionId": "s-llm",
            "recentMessages": [
                {"role": "seeker", "content": "I have been thinking about what we discussed regarding my career path.", "created_at": "2026-03-01T09:00:00Z"},
                {"role": "agent", "content": "What stood out to you most?", "created_at": "2026-03-01T09:01:00Z"},
                {"role": "seeker", "content": "Mostly that I want to lead a team someday, maybe run a company of my own.", "created_at": "2026-03-01T09:02:00Z"},
                {"role": "seeker", "content": "Yes, and I already drafted a pitch for investors over the weekend.", "created_at": "2026-03-01T09:03:00Z"}
            ],
            "trajectoryRules": [{
                "stage": "awareness",
                "indicator_type": "leap",
                "pattern": "Plans large outcomes before clarifying values",
                "message": "Bring the focus back to what matters most before planning."
            }]
        });
        let (status, body) = send(state.clone(), post_json(&request.to_string())).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["matched"], true);
        assert_eq!(body["indicator"]["type"], "leap");
        let detail = &body["indicator"]["detail"];
        assert_eq!(detail["ruleIndex"], 0);
        assert_eq!(detail["pattern"], "Plans large outcomes before clarifying values");
        assert_eq!(
            detail["message"],
            "Bring the focus back to what matters most before planning."
        );
        assert_eq!(detail["reason"], "pitching investors first");
        assert_eq!(state.db.count_indicators("s-llm").unwrap(), 1);
    }
}
