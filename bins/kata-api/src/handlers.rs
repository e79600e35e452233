// HTTP route handlers for the Kata API

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use kata_common::types::{InvocationContract, Report, Submission, TaskId, TestCase};
use kata_engine::{JudgeError, JudgeOptions};
use serde::Deserialize;
use serde_json::json;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::metrics;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteRequest {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub test_cases: Option<Vec<TestCase>>,
    #[serde(default)]
    pub task_id: Option<TaskId>,
    #[serde(default)]
    pub entry: Option<String>,
    #[serde(default)]
    pub contract: Option<InvocationContract>,
}

fn bad_request(message: impl Into<String>) -> Response {
    metrics::record_outcome("rejected");
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message.into() }))).into_response()
}

/// POST /api/code/execute - Judge a submission against its test cases
pub async fn execute_code(
    State(state): State<AppState>,
    payload: Result<Json<ExecuteRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(request) => request,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "Rejected malformed request");
            return bad_request(rejection.body_text());
        }
    };

    let code = match request.code {
        Some(code) if !code.trim().is_empty() => code,
        _ => return bad_request("Code is required"),
    };
    let test_cases = match request.test_cases {
        Some(test_cases) => test_cases,
        None => return bad_request("testCases must be an array"),
    };

    let task_id = request.task_id;
    let submission = Submission::new(code, task_id.clone());
    let options = JudgeOptions {
        entry: request.entry,
        contract: request.contract,
    };

    info!(
        task_id = ?task_id,
        test_cases = test_cases.len(),
        source_size = submission.source.len(),
        "Submission received"
    );

    let start_time = Instant::now();
    let judge = state.judge.clone();
    // Isolates a panic inside the judge from the connection task
    let judged = tokio::spawn(async move { judge.judge(&submission, &test_cases, &options).await }).await;
    metrics::record_duration(start_time.elapsed().as_secs_f64());

    match judged {
        Ok(Ok(report)) => {
            metrics::record_report(&report);
            (StatusCode::OK, Json(report)).into_response()
        }
        Ok(Err(JudgeError::InvalidInput(message))) => bad_request(message),
        Ok(Err(JudgeError::EntryPoint(e))) => {
            info!(task_id = ?task_id, error = %e, "Entry point not resolved");
            metrics::record_outcome("entry_point_missing");
            let mut body = json!(Report::entry_point_missing(task_id));
            body["error"] = json!(e.to_string());
            (StatusCode::BAD_REQUEST, Json(body)).into_response()
        }
        Ok(Err(e @ JudgeError::ExecutorUnavailable)) => {
            error!(task_id = ?task_id, "No executor available");
            metrics::record_outcome("unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "error": e.to_string(),
                    "allPassed": false,
                    "results": [],
                })),
            )
                .into_response()
        }
        Err(e) => {
            error!(task_id = ?task_id, error = %e, "Judging task failed");
            metrics::record_outcome("internal");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Internal server error" })),
            )
                .into_response()
        }
    }
}

/// GET /status - Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics - Prometheus exposition
pub async fn metrics() -> Response {
    match metrics::encode() {
        Ok((content_type, body)) => ([(header::CONTENT_TYPE, content_type)], body).into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, "metric encode error").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use axum::Router;
    use kata_common::config::SandboxConfig;
    use kata_common::types::ExecutorKind;
    use kata_engine::engine::{EngineError, ExecutionEngine, ExecutionLimits, RawOutput};
    use kata_engine::harness::HarnessProgram;
    use kata_engine::planner::Plan;
    use kata_engine::Judge;
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    /// Engine that evaluates `add(a, b)` without running JavaScript
    struct AddingEngine {
        kind: ExecutorKind,
        reachable: bool,
    }

    #[async_trait]
    impl ExecutionEngine for AddingEngine {
        fn kind(&self) -> ExecutorKind {
            self.kind
        }

        async fn probe(&self) -> Result<(), EngineError> {
            if self.reachable {
                Ok(())
            } else {
                Err(EngineError::Unavailable("connection refused".to_string()))
            }
        }

        async fn execute(
            &self,
            program: &HarnessProgram,
            _limits: &ExecutionLimits,
        ) -> Result<RawOutput, EngineError> {
            let payload = match &program.plan {
                Plan::Pure { args } => {
                    json!({"status": "returned", "value": args.iter().filter_map(Value::as_i64).sum::<i64>()})
                }
                Plan::Stateful { .. } => json!({"status": "threw", "message": "not a class"}),
            };
            Ok(RawOutput {
                stdout: program.result_line(&payload),
                exit_code: Some(0),
                ..Default::default()
            })
        }
    }

    fn app(primary_reachable: bool, fallback: bool) -> Router {
        let primary = Arc::new(AddingEngine {
            kind: ExecutorKind::Sandbox,
            reachable: primary_reachable,
        });
        let fallback: Option<Arc<dyn ExecutionEngine>> = if fallback {
            Some(Arc::new(AddingEngine {
                kind: ExecutorKind::Fallback,
                reachable: true,
            }))
        } else {
            None
        };
        let judge = Judge::new(primary, fallback, &SandboxConfig::default());
        routes::routes().with_state(AppState {
            judge: Arc::new(judge),
        })
    }

    async fn post_execute(app: Router, body: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/code/execute")
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_execute_returns_report() {
        let body = r#"{
            "code": "function add(a, b) { return a + b; }",
            "testCases": [{"input": [2, 3], "expected": 5}, {"input": [1, 1], "expected": 3}],
            "taskId": 7
        }"#;
        let (status, json) = post_execute(app(true, false), body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["allPassed"], json!(false));
        assert_eq!(json["taskId"], json!(7));
        assert_eq!(json["executor"], json!("sandbox"));
        assert_eq!(json["results"][0]["passed"], json!(true));
        assert_eq!(json["results"][0]["output"], json!(5));
        assert_eq!(json["results"][1]["passed"], json!(false));
        assert_eq!(json["results"][1]["output"], json!(2));
    }

    #[tokio::test]
    async fn test_missing_code_is_rejected() {
        let (status, json) = post_execute(app(true, false), r#"{"testCases": []}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], json!("Code is required"));

        let (status, _) = post_execute(app(true, false), r#"{"code": "  ", "testCases": []}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_missing_test_cases_is_rejected() {
        let (status, json) = post_execute(app(true, false), r#"{"code": "function f() {}"}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"], json!("testCases must be an array"));
    }

    #[tokio::test]
    async fn test_malformed_json_is_rejected() {
        let (status, json) = post_execute(app(true, false), "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn test_unresolved_entry_point() {
        let body = r#"{"code": "const x = 1;", "testCases": [{"input": [1], "expected": 1}], "taskId": "two-sum"}"#;
        let (status, json) = post_execute(app(true, false), body).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["allPassed"], json!(false));
        assert_eq!(json["results"], json!([]));
        assert_eq!(json["taskId"], json!("two-sum"));
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn test_fallback_is_reported() {
        let body = r#"{"code": "function add(a, b) { return a + b; }", "testCases": [{"input": [2, 2], "expected": 4}]}"#;
        let (status, json) = post_execute(app(false, true), body).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["allPassed"], json!(true));
        assert_eq!(json["executor"], json!("fallback"));
    }

    #[tokio::test]
    async fn test_no_executor_returns_503() {
        let body = r#"{"code": "function add(a, b) { return a + b; }", "testCases": [{"input": [2, 2], "expected": 4}]}"#;
        let (status, json) = post_execute(app(false, false), body).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["allPassed"], json!(false));
        assert_eq!(json["results"], json!([]));
    }

    #[tokio::test]
    async fn test_status_and_metrics_endpoints() {
        let response = app(true, false)
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = r#"{"code": "function add(a, b) { return a + b; }", "testCases": [{"input": [1, 2], "expected": 3}]}"#;
        post_execute(app(true, false), body).await;

        let response = app(true, false)
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("kata_submissions_total"));
        assert!(text.contains("kata_submission_duration_seconds"));
    }
}
