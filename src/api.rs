use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::{
    case::Case,
    config::TriageConfig,
    evidence::Evidence,
    scorer::{score_text, RuleSignal},
    store::{SledStore, TriageStore},
};

// ==========================================
// 1. 应用状态 (Shared State)
// ==========================================
// 存储内部自己串行化写入，这里不需要再包一层 Mutex。
pub struct AppState {
    pub store: Arc<SledStore>,
    pub config: Arc<TriageConfig>,
}

// ==========================================
// 2. 数据传输对象 (DTOs)
// ==========================================

#[derive(Deserialize)]
pub struct ScoreRequest {
    pub text: String,
}

#[derive(Deserialize)]
pub struct PendingQuery {
    pub limit: Option<usize>,
}

/// 按当前重扫策略还要扫的证据
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingResponse {
    pub pending: Vec<String>,
    pub undecodable: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub scanner_version: String,
    pub version: &'static str,
}

// ==========================================
// 3. 路由 (给执法看板用的只读接口)
// ==========================================
pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/cases/{id}", get(get_case))
        .route("/evidence/pending", get(pending_evidence))
        .route("/evidence/{id}", get(get_evidence))
        .route("/score", post(score))
        .layer(CorsLayer::permissive()) // ⚠️ 开发模式：允许所有跨域
        .with_state(state)
}

// ==========================================
// 4. 处理函数 (Handlers)
// ==========================================

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        scanner_version: state.config.scanner_version.clone(),
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn get_case(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Case>, (StatusCode, String)> {
    tracing::debug!(case_id = %id, "Case lookup");

    state
        .store
        .get_case(&id)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("case not found: {id}")))
}

async fn get_evidence(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Evidence>, (StatusCode, String)> {
    tracing::debug!(evidence_id = %id, "Evidence lookup");

    state
        .store
        .get_evidence(&id)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .map(Json)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("evidence not found: {id}")))
}

const DEFAULT_PENDING_LIMIT: usize = 50;

async fn pending_evidence(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PendingQuery>,
) -> Result<Json<PendingResponse>, (StatusCode, String)> {
    let page = state
        .store
        .recent_evidence(query.limit.unwrap_or(DEFAULT_PENDING_LIMIT))
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    let policy = state.config.rescan_policy;
    let pending = page
        .items
        .into_iter()
        .filter(|ev| policy.is_unscanned(ev, &state.config.scanner_version))
        .map(|ev| ev.id)
        .collect();

    Ok(Json(PendingResponse {
        pending,
        undecodable: page.undecodable,
    }))
}

/// 纯规则打分，不落库 (看板里试规则用)
async fn score(State(state): State<Arc<AppState>>, Json(req): Json<ScoreRequest>) -> Json<RuleSignal> {
    Json(score_text(&state.config.rules, &req.text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::util::ServiceExt;

    fn state() -> Arc<AppState> {
        Arc::new(AppState {
            store: Arc::new(SledStore::temporary().unwrap()),
            config: Arc::new(TriageConfig::new("v-test", "node").unwrap()),
        })
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn score_endpoint() {
        let request = Request::builder()
            .method("POST")
            .uri("/score")
            .header("Content-Type", "application/json")
            .body(Body::from(r#"{"text": "black honey and pm me, RM200"}"#))
            .unwrap();

        let response = app(state()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["riskScore"], 50);
        assert_eq!(body["priority"], "MEDIUM");
        assert_eq!(body["species"], "Bear Bile");
    }

    #[tokio::test]
    async fn missing_case_is_404() {
        let request = Request::builder().uri("/cases/WS-0404").body(Body::empty()).unwrap();
        let response = app(state()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn evidence_lookup() {
        let state = state();
        state
            .store
            .put_evidence(&Evidence {
                id: "ev-1".into(),
                platform_source: Some("Instagram".into()),
                ..Default::default()
            })
            .unwrap();

        let request = Request::builder().uri("/evidence/ev-1").body(Body::empty()).unwrap();
        let response = app(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["platformSource"], "Instagram");
    }

    #[tokio::test]
    async fn health_reports_scanner_version() {
        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = app(state()).oneshot(request).await.unwrap();
        let body = body_json(response).await;
        assert_eq!(body["scannerVersion"], "v-test");
        assert!(body.get("scanner_version").is_none());
    }

    #[tokio::test]
    async fn pending_lists_unscanned_evidence() {
        let state = state();
        state
            .store
            .put_evidence(&Evidence {
                id: "ev-new".into(),
                ..Default::default()
            })
            .unwrap();
        state
            .store
            .put_evidence(&Evidence {
                id: "ev-done".into(),
                case_id: Some("WS-0001".into()),
                scanner_version: Some("v-test".into()),
                ..Default::default()
            })
            .unwrap();
        state
            .store
            .put_evidence_document("ev-broken", &serde_json::json!({"id": "ev-broken", "uploadedAt": 17}))
            .unwrap();

        let request = Request::builder().uri("/evidence/pending?limit=10").body(Body::empty()).unwrap();
        let response = app(state).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = body_json(response).await;
        assert_eq!(body["pending"], serde_json::json!(["ev-new"]));
        assert_eq!(body["undecodable"], serde_json::json!(["ev-broken"]));
    }
}
