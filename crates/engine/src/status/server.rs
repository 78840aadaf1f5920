use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::sync::watch;

use super::StatusStore;
use crate::config::{Rule, RuleSet};

#[derive(Clone)]
pub struct ApiState {
    pub status: Arc<StatusStore>,
    pub rules_rx: watch::Receiver<Arc<RuleSet>>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/instances", get(list_instances))
        .route("/instances/:rule/:pid", get(get_instance))
        .route("/rules", get(list_rules))
        .with_state(state)
}

pub async fn serve(listener: TcpListener, state: ApiState) -> std::io::Result<()> {
    let app = router(state);
    axum::serve(listener, app).await
}

async fn healthz() -> &'static str {
    "ok"
}

async fn list_instances(State(state): State<ApiState>) -> impl IntoResponse {
    Json(state.status.list())
}

async fn get_instance(
    State(state): State<ApiState>,
    Path((rule, pid)): Path<(String, u32)>,
) -> impl IntoResponse {
    match state.status.get(&rule, pid) {
        Some(snapshot) => Json(snapshot).into_response(),
        None => (StatusCode::NOT_FOUND, "no such instance").into_response(),
    }
}

async fn list_rules(State(state): State<ApiState>) -> impl IntoResponse {
    let set = state.rules_rx.borrow().clone();
    let rules: Vec<&Rule> = set.rules.iter().map(|r| r.as_ref()).collect();
    Json(json!({
        "generation": set.generation,
        "rules": rules,
        "inert": set.inert,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use vigil_common::identity::TargetProcess;

    use crate::config::{InertRule, Limits, TriggerSpec};
    use crate::status::InstanceKey;

    fn state_with(rule_set: RuleSet, status: Arc<StatusStore>) -> ApiState {
        let (_tx, rules_rx) = watch::channel(Arc::new(rule_set));
        ApiState { status, rules_rx }
    }

    fn seeded_status() -> Arc<StatusStore> {
        let status = Arc::new(StatusStore::new());
        let process = TargetProcess::new(7, "worker".into(), "worker --serve".into(), 0);
        status.insert_starting(InstanceKey::new("r1", 7), &process, 1000);
        status
    }

    async fn send(app: Router, uri: &str) -> (StatusCode, String) {
        let req = Request::get(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn healthz_responds() {
        let app = router(state_with(RuleSet::empty(1), Arc::new(StatusStore::new())));
        let (status, body) = send(app, "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn instances_listed_and_fetched() {
        let app = router(state_with(RuleSet::empty(1), seeded_status()));

        let (status, body) = send(app.clone(), "/instances").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"rule\":\"r1\""));
        assert!(body.contains("\"pid\":7"));

        let (status, body) = send(app.clone(), "/instances/r1/7").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("starting"));

        let (status, _) = send(app, "/instances/r1/99").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn rules_endpoint_reports_inert_rules() {
        let rule_set = RuleSet {
            generation: 3,
            rules: vec![Arc::new(Rule {
                name: "good".into(),
                filters: Vec::new(),
                trigger: TriggerSpec::Startup,
                actions: Vec::new(),
                limits: Limits::default(),
            })],
            inert: vec![InertRule {
                name: "bad".into(),
                error: "unknown trigger variant".into(),
            }],
        };
        let app = router(state_with(rule_set, Arc::new(StatusStore::new())));

        let (status, body) = send(app, "/rules").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("\"generation\":3"));
        assert!(body.contains("good"));
        assert!(body.contains("unknown trigger variant"));
    }
}
