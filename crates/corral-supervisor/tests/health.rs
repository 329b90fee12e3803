//! Integration tests for the health endpoint.

use corral_engine::EngineError;
use corral_supervisor::testing::{
    install_declaration, open_action, record_probe_error, register_instance, running_container,
    MockEngine,
};
use corral_supervisor::{health, Declaration, HealthReport, Supervisor, Template};
use http_body_util::BodyExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

fn declaration_with_svc() -> Declaration {
    let mut containers = BTreeMap::new();
    containers.insert(
        "svc".to_string(),
        Template {
            version: "1".to_string(),
            image: "img:1".to_string(),
            ..Template::default()
        },
    );
    Declaration {
        containers,
        ..Declaration::default()
    }
}

async fn get_health(router: axum::Router) -> (axum::http::StatusCode, HealthReport) {
    let response = router
        .oneshot(
            axum::http::Request::builder()
                .uri("/health")
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    assert_eq!(
        response
            .headers()
            .get(axum::http::header::CONTENT_TYPE)
            .unwrap(),
        "application/json"
    );
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let report: HealthReport = serde_json::from_slice(&body).unwrap();
    (status, report)
}

#[tokio::test]
async fn converged_instance_reports_healthy() {
    let engine = Arc::new(MockEngine::new());
    engine.insert_container(running_container("svc", "c-1", "1"));

    let supervisor = Supervisor::new(engine, "/nonexistent.yaml");
    install_declaration(&supervisor, declaration_with_svc());
    let _reload_rx = register_instance(&supervisor, "svc", None);

    let (status, report) = get_health(health::router(supervisor)).await;
    assert_eq!(status, axum::http::StatusCode::OK);
    assert!(report.errors.is_empty());
}

#[tokio::test]
async fn missing_container_reports_not_running() {
    let engine = Arc::new(MockEngine::new());

    let supervisor = Supervisor::new(engine, "/nonexistent.yaml");
    install_declaration(&supervisor, declaration_with_svc());
    let _reload_rx = register_instance(&supervisor, "svc", None);

    let (status, report) = get_health(health::router(supervisor)).await;
    assert_eq!(status, axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(report.errors, vec!["container is not running: svc"]);
}

#[tokio::test(start_paused = true)]
async fn stuck_instance_is_reported() {
    let engine = Arc::new(MockEngine::new());
    engine.insert_container(running_container("svc", "c-1", "1"));

    let supervisor = Supervisor::new(engine, "/nonexistent.yaml");
    install_declaration(&supervisor, declaration_with_svc());
    let _reload_rx = register_instance(
        &supervisor,
        "svc",
        Some(Template {
            version: "1".to_string(),
            image: "img:1".to_string(),
            ..Template::default()
        }),
    );

    open_action(&supervisor, "svc");
    // Past the 10s stop allowance plus the 60s check interval.
    tokio::time::advance(Duration::from_secs(71)).await;

    let (status, report) = get_health(health::router(supervisor)).await;
    assert_eq!(status, axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(report.errors, vec!["container is stuck: svc"]);
}

#[tokio::test]
async fn probe_failure_is_reported() {
    let engine = Arc::new(MockEngine::new());
    engine.insert_container(running_container("svc", "c-1", "1"));

    let supervisor = Supervisor::new(engine, "/nonexistent.yaml");
    install_declaration(&supervisor, declaration_with_svc());
    let _reload_rx = register_instance(&supervisor, "svc", None);
    record_probe_error(&supervisor, "svc", "check command exited with code: 2");

    let (status, report) = get_health(health::router(supervisor)).await;
    assert_eq!(status, axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("svc"));
    assert!(report.errors[0].contains("exited with code: 2"));
}

#[tokio::test]
async fn engine_list_failure_is_surfaced() {
    let engine = Arc::new(MockEngine::new());
    engine.fail_next("list", EngineError::Transport("engine down".to_string()));

    let supervisor = Supervisor::new(engine, "/nonexistent.yaml");
    install_declaration(&supervisor, declaration_with_svc());
    let _reload_rx = register_instance(&supervisor, "svc", None);

    let (status, report) = get_health(health::router(supervisor)).await;
    assert_eq!(status, axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("engine down"));
}
