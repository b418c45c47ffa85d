//! API Module
//!
//! HTTP API layer for the orchestrator.
//! Each submodule handles endpoints for a specific domain.

pub mod account;
pub mod error;
pub mod health;
pub mod kube;
pub mod pipeline;
pub mod workflow;

use axum::{
    Router,
    routing::{get, post},
};
use skiff_engine::Engine;
use tower_http::trace::TraceLayer;

/// Create the main API router with all endpoints
pub fn create_router(engine: Engine) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Cluster endpoints
        .route("/provision", post(kube::provision))
        .route("/kubes", get(kube::list_kubes))
        .route("/kubes/{id}", get(kube::get_kube).delete(kube::delete_kube))
        .route("/kubes/{id}/nodes", post(kube::add_nodes))
        .route(
            "/kubes/{id}/nodes/{machine_id}",
            axum::routing::delete(kube::delete_node),
        )
        // Workflow endpoints
        .route("/workflows/{id}", get(workflow::get_workflow))
        .route("/workflows/{id}/logs", get(workflow::get_logs))
        .route("/workflows/{id}/restart", post(workflow::restart))
        .route("/workflows/{id}/cancel", post(workflow::cancel))
        // Account endpoints
        .route("/accounts", post(account::create_account))
        .route("/accounts/{name}", get(account::get_account))
        // Registry
        .route("/pipelines", get(pipeline::list_pipelines))
        // Add state and middleware
        .with_state(engine)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request, StatusCode};
    use serde_json::{Value, json};
    use skiff_engine::cloud::ProviderRegistry;
    use skiff_engine::{EngineSettings, MemoryStore, Services};
    use skiff_runner::RunnerFactory;
    use skiff_templates::TemplateRegistry;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::time::{Instant, sleep};
    use tower::ServiceExt;

    fn test_router() -> Router {
        let services = Services {
            store: Arc::new(MemoryStore::new()),
            templates: TemplateRegistry::builtin(),
            runners: Arc::new(RunnerFactory::dry_run()),
            providers: ProviderRegistry::new("http://127.0.0.1:1"),
            settings: EngineSettings {
                poll_interval: Duration::from_millis(10),
                port_wait_interval: Duration::from_millis(10),
                log_flush_interval: Duration::from_millis(20),
                dns_domain: "test.local".to_string(),
                ..EngineSettings::default()
            },
        };
        create_router(Engine::new(services).unwrap())
    }

    async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => request
                .header("content-type", "application/json")
                .body(Body::from(body.to_string())),
            None => request.body(Body::empty()),
        }
        .unwrap();

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, value)
    }

    async fn create_fake_account(app: &Router) {
        let (status, _) = send(
            app,
            Method::POST,
            "/accounts",
            Some(json!({"name": "local", "provider": "fake", "credentials": {}})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    fn provision_body(masters: usize, workers: usize) -> Value {
        let node = json!({"size": "small", "image": "ubuntu-18-04"});
        json!({
            "clusterName": "demo",
            "cloudAccountName": "local",
            "profile": {
                "provider": "fake",
                "region": "fake-1",
                "k8sVersion": "1.18.0",
                "masters": vec![node.clone(); masters],
                "workers": vec![node; workers],
                "ssh": {
                    "bootstrapPrivateKey": "private",
                    "bootstrapPublicKey": "ssh-ed25519 AAAA skiff"
                }
            }
        })
    }

    async fn wait_for_state(app: &Router, id: &str, state: &str) -> Value {
        let deadline = Instant::now() + Duration::from_secs(15);
        loop {
            let (status, kube) = send(app, Method::GET, &format!("/kubes/{}", id), None).await;
            if status == StatusCode::OK && kube["state"] == state {
                return kube;
            }
            assert!(Instant::now() < deadline, "cluster {} never became {}", id, state);
            sleep(Duration::from_millis(20)).await;
        }
    }

    async fn wait_for_workflow(app: &Router, id: &Value) -> Value {
        let id = id.as_str().unwrap();
        let deadline = Instant::now() + Duration::from_secs(15);
        loop {
            let (_, task) = send(app, Method::GET, &format!("/workflows/{}", id), None).await;
            let statuses = task["stepStatuses"].as_array().cloned().unwrap_or_default();
            let settled = statuses
                .iter()
                .all(|s| s["status"] != "todo" && s["status"] != "executing");
            if !statuses.is_empty() && settled {
                return task;
            }
            assert!(Instant::now() < deadline, "workflow {} never settled", id);
            sleep(Duration::from_millis(20)).await;
        }
    }

    #[tokio::test]
    async fn test_health_and_pipelines() {
        let app = test_router();

        let (status, body) = send(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "OK");

        let (status, body) = send(&app, Method::GET, "/pipelines", None).await;
        assert_eq!(status, StatusCode::OK);
        let pipelines = body.as_array().unwrap();
        assert_eq!(pipelines.len(), 10);
        assert!(pipelines.iter().any(|p| p["name"] == "fake-master"));
    }

    #[tokio::test]
    async fn test_account_endpoints() {
        let app = test_router();

        let (status, body) = send(
            &app,
            Method::POST,
            "/accounts",
            Some(json!({
                "name": "do-prod",
                "provider": "digitalocean",
                "credentials": {"accessToken": "secret"}
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_ne!(body["credentials"]["accessToken"], "secret");

        let (status, body) = send(&app, Method::GET, "/accounts/do-prod", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["provider"], "digitalocean");
        assert_ne!(body["credentials"]["accessToken"], "secret");

        let (status, body) = send(&app, Method::GET, "/accounts/nobody", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("nobody"));

        let (status, _) = send(
            &app,
            Method::POST,
            "/accounts",
            Some(json!({"name": "do", "provider": "digitalocean", "credentials": {}})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_provision_rejections() {
        let app = test_router();

        let (status, body) = send(&app, Method::POST, "/provision", Some(provision_body(1, 0))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());

        create_fake_account(&app).await;

        let (status, _) = send(&app, Method::POST, "/provision", Some(json!({"clusterName": 7}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, Method::POST, "/provision", Some(provision_body(0, 1))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let unknown = "/workflows/00000000-0000-0000-0000-000000000000";
        let (status, _) = send(&app, Method::GET, unknown, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, Method::POST, &format!("{}/restart", unknown), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, Method::GET, "/kubes/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cluster_lifecycle() {
        let app = test_router();
        create_fake_account(&app).await;

        let (status, body) = send(&app, Method::POST, "/provision", Some(provision_body(1, 1))).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let id = body["clusterId"].as_str().unwrap().to_string();
        let master = body["tasks"]["master"][0].clone();
        assert_eq!(body["tasks"]["node"].as_array().unwrap().len(), 1);
        assert_eq!(body["tasks"]["cluster"].as_array().unwrap().len(), 1);

        let kube = wait_for_state(&app, &id, "operational").await;
        assert_eq!(kube["masters"].as_object().unwrap().len(), 1);
        assert_eq!(kube["workers"].as_object().unwrap().len(), 1);

        let (status, body) = send(&app, Method::GET, "/kubes", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["state"], "operational");

        let task = wait_for_workflow(&app, &master).await;
        assert!(task["stepStatuses"]
            .as_array()
            .unwrap()
            .iter()
            .all(|s| s["status"] == "success" || s["status"] == "skipped"));

        let master_path = format!("/workflows/{}", master.as_str().unwrap());
        let (status, logs) = send(&app, Method::GET, &format!("{}/logs", master_path), None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(!logs.as_array().unwrap().is_empty());

        let (status, _) = send(&app, Method::POST, &format!("{}/restart", master_path), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
        let (status, _) = send(&app, Method::POST, &format!("{}/cancel", master_path), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        // scale out, then remove the original worker
        let (status, body) = send(
            &app,
            Method::POST,
            &format!("/kubes/{}/nodes", id),
            Some(json!({"nodes": [{"size": "small", "image": "ubuntu-18-04"}]})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        wait_for_workflow(&app, &body["tasks"]["node"][0]).await;

        let worker = kube["workers"].as_object().unwrap().keys().next().unwrap().clone();
        let (status, body) = send(
            &app,
            Method::DELETE,
            &format!("/kubes/{}/nodes/{}", id, worker),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        wait_for_workflow(&app, &body["tasks"]["delete"][0]).await;

        // the record is updated once the task has ended
        let deadline = Instant::now() + Duration::from_secs(15);
        loop {
            let (_, kube) = send(&app, Method::GET, &format!("/kubes/{}", id), None).await;
            let workers = kube["workers"].as_object().unwrap();
            if workers.len() == 1 && !workers.contains_key(&worker) {
                break;
            }
            assert!(Instant::now() < deadline, "worker {} was not replaced", worker);
            sleep(Duration::from_millis(20)).await;
        }

        // tasks still recording their outcome hold the cluster busy
        let deadline = Instant::now() + Duration::from_secs(15);
        let body = loop {
            let (status, body) = send(&app, Method::DELETE, &format!("/kubes/{}", id), None).await;
            if status != StatusCode::CONFLICT {
                assert_eq!(status, StatusCode::ACCEPTED);
                break body;
            }
            assert!(Instant::now() < deadline, "cluster {} stayed busy", id);
            sleep(Duration::from_millis(20)).await;
        };
        assert_eq!(body["tasks"]["delete"].as_array().unwrap().len(), 3);

        let deadline = Instant::now() + Duration::from_secs(15);
        loop {
            let (status, _) = send(&app, Method::GET, &format!("/kubes/{}", id), None).await;
            if status == StatusCode::NOT_FOUND {
                break;
            }
            assert!(Instant::now() < deadline, "cluster {} was not deleted", id);
            sleep(Duration::from_millis(20)).await;
        }
    }
}
