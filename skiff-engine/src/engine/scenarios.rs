//! End-to-end runs of the engine against the fake cloud and the scripted
//! runner

use serde_json::Value;
use skiff_core::domain::account::CloudAccount;
use skiff_core::domain::kube::{Kube, KubeState, ROLE_CLUSTER, ROLE_DELETE, ROLE_MASTER, ROLE_NODE};
use skiff_core::domain::machine::Role;
use skiff_core::domain::provider::ProviderKind;
use skiff_core::domain::task::{Status, TaskSnapshot};
use skiff_core::dto::provision::ProvisionRequest;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use super::{Engine, ProvisionError, REDACTED};
use crate::repository::account_repository;
use crate::testing::{ACCOUNT, TestEnv, sample_profile, test_settings};

const SETTLE: Duration = Duration::from_secs(15);

fn setup() -> (TestEnv, Engine) {
    let env = TestEnv::new();
    let engine = Engine::with_services(env.services()).unwrap();
    (env, engine)
}

fn request(masters: usize, workers: usize) -> ProvisionRequest {
    let mut profile = sample_profile(masters, workers);
    profile.provider = ProviderKind::Fake;
    profile.region = "fake-1".to_string();
    ProvisionRequest {
        cluster_name: "demo".to_string(),
        profile,
        cloud_account_name: ACCOUNT.to_string(),
    }
}

fn is_settled(snapshot: &TaskSnapshot) -> bool {
    matches!(
        snapshot.status(),
        Status::Success | Status::Error | Status::Cancelled
    )
}

/// Waits until the task ended and its outcome was recorded
async fn settled(engine: &Engine, id: Uuid) -> TaskSnapshot {
    let deadline = Instant::now() + SETTLE;
    loop {
        if let Ok(snapshot) = engine.get_task(id).await {
            if is_settled(&snapshot) && !engine.is_running(id) {
                return snapshot;
            }
        }
        assert!(Instant::now() < deadline, "task {} did not settle", id);
        sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_for_step(engine: &Engine, id: Uuid, step: &str, status: Status) {
    let deadline = Instant::now() + SETTLE;
    loop {
        if let Ok(snapshot) = engine.get_task(id).await {
            if snapshot.step(step).is_some_and(|s| s.status == status) {
                return;
            }
        }
        assert!(Instant::now() < deadline, "step {} of task {} never became {:?}", step, id, status);
        sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_for_kube(engine: &Engine, id: Uuid, state: KubeState) -> Kube {
    let deadline = Instant::now() + SETTLE;
    loop {
        if let Ok(kube) = engine.get_kube(id).await {
            if kube.state == state {
                return kube;
            }
        }
        assert!(Instant::now() < deadline, "cluster {} never became {:?}", id, state);
        sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_for_deletion(engine: &Engine, id: Uuid) {
    let deadline = Instant::now() + SETTLE;
    while !matches!(engine.get_kube(id).await, Err(ProvisionError::NotFound(_))) {
        assert!(Instant::now() < deadline, "cluster {} was not deleted", id);
        sleep(Duration::from_millis(10)).await;
    }
}

/// Provisions a cluster and waits until it is operational
async fn operational(engine: &Engine, masters: usize, workers: usize) -> Kube {
    let response = engine.provision(request(masters, workers)).await.unwrap();
    let kube = wait_for_kube(engine, response.cluster_id, KubeState::Operational).await;
    settled(engine, response.tasks[ROLE_CLUSTER][0]).await;
    kube
}

#[tokio::test]
async fn test_single_master_cluster() {
    let (env, engine) = setup();

    let response = engine.provision(request(1, 0)).await.unwrap();
    let id = response.cluster_id;
    assert_eq!(response.tasks[ROLE_MASTER].len(), 1);
    assert!(response.tasks[ROLE_NODE].is_empty());
    assert_eq!(response.tasks[ROLE_CLUSTER].len(), 1);

    let kube = wait_for_kube(&engine, id, KubeState::Operational).await;
    assert_eq!(kube.masters.len(), 1);
    let master = kube.masters.values().next().unwrap();
    assert_eq!(master.role, Role::Master);
    assert!(master.is_bootstrap);
    assert_eq!(kube.bootstrap_token.len(), 23);
    assert_eq!(kube.ca.as_ref().unwrap().key, REDACTED);
    assert!(kube.external_dns.ends_with(".test.local"));
    assert!(env.fake().has_cluster(id));

    let task = settled(&engine, response.tasks[ROLE_MASTER][0]).await;
    assert_eq!(task.status(), Status::Success);
    assert!(task.step_statuses.iter().all(|s| s.status.is_done() && s.finished_at.is_some()));
    assert_eq!(task.step("kubeadm").unwrap().status, Status::Success);
    assert_eq!(task.step("authorized_keys").unwrap().status, Status::Skipped);
    assert_eq!(task.config["isBootstrap"], Value::Bool(true));
    assert_eq!(task.config["profile"]["ssh"]["bootstrapPrivateKey"], REDACTED);

    let post = settled(&engine, response.tasks[ROLE_CLUSTER][0]).await;
    assert_eq!(post.status(), Status::Success);
    assert_eq!(post.step("prometheus").unwrap().status, Status::Skipped);

    let logs = engine.task_logs(task.id).await.unwrap();
    assert!(logs.iter().any(|e| e.message == "==> kubeadm"));
}

#[tokio::test]
async fn test_three_masters_three_workers() {
    let (env, engine) = setup();

    let response = engine.provision(request(3, 3)).await.unwrap();
    let all: Vec<Uuid> = response.tasks.values().flatten().copied().collect();
    assert_eq!(all.len(), 7);

    let kube = wait_for_kube(&engine, response.cluster_id, KubeState::Operational).await;
    assert_eq!(kube.masters.len(), 3);
    assert_eq!(kube.workers.len(), 3);
    assert_eq!(kube.masters.values().filter(|m| m.is_bootstrap).count(), 1);
    assert!(kube.workers.values().all(|m| m.role == Role::Worker && !m.is_bootstrap));

    for id in all {
        assert_eq!(settled(&engine, id).await.status(), Status::Success);
    }

    let history = env.runner().history();
    let bootstrap_host = kube
        .bootstrap_master()
        .and_then(|m| m.ssh_address())
        .unwrap()
        .to_string();

    // nobody else touches a host before the bootstrap master initialised
    let init = history
        .iter()
        .position(|(host, cmd)| *host == bootstrap_host && cmd == "kubeadm")
        .unwrap();
    let first_other = history.iter().position(|(host, _)| *host != bootstrap_host).unwrap();
    assert!(init < first_other);

    // the cluster pipeline runs after every node task
    let post_steps = ["cluster_check", "cluster_services", "storage_class", "tiller"];
    let post_start = history
        .iter()
        .position(|(_, cmd)| cmd == "cluster_check")
        .unwrap();
    assert!(history[post_start..].iter().all(|(host, cmd)| {
        *host == bootstrap_host && post_steps.contains(&cmd.as_str())
    }));
    assert_eq!(env.runner().runs_of("kubeadm"), 6);
}

#[tokio::test]
async fn test_failed_worker_step_and_restart() {
    let (env, engine) = setup();
    // the bootstrap master renders its manifest before any worker may
    env.runner().fail_on("manifest", 2);

    let response = engine.provision(request(1, 1)).await.unwrap();
    let id = response.cluster_id;
    let worker_id = response.tasks[ROLE_NODE][0];
    let post_id = response.tasks[ROLE_CLUSTER][0];

    let post = settled(&engine, post_id).await;
    assert_eq!(post.status(), Status::Cancelled);
    assert_eq!(engine.get_kube(id).await.unwrap().state, KubeState::Failed);

    let failed = settled(&engine, worker_id).await;
    assert_eq!(failed.status(), Status::Error);
    let k = failed
        .step_statuses
        .iter()
        .position(|s| s.step == "manifest")
        .unwrap();
    assert_eq!(failed.step_statuses[k].status, Status::Error);
    assert!(!failed.step_statuses[k].error_message.as_deref().unwrap_or("").is_empty());
    assert!(failed.step_statuses[..k].iter().all(|s| s.status.is_done()));
    assert!(failed.step_statuses[k + 1..].iter().all(|s| s.status == Status::Todo));

    engine.restart(worker_id).await.unwrap();
    let done = settled(&engine, worker_id).await;
    assert_eq!(done.status(), Status::Success);
    assert_eq!(done.attempt, 1);
    assert_eq!(done.step_statuses[..k], failed.step_statuses[..k]);

    assert_eq!(env.runner().runs_of("download_binaries"), 2);
    assert_eq!(env.runner().runs_of("manifest"), 3);
    assert_eq!(env.fake().creates(), 2);
    assert_eq!(engine.get_kube(id).await.unwrap().workers.len(), 1);

    engine.restart(post_id).await.unwrap();
    let kube = wait_for_kube(&engine, id, KubeState::Operational).await;
    assert_eq!(kube.masters.len(), 1);
}

#[tokio::test]
async fn test_cancel_mid_step_and_resume() {
    let (env, engine) = setup();
    env.runner().block("docker");

    let response = engine.provision(request(1, 0)).await.unwrap();
    let master_id = response.tasks[ROLE_MASTER][0];

    wait_for_step(&engine, master_id, "docker", Status::Executing).await;
    sleep(Duration::from_millis(200)).await;

    let cancelled_at = Instant::now();
    engine.cancel(master_id).await.unwrap();
    let cancelled = settled(&engine, master_id).await;
    assert!(cancelled_at.elapsed() < Duration::from_secs(2));

    assert_eq!(cancelled.status(), Status::Cancelled);
    assert_eq!(cancelled.step("docker").unwrap().status, Status::Cancelled);
    assert_eq!(cancelled.step("cni").unwrap().status, Status::Todo);
    assert_eq!(cancelled.step("post_start").unwrap().status, Status::Todo);
    assert!(matches!(
        engine.cancel(master_id).await,
        Err(ProvisionError::Conflict(_))
    ));

    env.runner().unblock("docker");
    engine.restart(master_id).await.unwrap();
    assert_eq!(settled(&engine, master_id).await.status(), Status::Success);
    assert_eq!(env.fake().creates(), 1);

    let post_id = response.tasks[ROLE_CLUSTER][0];
    assert_eq!(settled(&engine, post_id).await.status(), Status::Cancelled);
    engine.restart(post_id).await.unwrap();
    wait_for_kube(&engine, response.cluster_id, KubeState::Operational).await;
}

#[tokio::test]
async fn test_pending_post_task_cannot_be_restarted() {
    let (env, engine) = setup();
    env.runner().block("docker");

    let response = engine.provision(request(1, 0)).await.unwrap();
    let id = response.cluster_id;
    let master_id = response.tasks[ROLE_MASTER][0];
    let post_id = response.tasks[ROLE_CLUSTER][0];
    wait_for_step(&engine, master_id, "docker", Status::Executing).await;

    assert!(engine.is_running(post_id));
    assert!(matches!(
        engine.restart(post_id).await,
        Err(ProvisionError::Conflict(_))
    ));
    assert!(matches!(
        engine.delete_cluster(id).await,
        Err(ProvisionError::Conflict(_))
    ));
    sleep(Duration::from_millis(200)).await;

    let pending = engine.get_task(post_id).await.unwrap();
    assert_eq!(pending.attempt, 0);
    assert!(pending.step_statuses.iter().all(|s| s.status == Status::Todo));
    assert_eq!(env.runner().runs_of("cluster_check"), 0);
    assert_eq!(engine.get_kube(id).await.unwrap().state, KubeState::Provisioning);

    engine.cancel(master_id).await.unwrap();
    let abandoned = settled(&engine, post_id).await;
    assert_eq!(abandoned.status(), Status::Cancelled);
    assert_eq!(env.runner().runs_of("cluster_check"), 0);

    env.runner().unblock("docker");
    engine.restart(master_id).await.unwrap();
    assert_eq!(settled(&engine, master_id).await.status(), Status::Success);
    engine.restart(post_id).await.unwrap();
    wait_for_kube(&engine, id, KubeState::Operational).await;
    assert_eq!(settled(&engine, post_id).await.status(), Status::Success);
    assert_eq!(env.runner().runs_of("cluster_check"), 1);
}

#[tokio::test]
async fn test_bootstrap_barrier_timeout_fails_cluster() {
    let (env, engine) = setup();
    env.runner().block("docker");

    let mut req = request(2, 0);
    req.profile.barrier_timeout_secs = Some(1);
    req.profile.timeouts.step_secs = Some(1);
    let response = engine.provision(req).await.unwrap();

    let masters = &response.tasks[ROLE_MASTER];
    let bootstrap = settled(&engine, masters[0]).await;
    let joining = settled(&engine, masters[1]).await;
    settled(&engine, response.tasks[ROLE_CLUSTER][0]).await;

    let ssh = joining.step("ssh").unwrap();
    assert_eq!(ssh.status, Status::Error);
    assert!(ssh.error_message.as_deref().unwrap().contains("bootstrap master not ready"));

    let docker = bootstrap.step("docker").unwrap();
    assert_eq!(docker.status, Status::Error);
    assert!(docker.error_message.as_deref().unwrap().contains("timed out"));

    let kube = engine.get_kube(response.cluster_id).await.unwrap();
    assert_eq!(kube.state, KubeState::Failed);
    assert!(kube.masters.is_empty());
}

#[tokio::test]
async fn test_restarting_a_machine_task_reuses_its_machine() {
    let (env, engine) = setup();
    env.runner().fail_on("docker", 1);

    let response = engine.provision(request(1, 0)).await.unwrap();
    let master_id = response.tasks[ROLE_MASTER][0];
    let failed = settled(&engine, master_id).await;
    assert_eq!(failed.step("create_machine").unwrap().status, Status::Success);
    assert_eq!(failed.step("docker").unwrap().status, Status::Error);

    engine.restart(master_id).await.unwrap();
    settled(&engine, master_id).await;

    assert_eq!(env.fake().creates(), 1);
    assert_eq!(env.fake().machines().len(), 1);
}

#[tokio::test]
async fn test_provision_rejects_bad_requests() {
    let (env, engine) = setup();

    let mut unknown = request(1, 0);
    unknown.cloud_account_name = "nobody".to_string();
    assert!(matches!(
        engine.provision(unknown).await,
        Err(ProvisionError::NotFound(_))
    ));

    let mut aws = request(1, 0);
    aws.profile.provider = ProviderKind::Aws;
    assert!(matches!(
        engine.provision(aws).await,
        Err(ProvisionError::Validation(_))
    ));

    assert!(matches!(
        engine.provision(request(0, 1)).await,
        Err(ProvisionError::Validation(_))
    ));

    let mut bad_name = request(1, 0);
    bad_name.cluster_name = "Demo Cluster".to_string();
    assert!(matches!(
        engine.provision(bad_name).await,
        Err(ProvisionError::Validation(_))
    ));

    let account = CloudAccount {
        name: "do".to_string(),
        provider: ProviderKind::DigitalOcean,
        credentials: BTreeMap::from([("accessToken".to_string(), "t".to_string())]),
    };
    account_repository::save(env.store(), &account).await.unwrap();
    let mut mismatch = request(1, 0);
    mismatch.cloud_account_name = "do".to_string();
    assert!(matches!(
        engine.provision(mismatch).await,
        Err(ProvisionError::Validation(_))
    ));

    assert!(engine.list_kubes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_discovery_url_reaches_masters_only() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/new"))
        .and(query_param("size", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_string("https://discovery.example/abc\n"))
        .mount(&server)
        .await;

    let mut settings = test_settings();
    settings.discovery_url = Some(server.uri());
    let env = TestEnv::with_settings(settings);
    let engine = Engine::with_services(env.services()).unwrap();

    let response = engine.provision(request(3, 1)).await.unwrap();

    for id in &response.tasks[ROLE_MASTER] {
        let task = engine.get_task(*id).await.unwrap();
        assert_eq!(task.config["discoveryUrl"], "https://discovery.example/abc");
    }
    let worker = engine.get_task(response.tasks[ROLE_NODE][0]).await.unwrap();
    assert!(worker.config["discoveryUrl"].is_null());
}

#[tokio::test]
async fn test_discovery_failure_aborts_provisioning() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let mut settings = test_settings();
    settings.discovery_url = Some(server.uri());
    let env = TestEnv::with_settings(settings);
    let engine = Engine::with_services(env.services()).unwrap();

    assert!(matches!(
        engine.provision(request(1, 0)).await,
        Err(ProvisionError::Discovery(_))
    ));
    assert!(engine.list_kubes().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_delete_cluster_removes_machines_and_record() {
    let (env, engine) = setup();
    let kube = operational(&engine, 1, 2).await;

    let tasks = engine.delete_cluster(kube.id).await.unwrap();
    let ids = &tasks[ROLE_DELETE];
    assert_eq!(ids.len(), 4);

    wait_for_deletion(&engine, kube.id).await;
    assert!(env.fake().machines().is_empty());
    assert!(!env.fake().has_cluster(kube.id));

    for id in ids {
        let task = settled(&engine, *id).await;
        assert_eq!(task.status(), Status::Success);
        if let Some(evacuate) = task.step("evacuate") {
            assert_eq!(evacuate.status, Status::Skipped);
        }
    }
    assert_eq!(env.runner().runs_of("evacuate"), 0);
}

#[tokio::test]
async fn test_delete_failed_cluster_rolls_back_orphans() {
    let (env, engine) = setup();
    env.runner().fail_on("manifest", 2);

    let response = engine.provision(request(1, 1)).await.unwrap();
    settled(&engine, response.tasks[ROLE_CLUSTER][0]).await;
    assert_eq!(env.fake().machines().len(), 2);

    let kube = engine.get_kube(response.cluster_id).await.unwrap();
    assert!(kube.workers.is_empty());

    engine.delete_cluster(kube.id).await.unwrap();
    wait_for_deletion(&engine, kube.id).await;
    assert!(env.fake().machines().is_empty());
}

#[tokio::test]
async fn test_delete_cluster_refuses_while_tasks_run() {
    let (env, engine) = setup();
    env.runner().block("docker");

    let response = engine.provision(request(1, 0)).await.unwrap();
    let master_id = response.tasks[ROLE_MASTER][0];
    wait_for_step(&engine, master_id, "docker", Status::Executing).await;

    assert!(matches!(
        engine.delete_cluster(response.cluster_id).await,
        Err(ProvisionError::Conflict(_))
    ));
    assert!(matches!(
        engine.restart(master_id).await,
        Err(ProvisionError::Conflict(_))
    ));
    assert!(matches!(
        engine.add_nodes(response.cluster_id, request(0, 1).profile.workers).await,
        Err(ProvisionError::Conflict(_))
    ));

    engine.cancel(master_id).await.unwrap();
    settled(&engine, master_id).await;
    assert!(matches!(
        engine.delete_cluster(Uuid::new_v4()).await,
        Err(ProvisionError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_add_nodes_joins_workers() {
    let (env, engine) = setup();
    let kube = operational(&engine, 1, 0).await;

    let spec = request(0, 1).profile.workers;
    assert!(matches!(
        engine.add_nodes(kube.id, Vec::new()).await,
        Err(ProvisionError::Validation(_))
    ));

    let nodes = vec![spec[0].clone(), spec[0].clone()];
    let tasks = engine.add_nodes(kube.id, nodes).await.unwrap();
    for id in &tasks[ROLE_NODE] {
        assert_eq!(settled(&engine, *id).await.status(), Status::Success);
    }

    let kube = engine.get_kube(kube.id).await.unwrap();
    let mut names: Vec<&str> = kube.workers.values().map(|m| m.name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["demo-node-1", "demo-node-2"]);
    assert_eq!(kube.tasks[ROLE_NODE].len(), 2);
    assert_eq!(env.fake().machines().len(), 3);
}

#[tokio::test]
async fn test_delete_node() {
    let (env, engine) = setup();
    let kube = operational(&engine, 1, 1).await;

    let bootstrap = kube.bootstrap_master().unwrap().id.clone();
    assert!(matches!(
        engine.delete_node(kube.id, &bootstrap).await,
        Err(ProvisionError::Conflict(_))
    ));
    assert!(matches!(
        engine.delete_node(kube.id, "missing").await,
        Err(ProvisionError::NotFound(_))
    ));

    let worker = kube.workers.keys().next().unwrap().clone();
    let tasks = engine.delete_node(kube.id, &worker).await.unwrap();
    let task = settled(&engine, tasks[ROLE_DELETE][0]).await;
    assert_eq!(task.status(), Status::Success);

    let kube = engine.get_kube(kube.id).await.unwrap();
    assert!(kube.workers.is_empty());
    assert_eq!(kube.masters.len(), 1);
    assert_eq!(env.runner().runs_of("evacuate"), 1);
    assert_eq!(env.fake().machines().len(), 1);
}

#[tokio::test]
async fn test_restart_and_cancel_edge_cases() {
    let (_env, engine) = setup();
    let response = engine.provision(request(1, 0)).await.unwrap();
    wait_for_kube(&engine, response.cluster_id, KubeState::Operational).await;

    let master_id = response.tasks[ROLE_MASTER][0];
    settled(&engine, master_id).await;
    assert!(matches!(
        engine.restart(master_id).await,
        Err(ProvisionError::Conflict(_))
    ));
    assert!(!engine.is_running(master_id));

    assert!(matches!(
        engine.restart(Uuid::new_v4()).await,
        Err(ProvisionError::NotFound(_))
    ));
    assert!(matches!(
        engine.cancel(Uuid::new_v4()).await,
        Err(ProvisionError::NotFound(_))
    ));
    assert_eq!(engine.pipelines().len(), 10);
    assert_eq!(engine.list_kubes().await.unwrap().len(), 1);
}
