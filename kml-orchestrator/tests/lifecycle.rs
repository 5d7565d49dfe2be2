use std::collections::BTreeMap;

use kml_catalog::SessionCatalog;
use kml_core::error::KmlError;
use kml_edge_client::EdgeClient;
use kml_orchestrator::{InstallStep, LifecycleEvent, Orchestrator, SessionConfig};
use kml_sandbox_client::SandboxProviderClient;
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn demo_config(domain_server: &str) -> SessionConfig {
    let mut config = SessionConfig::new("test-run", "demo", domain_server);
    config.git_repo = Some("https://github.com/u/r.git".to_string());
    config.install = vec![InstallStep::Command("bundle install".to_string())];
    config.processes = BTreeMap::from([("web".to_string(), "bin/rails s -b 0.0.0.0".to_string())]);
    config
}

async fn mount_happy_path_provider(server: &MockServer, exec_exit_code: i64, exec_output: &str) {
    Mock::given(method("GET")).and(path("/sandboxes")).respond_with(ResponseTemplate::new(200).set_body_json(json!([]))).mount(server).await;
    Mock::given(method("POST")).and(path("/sandboxes")).respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "id": "sbx-1", "name": "kml-demo-test-run", "state": "creating"
    }))).mount(server).await;
    Mock::given(method("GET")).and(path("/sandboxes/sbx-1")).respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "id": "sbx-1", "name": "kml-demo-test-run", "state": "running"
    }))).mount(server).await;
    Mock::given(method("POST")).and(path("/sandboxes/sbx-1/git/clone")).respond_with(ResponseTemplate::new(200)).mount(server).await;
    Mock::given(method("POST")).and(path("/sandboxes/sbx-1/files")).respond_with(ResponseTemplate::new(200)).mount(server).await;
    Mock::given(method("POST")).and(path("/sandboxes/sbx-1/exec")).respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "exit_code": exec_exit_code, "output": exec_output
    }))).mount(server).await;
    Mock::given(method("POST")).and(path("/sandboxes/sbx-1/sessions")).respond_with(ResponseTemplate::new(200)).mount(server).await;
    Mock::given(method("POST")).and(path("/sandboxes/sbx-1/sessions/app/exec")).respond_with(ResponseTemplate::new(200)).mount(server).await;
    Mock::given(method("POST")).and(path("/sandboxes/sbx-1/sessions/tunnel/exec")).respond_with(ResponseTemplate::new(200)).mount(server).await;
}

async fn mount_happy_path_edge(server: &MockServer) {
    Mock::given(method("GET")).and(path("/accounts/acct-1/tunnels")).respond_with(ResponseTemplate::new(200).set_body_json(json!([]))).mount(server).await;
    Mock::given(method("POST")).and(path("/accounts/acct-1/tunnels")).respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "tunnel_id": "tun-1", "token": "ignored"
    }))).mount(server).await;
    Mock::given(method("PUT")).and(path("/accounts/acct-1/tunnels/tun-1/configurations")).respond_with(ResponseTemplate::new(200)).mount(server).await;
    Mock::given(method("GET")).and(path("/accounts/acct-1/tunnels/tun-1/token")).respond_with(ResponseTemplate::new(200).set_body_json(json!("tunnel-token"))).mount(server).await;
    Mock::given(method("GET")).and(path("/zones/zone-1/dns_records")).respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": [] }))).mount(server).await;
    Mock::given(method("POST")).and(path("/zones/zone-1/dns_records")).respond_with(ResponseTemplate::new(200)).mount(server).await;
    Mock::given(method("PUT")).and(path("/accounts/acct-1/workers/scripts/kml-demo-test-run")).respond_with(ResponseTemplate::new(200)).mount(server).await;
    Mock::given(method("GET")).and(path("/zones/zone-1/workers/routes")).respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": [] }))).mount(server).await;
    Mock::given(method("POST")).and(path("/zones/zone-1/workers/routes")).respond_with(ResponseTemplate::new(200)).mount(server).await;
}

#[tokio::test]
async fn fresh_session_start_creates_sandbox_tunnel_dns_and_worker() {
    let provider_server = MockServer::start().await;
    let edge_server = MockServer::start().await;
    mount_happy_path_provider(&provider_server, 0, "ok").await;
    mount_happy_path_edge(&edge_server).await;

    let dir = tempfile::tempdir().unwrap();
    let catalog = SessionCatalog::at_cwd(dir.path());
    catalog.create("test-run").unwrap();

    let provider = SandboxProviderClient::new(provider_server.uri(), "api-key");
    let edge = EdgeClient::new(edge_server.uri(), "token", "acct-1", "zone-1");
    let orchestrator = Orchestrator::new(&provider, &edge, &catalog);

    let config = demo_config("example.com");
    let mut events = Vec::new();
    orchestrator
        .start(&config, |event| events.push(event))
        .await
        .unwrap();

    assert!(events.iter().any(|e| matches!(e, LifecycleEvent::SandboxCreated { sandbox_id } if sandbox_id == "sbx-1")));
    assert!(events.iter().any(|e| matches!(e, LifecycleEvent::TunnelCreated { tunnel_id, .. } if tunnel_id == "tun-1")));
    assert!(events.iter().any(|e| matches!(e, LifecycleEvent::InstallComplete { exit_code: 0, .. })));
}

#[tokio::test]
async fn install_failure_aborts_start_with_install_error() {
    let provider_server = MockServer::start().await;
    let edge_server = MockServer::start().await;
    mount_happy_path_provider(&provider_server, 1, "bash: false: command failed").await;
    mount_happy_path_edge(&edge_server).await;

    let dir = tempfile::tempdir().unwrap();
    let catalog = SessionCatalog::at_cwd(dir.path());
    catalog.create("test-run").unwrap();

    let provider = SandboxProviderClient::new(provider_server.uri(), "api-key");
    let edge = EdgeClient::new(edge_server.uri(), "token", "acct-1", "zone-1");
    let orchestrator = Orchestrator::new(&provider, &edge, &catalog);

    let mut config = demo_config("example.com");
    config.install = vec![InstallStep::Command("false".to_string())];

    let result = orchestrator.start(&config, |_| {}).await;
    match result {
        Err(KmlError::InstallFailure { command, exit_code, .. }) => {
            assert_eq!(command, "false");
            assert_eq!(exit_code, 1);
        }
        other => panic!("expected InstallFailure, got {other:?}"),
    }

    // sandbox_id is still observable via the catalog's independent record of
    // events — a caller that persisted LifecycleEvent::SandboxCreated before
    // the failure retains it for later cleanup, per §7.
}

#[tokio::test]
async fn start_reuses_resume_tunnel_state_instead_of_creating_a_new_tunnel() {
    let provider_server = MockServer::start().await;
    let edge_server = MockServer::start().await;
    mount_happy_path_provider(&provider_server, 0, "ok").await;

    // No GET/POST /tunnels or PUT .../configurations mock is mounted — if
    // `start` still called `create_tunnel` despite the resume keys being
    // set, the request would go unmatched and this test would fail.
    Mock::given(method("GET")).and(path("/zones/zone-1/dns_records")).respond_with(ResponseTemplate::new(200).set_body_json(json!({
        "result": [{ "id": "rec-1", "content": "tun-existing.cfargotunnel.com" }]
    }))).mount(&edge_server).await;
    Mock::given(method("PUT")).and(path("/accounts/acct-1/workers/scripts/kml-demo-test-run")).respond_with(ResponseTemplate::new(200)).mount(&edge_server).await;
    Mock::given(method("GET")).and(path("/zones/zone-1/workers/routes")).respond_with(ResponseTemplate::new(200).set_body_json(json!({ "result": [] }))).mount(&edge_server).await;
    Mock::given(method("POST")).and(path("/zones/zone-1/workers/routes")).respond_with(ResponseTemplate::new(200)).mount(&edge_server).await;

    let dir = tempfile::tempdir().unwrap();
    let catalog = SessionCatalog::at_cwd(dir.path());
    catalog.create("test-run").unwrap();

    let provider = SandboxProviderClient::new(provider_server.uri(), "api-key");
    let edge = EdgeClient::new(edge_server.uri(), "token", "acct-1", "zone-1");
    let orchestrator = Orchestrator::new(&provider, &edge, &catalog);

    let mut config = demo_config("example.com");
    config.resume_tunnel_id = Some("tun-existing".to_string());
    config.resume_tunnel_token = Some("existing-token".to_string());

    let mut events = Vec::new();
    orchestrator.start(&config, |event| events.push(event)).await.unwrap();

    assert!(!events.iter().any(|e| matches!(e, LifecycleEvent::TunnelCreated { .. })));
}

#[tokio::test]
async fn process_statuses_and_logs_use_overmind_one_shot_commands() {
    let provider_server = MockServer::start().await;
    let edge_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sandboxes/sbx-1/exec"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "exit_code": 0, "output": "web | running\nworker | crashed"
        })))
        .mount(&provider_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let catalog = SessionCatalog::at_cwd(dir.path());
    let provider = SandboxProviderClient::new(provider_server.uri(), "api-key");
    let edge = EdgeClient::new(edge_server.uri(), "token", "acct-1", "zone-1");
    let orchestrator = Orchestrator::new(&provider, &edge, &catalog);

    let statuses = orchestrator.process_statuses("sbx-1").await.unwrap();
    assert_eq!(statuses.get("web").map(String::as_str), Some("running"));
    assert_eq!(statuses.get("worker").map(String::as_str), Some("crashed"));

    let logs = orchestrator.process_logs("sbx-1", "web", 50).await.unwrap();
    assert_eq!(logs, "web | running\nworker | crashed");
}
