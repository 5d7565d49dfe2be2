//! Typed RPC client for the edge CDN (C2): tunnels, DNS, workers, and routes.

pub mod types;

use std::time::Duration;

use kml_core::error::Result;
use kml_core::http::{build_url, bearer_headers, send_json};
use kml_core::util::generate_token;
use reqwest::Method;
use serde_json::{Value, json};
use tracing::warn;

pub use types::{DeployWorkerParams, TunnelRecord};

/// The auth worker's JavaScript module. Embedded at compile time so the
/// orchestrator never needs a separate asset-deployment step.
pub const AUTH_WORKER_SCRIPT: &str = include_str!("../assets/auth_worker.js");

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Clone, Debug)]
pub struct EdgeClient {
    base_url: String,
    api_token: String,
    account_id: String,
    zone_id: String,
}

impl EdgeClient {
    pub fn new(
        base_url: impl Into<String>,
        api_token: impl Into<String>,
        account_id: impl Into<String>,
        zone_id: impl Into<String>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_token: api_token.into(),
            account_id: account_id.into(),
            zone_id: zone_id.into(),
        }
    }

    fn headers(&self) -> Result<reqwest::header::HeaderMap> {
        bearer_headers(&self.api_token)
    }

    async fn find_tunnel_by_name(&self, name: &str) -> Result<Option<TunnelRecord>> {
        let url = build_url(
            &self.base_url,
            &format!("/accounts/{}/tunnels?name={name}", self.account_id),
        )?;
        let value = send_json(Method::GET, url, None, self.headers()?, DEFAULT_TIMEOUT).await?;
        let items: Vec<TunnelRecord> = match value {
            Value::Array(_) => serde_json::from_value(value)?,
            _ => Vec::new(),
        };
        Ok(items.into_iter().next())
    }

    /// Find-or-create a tunnel by name, always re-asserting ingress config
    /// and fetching a fresh connect token.
    pub async fn create_tunnel(&self, name: &str, hostname: &str) -> Result<TunnelRecord> {
        let tunnel = match self.find_tunnel_by_name(name).await? {
            Some(existing) => existing,
            None => {
                let secret = generate_token();
                let url = build_url(&self.base_url, &format!("/accounts/{}/tunnels", self.account_id))?;
                let body = json!({ "name": name, "tunnel_secret": secret, "config_src": "cloudflare" });
                let value = send_json(Method::POST, url, Some(body), self.headers()?, DEFAULT_TIMEOUT).await?;
                serde_json::from_value(value)?
            }
        };

        self.set_ingress_config(&tunnel.tunnel_id, hostname).await?;
        let token = self.fetch_tunnel_token(&tunnel.tunnel_id).await?;

        Ok(TunnelRecord { tunnel_id: tunnel.tunnel_id, token })
    }

    async fn set_ingress_config(&self, tunnel_id: &str, hostname: &str) -> Result<()> {
        let url = build_url(
            &self.base_url,
            &format!("/accounts/{}/tunnels/{tunnel_id}/configurations", self.account_id),
        )?;
        let body = json!({
            "config": {
                "ingress": [
                    { "hostname": hostname, "service": "http://localhost:3000" },
                    { "service": "http_status:404" },
                ]
            }
        });
        send_json(Method::PUT, url, Some(body), self.headers()?, DEFAULT_TIMEOUT).await?;
        Ok(())
    }

    async fn fetch_tunnel_token(&self, tunnel_id: &str) -> Result<String> {
        let url = build_url(
            &self.base_url,
            &format!("/accounts/{}/tunnels/{tunnel_id}/token", self.account_id),
        )?;
        let value = send_json(Method::GET, url, None, self.headers()?, DEFAULT_TIMEOUT).await?;
        value
            .as_str()
            .map(str::to_string)
            .or_else(|| value.get("token").and_then(Value::as_str).map(str::to_string))
            .ok_or_else(|| kml_core::error::KmlError::Transport {
                status: None,
                message: "tunnel token response missing 'token'".into(),
            })
    }

    /// Delete live connections, then the tunnel. Tolerates failure of
    /// either step — this is cleanup and must never block a `delete`.
    pub async fn delete_tunnel(&self, tunnel_id: &str) {
        let connections_url = build_url(
            &self.base_url,
            &format!("/accounts/{}/tunnels/{tunnel_id}/connections", self.account_id),
        );
        if let Ok(url) = connections_url {
            if let Ok(headers) = self.headers() {
                if let Err(err) = send_json(Method::DELETE, url, None, headers, DEFAULT_TIMEOUT).await {
                    warn!(tunnel_id, %err, "failed to delete tunnel connections, continuing");
                }
            }
        }

        let tunnel_url = build_url(&self.base_url, &format!("/accounts/{}/tunnels/{tunnel_id}", self.account_id));
        match (tunnel_url, self.headers()) {
            (Ok(url), Ok(headers)) => {
                if let Err(err) = send_json(Method::DELETE, url, None, headers, DEFAULT_TIMEOUT).await {
                    warn!(tunnel_id, %err, "failed to delete tunnel, continuing");
                }
            }
            _ => warn!(tunnel_id, "failed to prepare tunnel deletion request"),
        }
    }

    /// Upsert a proxied CNAME `hostname -> <tunnel_id>.cfargotunnel.com`.
    /// Idempotent: running twice is equivalent to running once.
    pub async fn ensure_tunnel_dns(&self, hostname: &str, tunnel_id: &str) -> Result<()> {
        let target = format!("{tunnel_id}.cfargotunnel.com");
        let existing = self.find_dns_record(hostname).await?;

        match existing {
            Some(record_id_and_content) if record_id_and_content.1 == target => Ok(()),
            Some((record_id, _)) => self.update_dns_record(&record_id, hostname, &target).await,
            None => self.create_dns_record(hostname, &target).await,
        }
    }

    async fn find_dns_record(&self, hostname: &str) -> Result<Option<(String, String)>> {
        let url = build_url(
            &self.base_url,
            &format!("/zones/{}/dns_records?type=CNAME&name={hostname}", self.zone_id),
        )?;
        let value = send_json(Method::GET, url, None, self.headers()?, DEFAULT_TIMEOUT).await?;
        let records = value.get("result").cloned().unwrap_or(Value::Array(Vec::new()));
        let items: Vec<Value> = serde_json::from_value(records)?;
        Ok(items.first().and_then(|r| {
            let id = r.get("id")?.as_str()?.to_string();
            let content = r.get("content")?.as_str()?.to_string();
            Some((id, content))
        }))
    }

    async fn create_dns_record(&self, hostname: &str, target: &str) -> Result<()> {
        let url = build_url(&self.base_url, &format!("/zones/{}/dns_records", self.zone_id))?;
        let body = json!({ "type": "CNAME", "name": hostname, "content": target, "proxied": true });
        send_json(Method::POST, url, Some(body), self.headers()?, DEFAULT_TIMEOUT).await?;
        Ok(())
    }

    async fn update_dns_record(&self, record_id: &str, hostname: &str, target: &str) -> Result<()> {
        let url = build_url(&self.base_url, &format!("/zones/{}/dns_records/{record_id}", self.zone_id))?;
        let body = json!({ "type": "CNAME", "name": hostname, "content": target, "proxied": true });
        send_json(Method::PUT, url, Some(body), self.headers()?, DEFAULT_TIMEOUT).await?;
        Ok(())
    }

    async fn delete_dns_record(&self, hostname: &str) {
        match self.find_dns_record(hostname).await {
            Ok(Some((record_id, _))) => {
                let url = build_url(&self.base_url, &format!("/zones/{}/dns_records/{record_id}", self.zone_id));
                if let (Ok(url), Ok(headers)) = (url, self.headers()) {
                    if let Err(err) = send_json(Method::DELETE, url, None, headers, DEFAULT_TIMEOUT).await {
                        warn!(hostname, %err, "failed to delete DNS record, continuing");
                    }
                }
            }
            Ok(None) => {}
            Err(err) => warn!(hostname, %err, "failed to look up DNS record for deletion"),
        }
    }

    /// Upload the worker module plus any extra files, bind `ACCESS_TOKEN`
    /// as a secret and any extras as plain text, then upsert the route.
    pub async fn deploy_worker(&self, params: &DeployWorkerParams) -> Result<()> {
        let url = build_url(
            &self.base_url,
            &format!("/accounts/{}/workers/scripts/{}", self.account_id, params.worker_name),
        )?;

        let mut modules = serde_json::Map::new();
        modules.insert("main.js".to_string(), Value::String(AUTH_WORKER_SCRIPT.to_string()));
        for (name, content) in &params.files {
            modules.insert(name.clone(), Value::String(content.clone()));
        }

        let mut bindings: Vec<Value> = vec![json!({
            "type": "secret_text",
            "name": "ACCESS_TOKEN",
            "text": params.access_token,
        })];
        if let Some(injection) = &params.injection {
            bindings.push(json!({ "type": "plain_text", "name": "WORKER_INJECTION", "text": injection }));
        }
        for (name, value) in &params.bindings {
            bindings.push(json!({ "type": "plain_text", "name": name, "text": value }));
        }

        let body = json!({ "modules": modules, "bindings": bindings, "main_module": "main.js" });
        send_json(Method::PUT, url, Some(body), self.headers()?, DEFAULT_TIMEOUT).await?;

        self.upsert_route(&params.hostname, &params.worker_name).await
    }

    async fn find_route_by_pattern(&self, pattern: &str) -> Result<Option<String>> {
        let url = build_url(&self.base_url, &format!("/zones/{}/workers/routes", self.zone_id))?;
        let value = send_json(Method::GET, url, None, self.headers()?, DEFAULT_TIMEOUT).await?;
        let records = value.get("result").cloned().unwrap_or(Value::Array(Vec::new()));
        let items: Vec<Value> = serde_json::from_value(records)?;
        Ok(items
            .into_iter()
            .find(|r| r.get("pattern").and_then(Value::as_str) == Some(pattern))
            .and_then(|r| r.get("id").and_then(Value::as_str).map(str::to_string)))
    }

    async fn upsert_route(&self, hostname: &str, worker_name: &str) -> Result<()> {
        let pattern = format!("{hostname}/*");
        let body = json!({ "pattern": pattern, "script": worker_name });

        match self.find_route_by_pattern(&pattern).await? {
            Some(route_id) => {
                let url = build_url(&self.base_url, &format!("/zones/{}/workers/routes/{route_id}", self.zone_id))?;
                send_json(Method::PUT, url, Some(body), self.headers()?, DEFAULT_TIMEOUT).await?;
            }
            None => {
                let url = build_url(&self.base_url, &format!("/zones/{}/workers/routes", self.zone_id))?;
                send_json(Method::POST, url, Some(body), self.headers()?, DEFAULT_TIMEOUT).await?;
            }
        }
        Ok(())
    }

    async fn delete_route(&self, hostname: &str) {
        let pattern = format!("{hostname}/*");
        match self.find_route_by_pattern(&pattern).await {
            Ok(Some(route_id)) => {
                let url = build_url(&self.base_url, &format!("/zones/{}/workers/routes/{route_id}", self.zone_id));
                if let (Ok(url), Ok(headers)) = (url, self.headers()) {
                    if let Err(err) = send_json(Method::DELETE, url, None, headers, DEFAULT_TIMEOUT).await {
                        warn!(hostname, %err, "failed to delete worker route, continuing");
                    }
                }
            }
            Ok(None) => {}
            Err(err) => warn!(hostname, %err, "failed to look up worker route for deletion"),
        }
    }

    /// Best-effort teardown of the route, DNS record, and worker module.
    /// All failures are swallowed and logged as warnings.
    pub async fn delete_worker(&self, worker_name: &str, hostname: &str) {
        self.delete_route(hostname).await;

        self.delete_dns_record(hostname).await;

        let script_url = build_url(
            &self.base_url,
            &format!("/accounts/{}/workers/scripts/{worker_name}", self.account_id),
        );
        if let (Ok(url), Ok(headers)) = (script_url, self.headers()) {
            if let Err(err) = send_json(Method::DELETE, url, None, headers, DEFAULT_TIMEOUT).await {
                warn!(worker_name, %err, "failed to delete worker script, continuing");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(uri: &str) -> EdgeClient {
        EdgeClient::new(uri, "token", "acct-1", "zone-1")
    }

    #[tokio::test]
    async fn create_tunnel_creates_when_absent_and_fetches_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/accounts/acct-1/tunnels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/accounts/acct-1/tunnels"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "tunnel_id": "tun-1", "token": "ignored-on-create"
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/accounts/acct-1/tunnels/tun-1/configurations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/accounts/acct-1/tunnels/tun-1/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!("connect-token")))
            .mount(&server)
            .await;

        let edge = client(&server.uri());
        let tunnel = edge.create_tunnel("kml-demo-s", "s.example.com").await.unwrap();
        assert_eq!(tunnel.tunnel_id, "tun-1");
        assert_eq!(tunnel.token, "connect-token");
    }

    #[tokio::test]
    async fn ensure_tunnel_dns_creates_when_absent() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones/zone-1/dns_records"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "result": [] })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/zones/zone-1/dns_records"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;

        let edge = client(&server.uri());
        edge.ensure_tunnel_dns("s.example.com", "tun-1").await.unwrap();
    }

    #[tokio::test]
    async fn ensure_tunnel_dns_is_noop_when_already_correct() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones/zone-1/dns_records"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": [{ "id": "rec-1", "content": "tun-1.cfargotunnel.com" }]
            })))
            .mount(&server)
            .await;
        // No PUT/POST mock registered — if the client issued one, wiremock's
        // unmatched-request panic (on drop, with .expect(0)) would catch it.
        let edge = client(&server.uri());
        edge.ensure_tunnel_dns("s.example.com", "tun-1").await.unwrap();
    }

    #[tokio::test]
    async fn delete_worker_never_fails_even_if_every_step_404s() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/zones/zone-1/workers/routes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": [{ "id": "route-1", "pattern": "s.example.com/*", "script": "kml-demo-s" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/zones/zone-1/workers/routes/route-1"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/zones/zone-1/dns_records"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "result": [] })))
            .mount(&server)
            .await;
        Mock::given(method("DELETE"))
            .and(path("/accounts/acct-1/workers/scripts/kml-demo-s"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let edge = client(&server.uri());
        edge.delete_worker("kml-demo-s", "s.example.com").await;
    }

    #[tokio::test]
    async fn upsert_route_updates_existing_route_by_id_instead_of_creating_duplicate() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/accounts/acct-1/workers/scripts/kml-demo-s"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/zones/zone-1/workers/routes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "result": [{ "id": "route-1", "pattern": "s.example.com/*", "script": "kml-demo-s" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/zones/zone-1/workers/routes/route-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
            .mount(&server)
            .await;
        // No POST to the routes collection endpoint is mounted — if the
        // client fell back to creating instead of updating, the request
        // would go unmatched and wiremock would panic on drop.

        let edge = client(&server.uri());
        edge.deploy_worker(&DeployWorkerParams {
            worker_name: "kml-demo-s".to_string(),
            access_token: "a".repeat(64),
            hostname: "s.example.com".to_string(),
            files: Default::default(),
            bindings: Default::default(),
            injection: None,
        })
        .await
        .unwrap();
    }

    // The worker itself runs at the edge as JavaScript, not in this
    // process, so its request/response behavior (§8 scenario 4) can't be
    // exercised by a Rust test harness. These checks pin the script's
    // literal structure instead, so an edit that drops one of the
    // documented state-machine branches fails loudly here.
    #[test]
    fn auth_worker_script_implements_the_documented_state_machine() {
        assert!(AUTH_WORKER_SCRIPT.contains("/assets/"));
        assert!(AUTH_WORKER_SCRIPT.contains("404"));
        assert!(AUTH_WORKER_SCRIPT.contains("302"));
        assert!(AUTH_WORKER_SCRIPT.contains("kml_token"));
        assert!(AUTH_WORKER_SCRIPT.contains("HttpOnly"));
        assert!(AUTH_WORKER_SCRIPT.contains("constantTimeEqual"));
        assert!(AUTH_WORKER_SCRIPT.contains("websocket"));
    }
}
