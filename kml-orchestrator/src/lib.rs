//! Drives the full start/run/stop/delete lifecycle of one session,
//! composing the sandbox-provider, edge, catalog, and AI-runner clients
//! with ordered creation and best-effort compensating cleanup (C6).

pub mod config;
pub mod events;
pub mod naming;
pub mod pty_adapter;

use std::collections::BTreeMap;
use std::time::Duration;

use kml_ai_runner::{AiRunner, OutputRecord, SessionFlag};
use kml_catalog::SessionCatalog;
use kml_core::error::{KmlError, Result};
use kml_core::util::generate_token;
use kml_edge_client::EdgeClient;
use kml_sandbox_client::{CreateSandboxParams, GitCloneParams, SandboxProviderClient};
use kml_sandbox_client::{WAIT_FOR_SANDBOX_TIMEOUT, WAIT_FOR_STOPPED_TIMEOUT};
use kml_edge_client::DeployWorkerParams;
use tracing::{info, warn};
use uuid::Uuid;

pub use config::{InstallStep, SessionConfig};
pub use events::LifecycleEvent;
use naming::{CODE_PATH, MISE_PATH_EXPORT, database_name, hostname, sandbox_name, tunnel_name, worker_name};
use pty_adapter::SandboxPty;

const DELETE_PROPAGATION_DELAY: Duration = Duration::from_secs(2);
const RESTART_TIMEOUT: Duration = Duration::from_secs(30);
const INSTALL_TIMEOUT: Duration = Duration::from_secs(600);
const FOLLOW_LOGS_TIMEOUT: Duration = Duration::from_secs(3600);

pub struct Orchestrator<'a> {
    provider: &'a SandboxProviderClient,
    edge: &'a EdgeClient,
    catalog: &'a SessionCatalog,
}

impl<'a> Orchestrator<'a> {
    pub fn new(provider: &'a SandboxProviderClient, edge: &'a EdgeClient, catalog: &'a SessionCatalog) -> Self {
        Self { provider, edge, catalog }
    }

    /// Run the eleven-step session lifecycle. `on_event` is invoked as each
    /// durable fact becomes known, so the caller can persist it to the
    /// catalog immediately rather than only at the very end.
    pub async fn start<F>(&self, config: &SessionConfig, mut on_event: F) -> Result<()>
    where
        F: FnMut(LifecycleEvent),
    {
        let sandbox_name = sandbox_name(&config.service_name, &config.slug);
        let snapshot_name = format!("kml-{}", config.service_name);

        // Step 1: delete any pre-existing sandbox of this name.
        if let Some(existing) = self.provider.find_sandbox_by_name(&sandbox_name).await? {
            info!(sandbox = %sandbox_name, "start: deleting pre-existing sandbox");
            self.provider.delete_sandbox(&existing.id).await?;
            tokio::time::sleep(DELETE_PROPAGATION_DELAY).await;
        }

        // Step 2: create a fresh sandbox, record its id immediately.
        let mut params = CreateSandboxParams::new(&snapshot_name, &sandbox_name);
        params.env = config.env.clone().into_iter().collect();
        let sandbox = self.provider.create_sandbox(&params).await?;
        on_event(LifecycleEvent::SandboxCreated { sandbox_id: sandbox.id.clone() });

        // Step 3: wait for readiness.
        self.provider.wait_for_sandbox(&sandbox.id, WAIT_FOR_SANDBOX_TIMEOUT).await?;

        // Step 4: clone the repository, if configured.
        if let Some(repo) = &config.git_repo {
            let url = config::normalize_git_url(repo);
            let clone_params = GitCloneParams {
                url,
                path: CODE_PATH.to_string(),
                branch: config.git_branch.clone(),
                username: config.git_token.as_ref().map(|_| "x-access-token".to_string()),
                password: config.git_token.clone(),
            };
            self.provider.git_clone(&sandbox.id, &clone_params).await?;
        }

        // Step 5: tunnel + DNS. Only create a new tunnel if the caller's
        // config carries no prior `tunnel_id` (§6 resume keys, step 5);
        // otherwise reuse what's already known and just re-assert DNS.
        let tunnel_name = tunnel_name(&config.service_name, &config.slug);
        let hostname = hostname(&config.slug, &config.domain);
        let tunnel = match (&config.resume_tunnel_id, &config.resume_tunnel_token) {
            (Some(tunnel_id), Some(tunnel_token)) => {
                kml_edge_client::TunnelRecord { tunnel_id: tunnel_id.clone(), token: tunnel_token.clone() }
            }
            _ => {
                let tunnel = self.edge.create_tunnel(&tunnel_name, &hostname).await?;
                on_event(LifecycleEvent::TunnelCreated {
                    tunnel_id: tunnel.tunnel_id.clone(),
                    tunnel_token: tunnel.token.clone(),
                });
                tunnel
            }
        };
        self.edge.ensure_tunnel_dns(&hostname, &tunnel.tunnel_id).await?;

        // Step 6: Procfile.
        let procfile = config
            .processes
            .iter()
            .map(|(name, command)| format!("{name}: {command}"))
            .collect::<Vec<_>>()
            .join("\n");
        self.provider
            .upload_file(&sandbox.id, &format!("{CODE_PATH}/Procfile"), procfile.into_bytes())
            .await?;

        // Step 7: PostgreSQL.
        let db_name = database_name(&config.slug);
        self.provider
            .execute_command(&sandbox.id, "sudo service postgresql start", INSTALL_TIMEOUT)
            .await?;
        self.provider
            .execute_command(
                &sandbox.id,
                &format!("createuser -s $(whoami) 2>/dev/null; createdb {db_name} 2>/dev/null; true"),
                INSTALL_TIMEOUT,
            )
            .await?;

        // Step 8: install steps.
        for step in &config.install {
            on_event(LifecycleEvent::InstallStart {
                name: step.name().to_string(),
                command: step.command().to_string(),
            });
            let full_command = format!(
                "cd {CODE_PATH} && {MISE_PATH_EXPORT} && POSTGRES_DB={db_name} {}",
                step.command()
            );
            let result = self.provider.execute_command(&sandbox.id, &full_command, INSTALL_TIMEOUT).await?;
            on_event(LifecycleEvent::InstallComplete {
                name: step.name().to_string(),
                command: step.command().to_string(),
                exit_code: result.exit_code,
                output: result.output.clone(),
            });
            if result.exit_code != 0 {
                return Err(KmlError::InstallFailure {
                    name: step.name().to_string(),
                    command: step.command().to_string(),
                    exit_code: result.exit_code,
                    output: result.output,
                });
            }
        }

        // Step 9: app shell.
        self.provider.create_session(&sandbox.id, "app").await?;
        self.provider
            .session_execute(
                &sandbox.id,
                "app",
                &format!("cd {CODE_PATH} && {MISE_PATH_EXPORT} && POSTGRES_DB={db_name} PORT=3000 overmind start"),
            )
            .await?;

        // Step 10: tunnel shell.
        self.provider
            .upload_file(&sandbox.id, "/tmp/tunnel-token", tunnel.token.clone().into_bytes())
            .await?;
        self.provider.create_session(&sandbox.id, "tunnel").await?;
        self.provider
            .session_execute(
                &sandbox.id,
                "tunnel",
                "cloudflared tunnel run --protocol http2 --token-file /tmp/tunnel-token",
            )
            .await?;

        // Step 11: auth worker.
        let access_token = self
            .catalog
            .find(&config.slug)
            .map(|s| s.record.access_token)
            .ok_or_else(|| KmlError::Precondition(format!("no catalog record for slug {}", config.slug)))?;
        let worker_name = worker_name(&config.service_name, &config.slug);
        self.edge
            .deploy_worker(&DeployWorkerParams {
                worker_name,
                access_token,
                hostname,
                files: config.worker_files.clone().into_iter().collect(),
                bindings: config.worker_bindings.clone().into_iter().collect(),
                injection: config.worker_injection.clone(),
            })
            .await?;

        Ok(())
    }

    /// Run one prompt against the session's assistant. Fails fast if the
    /// sandbox is not in a ready state.
    pub async fn run<F>(
        &self,
        sandbox_id: &str,
        anthropic_token: &str,
        anthropic_base_url: Option<&str>,
        prompt: &str,
        resume: Option<&str>,
        on_record: F,
    ) -> Result<String>
    where
        F: FnMut(OutputRecord) + Send + 'static,
    {
        let sandbox = self.provider.get_sandbox(sandbox_id).await?;
        if !sandbox.state.is_ready() {
            return Err(KmlError::Precondition(format!(
                "sandbox {sandbox_id} is not running (state: {sandbox:?})"
            )));
        }

        let conversation_id = resume.map(str::to_string).unwrap_or_else(|| Uuid::new_v4().to_string());
        let session_flag = match resume {
            Some(uuid) => SessionFlag::Resume(uuid.to_string()),
            None => SessionFlag::New(conversation_id.clone()),
        };

        let executor = SandboxPty::new(self.provider, sandbox_id);
        let runner = AiRunner::new(&executor, anthropic_token.to_string(), anthropic_base_url.map(str::to_string));
        runner.run(prompt, session_flag, on_record).await?;
        Ok(conversation_id)
    }

    /// Stop the sandbox. Tolerates the sandbox already being absent.
    pub async fn stop(&self, sandbox_id: &str) -> Result<()> {
        match self.provider.stop_sandbox(sandbox_id).await {
            Ok(()) => Ok(()),
            Err(KmlError::Transport { status: Some(404), .. }) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Tear down everything owned by this session: stop, wait, delete the
    /// sandbox, then delete the edge worker and tunnel. Cleanup failures
    /// are logged and swallowed, never surfaced to the caller.
    pub async fn delete(
        &self,
        service_name: &str,
        slug: &str,
        sandbox_id: Option<&str>,
        tunnel_id: Option<&str>,
        domain: &str,
    ) {
        if let Some(sandbox_id) = sandbox_id {
            if let Err(err) = self.stop(sandbox_id).await {
                warn!(slug, %err, "delete: failed to stop sandbox, continuing");
            }
            if let Err(err) = self.provider.wait_for_sandbox_stopped(sandbox_id, WAIT_FOR_STOPPED_TIMEOUT).await {
                warn!(slug, %err, "delete: sandbox did not reach stopped state in time, continuing");
            }
            if let Err(err) = self.provider.delete_sandbox(sandbox_id).await {
                warn!(slug, %err, "delete: failed to delete sandbox, continuing");
            }
        }

        let worker_name = worker_name(service_name, slug);
        let hostname = hostname(slug, domain);
        self.edge.delete_worker(&worker_name, &hostname).await;

        if let Some(tunnel_id) = tunnel_id {
            self.edge.delete_tunnel(tunnel_id).await;
        }
    }

    /// Parse `overmind status` output (`name | status` lines) into a map.
    pub async fn process_statuses(&self, sandbox_id: &str) -> Result<BTreeMap<String, String>> {
        let result = self
            .provider
            .execute_command(sandbox_id, &format!("cd {CODE_PATH} && overmind status"), Duration::from_secs(30))
            .await?;
        Ok(parse_overmind_status(&result.output))
    }

    /// Fetch the last `lines` lines of a process's captured `overmind`
    /// output as a one-shot command.
    pub async fn process_logs(&self, sandbox_id: &str, name: &str, lines: u32) -> Result<String> {
        let command = format!("cd {CODE_PATH} && overmind echo {name} | tail -n {lines}");
        let result = self.provider.execute_command(sandbox_id, &command, Duration::from_secs(30)).await?;
        Ok(result.output)
    }

    /// Follow a process's output by attaching to its `overmind` pane over
    /// a PTY; streams raw bytes to `on_chunk` until the caller's command
    /// closes the connection or the process exits.
    pub async fn stream_process_logs(
        &self,
        sandbox_id: &str,
        name: &str,
        on_chunk: &mut (dyn FnMut(&[u8]) + Send),
    ) -> Result<()> {
        let command = format!("cd {CODE_PATH} && overmind connect {name}");
        self.provider.run_pty_command(sandbox_id, &command, FOLLOW_LOGS_TIMEOUT, on_chunk).await?;
        Ok(())
    }

    /// Restart a single named process under `overmind`.
    pub async fn restart_process(&self, sandbox_id: &str, name: &str) -> Result<()> {
        let command = format!("cd {CODE_PATH} && overmind restart {name}");
        let result = self.provider.execute_command(sandbox_id, &command, RESTART_TIMEOUT).await?;
        if result.exit_code != 0 {
            return Err(KmlError::Precondition(format!(
                "overmind restart {name} exited {} ({})",
                result.exit_code, result.output
            )));
        }
        Ok(())
    }
}

fn parse_overmind_status(output: &str) -> BTreeMap<String, String> {
    output
        .lines()
        .filter_map(|line| {
            let (name, status) = line.split_once('|')?;
            Some((name.trim().to_string(), status.trim().to_string()))
        })
        .collect()
}

/// Generate a fresh, never-rotated per-session access token (§3, I2).
pub fn new_access_token() -> String {
    generate_token()
}
