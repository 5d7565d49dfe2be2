//! Binds a sandbox id to [`SandboxProviderClient`] so it can satisfy
//! [`PtyExecutor`] without implementing a foreign trait on a foreign type
//! from within the wrong crate.

use std::time::Duration;

use async_trait::async_trait;
use kml_ai_runner::PtyExecutor;
use kml_core::error::Result;
use kml_sandbox_client::SandboxProviderClient;

pub struct SandboxPty<'a> {
    client: &'a SandboxProviderClient,
    sandbox_id: String,
}

impl<'a> SandboxPty<'a> {
    pub fn new(client: &'a SandboxProviderClient, sandbox_id: impl Into<String>) -> Self {
        Self { client, sandbox_id: sandbox_id.into() }
    }
}

#[async_trait]
impl<'a> PtyExecutor for SandboxPty<'a> {
    async fn run_pty(
        &self,
        command: &str,
        timeout: Duration,
        on_chunk: &mut (dyn FnMut(&[u8]) + Send),
    ) -> Result<Option<i64>> {
        self.client.run_pty_command(&self.sandbox_id, command, timeout, on_chunk).await
    }
}
