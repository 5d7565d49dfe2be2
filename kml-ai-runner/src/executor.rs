//! Abstraction over "run a shell command in a sandbox's PTY, streaming its
//! output". Kept as a trait local to this crate so it can be implemented
//! on the foreign `SandboxProviderClient` type (orphan-rule compliant)
//! without forcing every caller through that one concrete type.

use std::time::Duration;

use async_trait::async_trait;
use kml_core::error::Result;

#[async_trait]
pub trait PtyExecutor: Send + Sync {
    /// Run `command` in the target sandbox, invoking `on_chunk` with each
    /// raw chunk of PTY output as it arrives. Returns once the command
    /// exits or `timeout` elapses, carrying its exit code if the provider
    /// reported one.
    async fn run_pty(
        &self,
        command: &str,
        timeout: Duration,
        on_chunk: &mut (dyn FnMut(&[u8]) + Send),
    ) -> Result<Option<i64>>;
}
